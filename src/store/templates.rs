//! Task templates
//!
//! Builtin templates are stored once with an empty `workspace_id` and are
//! visible from every workspace. Imported custom templates belong to a
//! single workspace.

use super::models::{FieldType, Template, TemplateField};
use crate::error::{GorevError, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

const SELECT_TEMPLATE: &str = "
    SELECT id, alias, name, description, category, default_title,
           description_template, fields, builtin
    FROM templates";

fn field(name: &str, field_type: FieldType, required: bool) -> TemplateField {
    TemplateField {
        name: name.to_string(),
        field_type,
        required,
        default: None,
        options: Vec::new(),
    }
}

fn select(name: &str, required: bool, default: Option<&str>, options: &[&str]) -> TemplateField {
    TemplateField {
        default: default.map(str::to_string),
        options: options.iter().map(|o| o.to_string()).collect(),
        ..field(name, FieldType::Select, required)
    }
}

fn with_default(mut field: TemplateField, default: &str) -> TemplateField {
    field.default = Some(default.to_string());
    field
}

/// The seeded set, keyed by alias.
pub fn builtin_templates() -> Vec<Template> {
    use FieldType::{Date, Text};
    let priorities = ["low", "medium", "high"];

    let builtin = |alias: &str, name: &str, description: &str, category: &str, title: &str, body: &str, fields: Vec<TemplateField>| Template {
        id: format!("builtin-{alias}"),
        alias: Some(alias.to_string()),
        name: name.to_string(),
        description: description.to_string(),
        category: category.to_string(),
        default_title: title.to_string(),
        description_template: body.to_string(),
        fields,
        builtin: true,
    };

    vec![
        builtin(
            "bug",
            "Bug Report",
            "Detailed template for reporting a software defect",
            "technical",
            "[{{module}}] {{title}}",
            "## Description\n{{description}}\n\n## Where\nModule: {{module}}\nEnvironment: {{environment}}\n\n\
             ## Steps to reproduce\n{{steps}}\n\n## Expected\n{{expected}}\n\n## Actual\n{{actual}}",
            vec![
                field("title", Text, true),
                field("description", Text, true),
                field("module", Text, true),
                select("environment", true, None, &["development", "staging", "production"]),
                field("steps", Text, true),
                field("expected", Text, true),
                field("actual", Text, true),
                select("priority", true, Some("medium"), &priorities),
                with_default(field("tags", Text, false), "bug"),
            ],
        ),
        builtin(
            "feature",
            "Feature Request",
            "Template for proposing new functionality",
            "feature",
            "{{title}}",
            "## Description\n{{description}}\n\n## Purpose\n{{purpose}}\n\n## Users\n{{users}}\n\n\
             ## Acceptance criteria\n{{criteria}}",
            vec![
                field("title", Text, true),
                field("description", Text, true),
                field("purpose", Text, true),
                field("users", Text, false),
                field("criteria", Text, true),
                field("due_date", Date, false),
                select("priority", true, Some("medium"), &priorities),
                with_default(field("tags", Text, false), "feature"),
            ],
        ),
        builtin(
            "research",
            "Research Task",
            "Time-boxed investigation with a clear question",
            "research",
            "Research: {{topic}}",
            "## Topic\n{{topic}}\n\n## Goal\n{{goal}}\n\n## Questions\n{{questions}}\n\n\
             ## Success criteria\n{{criteria}}",
            vec![
                field("topic", Text, true),
                field("goal", Text, true),
                field("questions", Text, true),
                field("criteria", Text, false),
                field("due_date", Date, false),
                select("priority", true, Some("medium"), &priorities),
                with_default(field("tags", Text, false), "research"),
            ],
        ),
        builtin(
            "refactor",
            "Technical Debt",
            "Refactoring or clean-up of existing code",
            "technical",
            "Refactor: {{area}} - {{title}}",
            "## Area\n{{area}}\n\n## Problem\n{{description}}\n\n## Reason\n{{reason}}\n\n\
             ## Proposed approach\n{{approach}}\n\n## Estimate\n{{estimate}}",
            vec![
                field("title", Text, true),
                field("description", Text, true),
                field("area", Text, true),
                field("reason", Text, true),
                field("approach", Text, false),
                select("estimate", false, Some("medium"), &["small", "medium", "large"]),
                select("priority", true, Some("medium"), &priorities),
                with_default(field("tags", Text, false), "tech-debt"),
            ],
        ),
    ]
}

/// Insert the builtin templates that are not present yet (matched by alias).
pub fn seed_defaults(conn: &Connection) -> Result<usize> {
    let mut inserted = 0;
    for template in builtin_templates() {
        inserted += conn.execute(
            "INSERT OR IGNORE INTO templates
                (id, workspace_id, alias, name, description, category, default_title,
                 description_template, fields, builtin, created_at)
             VALUES (?1, '', ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9)",
            params![
                template.id,
                template.alias,
                template.name,
                template.description,
                template.category,
                template.default_title,
                template.description_template,
                serde_json::to_string(&template.fields)?,
                Utc::now()
            ],
        )?;
    }
    if inserted > 0 {
        debug!(inserted, "Seeded builtin templates");
    }
    Ok(inserted)
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<Template> {
    let fields_json: String = row.get(7)?;
    let fields = serde_json::from_str(&fields_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Template {
        id: row.get(0)?,
        alias: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        default_title: row.get(5)?,
        description_template: row.get(6)?,
        fields,
        builtin: row.get(8)?,
    })
}

/// Builtins plus the workspace's own templates, optionally one category.
pub fn list(conn: &Connection, workspace_id: &str, category: Option<&str>) -> Result<Vec<Template>> {
    let sql = format!(
        "{SELECT_TEMPLATE} WHERE workspace_id IN ('', ?1) AND (?2 IS NULL OR category = ?2)
         ORDER BY builtin DESC, category, name"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![workspace_id, category], from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Resolve by id first, then by alias.
pub fn get(conn: &Connection, workspace_id: &str, id_or_alias: &str) -> Result<Template> {
    let by_id = format!("{SELECT_TEMPLATE} WHERE workspace_id IN ('', ?1) AND id = ?2");
    if let Some(template) = conn
        .query_row(&by_id, params![workspace_id, id_or_alias], from_row)
        .optional()?
    {
        return Ok(template);
    }
    // Workspace templates shadow builtins with the same alias
    let by_alias = format!(
        "{SELECT_TEMPLATE} WHERE workspace_id IN ('', ?1) AND alias = ?2
         ORDER BY builtin ASC LIMIT 1"
    );
    conn.query_row(&by_alias, params![workspace_id, id_or_alias], from_row)
        .optional()?
        .ok_or_else(|| GorevError::not_found("template", id_or_alias))
}

/// Store a workspace template (import).
pub fn insert_row(conn: &Connection, workspace_id: &str, template: &Template) -> Result<()> {
    conn.execute(
        "INSERT INTO templates
            (id, workspace_id, alias, name, description, category, default_title,
             description_template, fields, builtin, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10)",
        params![
            template.id,
            workspace_id,
            template.alias,
            template.name,
            template.description,
            template.category,
            template.default_title,
            template.description_template,
            serde_json::to_string(&template.fields)?,
            Utc::now()
        ],
    )
    .map_err(|e| super::conflict_on_unique(e, || format!("template already exists: {}", template.id)))?;
    Ok(())
}

/// Non-builtin templates of the workspace.
pub fn custom(conn: &Connection, workspace_id: &str) -> Result<Vec<Template>> {
    let sql = format!("{SELECT_TEMPLATE} WHERE workspace_id = ?1 AND builtin = 0 ORDER BY name");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![workspace_id], from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    #[test]
    fn test_seed_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.write(|tx| seed_defaults(tx)).unwrap(), 0);
        assert_eq!(
            db.read(|conn| list(conn, "any", None)).unwrap().len(),
            builtin_templates().len()
        );
    }

    #[test]
    fn test_lookup_by_alias_and_category() {
        let db = Database::open_in_memory().unwrap();
        let bug = db.read(|conn| get(conn, "ws", "bug")).unwrap();
        assert_eq!(bug.name, "Bug Report");
        assert!(bug.builtin);
        assert_eq!(db.read(|conn| get(conn, "ws", &bug.id)).unwrap().id, bug.id);

        let technical = db.read(|conn| list(conn, "ws", Some("technical"))).unwrap();
        assert_eq!(technical.len(), 2);

        let err = db.read(|conn| get(conn, "ws", "nope")).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_custom_templates_are_workspace_scoped() {
        let db = Database::open_in_memory().unwrap();
        let mut custom_tpl = builtin_templates().remove(0);
        custom_tpl.id = "custom-1".into();
        custom_tpl.alias = Some("mybug".into());
        custom_tpl.builtin = false;
        db.write(|tx| insert_row(tx, "a", &custom_tpl)).unwrap();

        assert_eq!(db.read(|conn| custom(conn, "a")).unwrap().len(), 1);
        assert!(db.read(|conn| custom(conn, "b")).unwrap().is_empty());
        assert!(db.read(|conn| get(conn, "b", "mybug")).is_err());
    }
}
