//! MCP tool definitions
//!
//! The catalogue mixes plain tools with unified tools whose `action`,
//! `operation` or `mode` argument selects a sub-operation.

use super::protocol::{InputSchema, ToolDefinition};
use serde_json::{json, Value};

/// Generate all tool definitions
pub fn all_tools() -> Vec<ToolDefinition> {
    let mut tools = Vec::new();
    tools.extend(task_tools());
    tools.extend(template_tools());
    tools.extend(project_tools());
    tools.extend(transfer_tools());
    tools.extend(unified_tools());
    tools
}

/// Whether `name` is a known tool
pub fn is_tool(name: &str) -> bool {
    all_tools().iter().any(|t| t.name == name)
}

fn tool(name: &str, description: &str, properties: Value, required: &[&str]) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: InputSchema {
            schema_type: "object".to_string(),
            properties: Some(properties),
            required: if required.is_empty() {
                None
            } else {
                Some(required.iter().map(|s| s.to_string()).collect())
            },
        },
    }
}

// ============================================================================
// Task Tools (6)
// ============================================================================

fn task_tools() -> Vec<ToolDefinition> {
    vec![
        tool(
            "gorev_listele",
            "List tasks. Restricted to the active project unless all_projects is true.",
            json!({
                "status": {"type": "string", "enum": ["pending", "in_progress", "completed", "cancelled"]},
                "priority": {"type": "string", "enum": ["low", "medium", "high"]},
                "tag": {"type": "string", "description": "Only tasks carrying this tag"},
                "all_projects": {"type": "boolean", "description": "Ignore the active project (default false)"},
                "filter": {"type": "string", "enum": ["urgent", "overdue"]},
                "sort": {"type": "string", "enum": ["due_date_asc", "due_date_desc"]},
                "limit": {"type": "integer", "description": "Max items (default 50, max 200)"},
                "offset": {"type": "integer", "description": "Items to skip"}
            }),
            &[],
        ),
        tool(
            "gorev_detay",
            "Show a task with its project, parent, subtasks and dependencies",
            json!({
                "id": {"type": "string", "description": "Task ID"}
            }),
            &["id"],
        ),
        tool(
            "gorev_guncelle",
            "Change the status of a task. Moving to in_progress requires all dependencies to be completed.",
            json!({
                "id": {"type": "string", "description": "Task ID"},
                "status": {"type": "string", "enum": ["pending", "in_progress", "completed", "cancelled"]}
            }),
            &["id", "status"],
        ),
        tool(
            "gorev_duzenle",
            "Edit task fields. An empty due_date or project_id clears the field.",
            json!({
                "id": {"type": "string", "description": "Task ID"},
                "title": {"type": "string"},
                "description": {"type": "string"},
                "priority": {"type": "string", "enum": ["low", "medium", "high"]},
                "project_id": {"type": "string", "description": "Move a root task (and its subtree) to this project"},
                "due_date": {"type": "string", "description": "YYYY-MM-DD"}
            }),
            &["id"],
        ),
        tool(
            "gorev_sil",
            "Delete a task and its subtasks",
            json!({
                "id": {"type": "string", "description": "Task ID"},
                "confirm": {"type": "boolean", "description": "Must be true"}
            }),
            &["id", "confirm"],
        ),
        tool(
            "gorev_bagimlilik_ekle",
            "Make source_id wait on target_id",
            json!({
                "source_id": {"type": "string", "description": "Task that waits"},
                "target_id": {"type": "string", "description": "Task that must be completed first"},
                "kind": {"type": "string", "enum": ["blocker", "depends_on"], "description": "Default depends_on"}
            }),
            &["source_id", "target_id"],
        ),
    ]
}

// ============================================================================
// Template Tools (2)
// ============================================================================

fn template_tools() -> Vec<ToolDefinition> {
    vec![
        tool(
            "template_listele",
            "List task templates",
            json!({
                "category": {"type": "string", "description": "Only templates of this category"}
            }),
            &[],
        ),
        tool(
            "templateden_gorev_olustur",
            "Create a task from a template. Reserved values: priority, due_date, tags, project_id.",
            json!({
                "template_id": {"type": "string", "description": "Template ID or alias (bug, feature, research, refactor)"},
                "values": {"type": "object", "description": "Field values, all strings", "additionalProperties": {"type": "string"}}
            }),
            &["template_id", "values"],
        ),
    ]
}

// ============================================================================
// Project Tools (4)
// ============================================================================

fn project_tools() -> Vec<ToolDefinition> {
    vec![
        tool(
            "proje_olustur",
            "Create a project",
            json!({
                "name": {"type": "string", "description": "Project name"},
                "definition": {"type": "string", "description": "Project description"}
            }),
            &["name"],
        ),
        tool("proje_listele", "List projects with task counts", json!({}), &[]),
        tool(
            "proje_gorevleri",
            "List the tasks of a project",
            json!({
                "project_id": {"type": "string", "description": "Project ID"},
                "limit": {"type": "integer", "description": "Max items (default 50, max 200)"},
                "offset": {"type": "integer", "description": "Items to skip"}
            }),
            &["project_id"],
        ),
        tool("ozet_goster", "Workspace summary counters", json!({}), &[]),
    ]
}

// ============================================================================
// Export / Import Tools (2)
// ============================================================================

fn transfer_tools() -> Vec<ToolDefinition> {
    vec![
        tool(
            "gorev_export",
            "Export the workspace as a JSON document",
            json!({
                "include_completed": {"type": "boolean", "description": "Default true"},
                "project_ids": {"type": "array", "items": {"type": "string"}},
                "format": {"type": "string", "enum": ["json"]}
            }),
            &[],
        ),
        tool(
            "gorev_import",
            "Import an export document into the workspace",
            json!({
                "data": {"type": "object", "description": "Document produced by gorev_export"},
                "conflict_resolution": {"type": "string", "enum": ["skip", "overwrite"], "description": "Default skip"},
                "dry_run": {"type": "boolean"}
            }),
            &["data"],
        ),
    ]
}

// ============================================================================
// Unified Tools (8)
// ============================================================================

fn unified_tools() -> Vec<ToolDefinition> {
    vec![
        tool(
            "aktif_proje",
            "Set, show or clear the active project",
            json!({
                "action": {"type": "string", "enum": ["set", "get", "clear"]},
                "project_id": {"type": "string", "description": "Required for set"}
            }),
            &["action"],
        ),
        tool(
            "gorev_bulk",
            "Apply one change to many tasks",
            json!({
                "operation": {"type": "string", "enum": ["update", "transition", "tag"]},
                "ids": {"type": "array", "items": {"type": "string"}},
                "data": {
                    "type": "object",
                    "description": "update: field map; transition: status, force, check_dependencies; tag: tags, tag_operation (add|remove|replace)"
                },
                "dry_run": {"type": "boolean"}
            }),
            &["operation", "ids"],
        ),
        tool(
            "gorev_hierarchy",
            "Subtask creation, re-parenting and hierarchy reports",
            json!({
                "action": {"type": "string", "enum": ["create_subtask", "change_parent", "show"]},
                "parent_id": {"type": "string"},
                "title": {"type": "string"},
                "description": {"type": "string"},
                "priority": {"type": "string", "enum": ["low", "medium", "high"]},
                "due_date": {"type": "string", "description": "YYYY-MM-DD"},
                "tags": {"type": "string", "description": "Comma separated"},
                "task_id": {"type": "string"},
                "new_parent_id": {"type": "string", "description": "Empty string makes the task a root"}
            }),
            &["action"],
        ),
        tool(
            "gorev_filter_profile",
            "Saved search filters",
            json!({
                "action": {"type": "string", "enum": ["save", "load", "list", "delete"]},
                "id": {"type": "string"},
                "name": {"type": "string"},
                "description": {"type": "string"},
                "filters": {"type": "object"},
                "search_query": {"type": "string"}
            }),
            &["action"],
        ),
        tool(
            "gorev_file_watch",
            "Link files to tasks; changes move pending tasks to in_progress",
            json!({
                "action": {"type": "string", "enum": ["add", "remove", "list", "stats"]},
                "task_id": {"type": "string"},
                "path": {"type": "string"}
            }),
            &["action"],
        ),
        tool(
            "gorev_ide",
            "Manage the editor extension",
            json!({
                "action": {"type": "string", "enum": ["detect", "install", "uninstall", "status", "update"]},
                "ide": {"type": "string", "enum": ["vscode", "cursor", "windsurf", "all"]}
            }),
            &["action"],
        ),
        tool(
            "gorev_context",
            "AI working context: active task, recent tasks, session summary",
            json!({
                "action": {"type": "string", "enum": ["set_active", "get_active", "recent", "summary"]},
                "task_id": {"type": "string", "description": "Required for set_active"},
                "limit": {"type": "integer", "description": "recent: default 10, max 50"}
            }),
            &["action"],
        ),
        tool(
            "gorev_search",
            "Search tasks",
            json!({
                "mode": {"type": "string", "enum": ["advanced", "nlp", "history"]},
                "query": {"type": "string"},
                "filters": {
                    "type": "object",
                    "properties": {
                        "status": {"type": "array", "items": {"type": "string"}},
                        "priority": {"type": "array", "items": {"type": "string"}},
                        "tags": {"type": "array", "items": {"type": "string"}},
                        "project_id": {"type": "string"},
                        "due_before": {"type": "string"},
                        "due_after": {"type": "string"}
                    }
                },
                "limit": {"type": "integer"}
            }),
            &["mode"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalogue_names_are_unique() {
        let tools = all_tools();
        let names: HashSet<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names.len(), tools.len());
        assert_eq!(tools.len(), 22);
    }

    #[test]
    fn test_unified_tools_require_selector() {
        for name in ["aktif_proje", "gorev_hierarchy", "gorev_context", "gorev_ide"] {
            let def = all_tools().into_iter().find(|t| t.name == name).unwrap();
            assert!(def.input_schema.required.unwrap().contains(&"action".to_string()));
        }
        let bulk = all_tools().into_iter().find(|t| t.name == "gorev_bulk").unwrap();
        assert!(bulk.input_schema.required.unwrap().contains(&"operation".to_string()));
    }

    #[test]
    fn test_schema_serializes_with_camel_case_key() {
        let json = serde_json::to_value(&all_tools()[0]).unwrap();
        assert_eq!(json["inputSchema"]["type"], "object");
        assert!(is_tool("proje_listele"));
        assert!(!is_tool("tools/list"));
    }
}
