//! Markdown rendering of tool results
//!
//! The text half of a tool result is meant for a chat transcript; the
//! structured half carries the same data as JSON.

use crate::i18n::{t, tf, Lang};
use crate::store::{FilterProfile, Project, SearchHistoryEntry, Summary, Task, TaskStatus, Template, WatchedFile};
use crate::tasks::bulk::BulkReport;
use crate::tasks::context::ContextSummary;
use crate::tasks::hierarchy::{HierarchyReport, TaskNode};
use crate::tasks::nlp::NlpResults;
use crate::tasks::transfer::ImportReport;
use crate::tasks::{Page, TaskDetail};
use std::fmt::Write;

fn status_icon(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "[ ]",
        TaskStatus::InProgress => "[~]",
        TaskStatus::Completed => "[x]",
        TaskStatus::Cancelled => "[-]",
    }
}

/// One bullet line: status, title, id, priority and due date.
pub fn task_line(task: &Task) -> String {
    let mut line = format!(
        "- {} **{}** (`{}`) {}",
        status_icon(task.status),
        task.title,
        task.id,
        task.priority.as_str()
    );
    if let Some(due) = task.due_date {
        let _ = write!(line, " · {due}");
    }
    if !task.tags.is_empty() {
        let _ = write!(line, " · #{}", task.tags.join(" #"));
    }
    if task.unfulfilled_dependency_count > 0 {
        let _ = write!(line, " · ⏳{}", task.unfulfilled_dependency_count);
    }
    line
}

fn task_lines(out: &mut String, tasks: &[Task]) {
    for task in tasks {
        out.push_str(&task_line(task));
        out.push('\n');
    }
}

pub fn task_page(lang: Lang, page: &Page<Task>) -> String {
    if page.items.is_empty() {
        return t(lang, "fmt.no_tasks");
    }
    let mut out = format!(
        "## {}\n\n",
        tf(
            lang,
            "fmt.tasks_heading",
            &[
                ("Shown", &page.items.len().to_string()),
                ("Total", &page.total.to_string())
            ]
        )
    );
    task_lines(&mut out, &page.items);
    out
}

pub fn task_detail(lang: Lang, detail: &TaskDetail) -> String {
    let task = &detail.task;
    let mut out = format!("# {}\n\n", task.title);
    let _ = writeln!(out, "- id: `{}`", task.id);
    let _ = writeln!(out, "- {}: {}", t(lang, "fmt.status"), task.status.as_str());
    let _ = writeln!(out, "- {}: {}", t(lang, "fmt.priority"), task.priority.as_str());
    if let Some(project) = &detail.project {
        let _ = writeln!(out, "- {}: {} (`{}`)", t(lang, "fmt.project"), project.name, project.id);
    }
    if let Some(parent) = &detail.parent {
        let _ = writeln!(out, "- {}: {} (`{}`)", t(lang, "fmt.parent"), parent.title, parent.id);
    }
    if let Some(due) = task.due_date {
        let _ = writeln!(out, "- {}: {}", t(lang, "fmt.due_date"), due);
    }
    if !task.tags.is_empty() {
        let _ = writeln!(out, "- {}: {}", t(lang, "fmt.tags"), task.tags.join(", "));
    }
    if !task.description.is_empty() {
        let _ = write!(out, "\n{}\n", task.description);
    }
    if !detail.subtasks.is_empty() {
        let _ = write!(out, "\n## {}\n\n", t(lang, "fmt.subtasks"));
        task_lines(&mut out, &detail.subtasks);
    }
    if !detail.dependencies.is_empty() {
        let _ = write!(out, "\n## {}\n\n", t(lang, "fmt.dependencies"));
        for dep in &detail.dependencies {
            let _ = writeln!(
                out,
                "- {} {} (`{}`) [{}]",
                status_icon(dep.status),
                dep.title,
                dep.task_id,
                dep.dependency.kind.as_str()
            );
        }
    }
    if !detail.dependents.is_empty() {
        let _ = write!(out, "\n## {}\n\n", t(lang, "fmt.dependents"));
        for dep in &detail.dependents {
            let _ = writeln!(out, "- {} {} (`{}`)", status_icon(dep.status), dep.title, dep.task_id);
        }
    }
    out
}

pub fn projects(lang: Lang, projects: &[Project], active: Option<&str>) -> String {
    if projects.is_empty() {
        return t(lang, "fmt.no_projects");
    }
    let mut out = format!("## {}\n\n", t(lang, "fmt.projects"));
    for project in projects {
        let marker = if active == Some(project.id.as_str()) { " ★" } else { "" };
        let _ = writeln!(
            out,
            "- **{}**{} (`{}`): {}",
            project.name,
            marker,
            project.id,
            tf(lang, "fmt.task_count", &[("Count", &project.task_count.to_string())])
        );
    }
    out
}

pub fn project_line(lang: Lang, key: &str, project: &Project) -> String {
    tf(lang, key, &[("Name", &project.name), ("Id", &project.id)])
}

pub fn summary(lang: Lang, summary: &Summary) -> String {
    let mut out = format!("## {}\n\n", t(lang, "fmt.summary"));
    let _ = writeln!(out, "- {}: {}", t(lang, "fmt.projects"), summary.total_projects);
    let _ = writeln!(out, "- {}: {}", t(lang, "fmt.tasks"), summary.total_tasks);
    for (status, count) in &summary.by_status {
        let _ = writeln!(out, "  - {status}: {count}");
    }
    for (priority, count) in &summary.by_priority {
        let _ = writeln!(out, "  - {priority}: {count}");
    }
    let _ = writeln!(out, "- {}: {}", t(lang, "fmt.overdue"), summary.overdue);
    let _ = writeln!(out, "- {}: {}", t(lang, "fmt.due_soon"), summary.due_soon);
    out
}

pub fn templates(lang: Lang, templates: &[Template]) -> String {
    if templates.is_empty() {
        return t(lang, "fmt.no_templates");
    }
    let mut out = format!("## {}\n\n", t(lang, "fmt.templates"));
    for template in templates {
        let alias = template
            .alias
            .as_deref()
            .map(|a| format!(" alias `{a}`"))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "### {} (`{}`){}\n{} · {}",
            template.name, template.id, alias, template.category, template.description
        );
        for field in &template.fields {
            let required = if field.required { "*" } else { "" };
            let options = if field.options.is_empty() {
                String::new()
            } else {
                format!(" [{}]", field.options.join("|"))
            };
            let _ = writeln!(out, "- `{}`{}{}", field.name, required, options);
        }
        out.push('\n');
    }
    out
}

fn tree_lines(out: &mut String, nodes: &[TaskNode], depth: usize) {
    for node in nodes {
        let _ = writeln!(
            out,
            "{}- {} {} (`{}`)",
            "  ".repeat(depth),
            status_icon(node.task.status),
            node.task.title,
            node.task.id
        );
        tree_lines(out, &node.children, depth + 1);
    }
}

pub fn hierarchy(lang: Lang, report: &HierarchyReport) -> String {
    let mut out = format!("# {}\n\n", report.task.title);
    if !report.ancestors.is_empty() {
        let path: Vec<&str> = report.ancestors.iter().map(|a| a.title.as_str()).collect();
        let _ = writeln!(out, "{}: {}\n", t(lang, "fmt.path"), path.join(" › "));
    }
    let _ = writeln!(
        out,
        "{}",
        tf(
            lang,
            "fmt.progress",
            &[
                ("Total", &report.total_subtasks.to_string()),
                ("Percent", &report.progress_percent.to_string())
            ]
        )
    );
    for (status, count) in &report.by_status {
        let _ = writeln!(out, "- {status}: {count}");
    }
    if !report.subtree.is_empty() {
        out.push('\n');
        tree_lines(&mut out, &report.subtree, 0);
    }
    out
}

pub fn bulk(lang: Lang, report: &BulkReport) -> String {
    let mut out = tf(
        lang,
        "fmt.bulk_result",
        &[
            ("Succeeded", &report.succeeded.len().to_string()),
            ("Failed", &report.failed.len().to_string()),
            ("Processed", &report.processed.to_string()),
        ],
    );
    if report.dry_run {
        let _ = write!(out, " ({})", t(lang, "fmt.dry_run"));
    }
    out.push('\n');
    for failure in &report.failed {
        let _ = writeln!(out, "- ✗ `{}`: {}", failure.id, failure.error);
    }
    for warning in &report.warnings {
        let _ = writeln!(out, "- ! `{}`: {}", warning.id, warning.message);
    }
    out
}

pub fn context_summary(lang: Lang, summary: &ContextSummary) -> String {
    let mut out = format!("## {}\n\n", t(lang, "fmt.context"));
    match &summary.active_task {
        Some(task) => {
            let _ = writeln!(out, "{}:\n{}", t(lang, "fmt.active_task"), task_line(task));
        }
        None => {
            let _ = writeln!(out, "{}", t(lang, "fmt.no_active_task"));
        }
    }
    if let Some(project) = &summary.working_project {
        let _ = writeln!(out, "{}: {} (`{}`)", t(lang, "fmt.project"), project.name, project.id);
    }
    let _ = writeln!(
        out,
        "\n{}",
        tf(
            lang,
            "fmt.session",
            &[
                ("Created", &summary.session.created.to_string()),
                ("Updated", &summary.session.updated.to_string()),
                ("Completed", &summary.session.completed.to_string()),
            ]
        )
    );
    for (key, tasks) in [
        ("fmt.recent", &summary.recent_tasks),
        ("fmt.next_priorities", &summary.next_priorities),
        ("fmt.blockers", &summary.blockers),
    ] {
        if !tasks.is_empty() {
            let _ = write!(out, "\n### {}\n\n", t(lang, key));
            task_lines(&mut out, tasks);
        }
    }
    out
}

pub fn task_list(lang: Lang, heading_key: &str, tasks: &[Task]) -> String {
    if tasks.is_empty() {
        return t(lang, "fmt.no_tasks");
    }
    let mut out = format!("## {}\n\n", t(lang, heading_key));
    task_lines(&mut out, tasks);
    out
}

pub fn nlp(lang: Lang, results: &NlpResults) -> String {
    let mut out = tf(
        lang,
        "fmt.nlp_result",
        &[
            ("Query", &results.parsed.raw),
            ("Total", &results.total.to_string()),
            ("Confidence", &format!("{:.2}", results.parsed.confidence)),
        ],
    );
    out.push_str("\n\n");
    for scored in &results.matches {
        out.push_str(&task_line(&scored.task));
        out.push('\n');
    }
    out
}

pub fn history(lang: Lang, entries: &[SearchHistoryEntry]) -> String {
    if entries.is_empty() {
        return t(lang, "fmt.no_history");
    }
    let mut out = format!("## {}\n\n", t(lang, "fmt.history"));
    for entry in entries {
        let _ = writeln!(
            out,
            "- `{}` [{}] {} → {}",
            entry.created_at.format("%Y-%m-%d %H:%M"),
            entry.mode,
            entry.query,
            entry.result_count
        );
    }
    out
}

pub fn profiles(lang: Lang, profiles: &[FilterProfile]) -> String {
    if profiles.is_empty() {
        return t(lang, "fmt.no_profiles");
    }
    let mut out = format!("## {}\n\n", t(lang, "fmt.profiles"));
    for profile in profiles {
        let _ = writeln!(
            out,
            "- **{}** (`{}`) ×{} {}",
            profile.name, profile.id, profile.use_count, profile.description
        );
    }
    out
}

pub fn watched(lang: Lang, files: &[WatchedFile]) -> String {
    if files.is_empty() {
        return t(lang, "fmt.no_watches");
    }
    let mut out = format!("## {}\n\n", t(lang, "fmt.watches"));
    for file in files {
        let _ = writeln!(out, "- `{}` → `{}`", file.path, file.task_id);
    }
    out
}

pub fn import(lang: Lang, report: &ImportReport) -> String {
    let mut out = tf(
        lang,
        "fmt.import_result",
        &[
            ("Projects", &report.imported_projects.to_string()),
            ("Tasks", &report.imported_tasks.to_string()),
            ("Dependencies", &report.imported_dependencies.to_string()),
            ("Skipped", &report.skipped.to_string()),
        ],
    );
    if report.dry_run {
        let _ = write!(out, " ({})", t(lang, "fmt.dry_run"));
    }
    out.push('\n');
    for conflict in &report.conflicts {
        let _ = writeln!(out, "- {} `{}`", conflict.entity, conflict.id);
    }
    for warning in &report.warnings {
        let _ = writeln!(out, "- ! {warning}");
    }
    out
}
