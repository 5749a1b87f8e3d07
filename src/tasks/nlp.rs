//! Natural-language task queries (Turkish and English)
//!
//! A query is reduced to structured filters (status, priority, tags, a due
//! window) plus leftover words. Matching tasks are scored on how often the
//! leftover words appear in title and description.

use super::TaskManager;
use crate::error::Result;
use crate::store::{profiles, tasks as task_store, Priority, Task, TaskStatus};
use chrono::{Datelike, Days, NaiveDate};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static TAG_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)(?:tag:|etiket:|#)([\p{L}\p{N}_\-]+)").expect("static regex")
});

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").expect("static regex"));

/// Longest phrases first so "yüksek öncelik" wins over "yüksek"
const STATUS_PHRASES: &[(&str, StatusWord)] = &[
    ("devam eden", StatusWord::Is(TaskStatus::InProgress)),
    ("in progress", StatusWord::Is(TaskStatus::InProgress)),
    ("in_progress", StatusWord::Is(TaskStatus::InProgress)),
    ("tamamlanan", StatusWord::Is(TaskStatus::Completed)),
    ("tamamlandı", StatusWord::Is(TaskStatus::Completed)),
    ("completed", StatusWord::Is(TaskStatus::Completed)),
    ("done", StatusWord::Is(TaskStatus::Completed)),
    ("bekleyen", StatusWord::Is(TaskStatus::Pending)),
    ("pending", StatusWord::Is(TaskStatus::Pending)),
    ("iptal", StatusWord::Is(TaskStatus::Cancelled)),
    ("cancelled", StatusWord::Is(TaskStatus::Cancelled)),
    ("açık", StatusWord::Open),
    ("open", StatusWord::Open),
];

const PRIORITY_PHRASES: &[(&str, Priority)] = &[
    ("yüksek öncelikli", Priority::High),
    ("yüksek öncelik", Priority::High),
    ("high priority", Priority::High),
    ("düşük öncelikli", Priority::Low),
    ("düşük öncelik", Priority::Low),
    ("low priority", Priority::Low),
    ("orta öncelik", Priority::Medium),
    ("medium priority", Priority::Medium),
    ("acil", Priority::High),
    ("urgent", Priority::High),
    ("yüksek", Priority::High),
    ("high", Priority::High),
    ("düşük", Priority::Low),
    ("low", Priority::Low),
    ("medium", Priority::Medium),
];

const DATE_PHRASES: &[(&str, Relative)] = &[
    ("gelecek hafta", Relative::NextWeek),
    ("next week", Relative::NextWeek),
    ("bu hafta", Relative::ThisWeek),
    ("this week", Relative::ThisWeek),
    ("bugün", Relative::Today),
    ("today", Relative::Today),
    ("yarın", Relative::Tomorrow),
    ("tomorrow", Relative::Tomorrow),
    ("gecikmiş", Relative::Overdue),
    ("geciken", Relative::Overdue),
    ("overdue", Relative::Overdue),
];

/// Words that carry no search meaning
const STOP_WORDS: &[&str] = &[
    "görev", "görevler", "görevleri", "göster", "listele", "bul", "ile", "ve", "olan", "tüm",
    "task", "tasks", "show", "list", "find", "me", "all", "the", "with", "and", "for", "due",
];

#[derive(Debug, Clone, Copy, PartialEq)]
enum StatusWord {
    Is(TaskStatus),
    /// Not completed or cancelled
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relative {
    Today,
    Tomorrow,
    ThisWeek,
    NextWeek,
    Overdue,
    SpecificDate,
}

/// Due-date window, inclusive on both ends
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DueWindow {
    pub relative: Relative,
    pub from: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedQuery {
    pub raw: String,
    pub statuses: Vec<TaskStatus>,
    pub open_only: bool,
    pub priority: Option<Priority>,
    pub tags: Vec<String>,
    pub due: Option<DueWindow>,
    /// Leftover words matched against title and description
    pub terms: Vec<String>,
    /// How much of the query was understood, in [0, 1]
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredTask {
    pub task: Task,
    pub score: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct NlpResults {
    pub parsed: ParsedQuery,
    pub matches: Vec<ScoredTask>,
    /// Matches before truncation
    pub total: usize,
}

fn monday_of(day: NaiveDate) -> NaiveDate {
    day - Days::new(day.weekday().num_days_from_monday() as u64)
}

fn window(relative: Relative, today: NaiveDate) -> DueWindow {
    let (from, until) = match relative {
        Relative::Today => (Some(today), Some(today)),
        Relative::Tomorrow => {
            let day = today + Days::new(1);
            (Some(day), Some(day))
        }
        Relative::ThisWeek => {
            let monday = monday_of(today);
            (Some(monday), Some(monday + Days::new(6)))
        }
        Relative::NextWeek => {
            let monday = monday_of(today) + Days::new(7);
            (Some(monday), Some(monday + Days::new(6)))
        }
        Relative::Overdue => (None, today.pred_opt()),
        Relative::SpecificDate => (Some(today), Some(today)),
    };
    DueWindow { relative, from, until }
}

/// Strip the first occurrence of `phrase` as a whole-word match.
fn take_phrase(text: &mut String, phrase: &str) -> bool {
    let padded = format!(" {text} ");
    let needle = format!(" {phrase} ");
    match padded.find(&needle) {
        Some(pos) => {
            let mut rest = padded;
            rest.replace_range(pos..pos + needle.len(), " ");
            *text = rest.trim().to_string();
            true
        }
        None => false,
    }
}

/// Reduce a free-text query to filters and search terms.
pub fn parse_query(raw: &str, today: NaiveDate) -> ParsedQuery {
    let mut parsed = ParsedQuery {
        raw: raw.to_string(),
        ..Default::default()
    };
    let mut rest = raw.trim().to_lowercase();

    for capture in TAG_TOKEN.captures_iter(&rest.clone()) {
        if let Some(name) = capture.get(1) {
            parsed.tags.push(name.as_str().to_string());
        }
        if let Some(whole) = capture.get(0) {
            rest = rest.replacen(whole.as_str().trim(), " ", 1);
        }
    }
    rest = rest.split_whitespace().collect::<Vec<_>>().join(" ");

    if let Some(capture) = ISO_DATE.captures(&rest.clone()) {
        if let Some(day) = capture.get(1).and_then(|m| super::parse_date(m.as_str())) {
            parsed.due = Some(DueWindow {
                relative: Relative::SpecificDate,
                from: Some(day),
                until: Some(day),
            });
            rest = rest.replacen(&capture[1], " ", 1);
            rest = rest.split_whitespace().collect::<Vec<_>>().join(" ");
        }
    }
    if parsed.due.is_none() {
        for (phrase, relative) in DATE_PHRASES {
            if take_phrase(&mut rest, phrase) {
                parsed.due = Some(window(*relative, today));
                break;
            }
        }
    }

    for (phrase, word) in STATUS_PHRASES {
        if take_phrase(&mut rest, phrase) {
            match word {
                StatusWord::Is(status) => parsed.statuses.push(*status),
                StatusWord::Open => parsed.open_only = true,
            }
            break;
        }
    }

    for (phrase, priority) in PRIORITY_PHRASES {
        if take_phrase(&mut rest, phrase) {
            parsed.priority = Some(*priority);
            break;
        }
    }

    parsed.terms = rest
        .split_whitespace()
        .filter(|w| !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect();

    let mut confidence: f64 = 0.0;
    if parsed.due.is_some() {
        confidence += 0.3;
    }
    if !parsed.statuses.is_empty() || parsed.open_only {
        confidence += 0.25;
    }
    if parsed.priority.is_some() {
        confidence += 0.2;
    }
    if !parsed.tags.is_empty() {
        confidence += 0.25;
    }
    if !parsed.terms.is_empty() {
        confidence += 0.3;
    }
    parsed.confidence = confidence.min(1.0);
    parsed
}

fn score(task: &Task, terms: &[String]) -> u32 {
    let title = task.title.to_lowercase();
    let description = task.description.to_lowercase();
    terms
        .iter()
        .map(|term| (title.matches(term.as_str()).count() * 2 + description.matches(term.as_str()).count()) as u32)
        .sum()
}

impl TaskManager {
    /// Run a natural-language query and rank the matches.
    pub fn nlp_search(&self, query: &str, limit: u32) -> Result<NlpResults> {
        let parsed = parse_query(query, super::today());
        let store_query = task_store::TaskQuery {
            statuses: parsed.statuses.clone(),
            open_only: parsed.open_only || parsed.due.as_ref().is_some_and(|d| d.relative == Relative::Overdue),
            priorities: parsed.priority.into_iter().collect(),
            tags: parsed.tags.clone(),
            due_from: parsed.due.as_ref().and_then(|d| d.from),
            due_until: parsed.due.as_ref().and_then(|d| d.until),
            ..Default::default()
        };

        self.db().write(|tx| {
            let candidates = task_store::list(tx, self.workspace_id(), &store_query)?;
            let mut matches: Vec<ScoredTask> = candidates
                .into_iter()
                .map(|task| ScoredTask {
                    score: score(&task, &parsed.terms),
                    task,
                })
                .filter(|scored| parsed.terms.is_empty() || scored.score > 0)
                .collect();
            // Stable: equal scores keep newest-first order
            matches.sort_by(|a, b| b.score.cmp(&a.score));
            let total = matches.len();
            matches.truncate(limit as usize);

            profiles::record_search(tx, self.workspace_id(), query, "nlp", total as u32)?;
            Ok(NlpResults {
                parsed: parsed.clone(),
                matches,
                total,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::tasks::TaskEdit;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_turkish_and_english_words() {
        let today = day(2026, 3, 11); // Wednesday
        let q = parse_query("yüksek öncelikli devam eden görevler tag:api", today);
        assert_eq!(q.priority, Some(Priority::High));
        assert_eq!(q.statuses, vec![TaskStatus::InProgress]);
        assert_eq!(q.tags, vec!["api"]);
        assert!(q.terms.is_empty());

        let q = parse_query("pending login bug this week", today);
        assert_eq!(q.statuses, vec![TaskStatus::Pending]);
        let due = q.due.unwrap();
        assert_eq!(due.from, Some(day(2026, 3, 9)));
        assert_eq!(due.until, Some(day(2026, 3, 15)));
        assert_eq!(q.terms, vec!["login", "bug"]);
    }

    #[test]
    fn test_confidence_is_bounded() {
        let today = day(2026, 3, 11);
        let q = parse_query("", today);
        assert_eq!(q.confidence, 0.0);
        let q = parse_query("high priority open #api today parser", today);
        assert!(q.confidence > 0.0 && q.confidence <= 1.0);
        assert!(q.open_only);
        assert_eq!(q.due.unwrap().relative, Relative::Today);
    }

    #[test]
    fn test_specific_date_and_overdue() {
        let today = day(2026, 3, 11);
        let q = parse_query("due 2026-04-01", today);
        assert_eq!(q.due.unwrap().from, Some(day(2026, 4, 1)));

        let q = parse_query("gecikmiş görevler", today);
        let due = q.due.unwrap();
        assert_eq!(due.relative, Relative::Overdue);
        assert_eq!(due.until, Some(day(2026, 3, 10)));
    }

    #[test]
    fn test_ranking_and_limit() {
        let tm = manager();
        project(&tm, "P");
        let a = task(&tm, "Parser parser cleanup");
        let b = task(&tm, "Parser docs");
        task(&tm, "Unrelated");
        tm.edit_task(
            &b.id,
            &TaskEdit {
                priority: Some(Priority::High),
                ..Default::default()
            },
        )
        .unwrap();

        let results = tm.nlp_search("parser", 50).unwrap();
        assert_eq!(results.total, 2);
        assert_eq!(results.matches[0].task.id, a.id);

        let results = tm.nlp_search("high priority parser", 1).unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.matches.len(), 1);
        assert_eq!(results.matches[0].task.id, b.id);

        let history = tm.db().read(|c| profiles::history(c, "ws", 10)).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].mode, "nlp");
    }
}
