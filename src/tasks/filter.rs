//! List filter and sort grammar

use crate::store::tasks::{SortOrder, TaskQuery};
use crate::store::{Priority, TaskStatus};
use chrono::{Days, NaiveDate};

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 200;

/// Window of the `urgent` keyword
pub const URGENT_WINDOW_DAYS: u64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    /// Due within the next seven days
    Urgent,
    /// Due before today
    Overdue,
}

impl Keyword {
    pub const NAMES: [&'static str; 2] = ["urgent", "overdue"];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "urgent" => Some(Self::Urgent),
            "overdue" => Some(Self::Overdue),
            _ => None,
        }
    }
}

pub const SORT_NAMES: [&str; 2] = ["due_date_asc", "due_date_desc"];

pub fn parse_sort(s: &str) -> Option<SortOrder> {
    match s.trim() {
        "due_date_asc" => Some(SortOrder::DueDateAsc),
        "due_date_desc" => Some(SortOrder::DueDateDesc),
        _ => None,
    }
}

/// Zero or negative means "use the default"; anything above `max` is clamped.
pub fn normalize_limit(raw: Option<i64>, default: u32, max: u32) -> u32 {
    match raw {
        Some(n) if n > 0 => (n.min(max as i64)) as u32,
        _ => default,
    }
}

pub fn normalize_offset(raw: Option<i64>) -> u32 {
    raw.filter(|n| *n > 0).map_or(0, |n| n.min(u32::MAX as i64) as u32)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListParams {
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub tag: Option<String>,
    /// When false the listing is restricted to the active project (if any)
    pub all_projects: bool,
    pub filter: Option<Keyword>,
    pub sort: SortOrder,
    pub limit: u32,
    pub offset: u32,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            status: None,
            priority: None,
            tag: None,
            all_projects: false,
            filter: None,
            sort: SortOrder::CreatedDesc,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl ListParams {
    pub fn to_query(&self, active_project: Option<String>, today: NaiveDate) -> TaskQuery {
        let mut query = TaskQuery {
            project_id: active_project,
            statuses: self.status.into_iter().collect(),
            priorities: self.priority.into_iter().collect(),
            tags: self.tag.iter().cloned().collect(),
            sort: self.sort,
            limit: Some(self.limit),
            offset: self.offset,
            ..Default::default()
        };
        match self.filter {
            Some(Keyword::Urgent) => {
                query.due_from = Some(today);
                query.due_until = today.checked_add_days(Days::new(URGENT_WINDOW_DAYS));
                query.open_only = true;
            }
            Some(Keyword::Overdue) => {
                query.due_before = Some(today);
                query.open_only = true;
            }
            None => {}
        }
        query
    }
}
