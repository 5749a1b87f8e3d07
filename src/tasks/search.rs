//! Structured search, search history and saved filter profiles

use super::TaskManager;
use crate::error::{GorevError, Result};
use crate::store::{profiles, tasks as task_store, FilterProfile, SearchFilters, SearchHistoryEntry, Task};
use serde::Serialize;
use tracing::debug;

pub const DEFAULT_HISTORY_LIMIT: u32 = 20;

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub query: Option<String>,
    pub filters: SearchFilters,
    pub tasks: Vec<Task>,
    /// Matches before the limit was applied
    pub total: u32,
}

/// A profile and the results of running it
#[derive(Debug, Clone, Serialize)]
pub struct LoadedProfile {
    pub profile: FilterProfile,
    pub results: SearchResults,
}

impl TaskManager {
    /// Filter search with an optional substring over title and description.
    pub fn advanced_search(&self, query: Option<&str>, filters: &SearchFilters, limit: u32) -> Result<SearchResults> {
        let query = query.map(str::trim).filter(|q| !q.is_empty());
        let mut store_query = task_store::TaskQuery::from_filters(filters);
        store_query.text = query.map(str::to_string);

        self.db().write(|tx| {
            let total = task_store::count(tx, self.workspace_id(), &store_query)?;
            let mut limited = store_query.clone();
            limited.limit = Some(limit);
            let tasks = task_store::list(tx, self.workspace_id(), &limited)?;

            let recorded = match query {
                Some(q) => q.to_string(),
                None => serde_json::to_string(filters)?,
            };
            profiles::record_search(tx, self.workspace_id(), &recorded, "advanced", total)?;
            Ok(SearchResults {
                query: query.map(str::to_string),
                filters: filters.clone(),
                tasks,
                total,
            })
        })
    }

    pub fn search_history(&self, limit: u32) -> Result<Vec<SearchHistoryEntry>> {
        self.db().read(|conn| profiles::history(conn, self.workspace_id(), limit))
    }

    pub fn save_filter_profile(
        &self,
        name: &str,
        description: &str,
        filters: &SearchFilters,
        search_query: Option<&str>,
    ) -> Result<FilterProfile> {
        if name.trim().is_empty() {
            return Err(GorevError::Validation(
                self.tf("error.required_param", &[("Param", "name")]),
            ));
        }
        let profile = self.db().write(|tx| {
            profiles::save(tx, self.workspace_id(), name, description, filters, search_query)
        })?;
        debug!(workspace_id = %self.workspace_id(), profile_id = %profile.id, "Filter profile saved");
        Ok(profile)
    }

    /// Resolve a profile by id first, then by name.
    fn resolve_profile(&self, conn: &rusqlite::Connection, id_or_name: &str) -> Result<FilterProfile> {
        if let Some(profile) = profiles::find(conn, self.workspace_id(), id_or_name)? {
            return Ok(profile);
        }
        profiles::find_by_name(conn, self.workspace_id(), id_or_name)?
            .ok_or_else(|| GorevError::not_found("filter_profile", id_or_name))
    }

    /// Bump the profile's usage counters and run it.
    pub fn load_filter_profile(&self, id_or_name: &str, limit: u32) -> Result<LoadedProfile> {
        let profile = self.db().write(|tx| {
            let found = self.resolve_profile(tx, id_or_name)?;
            profiles::mark_used(tx, self.workspace_id(), &found.id)
        })?;
        let results = self.advanced_search(profile.search_query.as_deref(), &profile.filters, limit)?;
        Ok(LoadedProfile { profile, results })
    }

    pub fn list_filter_profiles(&self) -> Result<Vec<FilterProfile>> {
        self.db().read(|conn| profiles::list(conn, self.workspace_id()))
    }

    pub fn delete_filter_profile(&self, id_or_name: &str) -> Result<FilterProfile> {
        self.db().write(|tx| {
            let profile = self.resolve_profile(tx, id_or_name)?;
            profiles::delete(tx, self.workspace_id(), &profile.id)?;
            Ok(profile)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::store::{Priority, TaskStatus};
    use crate::tasks::TaskEdit;

    #[test]
    fn test_advanced_search_filters_and_text() {
        let tm = manager();
        project(&tm, "P");
        let a = task(&tm, "Fix login");
        task(&tm, "Write docs");
        tm.edit_task(
            &a.id,
            &TaskEdit {
                priority: Some(Priority::High),
                ..Default::default()
            },
        )
        .unwrap();

        let filters = SearchFilters {
            priority: vec![Priority::High],
            ..Default::default()
        };
        let results = tm.advanced_search(None, &filters, 50).unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.tasks[0].id, a.id);

        let results = tm.advanced_search(Some("DOCS"), &SearchFilters::default(), 50).unwrap();
        assert_eq!(results.total, 1);

        let results = tm.advanced_search(Some("o"), &SearchFilters::default(), 1).unwrap();
        assert_eq!(results.total, 2);
        assert_eq!(results.tasks.len(), 1);

        let history = tm.search_history(DEFAULT_HISTORY_LIMIT).unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|h| h.mode == "advanced"));
    }

    #[test]
    fn test_profile_lifecycle() {
        let tm = manager();
        project(&tm, "P");
        task(&tm, "Open work");
        let filters = SearchFilters {
            status: vec![TaskStatus::Pending],
            ..Default::default()
        };
        let saved = tm.save_filter_profile("pending", "all pending", &filters, None).unwrap();
        assert!(saved.id.parse::<i64>().is_ok());

        let dup = tm.save_filter_profile("pending", "", &filters, None).unwrap_err();
        assert_eq!(dup.kind(), "conflict");

        let loaded = tm.load_filter_profile("pending", 50).unwrap();
        assert_eq!(loaded.profile.use_count, 1);
        assert_eq!(loaded.results.total, 1);

        let loaded = tm.load_filter_profile(&saved.id, 50).unwrap();
        assert_eq!(loaded.profile.use_count, 2);

        tm.delete_filter_profile(&saved.id).unwrap();
        assert!(tm.list_filter_profiles().unwrap().is_empty());
        assert_eq!(tm.delete_filter_profile("pending").unwrap_err().kind(), "not_found");
    }
}
