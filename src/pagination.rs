/// Pagination Stage
///
/// Client mode slices the visible rows. Server mode keeps a row count that is
/// either supplied by the server or inferred from "has next page" signals:
///
/// - no next page while the count is unknown pins the count at the end of the
///   current page
/// - a next page while the count is pinned (by inference) at the current
///   page reopens it to unknown
/// - a page size change while the count is unknown goes back to page 0

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Row count sentinel for "not known yet"
pub const UNKNOWN_ROW_COUNT: i64 = -1;

pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationMode {
    #[default]
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationModel {
    pub page: usize,
    pub page_size: usize,
}

impl Default for PaginationModel {
    fn default() -> Self {
        PaginationModel {
            page: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PaginationModel {
    pub fn new(page: usize, page_size: usize) -> Self {
        PaginationModel { page, page_size }
    }

    /// Index of the first row of the page
    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.page_size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationState {
    pub model: PaginationModel,
    pub row_count: i64,
    /// Set when the row count was inferred from a "no next page" signal
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub inferred: bool,
}

impl Default for PaginationState {
    fn default() -> Self {
        PaginationState {
            model: PaginationModel::default(),
            row_count: 0,
            inferred: false,
        }
    }
}

impl PaginationState {
    pub fn new(model: PaginationModel, mode: PaginationMode) -> Self {
        PaginationState {
            model,
            row_count: match mode {
                PaginationMode::Client => 0,
                PaginationMode::Server => UNKNOWN_ROW_COUNT,
            },
            inferred: false,
        }
    }

    pub fn is_row_count_known(&self) -> bool {
        self.row_count >= 0
    }

    /// Number of pages, at least 1; None while the row count is unknown
    pub fn page_count(&self) -> Option<usize> {
        if !self.is_row_count_known() {
            return None;
        }
        let rows = self.row_count as usize;
        Some(rows.div_ceil(self.model.page_size.max(1)).max(1))
    }

    /// Moves the page back onto the last page. An empty row set keeps the
    /// requested page so rows arriving later land on it.
    fn clamp_page(&mut self) {
        if self.row_count <= 0 {
            return;
        }
        if let Some(pages) = self.page_count() {
            if self.model.page >= pages {
                self.model.page = pages - 1;
            }
        }
    }

    /// Applies a new page/page size.
    ///
    /// Returns true when the stored model changed.
    pub fn set_model(&mut self, model: PaginationModel, mode: PaginationMode) -> Result<bool> {
        if model.page_size == 0 {
            return Err(PipelineError::InvalidPagination(
                "page size must be greater than 0".to_string(),
            ));
        }

        let previous = self.model;
        let page_size_changed = model.page_size != previous.page_size;
        self.model = model;

        if mode == PaginationMode::Server && !self.is_row_count_known() && page_size_changed {
            self.model.page = 0;
        } else {
            if self.inferred && page_size_changed {
                // The inferred count was tied to the old page size
                self.row_count = UNKNOWN_ROW_COUNT;
                self.inferred = false;
                self.model.page = 0;
            }
            self.clamp_page();
        }

        Ok(self.model != previous)
    }

    /// Sets an authoritative row count. Returns true when it changed.
    pub fn set_row_count(&mut self, row_count: i64) -> bool {
        let row_count = row_count.max(UNKNOWN_ROW_COUNT);
        let changed = row_count != self.row_count;
        self.row_count = row_count;
        self.inferred = false;
        self.clamp_page();
        changed
    }

    /// Server "has next page" signal for the current page.
    ///
    /// Returns true when the row count changed.
    pub fn apply_page_info(&mut self, has_next_page: bool) -> bool {
        let pinned_here = self.model.page_size as i64 * (self.model.page as i64 + 1);

        if !has_next_page && !self.is_row_count_known() {
            self.row_count = pinned_here;
            self.inferred = true;
            return true;
        }
        if has_next_page && self.inferred && self.row_count == pinned_here {
            self.row_count = UNKNOWN_ROW_COUNT;
            self.inferred = false;
            return true;
        }
        false
    }
}

/// Slice of `ids` shown on the model's page.
pub fn paginate<'a, T>(ids: &'a [T], model: &PaginationModel) -> &'a [T] {
    let start = model.offset().min(ids.len());
    let end = start.saturating_add(model.page_size).min(ids.len());
    &ids[start..end]
}

/// Trims a server page that holds more rows than the page size.
pub fn truncate_server_page<T>(mut rows: Vec<T>, model: &PaginationModel) -> Vec<T> {
    if rows.len() > model.page_size {
        log::warn!(
            "server returned {} rows for a page of {}, truncating",
            rows.len(),
            model.page_size
        );
        rows.truncate(model.page_size);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginate_slices() {
        let ids: Vec<usize> = (0..3).collect();
        assert_eq!(paginate(&ids, &PaginationModel::new(1, 2)), &[2]);
        assert_eq!(paginate(&ids, &PaginationModel::new(0, 2)), &[0, 1]);
        assert!(paginate(&ids, &PaginationModel::new(5, 2)).is_empty());
    }

    #[test]
    fn test_slice_length_property() {
        for row_count in 0..12usize {
            let ids: Vec<usize> = (0..row_count).collect();
            for page_size in 1..5usize {
                for page in 0..6usize {
                    let slice = paginate(&ids, &PaginationModel::new(page, page_size));
                    let expected = if page * page_size < row_count {
                        page_size.min(row_count - page * page_size)
                    } else {
                        0
                    };
                    assert_eq!(slice.len(), expected, "rows={} page={} size={}", row_count, page, page_size);
                }
            }
        }
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let mut state = PaginationState::default();
        assert!(state.set_model(PaginationModel::new(0, 0), PaginationMode::Client).is_err());
        assert_eq!(state.model, PaginationModel::default());
    }

    #[test]
    fn test_page_clamped_on_size_change() {
        let mut state = PaginationState::default();
        state.set_row_count(25);
        state.set_model(PaginationModel::new(4, 5), PaginationMode::Client).unwrap();
        assert_eq!(state.model.page, 4);

        state.set_model(PaginationModel::new(4, 10), PaginationMode::Client).unwrap();
        assert_eq!(state.model, PaginationModel::new(2, 10));

        state.set_row_count(3);
        assert_eq!(state.model.page, 0);
    }

    #[test]
    fn test_server_inference() {
        let mut state = PaginationState::new(PaginationModel::new(0, 10), PaginationMode::Server);
        assert_eq!(state.row_count, UNKNOWN_ROW_COUNT);

        // More pages: count stays unknown
        assert!(!state.apply_page_info(true));
        state.set_model(PaginationModel::new(2, 10), PaginationMode::Server).unwrap();
        assert_eq!(state.model.page, 2);

        // Last page reached
        assert!(state.apply_page_info(false));
        assert_eq!(state.row_count, 30);
        assert!(state.inferred);

        // Rows appeared after the pinned end: reopen
        assert!(state.apply_page_info(true));
        assert_eq!(state.row_count, UNKNOWN_ROW_COUNT);
    }

    #[test]
    fn test_explicit_count_not_reopened() {
        let mut state = PaginationState::new(PaginationModel::new(2, 10), PaginationMode::Server);
        state.set_row_count(30);
        assert!(!state.apply_page_info(true));
        assert_eq!(state.row_count, 30);
    }

    #[test]
    fn test_page_size_change_with_unknown_count_resets() {
        let mut state = PaginationState::new(PaginationModel::new(3, 10), PaginationMode::Server);
        state.set_model(PaginationModel::new(3, 25), PaginationMode::Server).unwrap();
        assert_eq!(state.model, PaginationModel::new(0, 25));

        // Page change alone keeps the page
        state.set_model(PaginationModel::new(4, 25), PaginationMode::Server).unwrap();
        assert_eq!(state.model.page, 4);
    }

    #[test]
    fn test_truncate_server_page() {
        let rows = truncate_server_page(vec![1, 2, 3, 4], &PaginationModel::new(0, 3));
        assert_eq!(rows, vec![1, 2, 3]);
    }

    #[test]
    fn test_state_json() {
        let state = PaginationState::new(PaginationModel::new(1, 20), PaginationMode::Server);
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"{"model":{"page":1,"pageSize":20},"rowCount":-1}"#);
    }
}
