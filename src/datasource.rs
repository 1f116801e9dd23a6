/// Server data-source contract
///
/// The pipeline never performs I/O. For server-backed grids it issues
/// `ServerRequest`s describing the page it needs, and applies the
/// `ServerResponse` an external collaborator hands back. Requests carry a
/// generation; a response for anything but the latest generation is stale and
/// dropped.

use crate::filter::FilterModel;
use crate::row::RowRecord;
use crate::sort::SortModel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRequest {
    pub generation: u64,
    pub filter_model: FilterModel,
    pub sort_model: SortModel,
    pub page: usize,
    /// Cursor for cursor-based sources, when the previous page returned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub page_size: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerResponse {
    pub generation: u64,
    pub rows: Vec<RowRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_next_page: Option<bool>,
}

/// Tracks the latest request and the cursors returned so far.
#[derive(Debug, Clone, Default)]
pub struct RequestTracker {
    generation: u64,
    in_flight: Option<u64>,
    /// Cursor to use for each page, learned from earlier responses
    cursors: HashMap<usize, String>,
}

impl RequestTracker {
    /// Starts a new request, superseding any in-flight one.
    pub fn next_request(
        &mut self,
        filter_model: &FilterModel,
        sort_model: &SortModel,
        page: usize,
        page_size: usize,
    ) -> ServerRequest {
        self.generation += 1;
        self.in_flight = Some(self.generation);
        ServerRequest {
            generation: self.generation,
            filter_model: filter_model.clone(),
            sort_model: sort_model.clone(),
            page,
            cursor: self.cursors.get(&page).cloned(),
            page_size,
        }
    }

    pub fn latest_generation(&self) -> u64 {
        self.generation
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Accepts the response if it answers the latest request.
    ///
    /// `page` is the page the request asked for; a returned cursor is
    /// remembered for the page after it.
    pub fn accept(&mut self, response: &ServerResponse, page: usize) -> bool {
        if self.in_flight != Some(response.generation) {
            log::debug!(
                "dropping stale server response (generation {}, latest {})",
                response.generation,
                self.generation
            );
            return false;
        }
        self.in_flight = None;
        if let Some(cursor) = &response.next_cursor {
            self.cursors.insert(page + 1, cursor.clone());
        }
        true
    }

    /// Forgets cursors; they are invalid once the filter or sort changes.
    pub fn reset_cursors(&mut self) {
        self.cursors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(generation: u64) -> ServerResponse {
        ServerResponse {
            generation,
            ..Default::default()
        }
    }

    #[test]
    fn test_stale_response_dropped() {
        let mut tracker = RequestTracker::default();
        let first = tracker.next_request(&FilterModel::default(), &Vec::new(), 0, 10);
        let second = tracker.next_request(&FilterModel::default(), &Vec::new(), 1, 10);
        assert_eq!(second.generation, first.generation + 1);

        assert!(!tracker.accept(&response(first.generation), 0));
        assert!(tracker.accept(&response(second.generation), 1));
        // Answered already
        assert!(!tracker.accept(&response(second.generation), 1));
        assert!(!tracker.is_in_flight());
    }

    #[test]
    fn test_cursor_remembered_for_next_page() {
        let mut tracker = RequestTracker::default();
        let request = tracker.next_request(&FilterModel::default(), &Vec::new(), 0, 10);
        let mut reply = response(request.generation);
        reply.next_cursor = Some("abc".to_string());
        assert!(tracker.accept(&reply, 0));

        let next = tracker.next_request(&FilterModel::default(), &Vec::new(), 1, 10);
        assert_eq!(next.cursor.as_deref(), Some("abc"));

        tracker.reset_cursors();
        let again = tracker.next_request(&FilterModel::default(), &Vec::new(), 1, 10);
        assert!(again.cursor.is_none());
    }

    #[test]
    fn test_response_json() {
        let json = r#"{"generation":3,"rows":[{"id":1,"name":"a"}],"hasNextPage":false}"#;
        let response: ServerResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.rows.len(), 1);
        assert_eq!(response.has_next_page, Some(false));
        assert!(response.row_count.is_none());
    }
}
