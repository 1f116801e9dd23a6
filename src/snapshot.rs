/// Save/restore state document
///
/// A plain structured document mirroring the model shapes. Every section is
/// optional: a missing section means "leave that model alone" on restore.
///
/// ```
/// use rowpipe::PipelineSnapshot;
///
/// let snapshot = PipelineSnapshot::from_json(r#"{"sorting":{"sortModel":[{"field":"age","sort":"desc"}]}}"#).unwrap();
/// assert_eq!(snapshot.sorting.unwrap().sort_model[0].field, "age");
/// assert!(snapshot.filter.is_none());
/// ```

use crate::aggregation::AggregationModel;
use crate::error::Result;
use crate::filter::FilterModel;
use crate::pagination::PaginationModel;
use crate::sort::SortModel;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortingState {
    pub sort_model: SortModel,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterState {
    pub filter_model: FilterModel,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationSection {
    pub pagination_model: PaginationModel,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationState {
    pub model: AggregationModel,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowGroupingState {
    pub model: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sorting: Option<SortingState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_grouping: Option<RowGroupingState>,
}

impl PipelineSnapshot {
    pub fn is_empty(&self) -> bool {
        *self == PipelineSnapshot::default()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::filter::FilterItem;
    use crate::sort::SortItem;

    #[test]
    fn test_empty_document() {
        let snapshot = PipelineSnapshot::from_json("{}").unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.to_json().unwrap(), "{}");
    }

    #[test]
    fn test_sections_round_trip() {
        let mut aggregation = AggregationModel::new();
        aggregation.insert("value".to_string(), "sum".to_string());

        let snapshot = PipelineSnapshot {
            sorting: Some(SortingState {
                sort_model: vec![SortItem::desc("age")],
            }),
            filter: Some(FilterState {
                filter_model: FilterModel::with_items(vec![FilterItem::new("name", "contains", "a")]),
            }),
            pagination: Some(PaginationSection {
                pagination_model: PaginationModel::new(2, 25),
            }),
            aggregation: Some(AggregationState { model: aggregation }),
            row_grouping: Some(RowGroupingState {
                model: vec!["group".to_string()],
            }),
        };

        let json = snapshot.to_json().unwrap();
        assert!(json.contains(r#""pagination":{"paginationModel":{"page":2,"pageSize":25}}"#));
        assert!(json.contains(r#""rowGrouping":{"model":["group"]}"#));
        assert_eq!(PipelineSnapshot::from_json(&json).unwrap(), snapshot);
    }

    #[test]
    fn test_invalid_document() {
        let err = PipelineSnapshot::from_json(r#"{"sorting":{"sortModel":[{"field":"a","sort":"up"}]}}"#).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState(_)));
    }
}
