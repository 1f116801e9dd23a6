/// Error types for the row pipeline
///
/// Only configuration errors surface here. Degraded input (filter items without
/// an operator, aggregation entries on incompatible columns, ...) is logged and
/// repaired inside the pipeline, and transient conditions such as out-of-range
/// scroll offsets are clamped silently.

use crate::row::RowId;
use crate::tree::NodeId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("row at position {index} has no usable id")]
    MissingRowId { index: usize },

    #[error("duplicate row id '{0}'")]
    DuplicateRowId(RowId),

    #[error("rows '{first}' and '{second}' share the tree path '{path}'")]
    DuplicateTreePath {
        path: String,
        first: RowId,
        second: RowId,
    },

    #[error("filter operator '{operator}' is not available for column '{field}'")]
    UnknownFilterOperator { field: String, operator: String },

    #[error("aggregation function '{0}' is not registered")]
    UnknownAggregationFunction(String),

    #[error("aggregation function '{function}' cannot be applied to column '{field}'")]
    IncompatibleAggregation { field: String, function: String },

    #[error("column '{0}' not found")]
    UnknownColumn(String),

    #[error("node '{0}' not found in the row tree")]
    NodeNotFound(NodeId),

    #[error("node '{0}' is not a group")]
    NotAGroup(NodeId),

    #[error("row tree hydration left an inconsistent tree: {0}")]
    InvalidRowTree(String),

    #[error("invalid pagination: {0}")]
    InvalidPagination(String),

    #[error("invalid state document: {0}")]
    InvalidState(String),
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::InvalidState(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PipelineError::DuplicateRowId(RowId::Int(7));
        assert_eq!(err.to_string(), "duplicate row id '7'");

        let err = PipelineError::UnknownFilterOperator {
            field: "age".to_string(),
            operator: "contains".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "filter operator 'contains' is not available for column 'age'"
        );
    }

    #[test]
    fn test_from_json_error() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: PipelineError = parse.unwrap_err().into();
        assert!(matches!(err, PipelineError::InvalidState(_)));
    }
}
