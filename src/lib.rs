/// rowpipe - Hierarchical Row Pipeline for Data Grids
///
/// Turns a flat set of rows into what a data grid displays: a row tree
/// (flat, grouped by column values, or built from tree-data paths), filtered,
/// sorted, aggregated into group footers, paginated and cut down to the
/// window of rows and columns inside the viewport.
///
/// `GridPipeline` owns the inputs and the derived state and recomputes only
/// the stages downstream of each change. Every stage is also available as a
/// plain function over a `RowTree` for callers that drive it themselves.

pub mod aggregation;
pub mod builder;
pub mod changeset;
pub mod column;
pub mod datasource;
pub mod dimensions;
pub mod error;
pub mod events;
pub mod filter;
pub mod pagination;
pub mod pipeline;
pub mod processors;
pub mod row;
pub mod snapshot;
pub mod sort;
pub mod strategy;
pub mod tree;
pub mod virtualization;

pub use aggregation::{
    compute_aggregates, AggregationFunction, AggregationFunctions, AggregationModel,
    AggregationPlacement, AggregationResult, AggregationRowsScope,
};
pub use builder::{apply_expansion, build_flat_tree, build_grouped_tree, build_tree_data, BuiltTree, GroupingValues, TreePathGetter};
pub use changeset::{Changeset, Stage, StateKey};
pub use column::{CellValue, ColumnDef, ColumnType, Columns};
pub use datasource::{RequestTracker, ServerRequest, ServerResponse};
pub use dimensions::{compute_dimensions, Dimensions, DimensionsInput, Size};
pub use error::{PipelineError, Result};
pub use events::{EventBus, PipelineEvent, SubscriptionId};
pub use filter::{
    build_filter_applier, filter_tree, FilterApplier, FilterItem, FilterMode, FilterModel,
    FilterOperator, FilterResult, FilterValue, LogicOperator,
};
pub use pagination::{paginate, PaginationMode, PaginationModel, PaginationState};
pub use pipeline::{GridPipeline, GroupChildrenOptions, PipelineConfig};
pub use processors::{ExportContext, ExportState, HydrateRows, HydrationContext, PipeProcessors, PipeStage};
pub use row::{RowId, RowIdAccessor, RowRecord, RowRegistry, RowUpdate, UpdateSummary};
pub use snapshot::PipelineSnapshot;
pub use sort::{sort_tree, SortDirection, SortItem, SortMode, SortModel};
pub use strategy::{GroupingStrategy, RowTreeStrategy, StrategyKind, StrategyRegistry};
pub use tree::{FooterNode, GroupNode, LeafNode, NodeId, RowNode, RowTree};
pub use virtualization::{ExecutionMode, RenderWindow, ScrollPosition};
