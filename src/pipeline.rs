/// Grid Pipeline
///
/// Owns the rows, columns and models of a grid together with everything
/// derived from them, and keeps the derived state current through the fixed
/// stage order Tree → Filter → Sort → Aggregate → Paginate → Virtualize.
/// Setters record what they changed in a `Changeset`; only the stages
/// downstream of a change run again.
///
/// # Consistency
///
/// Derived values are `Rc` snapshots. A recompute fills a fresh
/// `DerivedState` and swaps it in as a whole, so a failing stage leaves the
/// last committed state untouched and the setter that caused the failure
/// restores its inputs before returning the error.
///
/// # Batching
///
/// Between `begin_batch` and `end_batch` setters only record their changes;
/// the recompute runs once when the outermost batch ends. A failure at that
/// point keeps the committed derived state but cannot roll the inputs back.

use crate::aggregation::{
    compute_aggregates, hydrate_footers, sanitize_aggregation_model, AggregationFunction,
    AggregationFunctions, AggregationModel, AggregationPlacement, AggregationResult,
    AggregationRowsScope,
};
use crate::builder::{apply_expansion, GroupingValues, TreePathGetter};
use crate::changeset::{Changeset, Stage, StateKey};
use crate::column::{CellValue, ColumnDef, Columns};
use crate::datasource::{RequestTracker, ServerRequest, ServerResponse};
use crate::dimensions::{
    compute_dimensions, Dimensions, DimensionsInput, Size, DEFAULT_HEADER_HEIGHT,
    DEFAULT_ROW_HEIGHT, DEFAULT_SCROLLBAR_SIZE,
};
use crate::error::{PipelineError, Result};
use crate::events::{EventBus, PipelineEvent, SubscriptionId};
use crate::filter::{build_filter_applier, sanitize_filter_model, FilterMode, FilterModel, FilterResult};
use crate::pagination::{
    paginate, truncate_server_page, PaginationMode, PaginationModel, PaginationState,
};
use crate::processors::{ExportContext, ExportState, HydrateRows, HydrationContext, PipeProcessors, PipeStage};
use crate::row::{RowId, RowIdAccessor, RowRecord, RowRegistry, RowUpdate, UpdateSummary};
use crate::snapshot::{
    AggregationState, FilterState, PaginationSection, PipelineSnapshot, RowGroupingState,
    SortingState,
};
use crate::sort::{sanitize_sort_model, SortItem, SortMode, SortModel};
use crate::strategy::{GroupingStrategy, RowTreeStrategy, StrategyKind, StrategyRegistry, TreeBuildContext};
use crate::tree::{NodeId, RowNode, RowTree};
use crate::virtualization::{
    compute_render_window, ExecutionMode, RenderWindow, ResizeCoalescer, ScrollPosition,
    ScrollTracker, DEFAULT_COLUMN_BUFFER,
};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::mem;
use std::ops::Range;
use std::rc::Rc;
use std::time::Instant;

/// State keys that force the base tree to be rebuilt rather than re-hydrated
const REBUILD_KEYS: [StateKey; 4] = [
    StateKey::Rows,
    StateKey::Columns,
    StateKey::GroupingModel,
    StateKey::Strategy,
];

/// Static configuration of a pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub row_id_accessor: RowIdAccessor,
    pub pagination_enabled: bool,
    pub pagination_mode: PaginationMode,
    /// Initial page and page size
    pub pagination_model: PaginationModel,
    pub filter_mode: FilterMode,
    pub sort_mode: SortMode,
    /// -1 expands every group, `n` expands groups above depth `n`
    pub default_expansion_depth: i32,
    pub aggregation_placement: AggregationPlacement,
    pub aggregation_rows_scope: AggregationRowsScope,
    /// Without a sort model, list leaves before groups among siblings
    pub groups_below_leaves: bool,
    pub row_height: f64,
    pub header_height: f64,
    pub scrollbar_size: f64,
    pub column_buffer: usize,
    pub execution_mode: ExecutionMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            row_id_accessor: RowIdAccessor::default(),
            pagination_enabled: false,
            pagination_mode: PaginationMode::Client,
            pagination_model: PaginationModel::default(),
            filter_mode: FilterMode::Client,
            sort_mode: SortMode::Client,
            default_expansion_depth: -1,
            aggregation_placement: AggregationPlacement::default(),
            aggregation_rows_scope: AggregationRowsScope::default(),
            groups_below_leaves: false,
            row_height: DEFAULT_ROW_HEIGHT,
            header_height: DEFAULT_HEADER_HEIGHT,
            scrollbar_size: DEFAULT_SCROLLBAR_SIZE,
            column_buffer: DEFAULT_COLUMN_BUFFER,
            execution_mode: ExecutionMode::Normal,
        }
    }
}

/// Options of `GridPipeline::get_row_group_children`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupChildrenOptions {
    /// Follow the sorted order instead of the tree order
    pub apply_sorting: bool,
    /// Leave out nodes removed by the filter
    pub apply_filtering: bool,
    /// Leave out groups synthesized from grouping values or path prefixes
    pub skip_auto_generated: bool,
    pub direct_children_only: bool,
}

/// Everything the stages derive, committed as one unit
#[derive(Debug, Clone, Default)]
struct DerivedState {
    /// Tree as built by the strategy, before expansion and hydration
    base_tree: Rc<RowTree>,
    grouping_values: Rc<IndexMap<String, GroupingValues>>,
    tree: Rc<RowTree>,
    filter: Rc<FilterResult>,
    /// Pre-order of every non-root node
    sorted: Rc<Vec<NodeId>>,
    aggregates: Rc<AggregationResult>,
    /// Sorted nodes that pass the filter and sit under expanded groups
    visible: Rc<Vec<NodeId>>,
    positions: Rc<HashMap<NodeId, usize>>,
    pagination: PaginationState,
    dimensions: Dimensions,
    render_window: RenderWindow,
}

pub struct GridPipeline {
    config: PipelineConfig,
    rows: RowRegistry,
    columns: Columns,
    grouping_model: Vec<String>,
    strategies: StrategyRegistry,
    expansion: HashMap<NodeId, bool>,
    processors: PipeProcessors,
    aggregation_functions: AggregationFunctions,
    filter_model: FilterModel,
    sort_model: SortModel,
    aggregation_model: AggregationModel,
    groups_below_leaves: bool,
    pagination: PaginationState,
    viewport: Size,
    resize: ResizeCoalescer,
    scroll: ScrollPosition,
    scroll_tracker: ScrollTracker,
    requests: RequestTracker,
    requested_page: usize,
    changes: Changeset,
    batch_depth: usize,
    derived: DerivedState,
    events: EventBus,
}

impl GridPipeline {
    /// Creates an empty pipeline over `columns`.
    ///
    /// The built-in processors are registered here: footer synthesis for
    /// aggregation and one state-export section per feature.
    pub fn new(columns: Vec<ColumnDef>, config: PipelineConfig) -> Self {
        let mut processors = PipeProcessors::new();
        processors.register::<HydrateRows, _>("aggregation", hydrate_aggregation_footers);
        processors.register::<ExportState, _>("rowGrouping", export_row_grouping);
        processors.register::<ExportState, _>("aggregation", export_aggregation);
        processors.register::<ExportState, _>("filter", export_filter);
        processors.register::<ExportState, _>("sorting", export_sorting);
        processors.register::<ExportState, _>("pagination", export_pagination);

        let pagination = PaginationState::new(config.pagination_model, config.pagination_mode);
        let mut changes = Changeset::new();
        changes.push(StateKey::Rows);
        changes.push(StateKey::Columns);

        GridPipeline {
            rows: RowRegistry::new(config.row_id_accessor.clone()),
            columns: Columns::new(columns),
            grouping_model: Vec::new(),
            strategies: StrategyRegistry::default(),
            expansion: HashMap::new(),
            processors,
            aggregation_functions: AggregationFunctions::default(),
            filter_model: FilterModel::default(),
            sort_model: SortModel::new(),
            aggregation_model: AggregationModel::new(),
            groups_below_leaves: config.groups_below_leaves,
            pagination,
            viewport: Size::default(),
            resize: ResizeCoalescer::new(config.execution_mode),
            scroll: ScrollPosition::default(),
            scroll_tracker: ScrollTracker::default(),
            requests: RequestTracker::default(),
            requested_page: 0,
            changes,
            batch_depth: 0,
            derived: DerivedState {
                pagination,
                ..Default::default()
            },
            events: EventBus::default(),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Number of committed recomputes
    pub fn generation(&self) -> u64 {
        self.changes.generation()
    }

    // ------------------------------------------------------------------
    // Batching and recompute
    // ------------------------------------------------------------------

    pub fn begin_batch(&mut self) {
        self.batch_depth += 1;
    }

    /// Closes a batch; the outermost one recomputes.
    pub fn end_batch(&mut self) -> Result<()> {
        if self.batch_depth == 0 {
            log::warn!("end_batch called without a matching begin_batch");
            return Ok(());
        }
        self.batch_depth -= 1;
        self.recompute()
    }

    pub fn is_batching(&self) -> bool {
        self.batch_depth > 0
    }

    /// Recomputes, restoring the caller's inputs with `rollback` on failure.
    fn commit<F>(&mut self, rollback: F) -> Result<()>
    where
        F: FnOnce(&mut Self),
    {
        match self.recompute() {
            Ok(()) => Ok(()),
            Err(err) => {
                log::debug!("recompute failed, restoring inputs: {}", err);
                rollback(self);
                self.changes.discard();
                Err(err)
            }
        }
    }

    fn recompute(&mut self) -> Result<()> {
        if self.batch_depth > 0 {
            return Ok(());
        }
        let stages = self.changes.dirty_stages();
        if stages.is_empty() {
            return Ok(());
        }

        let strategy = self.strategies.active();
        let mut next = self.derived.clone();
        let mut rebuilt = false;
        for stage in &stages {
            match stage {
                Stage::Tree => rebuilt = self.run_tree(&strategy, &mut next)?,
                Stage::Filter => self.run_filter(&strategy, &mut next)?,
                Stage::Sort => self.run_sort(&strategy, &mut next),
                Stage::Aggregate => self.run_aggregate(&mut next)?,
                Stage::Paginate => self.run_paginate(&mut next),
                Stage::Virtualize => self.run_virtualize(&mut next),
            }
        }

        let previous = mem::replace(&mut self.derived, next);
        self.pagination = self.derived.pagination;
        let events = self.collect_events(&previous, rebuilt);
        self.changes.clear();
        log::debug!(
            "recomputed {:?} (generation {})",
            stages,
            self.changes.generation()
        );

        for event in &events {
            self.events.publish(event);
        }
        Ok(())
    }

    fn run_tree(&self, strategy: &GroupingStrategy, next: &mut DerivedState) -> Result<bool> {
        let rebuild = REBUILD_KEYS.iter().any(|key| self.changes.contains(*key));
        if rebuild {
            let built = strategy.build_tree(&TreeBuildContext {
                rows: &self.rows,
                columns: &self.columns,
                grouping_model: &self.grouping_model,
            })?;
            log::debug!(
                "built {:?} row tree: {} nodes, max depth {}",
                strategy.kind(),
                built.tree.len(),
                built.tree.max_depth()
            );
            next.base_tree = Rc::new(built.tree);
            next.grouping_values = Rc::new(built.grouping_values);
        }

        let mut tree = Rc::clone(&next.base_tree);
        if self.config.default_expansion_depth >= 0 || !self.expansion.is_empty() {
            apply_expansion(
                Rc::make_mut(&mut tree),
                self.config.default_expansion_depth,
                &self.expansion,
            );
        }

        let context = HydrationContext {
            aggregation_model: self.aggregation_model.clone(),
            aggregation_placement: self.config.aggregation_placement,
        };
        let hydrated = self.processors.apply::<HydrateRows>(tree, &context);
        hydrated.verify().map_err(PipelineError::InvalidRowTree)?;
        next.tree = hydrated;
        Ok(rebuild)
    }

    fn run_filter(&self, strategy: &GroupingStrategy, next: &mut DerivedState) -> Result<()> {
        let result = match self.config.filter_mode {
            FilterMode::Server => FilterResult::pass_all(&next.tree),
            FilterMode::Client => {
                let applier = build_filter_applier(&self.filter_model, &self.columns)?;
                if applier.is_noop() {
                    FilterResult::pass_all(&next.tree)
                } else {
                    strategy.filter_rows(&next.tree, &self.rows, &applier)
                }
            }
        };
        next.filter = Rc::new(result);
        Ok(())
    }

    fn run_sort(&self, strategy: &GroupingStrategy, next: &mut DerivedState) {
        let model: &[SortItem] = match self.config.sort_mode {
            SortMode::Server => &[],
            SortMode::Client => &self.sort_model,
        };
        let sorted = strategy.sort_rows(
            &next.tree,
            &self.rows,
            &self.columns,
            model,
            self.groups_below_leaves,
        );
        next.sorted = Rc::new(sorted);
    }

    fn run_aggregate(&self, next: &mut DerivedState) -> Result<()> {
        let included = match self.config.aggregation_rows_scope {
            AggregationRowsScope::Filtered => Some(&next.filter.matching_rows),
            AggregationRowsScope::All => None,
        };
        let result = compute_aggregates(
            &next.tree,
            &self.aggregation_model,
            &self.rows,
            &self.columns,
            &self.aggregation_functions,
            self.config.aggregation_placement,
            included,
        )?;
        next.aggregates = Rc::new(result);
        Ok(())
    }

    fn run_paginate(&self, next: &mut DerivedState) {
        let visible = collect_visible(&next.tree, &next.sorted, &next.filter);
        let mut state = self.pagination;
        if self.config.pagination_mode == PaginationMode::Client {
            state.set_row_count(visible.len() as i64);
        }
        next.positions = Rc::new(
            visible
                .iter()
                .enumerate()
                .map(|(index, id)| (id.clone(), index))
                .collect(),
        );
        next.visible = Rc::new(visible);
        next.pagination = state;
    }

    fn run_virtualize(&self, next: &mut DerivedState) {
        let page = self.page_range(next);
        let dimensions = compute_dimensions(&DimensionsInput {
            root_size: self.viewport,
            header_height: self.config.header_height,
            row_height: self.config.row_height,
            row_count: page.len(),
            columns_width: self.columns.total_width(),
            scrollbar_size: self.config.scrollbar_size,
        });
        next.render_window = compute_render_window(
            &dimensions,
            &self.scroll,
            next.pagination.model.page,
            page.start,
            page.len(),
            &self.columns.positions(),
            self.config.column_buffer,
        );
        next.dimensions = dimensions;
    }

    /// Range of visible rows on the current page. Server pages hold only the
    /// rows of the page, so they are never sliced again.
    fn page_range(&self, derived: &DerivedState) -> Range<usize> {
        let len = derived.visible.len();
        if !self.config.pagination_enabled || self.config.pagination_mode == PaginationMode::Server {
            return 0..len;
        }
        let model = derived.pagination.model;
        let start = model.offset().min(len);
        start..start.saturating_add(model.page_size).min(len)
    }

    fn collect_events(&self, previous: &DerivedState, rebuilt: bool) -> Vec<PipelineEvent> {
        let current = &self.derived;
        let mut events = Vec::new();

        if rebuilt {
            events.push(PipelineEvent::RowTreeRebuilt {
                node_count: current.base_tree.len(),
            });
        }
        if self.changes.contains(StateKey::FilterModel) {
            events.push(PipelineEvent::FilterModelChanged(self.filter_model.clone()));
        }
        if self.changes.contains(StateKey::SortModel) {
            events.push(PipelineEvent::SortModelChanged(self.sort_model.clone()));
        }
        if self.changes.contains(StateKey::AggregationModel) {
            events.push(PipelineEvent::AggregationModelChanged(self.aggregation_model.clone()));
        }
        if previous.pagination.row_count != current.pagination.row_count {
            events.push(PipelineEvent::RowCountChanged(current.pagination.row_count));
        }
        if previous.pagination.model != current.pagination.model {
            events.push(PipelineEvent::PaginationModelChanged(current.pagination.model));
        }
        if previous.dimensions != current.dimensions {
            events.push(PipelineEvent::ViewportChanged(current.dimensions));
        }
        if previous.render_window != current.render_window {
            events.push(PipelineEvent::RenderWindowChanged(current.render_window));
        }
        events
    }

    // ------------------------------------------------------------------
    // Rows
    // ------------------------------------------------------------------

    /// Replaces every row.
    pub fn set_rows(&mut self, rows: Vec<RowRecord>) -> Result<()> {
        let next = self.rows.with_rows(rows)?;
        let previous = mem::replace(&mut self.rows, next);
        self.changes.push(StateKey::Rows);
        self.commit(move |pipeline| pipeline.rows = previous)
    }

    /// Applies upserts and deletes as one change.
    pub fn update_rows(&mut self, updates: Vec<RowUpdate>) -> Result<UpdateSummary> {
        let (next, summary) = self.rows.with_updates(updates)?;
        if summary.is_empty() {
            return Ok(summary);
        }
        let previous = mem::replace(&mut self.rows, next);
        self.changes.push(StateKey::Rows);
        self.commit(move |pipeline| pipeline.rows = previous)?;
        Ok(summary)
    }

    /// Sets the total row count of a server-paginated grid.
    ///
    /// Client grids count their visible rows; the call is ignored there.
    pub fn set_row_count(&mut self, row_count: i64) -> Result<()> {
        if self.config.pagination_mode == PaginationMode::Client {
            log::warn!("row count is derived from the rows in client pagination mode, ignoring");
            return Ok(());
        }
        let previous = self.pagination;
        if !self.pagination.set_row_count(row_count) {
            return Ok(());
        }
        self.changes.push(StateKey::RowCount);
        self.commit(move |pipeline| pipeline.pagination = previous)
    }

    // ------------------------------------------------------------------
    // Columns and models
    // ------------------------------------------------------------------

    /// Replaces the column definitions and re-checks every model against
    /// them.
    pub fn set_columns(&mut self, columns: Vec<ColumnDef>) -> Result<()> {
        let columns = Columns::new(columns);
        let filter_model = match sanitize_filter_model(&self.filter_model, &columns) {
            Ok(model) => model,
            Err(err) => {
                log::warn!("clearing filter model after column change: {}", err);
                FilterModel::default()
            }
        };
        let sort_model = sanitize_sort_model(&self.sort_model, &columns);
        let aggregation_model =
            sanitize_aggregation_model(&self.aggregation_model, &columns, &self.aggregation_functions);

        if filter_model != self.filter_model {
            self.changes.push(StateKey::FilterModel);
        }
        if sort_model != self.sort_model {
            self.changes.push(StateKey::SortModel);
        }
        if aggregation_model != self.aggregation_model {
            self.changes.push(StateKey::AggregationModel);
        }
        self.changes.push(StateKey::Columns);

        let previous_columns = mem::replace(&mut self.columns, columns);
        let previous_filter = mem::replace(&mut self.filter_model, filter_model);
        let previous_sort = mem::replace(&mut self.sort_model, sort_model);
        let previous_aggregation = mem::replace(&mut self.aggregation_model, aggregation_model);
        self.commit(move |pipeline| {
            pipeline.columns = previous_columns;
            pipeline.filter_model = previous_filter;
            pipeline.sort_model = previous_sort;
            pipeline.aggregation_model = previous_aggregation;
        })
    }

    pub fn set_sort_model(&mut self, model: SortModel) -> Result<()> {
        let model = sanitize_sort_model(&model, &self.columns);
        if model == self.sort_model {
            return Ok(());
        }
        let previous = mem::replace(&mut self.sort_model, model);
        self.changes.push(StateKey::SortModel);
        self.requests.reset_cursors();
        self.commit(move |pipeline| pipeline.sort_model = previous)
    }

    /// Sets the filter model. An operator the column does not provide is an
    /// error and leaves the current model in place.
    pub fn set_filter_model(&mut self, model: FilterModel) -> Result<()> {
        let model = sanitize_filter_model(&model, &self.columns)?;
        if model == self.filter_model {
            return Ok(());
        }
        let previous = mem::replace(&mut self.filter_model, model);
        self.changes.push(StateKey::FilterModel);
        self.requests.reset_cursors();
        self.commit(move |pipeline| pipeline.filter_model = previous)
    }

    pub fn set_aggregation_model(&mut self, model: AggregationModel) -> Result<()> {
        let model = sanitize_aggregation_model(&model, &self.columns, &self.aggregation_functions);
        if model == self.aggregation_model {
            return Ok(());
        }
        let previous = mem::replace(&mut self.aggregation_model, model);
        self.changes.push(StateKey::AggregationModel);
        self.commit(move |pipeline| pipeline.aggregation_model = previous)
    }

    /// Registers a custom aggregation function under `name`.
    pub fn register_aggregation_function<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: AggregationFunction + 'static,
    {
        self.aggregation_functions.register(name, function);
    }

    /// Sets the page and page size. A page size of 0 is an error.
    pub fn set_pagination_model(&mut self, model: PaginationModel) -> Result<()> {
        let previous = self.pagination;
        let mut next = self.pagination;
        if !next.set_model(model, self.config.pagination_mode)? {
            return Ok(());
        }
        self.pagination = next;
        self.changes.push(StateKey::Pagination);
        self.commit(move |pipeline| pipeline.pagination = previous)
    }

    /// Groups rows by `fields`, outermost first. An empty model turns row
    /// grouping off.
    pub fn set_row_grouping_model(&mut self, fields: Vec<String>) -> Result<()> {
        let mut model: Vec<String> = Vec::with_capacity(fields.len());
        for field in fields {
            if model.contains(&field) {
                log::warn!("grouping field '{}' listed twice, ignoring the repeat", field);
                continue;
            }
            if let Some(column) = self.columns.get(&field) {
                if !column.groupable {
                    log::warn!("column '{}' is not groupable, ignoring it", field);
                    continue;
                }
            }
            model.push(field);
        }
        if model == self.grouping_model {
            return Ok(());
        }

        let previous_model = mem::replace(&mut self.grouping_model, model);
        let previous_strategies = self.strategies.clone();
        self.strategies
            .set_strategy_availability(StrategyKind::RowGrouping, !self.grouping_model.is_empty());
        self.changes.push(StateKey::GroupingModel);
        self.changes.push(StateKey::Strategy);
        self.commit(move |pipeline| {
            pipeline.grouping_model = previous_model;
            pipeline.strategies = previous_strategies;
        })
    }

    /// Builds the tree from the path each row reports. Two rows with the same
    /// path are an error and keep the previous strategy active.
    pub fn enable_tree_data<F>(&mut self, path_getter: F) -> Result<()>
    where
        F: Fn(&RowRecord) -> Vec<String> + 'static,
    {
        let path_getter: TreePathGetter = Rc::new(path_getter);
        let previous = self.strategies.clone();
        self.strategies.set_path_getter(Some(path_getter));
        self.strategies
            .set_strategy_availability(StrategyKind::TreeData, true);
        self.changes.push(StateKey::Strategy);
        self.commit(move |pipeline| pipeline.strategies = previous)
    }

    pub fn disable_tree_data(&mut self) -> Result<()> {
        if !self.strategies.is_available(StrategyKind::TreeData) {
            return Ok(());
        }
        let previous = self.strategies.clone();
        self.strategies.set_path_getter(None);
        self.changes.push(StateKey::Strategy);
        self.commit(move |pipeline| pipeline.strategies = previous)
    }

    pub fn set_strategy_availability(&mut self, kind: StrategyKind, available: bool) -> Result<()> {
        let previous = self.strategies.clone();
        if !self.strategies.set_strategy_availability(kind, available) {
            return Ok(());
        }
        self.changes.push(StateKey::Strategy);
        self.commit(move |pipeline| pipeline.strategies = previous)
    }

    pub fn active_strategy(&self) -> StrategyKind {
        self.strategies.active_kind()
    }

    /// Lists leaves before groups among siblings while no sort model applies.
    pub fn set_groups_below_leaves(&mut self, enabled: bool) -> Result<()> {
        if enabled == self.groups_below_leaves {
            return Ok(());
        }
        self.groups_below_leaves = enabled;
        self.changes.push(StateKey::SortPolicy);
        self.commit(move |pipeline| pipeline.groups_below_leaves = !enabled)
    }

    /// Expands or collapses a group. The choice survives tree rebuilds for as
    /// long as the group exists.
    pub fn set_row_children_expansion(&mut self, id: &NodeId, expanded: bool) -> Result<()> {
        let group = self
            .derived
            .tree
            .get(id)
            .ok_or_else(|| PipelineError::NodeNotFound(id.clone()))?
            .as_group()
            .ok_or_else(|| PipelineError::NotAGroup(id.clone()))?;
        if group.is_root() || group.children_expanded == expanded {
            return Ok(());
        }

        let previous = self.expansion.insert(id.clone(), expanded);
        self.changes.push(StateKey::Expansion);
        let id = id.clone();
        self.commit(move |pipeline| match previous {
            Some(expanded) => {
                pipeline.expansion.insert(id, expanded);
            }
            None => {
                pipeline.expansion.remove(&id);
            }
        })
    }

    /// Adds a processor to a stage chain.
    ///
    /// Row hydration processors take effect immediately; export processors
    /// run on the next `export_state`. A hydration processor that leaves the
    /// tree inconsistent is rejected and the chain is restored.
    pub fn register_processor<S, F>(&mut self, id: impl Into<String>, processor: F) -> Result<()>
    where
        S: PipeStage,
        F: Fn(S::Value, &S::Context) -> S::Value + 'static,
    {
        let previous = self.processors.chain_snapshot::<S>();
        self.processors.register::<S, F>(id, processor);
        if S::NAME == HydrateRows::NAME {
            self.changes.push(StateKey::Processors);
            return self.commit(move |pipeline| pipeline.processors.restore_chain::<S>(previous));
        }
        Ok(())
    }

    pub fn unregister_processor<S: PipeStage>(&mut self, id: &str) -> Result<bool> {
        let previous = self.processors.chain_snapshot::<S>();
        if !self.processors.unregister::<S>(id) {
            return Ok(false);
        }
        if S::NAME == HydrateRows::NAME {
            self.changes.push(StateKey::Processors);
            self.commit(move |pipeline| pipeline.processors.restore_chain::<S>(previous))?;
        }
        Ok(true)
    }

    pub fn processors(&self) -> &PipeProcessors {
        &self.processors
    }

    // ------------------------------------------------------------------
    // Viewport
    // ------------------------------------------------------------------

    pub fn set_viewport_size(&mut self, size: Size) -> Result<()> {
        self.set_viewport_size_at(size, Instant::now())
    }

    /// Records a resize observed at `now`. Outside fast mode the size is
    /// applied by the first `tick` after the debounce delay.
    pub fn set_viewport_size_at(&mut self, size: Size, now: Instant) -> Result<()> {
        match self.resize.push(size, now) {
            Some(size) => self.apply_viewport(size),
            None => Ok(()),
        }
    }

    /// Advances the resize debounce and the scroll timeout.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        if self.scroll_tracker.tick(now) {
            log::trace!("scroll ended");
        }
        match self.resize.poll(now) {
            Some(size) => self.apply_viewport(size),
            None => Ok(()),
        }
    }

    fn apply_viewport(&mut self, size: Size) -> Result<()> {
        if size == self.viewport {
            return Ok(());
        }
        let previous = mem::replace(&mut self.viewport, size);
        self.changes.push(StateKey::Viewport);
        self.commit(move |pipeline| pipeline.viewport = previous)
    }

    pub fn set_scroll_position(&mut self, position: ScrollPosition) -> Result<()> {
        self.set_scroll_position_at(position, Instant::now())
    }

    pub fn set_scroll_position_at(&mut self, position: ScrollPosition, now: Instant) -> Result<()> {
        self.scroll_tracker.on_scroll(now);
        let position = ScrollPosition::new(position.top.max(0.0), position.left.max(0.0));
        if position == self.scroll {
            return Ok(());
        }
        let previous = mem::replace(&mut self.scroll, position);
        self.changes.push(StateKey::Scroll);
        self.commit(move |pipeline| pipeline.scroll = previous)
    }

    pub fn is_scrolling(&self) -> bool {
        self.scroll_tracker.is_scrolling()
    }

    pub fn scroll_position(&self) -> ScrollPosition {
        self.scroll
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn rows(&self) -> &RowRegistry {
        &self.rows
    }

    pub fn columns(&self) -> &Columns {
        &self.columns
    }

    pub fn filter_model(&self) -> &FilterModel {
        &self.filter_model
    }

    pub fn sort_model(&self) -> &SortModel {
        &self.sort_model
    }

    pub fn aggregation_model(&self) -> &AggregationModel {
        &self.aggregation_model
    }

    pub fn row_grouping_model(&self) -> &[String] {
        &self.grouping_model
    }

    /// The hydrated row tree
    pub fn tree(&self) -> Rc<RowTree> {
        Rc::clone(&self.derived.tree)
    }

    pub fn get_row_node(&self, id: &NodeId) -> Option<&RowNode> {
        self.derived.tree.get(id)
    }

    pub fn get_row(&self, id: &RowId) -> Option<&RowRecord> {
        self.rows.get(id)
    }

    /// Every non-root node in display order, ignoring filter and expansion
    pub fn sorted_node_ids(&self) -> &[NodeId] {
        &self.derived.sorted
    }

    /// Rows matching the filter (all rows while none applies)
    pub fn matching_rows(&self) -> &HashSet<RowId> {
        &self.derived.filter.matching_rows
    }

    pub fn is_node_kept(&self, id: &NodeId) -> bool {
        self.derived.filter.is_kept(id)
    }

    /// Nodes to display: sorted, kept by the filter and under expanded
    /// groups. `paginated` restricts them to the current page.
    pub fn get_visible_rows(&self, paginated: bool) -> &[NodeId] {
        let visible: &[NodeId] = &self.derived.visible;
        if !paginated
            || !self.config.pagination_enabled
            || self.config.pagination_mode == PaginationMode::Server
        {
            return visible;
        }
        paginate(visible, &self.derived.pagination.model)
    }

    /// Position of a node among the rows of the current page
    pub fn get_row_index_relative_to_visible_rows(&self, id: &NodeId) -> Option<usize> {
        let index = *self.derived.positions.get(id)?;
        let page = self.page_range(&self.derived);
        page.contains(&index).then(|| index - page.start)
    }

    /// Descendants of a group, footers excluded.
    pub fn get_row_group_children(&self, group_id: &NodeId, options: GroupChildrenOptions) -> Result<Vec<NodeId>> {
        let tree = &self.derived.tree;
        let group = tree
            .get(group_id)
            .ok_or_else(|| PipelineError::NodeNotFound(group_id.clone()))?
            .as_group()
            .ok_or_else(|| PipelineError::NotAGroup(group_id.clone()))?;

        let candidates: Vec<NodeId> = if options.apply_sorting {
            let sorted = &self.derived.sorted;
            if group.is_root() {
                sorted.to_vec()
            } else {
                match sorted.iter().position(|id| id == group_id) {
                    Some(start) => sorted[start + 1..]
                        .iter()
                        .take_while(|id| tree.get(id).map_or(false, |node| node.depth() > group.depth))
                        .cloned()
                        .collect(),
                    None => Vec::new(),
                }
            }
        } else {
            tree.descendants(group_id)
        };

        Ok(candidates
            .into_iter()
            .filter(|id| {
                let node = match tree.get(id) {
                    Some(node) => node,
                    None => return false,
                };
                if node.is_footer() {
                    return false;
                }
                if options.direct_children_only && node.parent() != Some(group_id) {
                    return false;
                }
                if options.skip_auto_generated && node.as_group().map_or(false, |g| g.is_auto_generated) {
                    return false;
                }
                !options.apply_filtering || self.derived.filter.is_kept(id)
            })
            .collect())
    }

    /// Aggregated value of `field` for a group or its footer.
    pub fn get_aggregated_value(&self, id: &NodeId, field: &str) -> Option<&CellValue> {
        let aggregates = &self.derived.aggregates;
        aggregates.value(id, field).or_else(|| {
            let footer = self.derived.tree.get_group(id)?.footer_id.as_ref()?;
            aggregates.value(footer, field)
        })
    }

    /// Footer nodes synthesized for the current aggregation model
    pub fn aggregation_footers(&self) -> &[NodeId] {
        &self.derived.aggregates.footers
    }

    /// Distinct values seen for a grouping field in the last tree build
    pub fn grouping_values(&self, field: &str) -> Option<&GroupingValues> {
        self.derived.grouping_values.get(field)
    }

    pub fn pagination(&self) -> PaginationState {
        self.derived.pagination
    }

    pub fn dimensions(&self) -> Dimensions {
        self.derived.dimensions
    }

    pub fn render_window(&self) -> RenderWindow {
        self.derived.render_window
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn subscribe<F>(&mut self, subscriber: F) -> SubscriptionId
    where
        F: FnMut(&PipelineEvent) + 'static,
    {
        self.events.subscribe(subscriber)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    // ------------------------------------------------------------------
    // Server data source
    // ------------------------------------------------------------------

    /// Describes the page the grid needs. Any earlier request still in flight
    /// is superseded.
    pub fn request_server_rows(&mut self) -> ServerRequest {
        let model = self.pagination.model;
        self.requested_page = model.page;
        self.requests
            .next_request(&self.filter_model, &self.sort_model, model.page, model.page_size)
    }

    /// Applies the rows of a server page.
    ///
    /// Returns false when the response answers a superseded request and was
    /// dropped.
    pub fn apply_server_response(&mut self, response: ServerResponse) -> Result<bool> {
        if !self.requests.accept(&response, self.requested_page) {
            return Ok(false);
        }
        let ServerResponse {
            rows,
            row_count,
            has_next_page,
            ..
        } = response;

        let rows = truncate_server_page(rows, &self.pagination.model);
        let next = self.rows.with_rows(rows)?;
        let previous_rows = mem::replace(&mut self.rows, next);
        let previous_pagination = self.pagination;

        if let Some(row_count) = row_count {
            self.pagination.set_row_count(row_count);
        } else if let Some(has_next_page) = has_next_page {
            self.pagination.apply_page_info(has_next_page);
        }
        self.changes.push(StateKey::Rows);
        self.changes.push(StateKey::RowCount);
        self.commit(move |pipeline| {
            pipeline.rows = previous_rows;
            pipeline.pagination = previous_pagination;
        })?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // State export / restore
    // ------------------------------------------------------------------

    /// Runs the export processors. With `only_modified`, sections still at
    /// their default value are left out.
    pub fn export_state(&self, only_modified: bool) -> PipelineSnapshot {
        let context = ExportContext {
            sort_model: self.sort_model.clone(),
            filter_model: self.filter_model.clone(),
            pagination_model: self.pagination.model,
            aggregation_model: self.aggregation_model.clone(),
            row_grouping_model: self.grouping_model.clone(),
            only_modified,
        };
        self.processors
            .apply::<ExportState>(PipelineSnapshot::default(), &context)
    }

    /// Applies every section present in `snapshot` in one recompute.
    ///
    /// Sections are applied in dependency order; if one is rejected, the ones
    /// before it stay applied.
    pub fn restore_state(&mut self, snapshot: &PipelineSnapshot) -> Result<()> {
        self.begin_batch();
        let applied = self.apply_snapshot(snapshot);
        let committed = self.end_batch();
        applied.and(committed)
    }

    fn apply_snapshot(&mut self, snapshot: &PipelineSnapshot) -> Result<()> {
        if let Some(section) = &snapshot.row_grouping {
            self.set_row_grouping_model(section.model.clone())?;
        }
        if let Some(section) = &snapshot.aggregation {
            self.set_aggregation_model(section.model.clone())?;
        }
        if let Some(section) = &snapshot.filter {
            self.set_filter_model(section.filter_model.clone())?;
        }
        if let Some(section) = &snapshot.sorting {
            self.set_sort_model(section.sort_model.clone())?;
        }
        if let Some(section) = &snapshot.pagination {
            self.set_pagination_model(section.pagination_model)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for GridPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridPipeline")
            .field("rows", &self.rows.len())
            .field("columns", &self.columns.len())
            .field("strategy", &self.strategies.active_kind())
            .field("nodes", &self.derived.tree.len())
            .field("visible", &self.derived.visible.len())
            .field("generation", &self.changes.generation())
            .finish()
    }
}

/// Sorted nodes kept by the filter whose ancestors are all expanded.
///
/// `sorted` is a pre-order, so a collapsed group hides exactly the following
/// nodes that are deeper than it.
fn collect_visible(tree: &RowTree, sorted: &[NodeId], filter: &FilterResult) -> Vec<NodeId> {
    let mut visible = Vec::with_capacity(sorted.len());
    let mut collapsed_at: Option<i32> = None;

    for id in sorted {
        let node = match tree.get(id) {
            Some(node) => node,
            None => continue,
        };
        let depth = node.depth();
        match collapsed_at {
            Some(collapsed) if depth > collapsed => continue,
            _ => collapsed_at = None,
        }
        if !filter.is_kept(id) {
            continue;
        }
        visible.push(id.clone());
        if let Some(group) = node.as_group() {
            if !group.children_expanded {
                collapsed_at = Some(depth);
            }
        }
    }
    visible
}

/// Footer synthesis for aggregation
fn hydrate_aggregation_footers(mut tree: Rc<RowTree>, context: &HydrationContext) -> Rc<RowTree> {
    if context.aggregation_model.is_empty() && !tree.nodes().any(RowNode::is_footer) {
        return tree;
    }
    if let Err(err) = hydrate_footers(
        Rc::make_mut(&mut tree),
        &context.aggregation_model,
        context.aggregation_placement,
    ) {
        log::warn!("could not synthesize aggregation footers: {}", err);
    }
    tree
}

fn export_sorting(mut snapshot: PipelineSnapshot, context: &ExportContext) -> PipelineSnapshot {
    if !context.only_modified || !context.sort_model.is_empty() {
        snapshot.sorting = Some(SortingState {
            sort_model: context.sort_model.clone(),
        });
    }
    snapshot
}

fn export_filter(mut snapshot: PipelineSnapshot, context: &ExportContext) -> PipelineSnapshot {
    if !context.only_modified || !context.filter_model.is_empty() {
        snapshot.filter = Some(FilterState {
            filter_model: context.filter_model.clone(),
        });
    }
    snapshot
}

fn export_pagination(mut snapshot: PipelineSnapshot, context: &ExportContext) -> PipelineSnapshot {
    if !context.only_modified || context.pagination_model != PaginationModel::default() {
        snapshot.pagination = Some(PaginationSection {
            pagination_model: context.pagination_model,
        });
    }
    snapshot
}

fn export_aggregation(mut snapshot: PipelineSnapshot, context: &ExportContext) -> PipelineSnapshot {
    if !context.only_modified || !context.aggregation_model.is_empty() {
        snapshot.aggregation = Some(AggregationState {
            model: context.aggregation_model.clone(),
        });
    }
    snapshot
}

fn export_row_grouping(mut snapshot: PipelineSnapshot, context: &ExportContext) -> PipelineSnapshot {
    if !context.only_modified || !context.row_grouping_model.is_empty() {
        snapshot.row_grouping = Some(RowGroupingState {
            model: context.row_grouping_model.clone(),
        });
    }
    snapshot
}
