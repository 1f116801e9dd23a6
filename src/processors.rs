/// Pipe processors
///
/// Ordered, named hooks that features attach to a pipeline stage. Each stage
/// is a marker type declaring the value flowing through the chain and the
/// context every processor receives. Processors compose left to right; a
/// stage with no processors passes its initial value through.
///
/// The registry only guarantees ordering and composition, it knows nothing
/// about what the processors do.

use crate::aggregation::{AggregationModel, AggregationPlacement};
use crate::filter::FilterModel;
use crate::pagination::PaginationModel;
use crate::snapshot::PipelineSnapshot;
use crate::sort::SortModel;
use crate::tree::RowTree;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::rc::Rc;

/// A pipeline stage processors can attach to
pub trait PipeStage: 'static {
    type Value: 'static;
    type Context: 'static;
    const NAME: &'static str;
}

/// Processor of a stage: previous output plus the shared context in, new
/// value out
pub type Processor<S> =
    Rc<dyn Fn(<S as PipeStage>::Value, &<S as PipeStage>::Context) -> <S as PipeStage>::Value>;

/// Post-build pass over the row tree (footer synthesis and the like)
pub struct HydrateRows;

/// Context handed to the `HydrateRows` processors
#[derive(Debug, Clone, Default)]
pub struct HydrationContext {
    pub aggregation_model: AggregationModel,
    pub aggregation_placement: AggregationPlacement,
}

impl PipeStage for HydrateRows {
    type Value = Rc<RowTree>;
    type Context = HydrationContext;
    const NAME: &'static str = "hydrateRows";
}

/// Builds the save/restore state document, one section per feature
pub struct ExportState;

/// Models available to the `ExportState` processors
#[derive(Debug, Clone, Default)]
pub struct ExportContext {
    pub sort_model: SortModel,
    pub filter_model: FilterModel,
    pub pagination_model: PaginationModel,
    pub aggregation_model: AggregationModel,
    pub row_grouping_model: Vec<String>,
    /// Leave out sections still at their default value
    pub only_modified: bool,
}

impl PipeStage for ExportState {
    type Value = PipelineSnapshot;
    type Context = ExportContext;
    const NAME: &'static str = "exportState";
}

/// Processors for every stage, keyed by stage type.
#[derive(Default)]
pub struct PipeProcessors {
    chains: HashMap<TypeId, Box<dyn Any>>,
}

impl PipeProcessors {
    pub fn new() -> Self {
        Self::default()
    }

    fn chain<S: PipeStage>(&self) -> Option<&Vec<(String, Processor<S>)>> {
        self.chains
            .get(&TypeId::of::<S>())
            .and_then(|chain| chain.downcast_ref::<Vec<(String, Processor<S>)>>())
    }

    fn chain_mut<S: PipeStage>(&mut self) -> Option<&mut Vec<(String, Processor<S>)>> {
        self.chains
            .entry(TypeId::of::<S>())
            .or_insert_with(|| Box::new(Vec::<(String, Processor<S>)>::new()))
            .downcast_mut::<Vec<(String, Processor<S>)>>()
    }

    /// Registers a processor under `id`.
    ///
    /// An id already registered for the stage is replaced in place, keeping
    /// its position in the chain.
    pub fn register<S, F>(&mut self, id: impl Into<String>, processor: F)
    where
        S: PipeStage,
        F: Fn(S::Value, &S::Context) -> S::Value + 'static,
    {
        let id = id.into();
        let processor: Processor<S> = Rc::new(processor);
        if let Some(chain) = self.chain_mut::<S>() {
            match chain.iter().position(|(existing, _)| *existing == id) {
                Some(index) => chain[index].1 = processor,
                None => {
                    log::debug!("registered '{}' processor '{}'", S::NAME, id);
                    chain.push((id, processor));
                }
            }
        }
    }

    /// Removes a processor. Returns true if it was registered.
    pub fn unregister<S: PipeStage>(&mut self, id: &str) -> bool {
        match self.chain_mut::<S>() {
            Some(chain) => {
                let before = chain.len();
                chain.retain(|(existing, _)| existing != id);
                chain.len() != before
            }
            None => false,
        }
    }

    /// Copy of a stage's chain, for restoring it with `restore_chain`
    pub fn chain_snapshot<S: PipeStage>(&self) -> Vec<(String, Processor<S>)> {
        self.chain::<S>().cloned().unwrap_or_default()
    }

    pub fn restore_chain<S: PipeStage>(&mut self, chain: Vec<(String, Processor<S>)>) {
        if let Some(existing) = self.chain_mut::<S>() {
            *existing = chain;
        }
    }

    /// Ids registered for a stage, in application order
    pub fn processor_ids<S: PipeStage>(&self) -> Vec<&str> {
        self.chain::<S>()
            .map(|chain| chain.iter().map(|(id, _)| id.as_str()).collect())
            .unwrap_or_default()
    }

    /// Runs the chain of stage `S` over `initial`.
    pub fn apply<S: PipeStage>(&self, initial: S::Value, context: &S::Context) -> S::Value {
        match self.chain::<S>() {
            Some(chain) => chain
                .iter()
                .fold(initial, |value, (_, processor)| processor(value, context)),
            None => initial,
        }
    }
}

impl std::fmt::Debug for PipeProcessors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeProcessors")
            .field(HydrateRows::NAME, &self.processor_ids::<HydrateRows>())
            .field(ExportState::NAME, &self.processor_ids::<ExportState>())
            .finish()
    }
}
