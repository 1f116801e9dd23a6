/// Pipeline events
///
/// Fire-and-forget notifications published after a recompute is committed.
/// Subscribers are plain closures; every event is also logged at trace level.

use crate::aggregation::AggregationModel;
use crate::dimensions::Dimensions;
use crate::filter::FilterModel;
use crate::pagination::PaginationModel;
use crate::sort::SortModel;
use crate::virtualization::RenderWindow;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Visible rows (client) or server row count, -1 when unknown
    RowCountChanged(i64),
    PaginationModelChanged(PaginationModel),
    SortModelChanged(SortModel),
    FilterModelChanged(FilterModel),
    AggregationModelChanged(AggregationModel),
    /// The base tree was rebuilt (not just re-hydrated)
    RowTreeRebuilt { node_count: usize },
    ViewportChanged(Dimensions),
    RenderWindowChanged(RenderWindow),
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::RowCountChanged(_) => "rowCountChange",
            PipelineEvent::PaginationModelChanged(_) => "paginationModelChange",
            PipelineEvent::SortModelChanged(_) => "sortModelChange",
            PipelineEvent::FilterModelChanged(_) => "filterModelChange",
            PipelineEvent::AggregationModelChanged(_) => "aggregationModelChange",
            PipelineEvent::RowTreeRebuilt { .. } => "rowTreeRebuilt",
            PipelineEvent::ViewportChanged(_) => "viewportChange",
            PipelineEvent::RenderWindowChanged(_) => "renderWindowChange",
        }
    }
}

/// Handle returned by `EventBus::subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn FnMut(&PipelineEvent)>;

#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_id: u64,
}

impl EventBus {
    pub fn subscribe<F>(&mut self, subscriber: F) -> SubscriptionId
    where
        F: FnMut(&PipelineEvent) + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(subscriber)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(existing, _)| *existing != id);
        self.subscribers.len() != before
    }

    pub fn publish(&mut self, event: &PipelineEvent) {
        log::trace!("{}: {:?}", event.name(), event);
        for (_, subscriber) in self.subscribers.iter_mut() {
            subscriber(event);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
