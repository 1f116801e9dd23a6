/// Changeset - Invalidation Tracking for the Row Pipeline
///
/// Every setter records which piece of pipeline state it touched. Each stage
/// declares the state keys it reads and the stages upstream of it, so the
/// recompute pass can run exactly the stages whose inputs changed, always in
/// the fixed order Tree → Filter → Sort → Aggregate → Paginate → Virtualize.
///
/// # Usage Pattern
///
/// 1. Setters `push` the state keys they changed
/// 2. The pipeline asks for `dirty_stages()` and recomputes them in order
/// 3. On commit the changeset is cleared and the generation advances
/// 4. On failure the pipeline restores its inputs and `discard`s the changes,
///    leaving the generation where it was

use std::collections::BTreeSet;

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Tree,
    Filter,
    Sort,
    Aggregate,
    Paginate,
    Virtualize,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Tree,
        Stage::Filter,
        Stage::Sort,
        Stage::Aggregate,
        Stage::Paginate,
        Stage::Virtualize,
    ];

    /// State keys the stage reads directly
    pub fn dependencies(self) -> &'static [StateKey] {
        match self {
            Stage::Tree => &[
                StateKey::Rows,
                StateKey::Columns,
                StateKey::GroupingModel,
                StateKey::Strategy,
                StateKey::Expansion,
                StateKey::Processors,
                StateKey::AggregationModel,
            ],
            Stage::Filter => &[StateKey::FilterModel, StateKey::Columns],
            Stage::Sort => &[StateKey::SortModel, StateKey::SortPolicy, StateKey::Columns],
            Stage::Aggregate => &[StateKey::AggregationModel, StateKey::Columns],
            Stage::Paginate => &[StateKey::Pagination, StateKey::RowCount],
            Stage::Virtualize => &[StateKey::Viewport, StateKey::Scroll, StateKey::Columns],
        }
    }

    /// Stages whose output this stage consumes
    pub fn upstream(self) -> &'static [Stage] {
        match self {
            Stage::Tree => &[],
            Stage::Filter => &[Stage::Tree],
            Stage::Sort => &[Stage::Tree],
            Stage::Aggregate => &[Stage::Tree, Stage::Filter],
            Stage::Paginate => &[Stage::Filter, Stage::Sort],
            Stage::Virtualize => &[Stage::Paginate],
        }
    }
}

/// Pieces of pipeline state a setter can change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKey {
    Rows,
    Columns,
    GroupingModel,
    Strategy,
    Expansion,
    Processors,
    FilterModel,
    SortModel,
    /// Leaves-before-groups presentation policy
    SortPolicy,
    AggregationModel,
    Pagination,
    RowCount,
    Viewport,
    Scroll,
}

/// Changed state keys since the last committed recompute
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    changes: BTreeSet<StateKey>,
    /// Generation counter - incremented each time a recompute is committed
    generation: u64,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a changed key
    pub fn push(&mut self, key: StateKey) {
        self.changes.insert(key);
    }

    pub fn contains(&self, key: StateKey) -> bool {
        self.changes.contains(&key)
    }

    pub fn changes(&self) -> impl Iterator<Item = StateKey> + '_ {
        self.changes.iter().copied()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Stages to recompute, in execution order.
    ///
    /// A stage is dirty when one of its keys changed or one of its upstream
    /// stages is dirty.
    pub fn dirty_stages(&self) -> Vec<Stage> {
        let mut dirty: Vec<Stage> = Vec::new();
        for stage in Stage::ALL {
            let own = stage.dependencies().iter().any(|key| self.changes.contains(key));
            let inherited = stage.upstream().iter().any(|up| dirty.contains(up));
            if own || inherited {
                dirty.push(stage);
            }
        }
        dirty
    }

    pub fn is_dirty(&self, stage: Stage) -> bool {
        self.dirty_stages().contains(&stage)
    }

    /// Clear all changes and increment generation
    pub fn clear(&mut self) {
        self.changes.clear();
        self.generation += 1;
    }

    /// Drop pending changes without committing, after their inputs were
    /// rolled back
    pub fn discard(&mut self) {
        self.changes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_changeset_is_clean() {
        let changeset = Changeset::new();
        assert!(changeset.dirty_stages().is_empty());
    }

    #[test]
    fn test_rows_dirty_everything() {
        let mut changeset = Changeset::new();
        changeset.push(StateKey::Rows);
        assert_eq!(changeset.dirty_stages(), Stage::ALL.to_vec());
    }

    #[test]
    fn test_sort_change_skips_filter_and_aggregate() {
        let mut changeset = Changeset::new();
        changeset.push(StateKey::SortModel);
        assert_eq!(
            changeset.dirty_stages(),
            vec![Stage::Sort, Stage::Paginate, Stage::Virtualize]
        );
    }

    #[test]
    fn test_filter_change_reaches_aggregate() {
        let mut changeset = Changeset::new();
        changeset.push(StateKey::FilterModel);
        assert!(changeset.is_dirty(Stage::Aggregate));
        assert!(!changeset.is_dirty(Stage::Sort));
    }

    #[test]
    fn test_scroll_only_virtualizes() {
        let mut changeset = Changeset::new();
        changeset.push(StateKey::Scroll);
        assert_eq!(changeset.dirty_stages(), vec![Stage::Virtualize]);
    }

    #[test]
    fn test_clear_bumps_generation() {
        let mut changeset = Changeset::new();
        changeset.push(StateKey::Viewport);
        changeset.push(StateKey::Viewport);
        assert_eq!(changeset.changes().count(), 1);

        changeset.clear();
        assert!(changeset.is_empty());
        assert_eq!(changeset.generation(), 1);

        changeset.push(StateKey::Rows);
        changeset.discard();
        assert!(changeset.is_empty());
        assert_eq!(changeset.generation(), 1);
    }
}
