/// Grouping strategies
///
/// A grouping strategy owns the tree-shaped stages: building the tree,
/// filtering it and sorting it. Exactly one strategy is active at a time;
/// features mark their strategy available or unavailable and the registry
/// dispatches to the available one with the highest priority.

use crate::builder::{build_flat_tree, build_grouped_tree, build_tree_data, BuiltTree, TreePathGetter};
use crate::column::Columns;
use crate::error::Result;
use crate::filter::{filter_tree, FilterApplier, FilterResult};
use crate::row::RowRegistry;
use crate::sort::SortItem;
use crate::tree::{NodeId, RowTree};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Strategy kinds, in increasing priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StrategyKind {
    Flat,
    RowGrouping,
    TreeData,
}

/// Inputs of a tree build
pub struct TreeBuildContext<'a> {
    pub rows: &'a RowRegistry,
    pub columns: &'a Columns,
    pub grouping_model: &'a [String],
}

/// The tree-shaped stages a strategy provides
pub trait RowTreeStrategy {
    fn kind(&self) -> StrategyKind;

    fn build_tree(&self, context: &TreeBuildContext<'_>) -> Result<BuiltTree>;

    fn filter_rows(&self, tree: &RowTree, rows: &RowRegistry, applier: &FilterApplier) -> FilterResult {
        filter_tree(tree, rows, applier)
    }

    fn sort_rows(
        &self,
        tree: &RowTree,
        rows: &RowRegistry,
        columns: &Columns,
        model: &[SortItem],
        groups_below_leaves: bool,
    ) -> Vec<NodeId> {
        crate::sort::sort_tree(tree, rows, columns, model, groups_below_leaves)
    }
}

/// The built-in strategies
#[derive(Clone)]
pub enum GroupingStrategy {
    Flat,
    RowGrouping,
    TreeData { path_getter: TreePathGetter },
}

impl fmt::Debug for GroupingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupingStrategy::Flat => f.write_str("Flat"),
            GroupingStrategy::RowGrouping => f.write_str("RowGrouping"),
            GroupingStrategy::TreeData { .. } => f.write_str("TreeData"),
        }
    }
}

impl RowTreeStrategy for GroupingStrategy {
    fn kind(&self) -> StrategyKind {
        match self {
            GroupingStrategy::Flat => StrategyKind::Flat,
            GroupingStrategy::RowGrouping => StrategyKind::RowGrouping,
            GroupingStrategy::TreeData { .. } => StrategyKind::TreeData,
        }
    }

    fn build_tree(&self, context: &TreeBuildContext<'_>) -> Result<BuiltTree> {
        match self {
            GroupingStrategy::Flat => build_flat_tree(context.rows),
            GroupingStrategy::RowGrouping => {
                build_grouped_tree(context.rows, context.columns, context.grouping_model)
            }
            GroupingStrategy::TreeData { path_getter } => build_tree_data(context.rows, path_getter),
        }
    }
}

/// Tracks which strategies are available and picks the active one.
#[derive(Clone)]
pub struct StrategyRegistry {
    available: BTreeSet<StrategyKind>,
    path_getter: Option<TreePathGetter>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut available = BTreeSet::new();
        available.insert(StrategyKind::Flat);
        StrategyRegistry {
            available,
            path_getter: None,
        }
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("available", &self.available)
            .field("active", &self.active_kind())
            .finish()
    }
}

impl StrategyRegistry {
    /// Marks a strategy available or not. Flat cannot be disabled.
    ///
    /// Returns true when the active strategy changed.
    pub fn set_strategy_availability(&mut self, kind: StrategyKind, available: bool) -> bool {
        let before = self.active_kind();
        if available {
            if kind == StrategyKind::TreeData && self.path_getter.is_none() {
                log::warn!("tree data enabled without a path getter, keeping it unavailable");
                return false;
            }
            self.available.insert(kind);
        } else if kind != StrategyKind::Flat {
            self.available.remove(&kind);
        }
        self.active_kind() != before
    }

    pub fn is_available(&self, kind: StrategyKind) -> bool {
        self.available.contains(&kind)
    }

    pub fn set_path_getter(&mut self, path_getter: Option<TreePathGetter>) {
        if path_getter.is_none() {
            self.available.remove(&StrategyKind::TreeData);
        }
        self.path_getter = path_getter;
    }

    /// Highest-priority available strategy
    pub fn active_kind(&self) -> StrategyKind {
        self.available
            .iter()
            .next_back()
            .copied()
            .unwrap_or(StrategyKind::Flat)
    }

    pub fn active(&self) -> GroupingStrategy {
        match (self.active_kind(), &self.path_getter) {
            (StrategyKind::TreeData, Some(path_getter)) => GroupingStrategy::TreeData {
                path_getter: path_getter.clone(),
            },
            (StrategyKind::RowGrouping, _) => GroupingStrategy::RowGrouping,
            _ => GroupingStrategy::Flat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{CellValue, ColumnDef};
    use crate::row::RowRecord;
    use std::collections::HashMap;
    use std::rc::Rc;

    fn path_getter() -> TreePathGetter {
        Rc::new(|row: &RowRecord| {
            row.get("path")
                .map(|v| v.to_string().split('/').map(str::to_string).collect())
                .unwrap_or_default()
        })
    }

    #[test]
    fn test_priority_dispatch() {
        let mut registry = StrategyRegistry::default();
        assert_eq!(registry.active_kind(), StrategyKind::Flat);

        assert!(registry.set_strategy_availability(StrategyKind::RowGrouping, true));
        assert_eq!(registry.active_kind(), StrategyKind::RowGrouping);

        // Tree data needs a path getter first
        assert!(!registry.set_strategy_availability(StrategyKind::TreeData, true));
        registry.set_path_getter(Some(path_getter()));
        assert!(registry.set_strategy_availability(StrategyKind::TreeData, true));
        assert_eq!(registry.active().kind(), StrategyKind::TreeData);

        assert!(registry.set_strategy_availability(StrategyKind::TreeData, false));
        assert_eq!(registry.active_kind(), StrategyKind::RowGrouping);

        // Flat always stays available
        registry.set_strategy_availability(StrategyKind::RowGrouping, false);
        registry.set_strategy_availability(StrategyKind::Flat, false);
        assert_eq!(registry.active_kind(), StrategyKind::Flat);
    }

    #[test]
    fn test_strategies_build_different_trees() {
        let mut registry = RowRegistry::default();
        let rows: Vec<RowRecord> = vec![("1", "a"), ("2", "a/b")]
            .into_iter()
            .map(|(id, path)| {
                let mut r = HashMap::new();
                r.insert("id".to_string(), CellValue::from(id));
                r.insert("path".to_string(), CellValue::from(path));
                r
            })
            .collect();
        registry.set_rows(rows).unwrap();
        let columns = Columns::new(vec![ColumnDef::string("path")]);
        let grouping = vec!["path".to_string()];
        let context = TreeBuildContext {
            rows: &registry,
            columns: &columns,
            grouping_model: &grouping,
        };

        let flat = GroupingStrategy::Flat.build_tree(&context).unwrap();
        assert_eq!(flat.tree.max_depth(), 0);

        let grouped = GroupingStrategy::RowGrouping.build_tree(&context).unwrap();
        assert_eq!(grouped.tree.root().children.len(), 2);
        assert_eq!(grouped.tree.max_depth(), 1);

        let tree_data = GroupingStrategy::TreeData {
            path_getter: path_getter(),
        }
        .build_tree(&context)
        .unwrap();
        assert_eq!(tree_data.tree.root().children, vec![NodeId::Row("1".into())]);
        assert_eq!(tree_data.tree.max_depth(), 1);
    }
}
