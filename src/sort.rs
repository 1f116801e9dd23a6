/// Sort Engine
///
/// Hierarchical, stable sort of the row tree. Every sibling list is sorted on
/// its own with a comparator composed from the sort model, then the tree is
/// flattened with a single pre-order walk.
///
/// Children are kept as index ranges into one scratch buffer rather than as
/// per-node vectors, so the whole pass is O(n log n) with one allocation for
/// the buffer and one for the output.

use crate::column::{CellValue, ColumnDef, Columns};
use crate::row::{RowId, RowRegistry};
use crate::tree::{NodeId, RowNode, RowTree};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::rc::Rc;

/// Custom comparison for a column's values
pub type SortComparator = Rc<dyn Fn(&CellValue, &CellValue) -> Ordering>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortItem {
    pub field: String,
    pub sort: SortDirection,
}

impl SortItem {
    pub fn asc(field: impl Into<String>) -> Self {
        SortItem {
            field: field.into(),
            sort: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        SortItem {
            field: field.into(),
            sort: SortDirection::Desc,
        }
    }
}

pub type SortModel = Vec<SortItem>;

/// Client-side sorting or tree order when the server sorts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[default]
    Client,
    Server,
}

/// Drops entries on unknown or unsortable columns.
pub fn sanitize_sort_model(model: &[SortItem], columns: &Columns) -> SortModel {
    model
        .iter()
        .filter(|item| match columns.get(&item.field) {
            Some(column) if column.sortable => true,
            Some(_) => {
                log::warn!("dropping sort on unsortable column '{}'", item.field);
                false
            }
            None => {
                log::warn!("dropping sort on unknown column '{}'", item.field);
                false
            }
        })
        .cloned()
        .collect()
}

struct SortCriterion<'a> {
    column: &'a ColumnDef,
    descending: bool,
}

/// Value a node contributes to the comparison on `column`.
///
/// Groups created by the field compare on their grouping key, row-backed
/// groups on their row's value, anything else on null.
fn node_sort_value(node: &RowNode, column: &ColumnDef, rows: &RowRegistry) -> CellValue {
    let row_value = |row_id: &RowId| rows.get(row_id).map(|row| column.value(row)).unwrap_or_default();
    match node {
        RowNode::Leaf(leaf) => row_value(&leaf.row_id),
        RowNode::Group(group) => {
            if group.grouping_field.as_deref() == Some(column.field.as_str()) {
                group.grouping_key.clone()
            } else if let Some(row_id) = &group.row_id {
                row_value(row_id)
            } else {
                CellValue::Null
            }
        }
        RowNode::Footer(_) => CellValue::Null,
    }
}

fn compare_keys(criteria: &[SortCriterion<'_>], a: &[CellValue], b: &[CellValue]) -> Ordering {
    for (i, criterion) in criteria.iter().enumerate() {
        let ordering = criterion.column.compare(&a[i], &b[i]);
        let ordering = if criterion.descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Sorts the tree and returns every node except the root in display order.
///
/// With an empty (or fully unresolvable) model the tree order is kept; when
/// `groups_below_leaves` is set, leaves then come before sibling groups.
/// Footers always close their parent's children.
pub fn sort_tree(
    tree: &RowTree,
    rows: &RowRegistry,
    columns: &Columns,
    model: &[SortItem],
    groups_below_leaves: bool,
) -> Vec<NodeId> {
    let criteria: Vec<SortCriterion<'_>> = model
        .iter()
        .filter_map(|item| {
            columns.get(&item.field).map(|column| SortCriterion {
                column,
                descending: item.sort == SortDirection::Desc,
            })
        })
        .collect();

    let node_count = tree.len();

    // Sort keys, one per arena slot
    let keys: Vec<Vec<CellValue>> = if criteria.is_empty() {
        Vec::new()
    } else {
        (0..node_count)
            .map(|index| match tree.node_at(index) {
                Some(node) => criteria
                    .iter()
                    .map(|c| node_sort_value(node, c.column, rows))
                    .collect(),
                None => Vec::new(),
            })
            .collect()
    };

    let mut scratch: Vec<usize> = Vec::with_capacity(node_count);
    let mut ranges: Vec<(usize, usize)> = vec![(0, 0); node_count];

    for index in 0..node_count {
        let group = match tree.node_at(index) {
            Some(RowNode::Group(group)) => group,
            _ => continue,
        };

        let start = scratch.len();
        let mut footer = None;
        for child in &group.children {
            let child_index = match tree.index_of(child) {
                Some(i) => i,
                None => continue,
            };
            if child.is_footer() {
                footer = Some(child_index);
            } else {
                scratch.push(child_index);
            }
        }

        let siblings = &mut scratch[start..];
        if !criteria.is_empty() {
            siblings.sort_by(|a, b| compare_keys(&criteria, &keys[*a], &keys[*b]));
        } else if groups_below_leaves {
            siblings.sort_by_key(|i| tree.node_at(*i).map_or(false, RowNode::is_group));
        }

        if let Some(footer) = footer {
            scratch.push(footer);
        }
        ranges[index] = (start, scratch.len());
    }

    let mut output = Vec::with_capacity(node_count.saturating_sub(1));
    let root = match tree.index_of(&NodeId::Root) {
        Some(root) => root,
        None => return output,
    };

    let (start, end) = ranges[root];
    let mut stack: Vec<usize> = scratch[start..end].iter().rev().copied().collect();
    while let Some(index) = stack.pop() {
        if let Some(node) = tree.node_at(index) {
            output.push(node.id().clone());
        }
        let (start, end) = ranges[index];
        stack.extend(scratch[start..end].iter().rev());
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_flat_tree, build_grouped_tree, build_tree_data, TreePathGetter};
    use crate::row::RowRecord;
    use std::collections::HashMap;

    fn row(id: i64, group: &str, value: i64) -> RowRecord {
        let mut r = HashMap::new();
        r.insert("id".to_string(), CellValue::Int(id));
        r.insert("group".to_string(), CellValue::from(group));
        r.insert("value".to_string(), CellValue::Int(value));
        r
    }

    fn columns() -> Columns {
        Columns::new(vec![
            ColumnDef::string("group"),
            ColumnDef::number("value"),
            ColumnDef::string("path"),
            ColumnDef::number("locked").sortable(false),
        ])
    }

    fn registry(rows: Vec<RowRecord>) -> RowRegistry {
        let mut registry = RowRegistry::default();
        registry.set_rows(rows).unwrap();
        registry
    }

    fn ids(order: &[NodeId]) -> Vec<String> {
        order.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_flat_sort_stable() {
        let rows = registry(vec![row(0, "B", 2), row(1, "A", 1), row(2, "A", 2), row(3, "B", 1)]);
        let tree = build_flat_tree(&rows).unwrap().tree;

        let order = sort_tree(&tree, &rows, &columns(), &[SortItem::asc("group")], false);
        assert_eq!(ids(&order), vec!["1", "2", "0", "3"]);

        let order = sort_tree(
            &tree,
            &rows,
            &columns(),
            &[SortItem::asc("group"), SortItem::desc("value")],
            false,
        );
        assert_eq!(ids(&order), vec!["2", "1", "0", "3"]);
    }

    #[test]
    fn test_group_order_follows_grouping_key() {
        let rows = registry(vec![row(2, "B", 5), row(0, "A", 3), row(1, "A", 4)]);
        let tree = build_grouped_tree(&rows, &columns(), &["group".to_string()]).unwrap().tree;

        let order = sort_tree(&tree, &rows, &columns(), &[SortItem::asc("group")], false);
        assert_eq!(
            order,
            vec![
                NodeId::Group("group:s:A".into()),
                NodeId::Row(RowId::Int(0)),
                NodeId::Row(RowId::Int(1)),
                NodeId::Group("group:s:B".into()),
                NodeId::Row(RowId::Int(2)),
            ]
        );

        let order = sort_tree(&tree, &rows, &columns(), &[SortItem::desc("value")], false);
        // Groups compare on null for "value", so they keep tree order
        assert_eq!(
            order,
            vec![
                NodeId::Group("group:s:B".into()),
                NodeId::Row(RowId::Int(2)),
                NodeId::Group("group:s:A".into()),
                NodeId::Row(RowId::Int(1)),
                NodeId::Row(RowId::Int(0)),
            ]
        );
    }

    #[test]
    fn test_footers_stay_last() {
        let rows = registry(vec![row(0, "A", 3), row(1, "A", 4)]);
        let mut tree = build_grouped_tree(&rows, &columns(), &["group".to_string()]).unwrap().tree;
        let group = NodeId::Group("group:s:A".into());
        tree.add_footer(&group).unwrap();
        tree.add_footer(&NodeId::Root).unwrap();

        let order = sort_tree(&tree, &rows, &columns(), &[SortItem::desc("value")], false);
        assert_eq!(
            order,
            vec![
                group.clone(),
                NodeId::Row(RowId::Int(1)),
                NodeId::Row(RowId::Int(0)),
                NodeId::footer_of(&group),
                NodeId::footer_of(&NodeId::Root),
            ]
        );
    }

    #[test]
    fn test_idempotent_and_restorable() {
        let rows = registry(vec![row(0, "B", 2), row(1, "A", 1), row(2, "C", 7)]);
        let tree = build_grouped_tree(&rows, &columns(), &["group".to_string()]).unwrap().tree;
        let model = vec![SortItem::desc("group")];

        let first = sort_tree(&tree, &rows, &columns(), &model, false);
        let second = sort_tree(&tree, &rows, &columns(), &model, false);
        assert_eq!(first, second);

        let unsorted = sort_tree(&tree, &rows, &columns(), &[], false);
        assert_eq!(unsorted, tree.descendants(&NodeId::Root));
    }

    #[test]
    fn test_groups_below_leaves() {
        let path_row = |id: i64, path: &str| {
            let mut r = row(id, "x", id);
            r.insert("path".to_string(), CellValue::from(path));
            r
        };
        let rows = registry(vec![path_row(1, "a/b/c"), path_row(2, "a/d"), path_row(3, "e")]);
        let getter: TreePathGetter = Rc::new(|row: &RowRecord| {
            row.get("path")
                .and_then(|v| v.as_str())
                .map(|p| p.split('/').map(str::to_string).collect())
                .unwrap_or_default()
        });
        let tree = build_tree_data(&rows, &getter).unwrap().tree;

        let order = sort_tree(&tree, &rows, &columns(), &[], true);
        assert_eq!(ids(&order), vec![
            "3",
            "auto-generated-row-a",
            "2",
            "auto-generated-row-a/b",
            "1",
        ]);

        // Policy does not apply while a sort model is active
        let order = sort_tree(&tree, &rows, &columns(), &[SortItem::asc("value")], true);
        assert_eq!(ids(&order)[0], "auto-generated-row-a");
    }

    #[test]
    fn test_sanitize_sort_model() {
        let model = vec![SortItem::asc("locked"), SortItem::asc("nope"), SortItem::desc("value")];
        assert_eq!(sanitize_sort_model(&model, &columns()), vec![SortItem::desc("value")]);
    }

    #[test]
    fn test_custom_comparator() {
        let columns = Columns::new(vec![ColumnDef::number("value")
            .with_sort_comparator(|a, b| b.compare(a))]);
        let rows = registry(vec![row(0, "A", 1), row(1, "A", 3), row(2, "A", 2)]);
        let tree = build_flat_tree(&rows).unwrap().tree;

        let order = sort_tree(&tree, &rows, &columns, &[SortItem::asc("value")], false);
        assert_eq!(ids(&order), vec!["1", "2", "0"]);
    }
}
