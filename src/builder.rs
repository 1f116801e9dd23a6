/// Tree Builder
///
/// Turns the row registry into a `RowTree`. Three layouts are supported:
///
/// - flat: every row is a leaf directly under the root
/// - row grouping: rows are bucketed by the values of the grouping fields,
///   one level per field, groups created on first encounter
/// - tree data: a path getter places each row in an explicit hierarchy
///
/// The builder never creates footers; those belong to the aggregation stage.

use crate::column::{CellValue, Columns};
use crate::error::{PipelineError, Result};
use crate::row::{RowId, RowRecord, RowRegistry};
use crate::tree::{GroupNode, LeafNode, NodeId, RowNode, RowTree};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Computes the hierarchy path of a row (tree data)
pub type TreePathGetter = Rc<dyn Fn(&RowRecord) -> Vec<String>>;

/// Backslash-escapes `/` (and `:` when `escape_colon` is set) so joined
/// group paths stay unambiguous whatever the keys contain.
fn escape_segment(segment: &str, escape_colon: bool) -> String {
    let mut escaped = String::with_capacity(segment.len());
    for c in segment.chars() {
        if c == '\\' || c == '/' || (escape_colon && c == ':') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn join_path(segments: &[String]) -> String {
    segments
        .iter()
        .map(|segment| escape_segment(segment, false))
        .collect::<Vec<_>>()
        .join("/")
}

/// Distinct values of one grouping field, in first-seen order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupingValues {
    lookup: HashSet<String>,
    list: Vec<CellValue>,
}

impl GroupingValues {
    fn insert(&mut self, value: &CellValue) {
        if self.lookup.insert(value.group_key()) {
            self.list.push(value.clone());
        }
    }

    pub fn contains(&self, value: &CellValue) -> bool {
        self.lookup.contains(&value.group_key())
    }

    pub fn list(&self) -> &[CellValue] {
        &self.list
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

/// Output of a tree build
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuiltTree {
    pub tree: RowTree,
    /// Distinct values per grouping field (row grouping only)
    pub grouping_values: IndexMap<String, GroupingValues>,
}

fn leaf_node(row_id: &RowId, parent: NodeId, depth: i32) -> RowNode {
    RowNode::Leaf(LeafNode {
        id: NodeId::Row(row_id.clone()),
        row_id: row_id.clone(),
        parent,
        depth,
    })
}

/// Builds the flat tree: one leaf per row, all at depth 0.
pub fn build_flat_tree(rows: &RowRegistry) -> Result<BuiltTree> {
    let mut tree = RowTree::new();
    for id in rows.ids() {
        tree.insert_child(leaf_node(id, NodeId::Root, 0))?;
    }
    Ok(BuiltTree {
        tree,
        grouping_values: IndexMap::new(),
    })
}

/// Builds the row-grouping tree.
///
/// For each row the grouping path is walked top-down; a group is created the
/// first time a (parent, key) pair is seen. A null or missing grouping value
/// skips that level, so the row's remaining levels hang off the current
/// parent.
pub fn build_grouped_tree(
    rows: &RowRegistry,
    columns: &Columns,
    grouping_model: &[String],
) -> Result<BuiltTree> {
    if grouping_model.is_empty() {
        return build_flat_tree(rows);
    }

    let mut tree = RowTree::new();
    let mut grouping_values: IndexMap<String, GroupingValues> = grouping_model
        .iter()
        .map(|field| (field.clone(), GroupingValues::default()))
        .collect();

    for (row_id, row) in rows.iter() {
        let mut parent = NodeId::Root;
        let mut parent_path = String::new();
        let mut depth = 0;

        for field in grouping_model {
            let key = columns.value(row, field);
            if key.is_null() {
                continue;
            }
            if let Some(values) = grouping_values.get_mut(field) {
                values.insert(&key);
            }

            let segment = format!(
                "{}:{}",
                escape_segment(field, true),
                escape_segment(&key.group_key(), false)
            );
            let path = if parent_path.is_empty() {
                segment
            } else {
                format!("{}/{}", parent_path, segment)
            };
            let group_id = NodeId::Group(path.clone());

            if !tree.contains(&group_id) {
                tree.insert_child(RowNode::Group(GroupNode {
                    id: group_id.clone(),
                    parent: Some(parent.clone()),
                    depth,
                    children: Vec::new(),
                    footer_id: None,
                    is_auto_generated: true,
                    grouping_field: Some(field.clone()),
                    grouping_key: key,
                    row_id: None,
                    children_expanded: true,
                }))?;
            }

            parent = group_id;
            parent_path = path;
            depth += 1;
        }

        tree.insert_child(leaf_node(row_id, parent, depth))?;
    }

    Ok(BuiltTree {
        tree,
        grouping_values,
    })
}

/// Builds a tree from explicit row paths.
///
/// Missing ancestors become auto-generated groups. A row whose path is a
/// prefix of another row's path becomes a group backed by that row. Two rows
/// sharing a path are a configuration error.
pub fn build_tree_data(rows: &RowRegistry, path_getter: &TreePathGetter) -> Result<BuiltTree> {
    let mut paths: Vec<(RowId, Vec<String>)> = Vec::with_capacity(rows.len());
    let mut by_path: HashMap<Vec<String>, RowId> = HashMap::with_capacity(rows.len());
    let mut prefixes: HashSet<Vec<String>> = HashSet::new();

    for (row_id, row) in rows.iter() {
        let mut path = path_getter(row);
        if path.is_empty() {
            log::warn!("row '{}' has an empty tree path, placing it at the top level", row_id);
            path = vec![row_id.to_string()];
        }
        if let Some(first) = by_path.get(&path) {
            return Err(PipelineError::DuplicateTreePath {
                path: path.join("/"),
                first: first.clone(),
                second: row_id.clone(),
            });
        }
        by_path.insert(path.clone(), row_id.clone());
        for end in 1..path.len() {
            prefixes.insert(path[..end].to_vec());
        }
        paths.push((row_id.clone(), path));
    }

    let mut tree = RowTree::new();
    for (row_id, path) in &paths {
        let mut parent = NodeId::Root;
        for end in 1..=path.len() {
            let prefix = &path[..end];
            let backing_row = by_path.get(prefix);
            let node_id = match backing_row {
                Some(id) => NodeId::Row(id.clone()),
                None => NodeId::Group(join_path(prefix)),
            };

            if !tree.contains(&node_id) {
                let depth = end as i32 - 1;
                let is_leaf = end == path.len() && !prefixes.contains(prefix);
                if is_leaf {
                    tree.insert_child(leaf_node(row_id, parent.clone(), depth))?;
                } else {
                    tree.insert_child(RowNode::Group(GroupNode {
                        id: node_id.clone(),
                        parent: Some(parent.clone()),
                        depth,
                        children: Vec::new(),
                        footer_id: None,
                        is_auto_generated: backing_row.is_none(),
                        grouping_field: None,
                        grouping_key: CellValue::from(prefix[end - 1].as_str()),
                        row_id: backing_row.cloned(),
                        children_expanded: true,
                    }))?;
                }
            }
            parent = node_id;
        }
    }

    Ok(BuiltTree {
        tree,
        grouping_values: IndexMap::new(),
    })
}

/// Sets `children_expanded` on every group.
///
/// `default_depth` of -1 expands everything; `n` expands groups with
/// `depth < n`. Per-node overrides win.
pub fn apply_expansion(tree: &mut RowTree, default_depth: i32, overrides: &HashMap<NodeId, bool>) {
    let groups: Vec<(NodeId, i32)> = tree
        .groups()
        .filter(|g| !g.is_root())
        .map(|g| (g.id.clone(), g.depth))
        .collect();

    for (id, depth) in groups {
        let expanded = match overrides.get(&id) {
            Some(expanded) => *expanded,
            None => default_depth < 0 || depth < default_depth,
        };
        tree.set_children_expanded(&id, expanded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnDef;

    fn row(id: i64, group: Option<&str>, region: Option<&str>) -> RowRecord {
        let mut r = HashMap::new();
        r.insert("id".to_string(), CellValue::Int(id));
        if let Some(g) = group {
            r.insert("group".to_string(), CellValue::from(g));
        }
        if let Some(region) = region {
            r.insert("region".to_string(), CellValue::from(region));
        }
        r
    }

    fn registry(rows: Vec<RowRecord>) -> RowRegistry {
        let mut registry = RowRegistry::default();
        registry.set_rows(rows).unwrap();
        registry
    }

    fn columns() -> Columns {
        Columns::new(vec![ColumnDef::string("group"), ColumnDef::string("region")])
    }

    fn group_id(path: &str) -> NodeId {
        NodeId::Group(path.to_string())
    }

    #[test]
    fn test_flat_tree() {
        let rows = registry(vec![row(1, None, None), row(2, None, None)]);
        let built = build_flat_tree(&rows).unwrap();

        assert_eq!(built.tree.len(), 3);
        assert_eq!(built.tree.max_depth(), 0);
        assert_eq!(
            built.tree.children(&NodeId::Root),
            &[NodeId::Row(RowId::Int(1)), NodeId::Row(RowId::Int(2))]
        );
        assert!(built.tree.verify().is_ok());
    }

    #[test]
    fn test_single_level_grouping() {
        let rows = registry(vec![
            row(0, Some("A"), None),
            row(1, Some("A"), None),
            row(2, Some("B"), None),
        ]);
        let built = build_grouped_tree(&rows, &columns(), &["group".to_string()]).unwrap();
        let tree = &built.tree;

        assert_eq!(tree.children(&NodeId::Root), &[group_id("group:s:A"), group_id("group:s:B")]);
        assert_eq!(tree.children(&group_id("group:s:A")).len(), 2);
        assert_eq!(tree.children(&group_id("group:s:B")), &[NodeId::Row(RowId::Int(2))]);

        let group = tree.get_group(&group_id("group:s:A")).unwrap();
        assert_eq!(group.depth, 0);
        assert!(group.is_auto_generated);
        assert!(group.footer_id.is_none());
        assert_eq!(tree.get(&NodeId::Row(RowId::Int(0))).unwrap().depth(), 1);
        assert!(tree.verify().is_ok());
    }

    #[test]
    fn test_nested_grouping_and_values() {
        let rows = registry(vec![
            row(0, Some("A"), Some("EU")),
            row(1, Some("B"), Some("US")),
            row(2, Some("A"), Some("US")),
            row(3, Some("A"), Some("EU")),
        ]);
        let model = vec!["group".to_string(), "region".to_string()];
        let built = build_grouped_tree(&rows, &columns(), &model).unwrap();
        let tree = &built.tree;

        assert_eq!(
            tree.children(&group_id("group:s:A")),
            &[group_id("group:s:A/region:s:EU"), group_id("group:s:A/region:s:US")]
        );
        assert_eq!(
            tree.leaf_descendants(&group_id("group:s:A/region:s:EU")),
            vec![RowId::Int(0), RowId::Int(3)]
        );
        assert_eq!(tree.max_depth(), 2);

        let regions = &built.grouping_values["region"];
        assert_eq!(regions.list(), &[CellValue::from("EU"), CellValue::from("US")]);
        assert!(regions.contains(&CellValue::from("US")));
        assert!(tree.verify().is_ok());
    }

    #[test]
    fn test_null_key_skips_level() {
        let rows = registry(vec![row(0, Some("A"), Some("EU")), row(1, None, Some("EU")), row(2, None, None)]);
        let model = vec!["group".to_string(), "region".to_string()];
        let built = build_grouped_tree(&rows, &columns(), &model).unwrap();
        let tree = &built.tree;

        assert_eq!(
            tree.children(&NodeId::Root),
            &[group_id("group:s:A"), group_id("region:s:EU"), NodeId::Row(RowId::Int(2))]
        );
        assert_eq!(tree.get(&NodeId::Row(RowId::Int(1))).unwrap().depth(), 1);
        assert_eq!(tree.get(&NodeId::Row(RowId::Int(2))).unwrap().depth(), 0);
        assert!(tree.verify().is_ok());
    }

    fn path_getter() -> TreePathGetter {
        Rc::new(|row: &RowRecord| {
            row.get("path")
                .and_then(|v| v.as_str())
                .map(|p| p.split('/').map(str::to_string).collect())
                .unwrap_or_default()
        })
    }

    fn path_row(id: i64, path: &str) -> RowRecord {
        let mut r = HashMap::new();
        r.insert("id".to_string(), CellValue::Int(id));
        r.insert("path".to_string(), CellValue::from(path));
        r
    }

    #[test]
    fn test_tree_data_backed_and_auto_groups() {
        let rows = registry(vec![
            path_row(1, "docs/guide/intro"),
            path_row(2, "docs"),
            path_row(3, "docs/guide/setup"),
            path_row(4, "readme"),
        ]);
        let built = build_tree_data(&rows, &path_getter()).unwrap();
        let tree = &built.tree;

        // "docs" is backed by row 2 even though row 1 created it
        let docs = tree.get_group(&NodeId::Row(RowId::Int(2))).unwrap();
        assert!(!docs.is_auto_generated);
        assert_eq!(docs.row_id, Some(RowId::Int(2)));
        assert_eq!(docs.depth, 0);

        let guide = tree.get_group(&group_id("docs/guide")).unwrap();
        assert!(guide.is_auto_generated);
        assert_eq!(guide.parent, Some(NodeId::Row(RowId::Int(2))));
        assert_eq!(guide.grouping_key, CellValue::from("guide"));

        assert_eq!(
            tree.children(&group_id("docs/guide")),
            &[NodeId::Row(RowId::Int(1)), NodeId::Row(RowId::Int(3))]
        );
        assert!(tree.get(&NodeId::Row(RowId::Int(4))).unwrap().is_leaf());
        assert!(tree.verify().is_ok());
    }

    #[test]
    fn test_grouping_keys_containing_separators() {
        let rows = registry(vec![row(0, Some("A"), Some("EU")), row(1, Some("A/region:s:EU"), None)]);
        let model = vec!["group".to_string(), "region".to_string()];
        let built = build_grouped_tree(&rows, &columns(), &model).unwrap();
        let tree = &built.tree;

        assert!(tree.verify().is_ok());
        assert_eq!(
            tree.children(&NodeId::Root),
            &[group_id("group:s:A"), group_id("group:s:A\\/region:s:EU")]
        );
        assert_eq!(tree.get(&NodeId::Row(RowId::Int(1))).unwrap().depth(), 1);
        assert_eq!(
            tree.leaf_descendants(&group_id("group:s:A/region:s:EU")),
            vec![RowId::Int(0)]
        );
    }

    #[test]
    fn test_tree_data_segments_containing_slash() {
        let getter: TreePathGetter = Rc::new(|row: &RowRecord| match row.get("id").and_then(|v| v.as_i64()) {
            Some(1) => vec!["a/b".to_string(), "c".to_string()],
            _ => vec!["a".to_string(), "b".to_string(), "d".to_string()],
        });
        let rows = registry(vec![path_row(1, ""), path_row(2, "")]);
        let built = build_tree_data(&rows, &getter).unwrap();
        let tree = &built.tree;

        assert!(tree.verify().is_ok());
        assert_eq!(tree.children(&NodeId::Root), &[group_id("a\\/b"), group_id("a")]);
        assert_eq!(tree.get(&NodeId::Row(RowId::Int(1))).unwrap().depth(), 1);
        assert_eq!(tree.get(&NodeId::Row(RowId::Int(2))).unwrap().depth(), 2);
    }

    #[test]
    fn test_tree_data_duplicate_path() {
        let rows = registry(vec![path_row(1, "a/b"), path_row(2, "a/b")]);
        let err = build_tree_data(&rows, &path_getter()).unwrap_err();
        assert_eq!(
            err,
            PipelineError::DuplicateTreePath {
                path: "a/b".to_string(),
                first: RowId::Int(1),
                second: RowId::Int(2),
            }
        );
    }

    #[test]
    fn test_expansion_depth_and_overrides() {
        let rows = registry(vec![row(0, Some("A"), Some("EU")), row(1, Some("B"), Some("US"))]);
        let model = vec!["group".to_string(), "region".to_string()];
        let mut tree = build_grouped_tree(&rows, &columns(), &model).unwrap().tree;

        let mut overrides = HashMap::new();
        overrides.insert(group_id("group:s:B"), false);
        apply_expansion(&mut tree, 1, &overrides);

        assert!(tree.get_group(&group_id("group:s:A")).unwrap().children_expanded);
        assert!(!tree.get_group(&group_id("group:s:B")).unwrap().children_expanded);
        assert!(!tree.get_group(&group_id("group:s:A/region:s:EU")).unwrap().children_expanded);

        apply_expansion(&mut tree, -1, &HashMap::new());
        assert!(tree.groups().all(|g| g.children_expanded));
    }
}
