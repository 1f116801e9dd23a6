/// Filter Engine
///
/// Column filters and the quick filter are compiled once per model into a
/// `FilterApplier`, which is then evaluated per row. On a hierarchical tree
/// the leaf results are reduced post-order: a group is kept if at least one
/// descendant matches (or, for a row-backed group, its own row matches).
///
/// Filtering never restructures the tree, it only marks membership.
///
/// # Examples
///
/// ```
/// use rowpipe::{build_filter_applier, ColumnDef, Columns, CellValue, FilterItem, FilterModel, RowId};
/// use std::collections::HashMap;
///
/// let columns = Columns::new(vec![ColumnDef::string("name")]);
/// let model = FilterModel::with_items(vec![FilterItem::new("name", "startsWith", "al")]);
/// let applier = build_filter_applier(&model, &columns).unwrap();
///
/// let mut row = HashMap::new();
/// row.insert("name".to_string(), CellValue::from("Alice"));
/// assert!(applier.is_row_matching(&RowId::Int(1), &row));
/// ```

use crate::column::{CellValue, ColumnDef, ColumnType, Columns};
use crate::error::{PipelineError, Result};
use crate::row::{RowId, RowRecord, RowRegistry};
use crate::tree::{NodeId, RowNode, RowTree};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

/// How item (or token) results are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicOperator {
    #[default]
    And,
    Or,
}

impl LogicOperator {
    /// Combines results, skipping no-ops. No results at all means "pass".
    fn combine<I: IntoIterator<Item = bool>>(self, results: I) -> bool {
        let mut iter = results.into_iter().peekable();
        if iter.peek().is_none() {
            return true;
        }
        match self {
            LogicOperator::And => iter.all(|r| r),
            LogicOperator::Or => iter.any(|r| r),
        }
    }
}

/// Filter value: a single value or a list (for `isAnyOf`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    List(Vec<CellValue>),
    Single(CellValue),
}

impl FilterValue {
    pub fn as_single(&self) -> Option<&CellValue> {
        match self {
            FilterValue::Single(v) => Some(v),
            FilterValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[CellValue]> {
        match self {
            FilterValue::List(values) => Some(values),
            FilterValue::Single(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FilterValue>,
}

impl FilterItem {
    pub fn new(field: impl Into<String>, operator: impl Into<String>, value: impl Into<CellValue>) -> Self {
        FilterItem {
            id: None,
            field: field.into(),
            operator: Some(operator.into()),
            value: Some(FilterValue::Single(value.into())),
        }
    }

    /// Item with a list value, for `isAnyOf`
    pub fn any_of(field: impl Into<String>, values: Vec<CellValue>) -> Self {
        FilterItem {
            id: None,
            field: field.into(),
            operator: Some("isAnyOf".to_string()),
            value: Some(FilterValue::List(values)),
        }
    }

    /// Item whose operator takes no value (`isEmpty`, `isNotEmpty`)
    pub fn unary(field: impl Into<String>, operator: impl Into<String>) -> Self {
        FilterItem {
            id: None,
            field: field.into(),
            operator: Some(operator.into()),
            value: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    fn single_value(&self) -> Option<&CellValue> {
        self.value.as_ref().and_then(FilterValue::as_single)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterModel {
    pub items: Vec<FilterItem>,
    pub logic_operator: LogicOperator,
    pub quick_filter_values: Vec<String>,
    pub quick_filter_logic_operator: LogicOperator,
}

impl FilterModel {
    pub fn with_items(items: Vec<FilterItem>) -> Self {
        FilterModel {
            items,
            ..Default::default()
        }
    }

    pub fn with_logic_operator(mut self, logic_operator: LogicOperator) -> Self {
        self.logic_operator = logic_operator;
        self
    }

    pub fn with_quick_filter<I, S>(mut self, values: I, logic_operator: LogicOperator) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.quick_filter_values = values.into_iter().map(Into::into).collect();
        self.quick_filter_logic_operator = logic_operator;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.quick_filter_values.is_empty()
    }
}

/// Full cell context, for operators that need more than the value
pub struct CellContext<'a> {
    pub row_id: &'a RowId,
    pub row: &'a RowRecord,
    pub field: &'a str,
    pub value: &'a CellValue,
}

/// A compiled per-item predicate.
pub enum ItemPredicate {
    /// Only needs the cell value
    Fast(Box<dyn Fn(&CellValue) -> bool>),
    /// Needs the full cell context
    Cell(Box<dyn Fn(&CellContext<'_>) -> bool>),
}

/// Compiles a filter item for a column. Returning `None` means the item is a
/// no-op (for example a comparison with no value yet).
pub type OperatorBuilder = Rc<dyn Fn(&FilterItem, &ColumnDef) -> Option<ItemPredicate>>;

/// A named filter operator provided by a column.
#[derive(Clone)]
pub struct FilterOperator {
    pub value: String,
    pub build: OperatorBuilder,
}

impl FilterOperator {
    pub fn new<F>(value: impl Into<String>, build: F) -> Self
    where
        F: Fn(&FilterItem, &ColumnDef) -> Option<ItemPredicate> + 'static,
    {
        FilterOperator {
            value: value.into(),
            build: Rc::new(build),
        }
    }

    /// Operator evaluated on the cell value alone.
    pub fn fast<F>(value: impl Into<String>, build: F) -> Self
    where
        F: Fn(&FilterItem) -> Option<Box<dyn Fn(&CellValue) -> bool>> + 'static,
    {
        Self::new(value, move |item, _column| build(item).map(ItemPredicate::Fast))
    }
}

impl fmt::Debug for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterOperator").field("value", &self.value).finish()
    }
}

fn lower_text(value: &CellValue) -> String {
    value.to_string().to_lowercase()
}

/// Text of the item value, or None when there is nothing to compare against
fn item_text(item: &FilterItem) -> Option<String> {
    let value = item.single_value()?;
    if value.is_empty() {
        return None;
    }
    Some(lower_text(value))
}

fn item_text_list(item: &FilterItem) -> Option<Vec<String>> {
    let values = item.value.as_ref()?.as_list()?;
    if values.is_empty() {
        return None;
    }
    Some(values.iter().map(lower_text).collect())
}

fn item_number(item: &FilterItem) -> Option<f64> {
    item.single_value()?.parse_f64()
}

fn string_operator<F>(name: &str, test: F) -> FilterOperator
where
    F: Fn(&str, &str) -> bool + Copy + 'static,
{
    FilterOperator::fast(name, move |item| {
        let needle = item_text(item)?;
        Some(Box::new(move |value: &CellValue| test(&lower_text(value), &needle)))
    })
}

fn number_operator<F>(name: &str, test: F) -> FilterOperator
where
    F: Fn(f64, f64) -> bool + Copy + 'static,
{
    FilterOperator::fast(name, move |item| {
        let target = item_number(item)?;
        Some(Box::new(move |value: &CellValue| {
            value.parse_f64().map(|v| test(v, target)).unwrap_or(false)
        }))
    })
}

fn empty_operators() -> Vec<FilterOperator> {
    vec![
        FilterOperator::fast("isEmpty", |_| Some(Box::new(|value: &CellValue| value.is_empty()))),
        FilterOperator::fast("isNotEmpty", |_| Some(Box::new(|value: &CellValue| !value.is_empty()))),
    ]
}

/// Built-in operators for a column type. The first entry is the default
/// operator used when an item does not name one.
pub fn default_operators(column_type: ColumnType) -> Vec<FilterOperator> {
    match column_type {
        ColumnType::String => {
            let mut operators = vec![
                string_operator("contains", |v, n| v.contains(n)),
                string_operator("doesNotContain", |v, n| !v.contains(n)),
                string_operator("equals", |v, n| v == n),
                string_operator("doesNotEqual", |v, n| v != n),
                string_operator("startsWith", |v, n| v.starts_with(n)),
                string_operator("endsWith", |v, n| v.ends_with(n)),
            ];
            operators.extend(empty_operators());
            operators.push(FilterOperator::fast("isAnyOf", |item| {
                let options = item_text_list(item)?;
                Some(Box::new(move |value: &CellValue| options.contains(&lower_text(value))))
            }));
            operators
        }
        ColumnType::Number => {
            let mut operators = vec![
                number_operator("=", |v, t| v == t),
                number_operator("!=", |v, t| v != t),
                number_operator(">", |v, t| v > t),
                number_operator(">=", |v, t| v >= t),
                number_operator("<", |v, t| v < t),
                number_operator("<=", |v, t| v <= t),
            ];
            operators.extend(empty_operators());
            operators.push(FilterOperator::fast("isAnyOf", |item| {
                let options: Vec<f64> = item
                    .value
                    .as_ref()?
                    .as_list()?
                    .iter()
                    .filter_map(CellValue::parse_f64)
                    .collect();
                if options.is_empty() {
                    return None;
                }
                Some(Box::new(move |value: &CellValue| {
                    value.parse_f64().map(|v| options.contains(&v)).unwrap_or(false)
                }))
            }));
            operators
        }
        ColumnType::Boolean => vec![FilterOperator::fast("is", |item| {
            let target = item.single_value()?.parse_bool()?;
            Some(Box::new(move |value: &CellValue| value.parse_bool() == Some(target)))
        })],
    }
}

/// Repairs a filter model against the columns.
///
/// Degraded items are fixed or dropped with a warning; an operator the column
/// does not provide is a configuration error.
pub fn sanitize_filter_model(model: &FilterModel, columns: &Columns) -> Result<FilterModel> {
    let multi_item = model.items.len() > 1;
    let mut used_ids: HashSet<String> = model.items.iter().filter_map(|i| i.id.clone()).collect();
    let mut next_id = 0usize;
    let mut items = Vec::with_capacity(model.items.len());

    for item in &model.items {
        let column = match columns.get(&item.field) {
            Some(column) if column.filterable => column,
            Some(_) => {
                log::warn!("dropping filter item on non-filterable column '{}'", item.field);
                continue;
            }
            None => {
                log::warn!("dropping filter item on unknown column '{}'", item.field);
                continue;
            }
        };

        let mut item = item.clone();
        match &item.operator {
            Some(name) => {
                if column.operator(name).is_none() {
                    return Err(PipelineError::UnknownFilterOperator {
                        field: item.field.clone(),
                        operator: name.clone(),
                    });
                }
            }
            None => match column.operators().first() {
                Some(default) => {
                    log::warn!(
                        "filter item on '{}' has no operator, using '{}'",
                        item.field,
                        default.value
                    );
                    item.operator = Some(default.value.clone());
                }
                None => {
                    log::warn!("column '{}' has no filter operators, dropping item", item.field);
                    continue;
                }
            },
        }

        if multi_item && item.id.is_none() {
            let id = loop {
                let candidate = format!("filter-item-{}", next_id);
                next_id += 1;
                if used_ids.insert(candidate.clone()) {
                    break candidate;
                }
            };
            log::warn!("filter item on '{}' has no id, assigning '{}'", item.field, id);
            item.id = Some(id);
        }

        items.push(item);
    }

    let quick_filter_values = model
        .quick_filter_values
        .iter()
        .map(|token| token.trim())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect();

    Ok(FilterModel {
        items,
        logic_operator: model.logic_operator,
        quick_filter_values,
        quick_filter_logic_operator: model.quick_filter_logic_operator,
    })
}

struct CompiledItem {
    id: Option<String>,
    column: ColumnDef,
    predicate: ItemPredicate,
}

impl CompiledItem {
    fn evaluate(&self, row_id: &RowId, row: &RowRecord) -> bool {
        let value = self.column.value(row);
        match &self.predicate {
            ItemPredicate::Fast(test) => test(&value),
            ItemPredicate::Cell(test) => test(&CellContext {
                row_id,
                row,
                field: &self.column.field,
                value: &value,
            }),
        }
    }
}

struct QuickToken {
    text: String,
    number: Option<f64>,
}

/// Result of one compiled filter item for one row
#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult {
    pub id: Option<String>,
    pub field: String,
    pub passed: bool,
}

/// Filter model compiled against the columns.
pub struct FilterApplier {
    items: Vec<CompiledItem>,
    logic_operator: LogicOperator,
    quick_columns: Vec<ColumnDef>,
    quick_tokens: Vec<QuickToken>,
    quick_logic_operator: LogicOperator,
}

/// Compiles `model` once so that per-row evaluation only runs the item
/// predicates.
pub fn build_filter_applier(model: &FilterModel, columns: &Columns) -> Result<FilterApplier> {
    let model = sanitize_filter_model(model, columns)?;
    let mut items = Vec::with_capacity(model.items.len());

    for item in &model.items {
        let column = match columns.get(&item.field) {
            Some(column) => column,
            None => continue,
        };
        let name = item.operator.as_deref().unwrap_or_default();
        let operator = column
            .operator(name)
            .ok_or_else(|| PipelineError::UnknownFilterOperator {
                field: item.field.clone(),
                operator: name.to_string(),
            })?;
        if let Some(predicate) = (operator.build)(item, column) {
            items.push(CompiledItem {
                id: item.id.clone(),
                column: column.clone(),
                predicate,
            });
        }
    }

    let quick_columns = columns
        .iter()
        .filter(|c| c.filterable && c.column_type != ColumnType::Boolean)
        .cloned()
        .collect();
    let quick_tokens = model
        .quick_filter_values
        .iter()
        .map(|token| QuickToken {
            text: token.to_lowercase(),
            number: token.parse::<f64>().ok(),
        })
        .collect();

    Ok(FilterApplier {
        items,
        logic_operator: model.logic_operator,
        quick_columns,
        quick_tokens,
        quick_logic_operator: model.quick_filter_logic_operator,
    })
}

impl FilterApplier {
    /// True when nothing would be filtered out
    pub fn is_noop(&self) -> bool {
        self.items.is_empty() && self.quick_tokens.is_empty()
    }

    /// Per-item results for a row, no-op items excluded.
    pub fn item_results(&self, row_id: &RowId, row: &RowRecord) -> Vec<ItemResult> {
        self.items
            .iter()
            .map(|item| ItemResult {
                id: item.id.clone(),
                field: item.column.field.clone(),
                passed: item.evaluate(row_id, row),
            })
            .collect()
    }

    fn quick_matches(&self, token: &QuickToken, row: &RowRecord) -> bool {
        self.quick_columns.iter().any(|column| {
            let value = column.value(row);
            match column.column_type {
                ColumnType::Number => match (token.number, value.parse_f64()) {
                    (Some(t), Some(v)) => t == v,
                    _ => false,
                },
                _ => lower_text(&value).contains(&token.text),
            }
        })
    }

    /// Evaluates the row, only considering items whose field passes
    /// `field_predicate`.
    pub fn is_row_matching_with<P>(&self, row_id: &RowId, row: &RowRecord, field_predicate: P) -> bool
    where
        P: Fn(&str) -> bool,
    {
        let items_pass = self.logic_operator.combine(
            self.items
                .iter()
                .filter(|item| field_predicate(&item.column.field))
                .map(|item| item.evaluate(row_id, row)),
        );
        if !items_pass {
            return false;
        }
        self.quick_logic_operator
            .combine(self.quick_tokens.iter().map(|token| self.quick_matches(token, row)))
    }

    pub fn is_row_matching(&self, row_id: &RowId, row: &RowRecord) -> bool {
        self.is_row_matching_with(row_id, row, |_| true)
    }
}

/// Client-side filtering or pass-through when the server filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    Client,
    Server,
}

/// Nodes kept by a filter pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterResult {
    pub kept: HashSet<NodeId>,
    pub matching_rows: HashSet<RowId>,
}

impl FilterResult {
    /// Keeps every node of the tree.
    pub fn pass_all(tree: &RowTree) -> Self {
        FilterResult {
            kept: tree.node_ids().cloned().collect(),
            matching_rows: tree.nodes().filter_map(|n| n.row_id().cloned()).collect(),
        }
    }

    pub fn is_kept(&self, id: &NodeId) -> bool {
        self.kept.contains(id)
    }
}

/// Marks the nodes of `tree` that pass the filter.
pub fn filter_tree(tree: &RowTree, rows: &RowRegistry, applier: &FilterApplier) -> FilterResult {
    if applier.is_noop() {
        return FilterResult::pass_all(tree);
    }

    let mut result = FilterResult::default();
    let order = tree.descendants(&NodeId::Root);

    // Reverse pre-order visits every child before its parent
    for id in order.iter().rev() {
        let node = match tree.get(id) {
            Some(node) => node,
            None => continue,
        };

        let row_matches = node.row_id().map_or(false, |row_id| {
            rows.get(row_id)
                .map_or(false, |row| applier.is_row_matching(row_id, row))
        });
        if row_matches {
            if let Some(row_id) = node.row_id() {
                result.matching_rows.insert(row_id.clone());
            }
        }

        let keep = match node {
            RowNode::Leaf(_) => row_matches,
            RowNode::Group(group) => {
                row_matches
                    || group
                        .children
                        .iter()
                        .any(|child| !child.is_footer() && result.kept.contains(child))
            }
            RowNode::Footer(_) => false,
        };

        if keep {
            result.kept.insert(id.clone());
            if let Some(footer) = node.as_group().and_then(|g| g.footer_id.as_ref()) {
                result.kept.insert(footer.clone());
            }
        }
    }

    result.kept.insert(NodeId::Root);
    if let Some(footer) = &tree.root().footer_id {
        result.kept.insert(footer.clone());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_grouped_tree;
    use std::collections::HashMap;

    fn columns() -> Columns {
        Columns::new(vec![
            ColumnDef::string("name"),
            ColumnDef::number("age"),
            ColumnDef::boolean("active"),
            ColumnDef::string("group"),
            ColumnDef::string("secret").filterable(false),
        ])
    }

    fn row(id: i64, name: &str, age: i64, active: bool, group: &str) -> RowRecord {
        let mut r = HashMap::new();
        r.insert("id".to_string(), CellValue::Int(id));
        r.insert("name".to_string(), CellValue::from(name));
        r.insert("age".to_string(), CellValue::Int(age));
        r.insert("active".to_string(), CellValue::Bool(active));
        r.insert("group".to_string(), CellValue::from(group));
        r
    }

    fn registry() -> RowRegistry {
        let mut registry = RowRegistry::default();
        registry
            .set_rows(vec![
                row(0, "Alice", 30, true, "A"),
                row(1, "Bob", 25, false, "A"),
                row(2, "Carol", 41, true, "B"),
                row(3, "Dave", 25, true, "C"),
            ])
            .unwrap();
        registry
    }

    fn matching(model: &FilterModel) -> Vec<i64> {
        let rows = registry();
        let applier = build_filter_applier(model, &columns()).unwrap();
        rows.iter()
            .filter(|(id, row)| applier.is_row_matching(id, row))
            .filter_map(|(id, _)| match id {
                RowId::Int(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_string_operators_case_insensitive() {
        assert_eq!(matching(&FilterModel::with_items(vec![FilterItem::new("name", "contains", "A")])), vec![0, 2, 3]);
        assert_eq!(matching(&FilterModel::with_items(vec![FilterItem::new("name", "equals", "bob")])), vec![1]);
        assert_eq!(matching(&FilterModel::with_items(vec![FilterItem::new("name", "endsWith", "E")])), vec![0, 3]);
        assert_eq!(
            matching(&FilterModel::with_items(vec![FilterItem::any_of(
                "name",
                vec![CellValue::from("alice"), CellValue::from("DAVE")]
            )])),
            vec![0, 3]
        );
    }

    #[test]
    fn test_number_and_boolean_operators() {
        assert_eq!(matching(&FilterModel::with_items(vec![FilterItem::new("age", ">", 26)])), vec![0, 2]);
        assert_eq!(matching(&FilterModel::with_items(vec![FilterItem::new("age", "=", "25")])), vec![1, 3]);
        assert_eq!(matching(&FilterModel::with_items(vec![FilterItem::new("active", "is", false)])), vec![1]);
    }

    #[test]
    fn test_noop_items_pass_everything() {
        let model = FilterModel::with_items(vec![FilterItem::new("name", "contains", "")]);
        assert_eq!(matching(&model), vec![0, 1, 2, 3]);

        let model = FilterModel::with_items(vec![FilterItem::new("age", ">", CellValue::Null)]);
        assert_eq!(matching(&model), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_and_subset_of_or() {
        let items = vec![FilterItem::new("age", "=", 25), FilterItem::new("active", "is", true)];
        let and = matching(&FilterModel::with_items(items.clone()));
        let or = matching(&FilterModel::with_items(items).with_logic_operator(LogicOperator::Or));
        assert_eq!(and, vec![3]);
        assert_eq!(or, vec![0, 1, 2, 3]);
        assert!(and.iter().all(|id| or.contains(id)));
    }

    #[test]
    fn test_unknown_operator_is_error() {
        let model = FilterModel::with_items(vec![FilterItem::new("age", "contains", "2")]);
        let err = build_filter_applier(&model, &columns()).err().unwrap();
        assert_eq!(
            err,
            PipelineError::UnknownFilterOperator {
                field: "age".to_string(),
                operator: "contains".to_string(),
            }
        );
    }

    #[test]
    fn test_sanitize_repairs_degraded_items() {
        let model = FilterModel::with_items(vec![
            FilterItem {
                id: None,
                field: "name".to_string(),
                operator: None,
                value: Some(FilterValue::Single(CellValue::from("al"))),
            },
            FilterItem::new("missing", "equals", "x"),
            FilterItem::new("secret", "equals", "x"),
            FilterItem::new("age", ">", 1).with_id("filter-item-0"),
        ])
        .with_quick_filter(vec!["  ", "bob"], LogicOperator::And);

        let sanitized = sanitize_filter_model(&model, &columns()).unwrap();
        assert_eq!(sanitized.items.len(), 2);
        assert_eq!(sanitized.items[0].operator.as_deref(), Some("contains"));
        assert_eq!(sanitized.items[0].id.as_deref(), Some("filter-item-1"));
        assert_eq!(sanitized.quick_filter_values, vec!["bob".to_string()]);

        // Sanitizing is stable
        assert_eq!(sanitize_filter_model(&sanitized, &columns()).unwrap(), sanitized);
    }

    #[test]
    fn test_quick_filter() {
        let model = FilterModel::default().with_quick_filter(vec!["25"], LogicOperator::And);
        assert_eq!(matching(&model), vec![1, 3]);

        // Tokens ANDed: "a" in some column and 25 in age
        let model = FilterModel::default().with_quick_filter(vec!["a", "25"], LogicOperator::And);
        assert_eq!(matching(&model), vec![1, 3]);

        let model = FilterModel::default().with_quick_filter(vec!["carol", "dave"], LogicOperator::Or);
        assert_eq!(matching(&model), vec![2, 3]);
    }

    #[test]
    fn test_cell_context_operator() {
        let only_even_ids = FilterOperator::new("evenId", |_item, _column| {
            Some(ItemPredicate::Cell(Box::new(|ctx: &CellContext<'_>| {
                matches!(ctx.row_id, RowId::Int(v) if v % 2 == 0) && !ctx.value.is_null()
            })))
        });
        let columns = Columns::new(vec![ColumnDef::string("name").with_filter_operators(vec![only_even_ids])]);
        let model = FilterModel::with_items(vec![FilterItem::unary("name", "evenId")]);
        let applier = build_filter_applier(&model, &columns).unwrap();

        let rows = registry();
        let ids: Vec<&RowId> = rows
            .iter()
            .filter(|(id, row)| applier.is_row_matching(id, row))
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![&RowId::Int(0), &RowId::Int(2)]);
    }

    #[test]
    fn test_field_predicate_skips_items() {
        let model = FilterModel::with_items(vec![FilterItem::new("age", "=", 25), FilterItem::new("name", "equals", "bob")]);
        let applier = build_filter_applier(&model, &columns()).unwrap();
        let rows = registry();
        let dave = rows.get(&RowId::Int(3)).unwrap();

        assert!(!applier.is_row_matching(&RowId::Int(3), dave));
        assert!(applier.is_row_matching_with(&RowId::Int(3), dave, |field| field != "name"));
        assert_eq!(applier.item_results(&RowId::Int(3), dave).len(), 2);
    }

    #[test]
    fn test_filter_tree_keeps_groups_with_matches() {
        let rows = registry();
        let mut tree = build_grouped_tree(&rows, &columns(), &["group".to_string()]).unwrap().tree;
        tree.add_footer(&NodeId::Group("group:s:A".into())).unwrap();
        tree.add_footer(&NodeId::Group("group:s:B".into())).unwrap();

        let model = FilterModel::with_items(vec![FilterItem::new("group", "equals", "A")]);
        let applier = build_filter_applier(&model, &columns()).unwrap();
        let result = filter_tree(&tree, &rows, &applier);

        assert!(result.is_kept(&NodeId::Group("group:s:A".into())));
        assert!(result.is_kept(&NodeId::footer_of(&NodeId::Group("group:s:A".into()))));
        assert!(!result.is_kept(&NodeId::Group("group:s:B".into())));
        assert!(!result.is_kept(&NodeId::footer_of(&NodeId::Group("group:s:B".into()))));
        assert_eq!(
            result.matching_rows,
            [RowId::Int(0), RowId::Int(1)].into_iter().collect::<HashSet<RowId>>()
        );

        // Idempotent
        assert_eq!(filter_tree(&tree, &rows, &applier), result);
    }

    #[test]
    fn test_model_json_shape() {
        let json = r#"{"items":[{"field":"age","operator":">","value":3}],"logicOperator":"or"}"#;
        let model: FilterModel = serde_json::from_str(json).unwrap();
        assert_eq!(model.logic_operator, LogicOperator::Or);
        assert_eq!(model.items[0].value, Some(FilterValue::Single(CellValue::Int(3))));
        assert!(model.quick_filter_values.is_empty());
    }
}
