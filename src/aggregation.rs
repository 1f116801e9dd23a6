/// Aggregation Engine
///
/// Per-group summary values for the fields of the aggregation model, and the
/// footer nodes that display them. Footers are added by the `"aggregation"`
/// hydration processor and removed by it again, so turning aggregation off
/// only ever removes nodes it synthesized.

use crate::column::{CellValue, ColumnDef, ColumnType, Columns};
use crate::error::{PipelineError, Result};
use crate::row::{RowId, RowRegistry};
use crate::tree::{GroupNode, NodeId, RowTree};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

/// Field → aggregation function name, in insertion order
pub type AggregationModel = IndexMap<String, String>;

/// An aggregation over the values of one column within a group.
pub trait AggregationFunction {
    fn apply(&self, values: &[CellValue]) -> CellValue;

    /// Column types the function accepts; `None` accepts every type.
    fn column_types(&self) -> Option<&[ColumnType]> {
        None
    }
}

const NUMBER_ONLY: &[ColumnType] = &[ColumnType::Number];
const NUMBER_OR_STRING: &[ColumnType] = &[ColumnType::Number, ColumnType::String];

struct Sum;

impl AggregationFunction for Sum {
    fn apply(&self, values: &[CellValue]) -> CellValue {
        // None once a float shows up or the integer sum overflows
        let mut int_sum: Option<i64> = Some(0);
        let mut float_sum = 0.0;
        for value in values {
            match value {
                CellValue::Int(v) => {
                    int_sum = int_sum.and_then(|sum| sum.checked_add(*v));
                    float_sum += *v as f64;
                }
                CellValue::Float(v) => {
                    int_sum = None;
                    float_sum += v;
                }
                _ => {}
            }
        }
        match int_sum {
            Some(sum) => CellValue::Int(sum),
            None => CellValue::Float(float_sum),
        }
    }

    fn column_types(&self) -> Option<&[ColumnType]> {
        Some(NUMBER_ONLY)
    }
}

struct Avg;

impl AggregationFunction for Avg {
    fn apply(&self, values: &[CellValue]) -> CellValue {
        let numbers: Vec<f64> = values.iter().filter_map(CellValue::as_f64).collect();
        if numbers.is_empty() {
            return CellValue::Null;
        }
        CellValue::Float(numbers.iter().sum::<f64>() / numbers.len() as f64)
    }

    fn column_types(&self) -> Option<&[ColumnType]> {
        Some(NUMBER_ONLY)
    }
}

struct Min;

impl AggregationFunction for Min {
    fn apply(&self, values: &[CellValue]) -> CellValue {
        values
            .iter()
            .filter(|v| !v.is_null())
            .min_by(|a, b| a.compare(b))
            .cloned()
            .unwrap_or_default()
    }

    fn column_types(&self) -> Option<&[ColumnType]> {
        Some(NUMBER_OR_STRING)
    }
}

struct Max;

impl AggregationFunction for Max {
    fn apply(&self, values: &[CellValue]) -> CellValue {
        values
            .iter()
            .filter(|v| !v.is_null())
            .max_by(|a, b| a.compare(b))
            .cloned()
            .unwrap_or_default()
    }

    fn column_types(&self) -> Option<&[ColumnType]> {
        Some(NUMBER_OR_STRING)
    }
}

struct Size;

impl AggregationFunction for Size {
    fn apply(&self, values: &[CellValue]) -> CellValue {
        CellValue::Int(values.len() as i64)
    }
}

/// Registry of aggregation functions by name.
#[derive(Clone)]
pub struct AggregationFunctions {
    functions: IndexMap<String, Rc<dyn AggregationFunction>>,
}

impl Default for AggregationFunctions {
    fn default() -> Self {
        let mut functions = AggregationFunctions {
            functions: IndexMap::new(),
        };
        functions.register("sum", Sum);
        functions.register("avg", Avg);
        functions.register("min", Min);
        functions.register("max", Max);
        functions.register("size", Size);
        functions
    }
}

impl fmt::Debug for AggregationFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.functions.keys()).finish()
    }
}

impl AggregationFunctions {
    /// Registers (or replaces) a function.
    pub fn register<F: AggregationFunction + 'static>(&mut self, name: impl Into<String>, function: F) {
        self.functions.insert(name.into(), Rc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<&Rc<dyn AggregationFunction>> {
        self.functions.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.functions.keys().map(|k| k.as_str()).collect()
    }

    /// Checks that `function` may aggregate `column`.
    pub fn check_compatible(&self, column: &ColumnDef, function: &str) -> Result<()> {
        let aggregation = self
            .get(function)
            .ok_or_else(|| PipelineError::UnknownAggregationFunction(function.to_string()))?;

        let incompatible = || PipelineError::IncompatibleAggregation {
            field: column.field.clone(),
            function: function.to_string(),
        };

        if !column.aggregable {
            return Err(incompatible());
        }
        if let Some(types) = aggregation.column_types() {
            if !types.contains(&column.column_type) {
                return Err(incompatible());
            }
        }
        if let Some(allowed) = &column.available_aggregation_functions {
            if !allowed.iter().any(|name| name == function) {
                return Err(incompatible());
            }
        }
        Ok(())
    }

    /// Functions usable on a column
    pub fn available_for(&self, column: &ColumnDef) -> Vec<&str> {
        self.names()
            .into_iter()
            .filter(|name| self.check_compatible(column, name).is_ok())
            .collect()
    }
}

/// Drops model entries that cannot be computed, with a warning.
pub fn sanitize_aggregation_model(
    model: &AggregationModel,
    columns: &Columns,
    functions: &AggregationFunctions,
) -> AggregationModel {
    model
        .iter()
        .filter(|(field, function)| {
            let column = match columns.get(field) {
                Some(column) => column,
                None => {
                    log::warn!("dropping aggregation on unknown column '{}'", field);
                    return false;
                }
            };
            match functions.check_compatible(column, function) {
                Ok(()) => true,
                Err(err) => {
                    log::warn!("dropping aggregation entry: {}", err);
                    false
                }
            }
        })
        .map(|(field, function)| (field.clone(), function.clone()))
        .collect()
}

/// Where a group's aggregated values are displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationPosition {
    Inline,
    Footer,
}

/// Placement policy across the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregationPlacement {
    /// Every group, root included, gets a footer
    #[default]
    Footer,
    /// Values sit on the group rows, no footers
    Inline,
    /// Grand total in a root footer, inline values on the other groups
    RootFooter,
}

impl AggregationPlacement {
    pub fn position(&self, group: &GroupNode) -> AggregationPosition {
        match self {
            AggregationPlacement::Footer => AggregationPosition::Footer,
            AggregationPlacement::Inline => AggregationPosition::Inline,
            AggregationPlacement::RootFooter if group.is_root() => AggregationPosition::Footer,
            AggregationPlacement::RootFooter => AggregationPosition::Inline,
        }
    }
}

/// Which leaves contribute to the aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregationRowsScope {
    /// Only leaves passing the filter
    #[default]
    Filtered,
    All,
}

/// Adds a footer to every group positioned as `Footer`.
pub fn add_footers(tree: &mut RowTree, placement: AggregationPlacement) -> Result<Vec<NodeId>> {
    let targets: Vec<NodeId> = tree
        .groups()
        .filter(|g| placement.position(g) == AggregationPosition::Footer)
        .map(|g| g.id.clone())
        .collect();

    targets.iter().map(|id| tree.add_footer(id)).collect()
}

/// Synchronizes footers with the aggregation model.
///
/// Previously synthesized footers are always removed first; new ones are
/// added only when the model is non-empty.
pub fn hydrate_footers(tree: &mut RowTree, model: &AggregationModel, placement: AggregationPlacement) -> Result<()> {
    let removed = tree.remove_all_footers();
    if model.is_empty() {
        if !removed.is_empty() {
            log::debug!("removed {} aggregation footers", removed.len());
        }
        return Ok(());
    }
    let added = add_footers(tree, placement)?;
    log::debug!("synthesized {} aggregation footers", added.len());
    Ok(())
}

/// Aggregated values per node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationResult {
    pub footers: Vec<NodeId>,
    /// Keyed by footer id for footer-positioned groups, by group id otherwise
    pub values: HashMap<NodeId, IndexMap<String, CellValue>>,
}

impl AggregationResult {
    pub fn value(&self, id: &NodeId, field: &str) -> Option<&CellValue> {
        self.values.get(id).and_then(|values| values.get(field))
    }
}

/// Computes the aggregates of every group of the tree.
///
/// `included_rows`, when given, restricts the leaves that contribute. Every
/// model entry must name a known column and a compatible function; bypassing
/// `sanitize_aggregation_model` with a bad entry is a configuration error.
pub fn compute_aggregates(
    tree: &RowTree,
    model: &AggregationModel,
    rows: &RowRegistry,
    columns: &Columns,
    functions: &AggregationFunctions,
    placement: AggregationPlacement,
    included_rows: Option<&HashSet<RowId>>,
) -> Result<AggregationResult> {
    let mut resolved = Vec::with_capacity(model.len());
    for (field, function) in model {
        let column = columns
            .get(field)
            .ok_or_else(|| PipelineError::UnknownColumn(field.clone()))?;
        functions.check_compatible(column, function)?;
        let aggregation = functions
            .get(function)
            .ok_or_else(|| PipelineError::UnknownAggregationFunction(function.clone()))?;
        resolved.push((column, aggregation));
    }

    let footers: Vec<NodeId> = tree
        .nodes()
        .filter(|n| n.is_footer())
        .map(|n| n.id().clone())
        .collect();

    let mut result = AggregationResult {
        footers,
        values: HashMap::new(),
    };
    if resolved.is_empty() {
        return Ok(result);
    }

    for group in tree.groups() {
        let leaves: Vec<RowId> = tree
            .leaf_descendants(&group.id)
            .into_iter()
            .filter(|id| included_rows.map_or(true, |set| set.contains(id)))
            .collect();

        let mut values = IndexMap::with_capacity(resolved.len());
        for (column, aggregation) in &resolved {
            let cells: Vec<CellValue> = leaves
                .iter()
                .filter_map(|id| rows.get(id))
                .map(|row| column.value(row))
                .collect();
            values.insert(column.field.clone(), aggregation.apply(&cells));
        }

        let key = match (placement.position(group), &group.footer_id) {
            (AggregationPosition::Footer, Some(footer)) => footer.clone(),
            _ => group.id.clone(),
        };
        result.values.insert(key, values);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_grouped_tree;
    use crate::row::RowRecord;

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
            ColumnDef::number("score").with_aggregation_functions(["max"]),
            ColumnDef::number("fixed").aggregable(false),
        ])
    }

    fn registry() -> RowRegistry {
        let mut registry = RowRegistry::default();
        registry
            .set_rows(vec![row(0, "A", 3), row(1, "A", 4), row(2, "B", 10)])
            .unwrap();
        registry
    }

    fn model(entries: &[(&str, &str)]) -> AggregationModel {
        entries
            .iter()
            .map(|(f, a)| (f.to_string(), a.to_string()))
            .collect()
    }

    fn group_a() -> NodeId {
        NodeId::Group("group:s:A".into())
    }

    #[test]
    fn test_builtin_functions() {
        let values = vec![CellValue::Int(3), CellValue::Null, CellValue::Float(1.5)];
        let functions = AggregationFunctions::default();
        assert_eq!(functions.get("sum").unwrap().apply(&values), CellValue::Float(4.5));
        assert_eq!(functions.get("avg").unwrap().apply(&values), CellValue::Float(2.25));
        assert_eq!(functions.get("min").unwrap().apply(&values), CellValue::Float(1.5));
        assert_eq!(functions.get("max").unwrap().apply(&values), CellValue::Int(3));
        assert_eq!(functions.get("size").unwrap().apply(&values), CellValue::Int(3));
        assert_eq!(functions.get("sum").unwrap().apply(&[]), CellValue::Int(0));
        assert_eq!(functions.get("avg").unwrap().apply(&[]), CellValue::Null);
    }

    #[test]
    fn test_sum_overflow_falls_back_to_float() {
        let sum = AggregationFunctions::default();
        let sum = sum.get("sum").unwrap();
        let values = vec![CellValue::Int(i64::MAX), CellValue::Int(1)];
        assert_eq!(sum.apply(&values), CellValue::Float(i64::MAX as f64 + 1.0));
        assert_eq!(
            sum.apply(&[CellValue::Int(i64::MAX - 1), CellValue::Int(1)]),
            CellValue::Int(i64::MAX)
        );
    }

    #[test]
    fn test_compatibility() {
        let functions = AggregationFunctions::default();
        let columns = columns();
        assert!(functions.check_compatible(columns.get("value").unwrap(), "sum").is_ok());
        assert!(functions.check_compatible(columns.get("group").unwrap(), "sum").is_err());
        assert!(functions.check_compatible(columns.get("group").unwrap(), "max").is_ok());
        assert!(functions.check_compatible(columns.get("score").unwrap(), "sum").is_err());
        assert!(functions.check_compatible(columns.get("fixed").unwrap(), "size").is_err());
        assert_eq!(
            functions.check_compatible(columns.get("value").unwrap(), "median"),
            Err(PipelineError::UnknownAggregationFunction("median".to_string()))
        );
        assert_eq!(functions.available_for(columns.get("score").unwrap()), vec!["max"]);
    }

    #[test]
    fn test_sanitize_drops_incompatible() {
        let sanitized = sanitize_aggregation_model(
            &model(&[("group", "sum"), ("value", "sum"), ("ghost", "sum"), ("score", "avg")]),
            &columns(),
            &AggregationFunctions::default(),
        );
        assert_eq!(sanitized, model(&[("value", "sum")]));
    }

    #[test]
    fn test_footer_values() {
        let rows = registry();
        let mut tree = build_grouped_tree(&rows, &columns(), &["group".to_string()]).unwrap().tree;
        let aggregation = model(&[("value", "sum")]);
        hydrate_footers(&mut tree, &aggregation, AggregationPlacement::Footer).unwrap();

        let result = compute_aggregates(
            &tree,
            &aggregation,
            &rows,
            &columns(),
            &AggregationFunctions::default(),
            AggregationPlacement::Footer,
            None,
        )
        .unwrap();

        assert_eq!(result.footers.len(), 3);
        assert_eq!(result.value(&NodeId::footer_of(&group_a()), "value"), Some(&CellValue::Int(7)));
        assert_eq!(result.value(&NodeId::footer_of(&NodeId::Root), "value"), Some(&CellValue::Int(17)));
        assert_eq!(result.value(&group_a(), "value"), None);
    }

    #[test]
    fn test_root_footer_placement_and_scope() {
        let rows = registry();
        let mut tree = build_grouped_tree(&rows, &columns(), &["group".to_string()]).unwrap().tree;
        let aggregation = model(&[("value", "max")]);
        hydrate_footers(&mut tree, &aggregation, AggregationPlacement::RootFooter).unwrap();
        assert_eq!(tree.groups().filter(|g| g.footer_id.is_some()).count(), 1);

        let included: HashSet<RowId> = [RowId::Int(0), RowId::Int(1)].into_iter().collect();
        let result = compute_aggregates(
            &tree,
            &aggregation,
            &rows,
            &columns(),
            &AggregationFunctions::default(),
            AggregationPlacement::RootFooter,
            Some(&included),
        )
        .unwrap();

        assert_eq!(result.value(&group_a(), "value"), Some(&CellValue::Int(4)));
        assert_eq!(result.value(&NodeId::footer_of(&NodeId::Root), "value"), Some(&CellValue::Int(4)));
        assert_eq!(result.value(&NodeId::Group("group:s:B".into()), "value"), Some(&CellValue::Null));
    }

    #[test]
    fn test_bypassing_sanitizer_is_error() {
        let rows = registry();
        let tree = build_grouped_tree(&rows, &columns(), &["group".to_string()]).unwrap().tree;
        let err = compute_aggregates(
            &tree,
            &model(&[("group", "sum")]),
            &rows,
            &columns(),
            &AggregationFunctions::default(),
            AggregationPlacement::Footer,
            None,
        )
        .unwrap_err();
        assert_eq!(
            err,
            PipelineError::IncompatibleAggregation {
                field: "group".to_string(),
                function: "sum".to_string(),
            }
        );
    }

    #[test]
    fn test_toggle_is_symmetric() {
        let rows = registry();
        let mut tree = build_grouped_tree(&rows, &columns(), &["group".to_string()]).unwrap().tree;
        let before = tree.clone();

        hydrate_footers(&mut tree, &model(&[("value", "sum")]), AggregationPlacement::Footer).unwrap();
        assert_eq!(tree.len(), before.len() + 3);
        assert!(tree.verify().is_ok());

        hydrate_footers(&mut tree, &AggregationModel::new(), AggregationPlacement::Footer).unwrap();
        assert_eq!(tree, before);
    }

    #[test]
    fn test_custom_function() {
        struct Range;
        impl AggregationFunction for Range {
            fn apply(&self, values: &[CellValue]) -> CellValue {
                let numbers: Vec<f64> = values.iter().filter_map(CellValue::as_f64).collect();
                let min = numbers.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = numbers.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                if numbers.is_empty() {
                    CellValue::Null
                } else {
                    CellValue::Float(max - min)
                }
            }
            fn column_types(&self) -> Option<&[ColumnType]> {
                Some(&[ColumnType::Number])
            }
        }

        let mut functions = AggregationFunctions::default();
        functions.register("range", Range);
        assert!(functions.check_compatible(columns().get("value").unwrap(), "range").is_ok());
        assert_eq!(
            functions.get("range").unwrap().apply(&[CellValue::Int(2), CellValue::Int(9)]),
            CellValue::Float(7.0)
        );
    }
}
