/// Cell values and column definitions
///
/// A column definition tells every pipeline stage how to read, compare, filter
/// and aggregate one field of the row records. Rows themselves stay opaque
/// key-value maps; columns are the typed lens over them.

use crate::filter::{default_operators, FilterOperator};
use crate::row::RowRecord;
use crate::sort::SortComparator;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

/// Column data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnType {
    String,
    Number,
    Boolean,
}

/// A single cell value.
///
/// Serialized untagged so that JSON scalars map directly onto it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Null or a string that is empty after trimming
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of the value. Ints widen to f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(v) => Some(*v as f64),
            CellValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Parses the value as a number, accepting numeric strings.
    pub fn parse_f64(&self) -> Option<f64> {
        match self {
            CellValue::String(s) => s.trim().parse::<f64>().ok(),
            other => other.as_f64(),
        }
    }

    /// Parses the value as a boolean, accepting "true"/"false" strings.
    pub fn parse_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(v) => Some(*v),
            CellValue::String(s) => match s.trim().to_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            CellValue::Null => 0,
            CellValue::Int(_) | CellValue::Float(_) => 1,
            CellValue::String(_) => 2,
            CellValue::Bool(_) => 3,
        }
    }

    /// Total order used by the default sort comparator.
    ///
    /// Nulls sort first, numbers compare numerically across Int/Float, and
    /// values of different types order by type rank.
    pub fn compare(&self, other: &CellValue) -> Ordering {
        match (self, other) {
            (CellValue::Null, CellValue::Null) => Ordering::Equal,
            (CellValue::Null, _) => Ordering::Less,
            (_, CellValue::Null) => Ordering::Greater,
            (CellValue::Int(a), CellValue::Int(b)) => a.cmp(b),
            (CellValue::String(a), CellValue::String(b)) => a.cmp(b),
            (CellValue::Bool(a), CellValue::Bool(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.type_rank().cmp(&b.type_rank()),
            },
        }
    }

    /// Stable textual key used to bucket values into groups.
    ///
    /// Numbers that hold the same value share a key regardless of Int/Float.
    pub fn group_key(&self) -> String {
        match self {
            CellValue::Null => "null".to_string(),
            CellValue::Bool(b) => format!("b:{}", b),
            CellValue::Int(i) => format!("n:{}", i),
            CellValue::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                format!("n:{}", *f as i64)
            }
            CellValue::Float(f) => format!("n:{}", f),
            CellValue::String(s) => format!("s:{}", s),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(v) => write!(f, "{}", v),
            CellValue::Int(v) => write!(f, "{}", v),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::String(v) => f.write_str(v),
        }
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Int(v)
    }
}

impl From<i32> for CellValue {
    fn from(v: i32) -> Self {
        CellValue::Int(v as i64)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Float(v)
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::String(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::String(v)
    }
}

/// Computes a cell value from the whole row.
pub type ValueGetter = Rc<dyn Fn(&RowRecord) -> CellValue>;

/// Definition of one grid column.
#[derive(Clone)]
pub struct ColumnDef {
    pub field: String,
    pub column_type: ColumnType,
    pub width: f64,
    pub filterable: bool,
    pub sortable: bool,
    pub groupable: bool,
    pub aggregable: bool,
    /// When set, only these aggregation functions may be used on the column
    pub available_aggregation_functions: Option<Vec<String>>,
    /// Overrides the default operators for the column type
    pub filter_operators: Option<Vec<FilterOperator>>,
    pub sort_comparator: Option<SortComparator>,
    pub value_getter: Option<ValueGetter>,
}

impl ColumnDef {
    pub const DEFAULT_WIDTH: f64 = 100.0;

    pub fn new(field: impl Into<String>, column_type: ColumnType) -> Self {
        ColumnDef {
            field: field.into(),
            column_type,
            width: Self::DEFAULT_WIDTH,
            filterable: true,
            sortable: true,
            groupable: true,
            aggregable: true,
            available_aggregation_functions: None,
            filter_operators: None,
            sort_comparator: None,
            value_getter: None,
        }
    }

    pub fn string(field: impl Into<String>) -> Self {
        Self::new(field, ColumnType::String)
    }

    pub fn number(field: impl Into<String>) -> Self {
        Self::new(field, ColumnType::Number)
    }

    pub fn boolean(field: impl Into<String>) -> Self {
        Self::new(field, ColumnType::Boolean)
    }

    pub fn with_width(mut self, width: f64) -> Self {
        self.width = width.max(0.0);
        self
    }

    pub fn filterable(mut self, filterable: bool) -> Self {
        self.filterable = filterable;
        self
    }

    pub fn sortable(mut self, sortable: bool) -> Self {
        self.sortable = sortable;
        self
    }

    pub fn groupable(mut self, groupable: bool) -> Self {
        self.groupable = groupable;
        self
    }

    pub fn aggregable(mut self, aggregable: bool) -> Self {
        self.aggregable = aggregable;
        self
    }

    pub fn with_aggregation_functions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.available_aggregation_functions = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_filter_operators(mut self, operators: Vec<FilterOperator>) -> Self {
        self.filter_operators = Some(operators);
        self
    }

    pub fn with_sort_comparator<F>(mut self, comparator: F) -> Self
    where
        F: Fn(&CellValue, &CellValue) -> Ordering + 'static,
    {
        self.sort_comparator = Some(Rc::new(comparator));
        self
    }

    pub fn with_value_getter<F>(mut self, getter: F) -> Self
    where
        F: Fn(&RowRecord) -> CellValue + 'static,
    {
        self.value_getter = Some(Rc::new(getter));
        self
    }

    /// Reads this column's value from a row.
    pub fn value(&self, row: &RowRecord) -> CellValue {
        match &self.value_getter {
            Some(getter) => getter(row),
            None => row.get(&self.field).cloned().unwrap_or(CellValue::Null),
        }
    }

    /// Filter operators available on this column
    pub fn operators(&self) -> Vec<FilterOperator> {
        match &self.filter_operators {
            Some(operators) => operators.clone(),
            None => default_operators(self.column_type),
        }
    }

    /// Finds an operator by name
    pub fn operator(&self, name: &str) -> Option<FilterOperator> {
        self.operators().into_iter().find(|op| op.value == name)
    }

    /// Compares two values with the column comparator (or the default one).
    pub fn compare(&self, a: &CellValue, b: &CellValue) -> Ordering {
        match &self.sort_comparator {
            Some(cmp) => cmp(a, b),
            None => a.compare(b),
        }
    }
}

impl fmt::Debug for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDef")
            .field("field", &self.field)
            .field("column_type", &self.column_type)
            .field("width", &self.width)
            .field("filterable", &self.filterable)
            .field("sortable", &self.sortable)
            .field("groupable", &self.groupable)
            .field("aggregable", &self.aggregable)
            .field("available_aggregation_functions", &self.available_aggregation_functions)
            .field("custom_operators", &self.filter_operators.is_some())
            .field("custom_comparator", &self.sort_comparator.is_some())
            .field("value_getter", &self.value_getter.is_some())
            .finish()
    }
}

/// Ordered set of column definitions, keyed by field.
#[derive(Debug, Clone, Default)]
pub struct Columns {
    defs: IndexMap<String, ColumnDef>,
}

impl Columns {
    pub fn new(defs: Vec<ColumnDef>) -> Self {
        let mut columns = Columns::default();
        for def in defs {
            if columns.defs.contains_key(&def.field) {
                log::warn!("column '{}' declared twice, keeping the last definition", def.field);
            }
            columns.defs.insert(def.field.clone(), def);
        }
        columns
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&ColumnDef> {
        self.defs.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.defs.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnDef> {
        self.defs.values()
    }

    pub fn fields(&self) -> Vec<&str> {
        self.defs.keys().map(|k| k.as_str()).collect()
    }

    /// Reads a field from a row, going through the column getter when the
    /// column is known.
    pub fn value(&self, row: &RowRecord, field: &str) -> CellValue {
        match self.defs.get(field) {
            Some(def) => def.value(row),
            None => row.get(field).cloned().unwrap_or(CellValue::Null),
        }
    }

    /// Cumulative left offset of every column
    pub fn positions(&self) -> Vec<f64> {
        let mut left = 0.0;
        self.defs
            .values()
            .map(|def| {
                let position = left;
                left += def.width;
                position
            })
            .collect()
    }

    pub fn total_width(&self) -> f64 {
        self.defs.values().map(|def| def.width).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_compare_nulls_first() {
        assert_eq!(CellValue::Null.compare(&CellValue::Int(1)), Ordering::Less);
        assert_eq!(CellValue::Int(1).compare(&CellValue::Null), Ordering::Greater);
        assert_eq!(CellValue::Null.compare(&CellValue::Null), Ordering::Equal);
    }

    #[test]
    fn test_compare_mixed_numbers() {
        assert_eq!(CellValue::Int(2).compare(&CellValue::Float(2.5)), Ordering::Less);
        assert_eq!(CellValue::Float(3.0).compare(&CellValue::Int(3)), Ordering::Equal);
        // Numbers before strings before booleans
        assert_eq!(CellValue::Int(100).compare(&CellValue::from("a")), Ordering::Less);
        assert_eq!(CellValue::from("z").compare(&CellValue::Bool(false)), Ordering::Less);
    }

    #[test]
    fn test_group_key_normalizes_numbers() {
        assert_eq!(CellValue::Int(1).group_key(), CellValue::Float(1.0).group_key());
        assert_ne!(CellValue::Int(1).group_key(), CellValue::from("1").group_key());
        assert_eq!(CellValue::Null.group_key(), "null");
    }

    #[test]
    fn test_untagged_json() {
        let values: Vec<CellValue> = serde_json::from_str(r#"[null, true, 3, 2.5, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                CellValue::Null,
                CellValue::Bool(true),
                CellValue::Int(3),
                CellValue::Float(2.5),
                CellValue::from("x"),
            ]
        );
        assert_eq!(serde_json::to_string(&CellValue::Int(4)).unwrap(), "4");
    }

    #[test]
    fn test_value_getter() {
        let col = ColumnDef::number("total").with_value_getter(|row| {
            let qty = row.get("qty").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let price = row.get("price").and_then(|v| v.as_f64()).unwrap_or(0.0);
            CellValue::Float(qty * price)
        });

        let mut row: RowRecord = HashMap::new();
        row.insert("qty".to_string(), CellValue::Int(3));
        row.insert("price".to_string(), CellValue::Float(2.5));
        assert_eq!(col.value(&row), CellValue::Float(7.5));
    }

    #[test]
    fn test_positions() {
        let columns = Columns::new(vec![
            ColumnDef::string("a").with_width(50.0),
            ColumnDef::string("b").with_width(80.0),
            ColumnDef::string("c"),
        ]);
        assert_eq!(columns.positions(), vec![0.0, 50.0, 130.0]);
        assert_eq!(columns.total_width(), 230.0);
    }

    #[test]
    fn test_default_operators_by_type() {
        let col = ColumnDef::number("age");
        assert!(col.operator(">").is_some());
        assert!(col.operator("contains").is_none());

        let col = ColumnDef::string("name");
        assert!(col.operator("contains").is_some());
    }
}
