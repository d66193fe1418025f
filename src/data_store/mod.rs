use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::semantic_model::DimensionType;

/// Schema of a table in the relational store backing a semantic model.
///
/// Only column names and their semantic types are tracked; the store itself
/// is owned by the host platform.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BackingTable {
    /// Dotted table name with identifier quotes removed, e.g. `03_gold.dim_date`
    pub name: String,
    pub columns: IndexMap<String, DimensionType>,
}

impl BackingTable {
    pub fn column_type(&self, column: &str) -> Option<DimensionType> {
        self.columns.get(column).copied()
    }
}

/// `"03_gold".dim_date`, the gold layer calendar table
pub fn dim_date_table() -> BackingTable {
    let columns = [
        ("date_key", DimensionType::Number),
        ("date", DimensionType::Time),
        ("year", DimensionType::Number),
        ("quarter", DimensionType::Number),
        ("month", DimensionType::Number),
        ("month_name", DimensionType::String),
        ("week", DimensionType::Number),
        ("day_of_month", DimensionType::Number),
        ("day_of_week", DimensionType::Number),
        ("day_name", DimensionType::String),
        ("is_weekend", DimensionType::Boolean),
        ("is_holiday", DimensionType::Boolean),
        ("fiscal_year", DimensionType::Number),
        ("fiscal_quarter", DimensionType::Number),
    ]
    .into_iter()
    .map(|(name, column_type)| (name.to_string(), column_type))
    .collect();

    BackingTable {
        name: "03_gold.dim_date".to_string(),
        columns,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl Row {
    pub fn new() -> Self {
        Row {
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn with(mut self, column: &str, value: Value) -> Self {
        self.columns.push(column.to_string());
        self.values.push(value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }
}

impl Default for Row {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
}

impl Value {
    /// Text rendering matching a PostgreSQL `::text` cast
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Boolean(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        }
    }

    pub fn semantic_type(&self) -> Option<DimensionType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DimensionType::Boolean),
            Value::Int(_) | Value::Float(_) => Some(DimensionType::Number),
            Value::String(_) => Some(DimensionType::String),
            Value::Date(_) => Some(DimensionType::Time),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.to_text() {
            Some(text) => write!(f, "{}", text),
            None => write!(f, "NULL"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dim_date_table_has_every_gold_column() {
        let table = dim_date_table();
        assert_eq!(table.columns.len(), 14);
        assert_eq!(table.column_type("date"), Some(DimensionType::Time));
        assert_eq!(table.column_type("is_holiday"), Some(DimensionType::Boolean));
        assert_eq!(table.column_type("missing"), None);
    }

    #[test]
    fn row_lookup_by_column() {
        let row = Row::new()
            .with("year", Value::Int(2024))
            .with("month_name", Value::String("March".to_string()));
        assert_eq!(row.get("year"), Some(&Value::Int(2024)));
        assert_eq!(row.get("quarter"), None);
    }

    #[test]
    fn text_rendering_matches_postgres_casts() {
        assert_eq!(Value::Int(3).to_text().as_deref(), Some("3"));
        assert_eq!(Value::Boolean(true).to_text().as_deref(), Some("true"));
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(Value::Date(date).to_text().as_deref(), Some("2024-03-09"));
        assert_eq!(Value::Null.to_text(), None);
    }
}
