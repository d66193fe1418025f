pub mod dim_date;
pub mod local_store;
pub mod measure;

use crate::data_store::{BackingTable, Row, Value};
use crate::query::Granularity;
use crate::sql_parser::{self, SqlExprError};
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{SetExpr, Statement, TableFactor};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub use measure::{Measure, MeasureType, Renderable};

/// Semantic type of a dimension as understood by the host query compiler
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DimensionType {
    Number,
    String,
    Time,
    Boolean,
}

impl fmt::Display for DimensionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimensionType::Number => write!(f, "number"),
            DimensionType::String => write!(f, "string"),
            DimensionType::Time => write!(f, "time"),
            DimensionType::Boolean => write!(f, "boolean"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dimension {
    pub sql: String,
    #[serde(rename = "type")]
    pub dimension_type: DimensionType,
    #[serde(default, skip_serializing_if = "is_false")]
    pub primary_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default = "default_shown")]
    pub shown: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn default_shown() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Relationship {
    BelongsTo,
    HasMany,
    HasOne,
}

/// Relationship to another model, e.g. a fact table keyed on `date_key`
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Join {
    pub sql: String,
    pub relationship: Relationship,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreAggregation {
    #[serde(default)]
    pub measures: Vec<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_dimension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<Granularity>,
    /// Refresh cadence such as `24 hour`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_every: Option<String>,
}

/// A named semantic model (a "cube") over a single SQL source
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SemanticModel {
    pub name: String,
    pub sql: String,
    pub dimensions: IndexMap<String, Dimension>,
    pub measures: IndexMap<String, Measure>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub joins: IndexMap<String, Join>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub pre_aggregations: IndexMap<String, PreAggregation>,
}

impl SemanticModel {
    pub fn get_measure(&self, name: &str) -> Result<&Measure, SemanticModelStoreError> {
        self.measures
            .get(name)
            .ok_or_else(|| SemanticModelStoreError::MeasureNotFound(name.to_string()))
    }

    pub fn get_dimension(&self, name: &str) -> Result<&Dimension, SemanticModelStoreError> {
        self.dimensions
            .get(name)
            .ok_or_else(|| SemanticModelStoreError::DimensionNotFound(name.to_string()))
    }

    pub fn primary_key(&self) -> Option<(&str, &Dimension)> {
        self.dimensions
            .iter()
            .find(|(_, dimension)| dimension.primary_key)
            .map(|(name, dimension)| (name.as_str(), dimension))
    }

    /// Dotted name of the single table the model selects from, if the
    /// source is a plain `SELECT ... FROM table`.
    pub fn source_table(&self) -> Result<Option<String>, ModelError> {
        let dialect = PostgreSqlDialect {};
        let statements =
            Parser::parse_sql(&dialect, &self.sql).map_err(|e| ModelError::InvalidSource {
                model: self.name.clone(),
                reason: e.to_string(),
            })?;

        let query = match statements.as_slice() {
            [Statement::Query(query)] => query,
            _ => {
                return Err(ModelError::InvalidSource {
                    model: self.name.clone(),
                    reason: "source must be a single SELECT statement".to_string(),
                })
            }
        };

        let select = match query.body.as_ref() {
            SetExpr::Select(select) => select,
            _ => return Ok(None),
        };

        match select.from.as_slice() {
            [from] if from.joins.is_empty() => match &from.relation {
                TableFactor::Table { name, .. } => Ok(Some(
                    name.0
                        .iter()
                        .map(|ident| ident.value.as_str())
                        .collect::<Vec<_>>()
                        .join("."),
                )),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }

    /// Structural checks that need no knowledge of the backing table.
    pub fn validate(&self) -> Result<(), ModelError> {
        let primary_keys = self
            .dimensions
            .values()
            .filter(|dimension| dimension.primary_key)
            .count();
        if primary_keys != 1 {
            return Err(ModelError::PrimaryKeyCount {
                model: self.name.clone(),
                count: primary_keys,
            });
        }

        self.source_table()?;

        for (name, dimension) in &self.dimensions {
            self.parse_member_sql(name, &dimension.sql)?;
        }
        for (name, measure) in &self.measures {
            if let Some(sql) = measure.sql() {
                self.parse_member_sql(name, sql)?;
            }
        }

        debug!(
            "Model {} validated: {} dimensions, {} measures",
            self.name,
            self.dimensions.len(),
            self.measures.len()
        );
        Ok(())
    }

    /// Checks every member expression against the columns of the backing
    /// table and the declared dimension types.
    pub fn validate_against(&self, table: &BackingTable) -> Result<(), ModelError> {
        for (name, dimension) in &self.dimensions {
            let expr = self.parse_member_sql(name, &dimension.sql)?;
            let inferred =
                sql_parser::infer_type(&expr, table).map_err(|source| {
                    ModelError::InvalidExpression {
                        model: self.name.clone(),
                        member: name.clone(),
                        source,
                    }
                })?;
            if inferred != dimension.dimension_type {
                return Err(ModelError::TypeMismatch {
                    model: self.name.clone(),
                    member: name.clone(),
                    declared: dimension.dimension_type,
                    inferred,
                });
            }
        }

        for (name, measure) in &self.measures {
            if let Some(sql) = measure.sql() {
                let expr = self.parse_member_sql(name, sql)?;
                sql_parser::infer_type(&expr, table).map_err(|source| {
                    ModelError::InvalidExpression {
                        model: self.name.clone(),
                        member: name.clone(),
                        source,
                    }
                })?;
            }
        }

        debug!("Model {} matches table {}", self.name, table.name);
        Ok(())
    }

    /// Evaluates a dimension's expression against one row of the backing table.
    pub fn dimension_value(&self, name: &str, row: &Row) -> Result<Value, ModelError> {
        let dimension = self
            .dimensions
            .get(name)
            .ok_or_else(|| ModelError::UnknownMember {
                model: self.name.clone(),
                member: name.to_string(),
            })?;
        let expr = self.parse_member_sql(name, &dimension.sql)?;
        sql_parser::evaluate(&expr, row).map_err(|source| ModelError::InvalidExpression {
            model: self.name.clone(),
            member: name.to_string(),
            source,
        })
    }

    fn parse_member_sql(&self, member: &str, sql: &str) -> Result<sqlparser::ast::Expr, ModelError> {
        sql_parser::parse_expression(sql).map_err(|source| ModelError::InvalidExpression {
            model: self.name.clone(),
            member: member.to_string(),
            source,
        })
    }
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model {model} must declare exactly one primary key, found {count}")]
    PrimaryKeyCount { model: String, count: usize },
    #[error("Invalid source SQL for model {model}: {reason}")]
    InvalidSource { model: String, reason: String },
    #[error("Invalid expression for {model}.{member}: {source}")]
    InvalidExpression {
        model: String,
        member: String,
        #[source]
        source: SqlExprError,
    },
    #[error("{model}.{member} is declared {declared} but its SQL produces {inferred}")]
    TypeMismatch {
        model: String,
        member: String,
        declared: DimensionType,
        inferred: DimensionType,
    },
    #[error("Unknown member {model}.{member}")]
    UnknownMember { model: String, member: String },
}

/// [`SemanticModel`] store
///
/// Implementations validate models when they are loaded, so every model
/// handed out is ready for query compilation.
pub trait SemanticModelStore: Clone {
    fn get_semantic_model(&self, name: &str) -> Result<SemanticModel, SemanticModelStoreError>;
    fn get_all_semantic_models(
        &self,
    ) -> Result<BTreeMap<String, SemanticModel>, SemanticModelStoreError>;
    fn get_measure(
        &self,
        model_name: &str,
        measure_name: &str,
    ) -> Result<Measure, SemanticModelStoreError>;
    fn get_dimension(
        &self,
        model_name: &str,
        dimension_name: &str,
    ) -> Result<Dimension, SemanticModelStoreError>;

    /// Schema of the table a model selects from, when the store knows it.
    fn get_backing_table(&self, _model_name: &str) -> Option<BackingTable> {
        None
    }
}

#[derive(Error, Debug)]
pub enum SemanticModelStoreError {
    #[error("Measure not found: {0}")]
    MeasureNotFound(String),
    #[error("Dimension not found: {0}")]
    DimensionNotFound(String),
    #[error("Model not found: {0}")]
    ModelNotFound(String),
    #[error("Duplicate model: {0}")]
    DuplicateModel(String),
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Invalid JSON format: {0}")]
    InvalidJsonFormat(#[from] serde_json::Error),
    #[error(transparent)]
    InvalidModel(#[from] ModelError),
}
