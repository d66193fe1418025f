use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MeasureType {
    Count,
    Min,
    Max,
}

impl fmt::Display for MeasureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasureType::Count => write!(f, "count"),
            MeasureType::Min => write!(f, "min"),
            MeasureType::Max => write!(f, "max"),
        }
    }
}

/// An aggregation over the rows of a model.
///
/// `Count` aggregates rows and never carries an expression; `Min` and `Max`
/// aggregate over their `sql` expression.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Measure {
    Count {
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Min {
        sql: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Max {
        sql: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
}

impl Measure {
    pub fn measure_type(&self) -> MeasureType {
        match self {
            Measure::Count { .. } => MeasureType::Count,
            Measure::Min { .. } => MeasureType::Min,
            Measure::Max { .. } => MeasureType::Max,
        }
    }

    pub fn sql(&self) -> Option<&str> {
        match self {
            Measure::Count { .. } => None,
            Measure::Min { sql, .. } | Measure::Max { sql, .. } => Some(sql.as_str()),
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            Measure::Count { title } | Measure::Min { title, .. } | Measure::Max { title, .. } => {
                title.as_deref()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Measure {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct MeasureHelper {
            #[serde(rename = "type")]
            measure_type: MeasureType,
            sql: Option<String>,
            title: Option<String>,
        }

        let helper = MeasureHelper::deserialize(deserializer)?;

        match (helper.measure_type, helper.sql) {
            (MeasureType::Count, None) => Ok(Measure::Count {
                title: helper.title,
            }),
            (MeasureType::Count, Some(_)) => Err(serde::de::Error::custom(
                "count measures aggregate rows and must not declare sql",
            )),
            (MeasureType::Min, Some(sql)) => Ok(Measure::Min {
                sql,
                title: helper.title,
            }),
            (MeasureType::Max, Some(sql)) => Ok(Measure::Max {
                sql,
                title: helper.title,
            }),
            (kind, None) => Err(serde::de::Error::custom(format!(
                "{} measures require sql",
                kind
            ))),
        }
    }
}

/// Renders a member as a SQL select expression.
pub trait Renderable {
    fn render(&self, alias: Option<&str>) -> String;
}

impl Renderable for Measure {
    fn render(&self, alias: Option<&str>) -> String {
        let sql = match self {
            Measure::Count { .. } => "*",
            Measure::Min { sql, .. } | Measure::Max { sql, .. } => sql.as_str(),
        };
        render_sql(sql, Some(self.measure_type()), alias)
    }
}

impl Renderable for super::Dimension {
    fn render(&self, alias: Option<&str>) -> String {
        render_sql(&self.sql, None, alias)
    }
}

fn render_sql(sql: &str, aggregation: Option<MeasureType>, alias: Option<&str>) -> String {
    let sql = match aggregation {
        Some(MeasureType::Count) => format!("COUNT({})", sql),
        Some(MeasureType::Min) => format!("MIN({})", sql),
        Some(MeasureType::Max) => format!("MAX({})", sql),
        None => sql.to_string(),
    };

    match alias {
        Some(alias) => format!("{} AS {}", sql, quote_ident(alias)),
        None => sql,
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
