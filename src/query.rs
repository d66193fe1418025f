//! Query objects as received from the host's REST/SQL API.
//!
//! Members are addressed as `Model.member`, e.g. `DimDate.yearMonth`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub measures: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub time_dimensions: Vec<TimeDimension>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub order: IndexMap<String, SortDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl Query {
    /// Every member referenced anywhere in the query.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.measures
            .iter()
            .chain(self.dimensions.iter())
            .chain(self.time_dimensions.iter().map(|td| &td.dimension))
            .chain(self.filters.iter().map(|filter| &filter.member))
            .map(String::as_str)
    }

    /// Canonical JSON rendering; equal queries produce equal fingerprints.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeDimension {
    pub dimension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<Granularity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<[String; 2]>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Filter {
    pub member: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    Gt,
    Gte,
    Lt,
    Lte,
    Set,
    NotSet,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Granularity::Second => "second",
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Quarter => "quarter",
            Granularity::Year => "year",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Error, Debug, PartialEq)]
pub enum QueryError {
    #[error("Invalid member path '{0}', expected Model.member")]
    InvalidMemberPath(String),
}

/// Splits `Model.member` into its model and member names.
pub fn parse_member(path: &str) -> Result<(&str, &str), QueryError> {
    match path.split_once('.') {
        Some((model, member)) if !model.is_empty() && !member.is_empty() && !member.contains('.') => {
            Ok((model, member))
        }
        _ => Err(QueryError::InvalidMemberPath(path.to_string())),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case::simple("DimDate.year", ("DimDate", "year"))]
    #[case::camel_case("DimDate.yearMonth", ("DimDate", "yearMonth"))]
    fn parses_member_paths(#[case] path: &str, #[case] expected: (&str, &str)) {
        assert_eq!(parse_member(path).unwrap(), expected);
    }

    #[rstest]
    #[case::no_model("year")]
    #[case::empty_member("DimDate.")]
    #[case::empty_model(".year")]
    #[case::too_deep("DimDate.date.month")]
    fn rejects_member_paths(#[case] path: &str) {
        assert!(parse_member(path).is_err());
    }

    #[test]
    fn deserializes_host_query() {
        let json = r#"{
            "measures": ["DimDate.count"],
            "dimensions": ["DimDate.yearMonth"],
            "timeDimensions": [
                { "dimension": "DimDate.date", "granularity": "month", "dateRange": ["2024-01-01", "2024-12-31"] }
            ],
            "filters": [
                { "member": "DimDate.isHoliday", "operator": "equals", "values": ["true"] },
                { "member": "DimDate.dayName", "operator": "set" }
            ],
            "order": { "DimDate.yearMonth": "asc" },
            "limit": 100
        }"#;
        let query: Query = serde_json::from_str(json).unwrap();
        assert_eq!(query.time_dimensions[0].granularity, Some(Granularity::Month));
        assert_eq!(query.filters[1].operator, FilterOperator::Set);
        assert!(query.filters[1].values.is_empty());
        assert_eq!(query.order["DimDate.yearMonth"], SortDirection::Asc);
        assert_eq!(query.members().count(), 5);
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let query = Query {
            measures: vec!["DimDate.count".to_string()],
            limit: Some(10),
            ..Default::default()
        };
        assert_eq!(
            query.fingerprint().unwrap(),
            query.clone().fingerprint().unwrap()
        );
        assert_eq!(
            query.fingerprint().unwrap(),
            r#"{"measures":["DimDate.count"],"limit":10}"#
        );
    }
}
