//! Calendar date model over the gold layer `dim_date` table.
//!
//! Calendar attributes are precomputed in the table; only `quarterName` and
//! `yearMonth` are derived here. `yearMonth` zero-pads the month so its
//! string order is chronological.

use super::{Dimension, DimensionType, Measure, SemanticModel};
use indexmap::IndexMap;

pub const DIM_DATE: &str = "DimDate";

pub fn dim_date() -> SemanticModel {
    let dimensions: IndexMap<String, Dimension> = [
        ("dateKey", dimension("date_key", DimensionType::Number, None).as_primary_key()),
        ("date", dimension("date", DimensionType::Time, Some("Date"))),
        ("year", dimension("year", DimensionType::Number, Some("Year"))),
        ("quarter", dimension("quarter", DimensionType::Number, Some("Quarter"))),
        (
            "quarterName",
            dimension(
                "CONCAT('Q', quarter::text, ' ', year::text)",
                DimensionType::String,
                Some("Quarter Name"),
            ),
        ),
        ("month", dimension("month", DimensionType::Number, Some("Month Number"))),
        ("monthName", dimension("month_name", DimensionType::String, Some("Month Name"))),
        (
            "yearMonth",
            dimension(
                "CONCAT(year::text, '-', LPAD(month::text, 2, '0'))",
                DimensionType::String,
                Some("Year-Month"),
            ),
        ),
        ("week", dimension("week", DimensionType::Number, Some("Week Number"))),
        ("dayOfMonth", dimension("day_of_month", DimensionType::Number, Some("Day of Month"))),
        (
            "dayOfWeek",
            dimension("day_of_week", DimensionType::Number, Some("Day of Week Number")),
        ),
        ("dayName", dimension("day_name", DimensionType::String, Some("Day Name"))),
        ("isWeekend", dimension("is_weekend", DimensionType::Boolean, Some("Is Weekend"))),
        ("isHoliday", dimension("is_holiday", DimensionType::Boolean, Some("Is Holiday"))),
        ("fiscalYear", dimension("fiscal_year", DimensionType::Number, Some("Fiscal Year"))),
        (
            "fiscalQuarter",
            dimension("fiscal_quarter", DimensionType::Number, Some("Fiscal Quarter")),
        ),
    ]
    .into_iter()
    .map(|(name, dimension)| (name.to_string(), dimension))
    .collect();

    let measures: IndexMap<String, Measure> = [
        (
            "count",
            Measure::Count {
                title: Some("Date Count".to_string()),
            },
        ),
        (
            "minDate",
            Measure::Min {
                sql: "date".to_string(),
                title: Some("Earliest Date".to_string()),
            },
        ),
        (
            "maxDate",
            Measure::Max {
                sql: "date".to_string(),
                title: Some("Latest Date".to_string()),
            },
        ),
    ]
    .into_iter()
    .map(|(name, measure)| (name.to_string(), measure))
    .collect();

    SemanticModel {
        name: DIM_DATE.to_string(),
        sql: r#"SELECT * FROM "03_gold".dim_date"#.to_string(),
        dimensions,
        measures,
        joins: IndexMap::new(),
        pre_aggregations: IndexMap::new(),
    }
}

fn dimension(sql: &str, dimension_type: DimensionType, title: Option<&str>) -> Dimension {
    Dimension {
        sql: sql.to_string(),
        dimension_type,
        primary_key: false,
        title: title.map(str::to_string),
        shown: true,
    }
}

impl Dimension {
    fn as_primary_key(mut self) -> Self {
        self.primary_key = true;
        self.shown = false;
        self
    }
}
