use super::{infer_type, normalize_query, parse_expression, SqlExprError};
use crate::data_store::BackingTable;
use crate::query::{parse_member, Filter, FilterOperator, Query, QueryError, SortDirection};
use crate::semantic_model::measure::quote_ident;
use crate::semantic_model::{
    DimensionType, Renderable, SemanticModel, SemanticModelStore,
    SemanticModelStoreError,
};
use log::debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    SemanticModel(#[from] SemanticModelStoreError),
    #[error("Query references no members")]
    EmptyQuery,
    #[error("Query spans several models without joins: {0:?}")]
    MultipleModels(Vec<String>),
    #[error("{0} is not a time dimension")]
    NotTimeDimension(String),
    #[error("Invalid filter on {member}: {reason}")]
    InvalidFilter { member: String, reason: String },
    #[error("Cannot order by {0}: it is not part of the query")]
    UnknownOrderMember(String),
    #[error(transparent)]
    Sql(#[from] SqlExprError),
}

/// Compiles a host query against a single model into one SELECT statement.
///
/// Dimensions are grouped by ordinal position, measure filters land in
/// HAVING, and the result is round-tripped through the parser.
pub fn compile_query<S>(query: &Query, store: &S) -> Result<String, CompileError>
where
    S: SemanticModelStore,
{
    let model = resolve_model(query, store)?;
    let table = store.get_backing_table(&model.name);

    let mut projection: Vec<String> = Vec::new();
    let mut aliases: Vec<String> = Vec::new();
    let mut conditions: Vec<String> = Vec::new();
    let mut having: Vec<String> = Vec::new();

    for path in &query.dimensions {
        let (_, name) = parse_member(path)?;
        let dimension = model.get_dimension(name)?;
        projection.push(dimension.render(Some(path.as_str())));
        aliases.push(path.clone());
    }

    for time_dimension in &query.time_dimensions {
        let (_, name) = parse_member(&time_dimension.dimension)?;
        let dimension = model.get_dimension(name)?;
        if dimension.dimension_type != DimensionType::Time {
            return Err(CompileError::NotTimeDimension(
                time_dimension.dimension.clone(),
            ));
        }
        if let Some(granularity) = time_dimension.granularity {
            let alias = format!("{}.{}", time_dimension.dimension, granularity);
            projection.push(format!(
                "DATE_TRUNC('{}', {}) AS {}",
                granularity,
                dimension.sql,
                quote_ident(&alias)
            ));
            aliases.push(alias);
        }
        if let Some([from, to]) = &time_dimension.date_range {
            conditions.push(format!(
                "{} >= {} AND {} <= {}",
                dimension.sql,
                quote_literal(from),
                dimension.sql,
                quote_literal(to)
            ));
        }
    }

    let grouped = projection.len();

    for path in &query.measures {
        let (_, name) = parse_member(path)?;
        let measure = model.get_measure(name)?;
        projection.push(measure.render(Some(path.as_str())));
        aliases.push(path.clone());
    }

    if projection.is_empty() {
        return Err(CompileError::EmptyQuery);
    }

    for filter in &query.filters {
        let (_, name) = parse_member(&filter.member)?;
        if let Ok(dimension) = model.get_dimension(name) {
            conditions.push(render_filter(
                filter,
                &dimension.sql,
                dimension.dimension_type,
            )?);
        } else {
            let measure = model.get_measure(name)?;
            let value_type = match measure.sql() {
                Some(sql) => aggregated_type(&model, sql, table.as_ref())?,
                None => DimensionType::Number,
            };
            having.push(render_filter(filter, &measure.render(None), value_type)?);
        }
    }

    let mut sql = format!(
        "SELECT {} FROM ({}) AS {}",
        projection.join(", "),
        model.sql,
        quote_ident(&model.name)
    );
    if !conditions.is_empty() {
        sql.push_str(&format!(" WHERE {}", join_conditions(&conditions)));
    }
    if grouped > 0 {
        let ordinals: Vec<String> = (1..=grouped).map(|idx| idx.to_string()).collect();
        sql.push_str(&format!(" GROUP BY {}", ordinals.join(", ")));
    }
    if !having.is_empty() {
        sql.push_str(&format!(" HAVING {}", join_conditions(&having)));
    }
    if !query.order.is_empty() {
        let order_by = query
            .order
            .iter()
            .map(|(member, direction)| {
                let alias = order_alias(query, &aliases, member)?;
                let direction = match direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                Ok(format!("{} {}", quote_ident(alias), direction))
            })
            .collect::<Result<Vec<_>, CompileError>>()?;
        sql.push_str(&format!(" ORDER BY {}", order_by.join(", ")));
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    debug!("Compiled query for {}: {}", model.name, sql);
    Ok(normalize_query(&sql)?)
}

fn resolve_model<S>(query: &Query, store: &S) -> Result<SemanticModel, CompileError>
where
    S: SemanticModelStore,
{
    let mut models: Vec<String> = Vec::new();
    for member in query.members() {
        let (model, _) = parse_member(member)?;
        if !models.iter().any(|m| m == model) {
            models.push(model.to_string());
        }
    }

    match models.as_slice() {
        [] => Err(CompileError::EmptyQuery),
        [model] => Ok(store.get_semantic_model(model)?),
        _ => Err(CompileError::MultipleModels(models)),
    }
}

/// Type of a `min`/`max` aggregate, which is the type of its argument.
/// Without a table schema the argument is matched against the model's
/// dimensions, falling back to a quoted string literal.
fn aggregated_type(
    model: &SemanticModel,
    sql: &str,
    table: Option<&BackingTable>,
) -> Result<DimensionType, CompileError> {
    if let Some(table) = table {
        return Ok(infer_type(&parse_expression(sql)?, table)?);
    }
    Ok(model
        .dimensions
        .values()
        .find(|dimension| dimension.sql == sql)
        .map_or(DimensionType::String, |dimension| dimension.dimension_type))
}

fn order_alias<'a>(
    query: &Query,
    aliases: &'a [String],
    member: &str,
) -> Result<&'a str, CompileError> {
    if let Some(alias) = aliases.iter().find(|alias| alias.as_str() == member) {
        return Ok(alias.as_str());
    }
    // A time dimension orders by its truncated column
    query
        .time_dimensions
        .iter()
        .filter(|td| td.dimension == member)
        .filter_map(|td| td.granularity)
        .find_map(|granularity| {
            let alias = format!("{}.{}", member, granularity);
            aliases.iter().find(|a| **a == alias).map(String::as_str)
        })
        .ok_or_else(|| CompileError::UnknownOrderMember(member.to_string()))
}

fn join_conditions(conditions: &[String]) -> String {
    conditions
        .iter()
        .map(|condition| format!("({})", condition))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn render_filter(
    filter: &Filter,
    sql: &str,
    value_type: DimensionType,
) -> Result<String, CompileError> {
    let invalid = |reason: &str| CompileError::InvalidFilter {
        member: filter.member.clone(),
        reason: reason.to_string(),
    };

    let values = || {
        if filter.values.is_empty() {
            return Err(invalid("at least one value is required"));
        }
        filter
            .values
            .iter()
            .map(|value| render_value(value, value_type).ok_or_else(|| invalid(value.as_str())))
            .collect::<Result<Vec<_>, _>>()
    };
    let single = || match values()?.as_slice() {
        [value] => Ok(value.clone()),
        _ => Err(invalid("exactly one value is required")),
    };

    match filter.operator {
        FilterOperator::Set => Ok(format!("{} IS NOT NULL", sql)),
        FilterOperator::NotSet => Ok(format!("{} IS NULL", sql)),
        FilterOperator::Equals => Ok(format!("{} IN ({})", sql, values()?.join(", "))),
        FilterOperator::NotEquals => Ok(format!("{} NOT IN ({})", sql, values()?.join(", "))),
        FilterOperator::Gt => Ok(format!("{} > {}", sql, single()?)),
        FilterOperator::Gte => Ok(format!("{} >= {}", sql, single()?)),
        FilterOperator::Lt => Ok(format!("{} < {}", sql, single()?)),
        FilterOperator::Lte => Ok(format!("{} <= {}", sql, single()?)),
        FilterOperator::Contains => {
            if value_type != DimensionType::String {
                return Err(invalid("contains applies to string members only"));
            }
            values()?;
            let patterns: Vec<String> = filter
                .values
                .iter()
                .map(|value| format!("{} ILIKE {}", sql, quote_literal(&format!("%{}%", value))))
                .collect();
            Ok(patterns.join(" OR "))
        }
    }
}

fn render_value(value: &str, value_type: DimensionType) -> Option<String> {
    match value_type {
        DimensionType::Number => value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|number| number.is_finite())
            .map(|number| number.to_string()),
        DimensionType::Boolean => match value.to_lowercase().as_str() {
            "true" => Some("TRUE".to_string()),
            "false" => Some("FALSE".to_string()),
            _ => None,
        },
        DimensionType::String | DimensionType::Time => Some(quote_literal(value)),
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
