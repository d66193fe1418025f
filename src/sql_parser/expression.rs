use super::SqlExprError;
use crate::data_store::{BackingTable, Row, Value};
use crate::semantic_model::DimensionType;
use chrono::NaiveDate;
use sqlparser::ast::{
    DataType, Expr, Function, FunctionArg, FunctionArgExpr, FunctionArguments, Value as SqlValue,
};

/// Infers the semantic type an expression produces over `table`.
pub fn infer_type(expr: &Expr, table: &BackingTable) -> Result<DimensionType, SqlExprError> {
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
            let column = column_name(expr)?;
            table
                .column_type(column)
                .ok_or_else(|| SqlExprError::UnknownColumn(column.to_string()))
        }
        Expr::Value(value) => literal(value)?
            .semantic_type()
            .ok_or_else(|| SqlExprError::UnsupportedSqlConstruct("untyped NULL".to_string())),
        Expr::Nested(inner) => infer_type(inner, table),
        Expr::Cast {
            expr, data_type, ..
        } => {
            infer_type(expr, table)?;
            cast_target(data_type)
        }
        Expr::Function(func) => {
            let name = function_name(func);
            let args = function_args(func)?;
            for arg in &args {
                infer_type(arg, table)?;
            }
            match name.as_str() {
                "CONCAT" | "LPAD" | "RPAD" | "UPPER" | "LOWER" => Ok(DimensionType::String),
                _ => Err(SqlExprError::UnsupportedSqlConstruct(func.to_string())),
            }
        }
        _ => Err(SqlExprError::UnsupportedSqlConstruct(expr.to_string())),
    }
}

/// Evaluates an expression against one row of the backing table, following
/// PostgreSQL semantics for the supported functions.
pub fn evaluate(expr: &Expr, row: &Row) -> Result<Value, SqlExprError> {
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
            let column = column_name(expr)?;
            row.get(column)
                .cloned()
                .ok_or_else(|| SqlExprError::UnknownColumn(column.to_string()))
        }
        Expr::Value(value) => literal(value),
        Expr::Nested(inner) => evaluate(inner, row),
        Expr::Cast {
            expr, data_type, ..
        } => {
            let value = evaluate(expr, row)?;
            cast(value, cast_target(data_type)?)
        }
        Expr::Function(func) => {
            let name = function_name(func);
            let args = function_args(func)?
                .into_iter()
                .map(|arg| evaluate(arg, row))
                .collect::<Result<Vec<_>, _>>()?;
            apply_function(&name, args)
        }
        _ => Err(SqlExprError::UnsupportedSqlConstruct(expr.to_string())),
    }
}

fn column_name(expr: &Expr) -> Result<&str, SqlExprError> {
    match expr {
        Expr::Identifier(ident) => Ok(ident.value.as_str()),
        // `{CUBE}.column` style references resolve to the trailing column
        Expr::CompoundIdentifier(idents) => idents
            .last()
            .map(|ident| ident.value.as_str())
            .ok_or_else(|| SqlExprError::UnsupportedSqlConstruct(expr.to_string())),
        _ => Err(SqlExprError::UnsupportedSqlConstruct(expr.to_string())),
    }
}

fn literal(value: &SqlValue) -> Result<Value, SqlExprError> {
    match value {
        SqlValue::SingleQuotedString(s) => Ok(Value::String(s.clone())),
        SqlValue::Number(n, _) => n
            .parse::<i64>()
            .map(Value::Int)
            .or_else(|_| n.parse::<f64>().map(Value::Float))
            .map_err(|_| SqlExprError::UnsupportedSqlConstruct(n.clone())),
        SqlValue::Boolean(b) => Ok(Value::Boolean(*b)),
        SqlValue::Null => Ok(Value::Null),
        other => Err(SqlExprError::UnsupportedSqlConstruct(other.to_string())),
    }
}

fn cast_target(data_type: &DataType) -> Result<DimensionType, SqlExprError> {
    match data_type {
        DataType::Text | DataType::Varchar(..) | DataType::String(..) | DataType::Char(..) => {
            Ok(DimensionType::String)
        }
        DataType::Int(..)
        | DataType::Integer(..)
        | DataType::BigInt(..)
        | DataType::SmallInt(..)
        | DataType::Numeric(..)
        | DataType::Decimal(..) => Ok(DimensionType::Number),
        DataType::Boolean | DataType::Bool => Ok(DimensionType::Boolean),
        DataType::Date | DataType::Timestamp(..) => Ok(DimensionType::Time),
        other => Err(SqlExprError::UnsupportedSqlConstruct(format!(
            "cast to {}",
            other
        ))),
    }
}

fn cast(value: Value, target: DimensionType) -> Result<Value, SqlExprError> {
    if value == Value::Null {
        return Ok(Value::Null);
    }
    let invalid = |value: &Value| SqlExprError::InvalidFunctionArgument {
        function: "CAST".to_string(),
        reason: format!("cannot cast {} to {}", value, target),
    };

    match (target, value) {
        (DimensionType::String, value) => Ok(value.to_text().map_or(Value::Null, Value::String)),
        (DimensionType::Number, value @ (Value::Int(_) | Value::Float(_))) => Ok(value),
        (DimensionType::Number, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .or_else(|_| s.trim().parse::<f64>().map(Value::Float))
            .map_err(|_| invalid(&Value::String(s.clone()))),
        (DimensionType::Boolean, Value::Boolean(b)) => Ok(Value::Boolean(b)),
        (DimensionType::Boolean, Value::String(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "yes" | "1" => Ok(Value::Boolean(true)),
            "false" | "f" | "no" | "0" => Ok(Value::Boolean(false)),
            _ => Err(invalid(&Value::String(s.clone()))),
        },
        (DimensionType::Time, Value::Date(d)) => Ok(Value::Date(d)),
        (DimensionType::Time, Value::String(s)) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|_| invalid(&Value::String(s.clone()))),
        (_, value) => Err(invalid(&value)),
    }
}

fn function_name(func: &Function) -> String {
    func.name.to_string().to_uppercase()
}

fn function_args(func: &Function) -> Result<Vec<&Expr>, SqlExprError> {
    let args = match &func.args {
        FunctionArguments::List(list) => &list.args,
        FunctionArguments::None => return Ok(vec![]),
        FunctionArguments::Subquery(_) => {
            return Err(SqlExprError::UnsupportedSqlConstruct(func.to_string()))
        }
    };

    args.iter()
        .map(|arg| match arg {
            FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => Ok(expr),
            _ => Err(SqlExprError::InvalidFunctionArgument {
                function: function_name(func),
                reason: format!("unsupported argument {}", arg),
            }),
        })
        .collect()
}

fn apply_function(name: &str, args: Vec<Value>) -> Result<Value, SqlExprError> {
    match name {
        // NULL arguments are skipped rather than propagated, and booleans
        // use their output form `t`/`f` rather than the `::text` cast
        "CONCAT" => Ok(Value::String(
            args.iter()
                .filter_map(|arg| match arg {
                    Value::Boolean(true) => Some("t".to_string()),
                    Value::Boolean(false) => Some("f".to_string()),
                    other => other.to_text(),
                })
                .collect::<String>(),
        )),
        "LPAD" | "RPAD" => pad(name, args),
        "UPPER" | "LOWER" => match args.as_slice() {
            [Value::Null] => Ok(Value::Null),
            [value] => {
                let text = value.to_text().unwrap_or_default();
                Ok(Value::String(if name == "UPPER" {
                    text.to_uppercase()
                } else {
                    text.to_lowercase()
                }))
            }
            _ => Err(SqlExprError::InvalidFunctionArgument {
                function: name.to_string(),
                reason: format!("expected 1 argument, got {}", args.len()),
            }),
        },
        _ => Err(SqlExprError::UnsupportedSqlConstruct(format!("{}()", name))),
    }
}

fn pad(name: &str, args: Vec<Value>) -> Result<Value, SqlExprError> {
    let invalid = |reason: &str| SqlExprError::InvalidFunctionArgument {
        function: name.to_string(),
        reason: reason.to_string(),
    };

    let (text, length, fill) = match args.as_slice() {
        [text, length] => (text, length, " ".to_string()),
        [text, length, fill] => match fill.to_text() {
            Some(fill) => (text, length, fill),
            None => return Ok(Value::Null),
        },
        _ => return Err(invalid("expected 2 or 3 arguments")),
    };

    let text = match text.to_text() {
        Some(text) => text,
        None => return Ok(Value::Null),
    };
    let length = match length {
        Value::Int(n) => usize::try_from(*n).unwrap_or(0),
        Value::Null => return Ok(Value::Null),
        _ => return Err(invalid("length must be an integer")),
    };

    let current = text.chars().count();
    if current >= length {
        return Ok(Value::String(text.chars().take(length).collect()));
    }
    if fill.is_empty() {
        return Ok(Value::String(text));
    }

    let padding: String = fill.chars().cycle().take(length - current).collect();
    Ok(Value::String(if name == "LPAD" {
        format!("{}{}", padding, text)
    } else {
        format!("{}{}", text, padding)
    }))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data_store::dim_date_table;
    use crate::sql_parser::parse_expression;
    use rstest::*;

    fn eval(sql: &str, row: &Row) -> Value {
        evaluate(&parse_expression(sql).unwrap(), row).unwrap()
    }

    #[fixture]
    fn row() -> Row {
        Row::new()
            .with("year", Value::Int(2024))
            .with("month", Value::Int(3))
            .with("quarter", Value::Int(1))
            .with("month_name", Value::String("March".to_string()))
            .with("is_holiday", Value::Null)
            .with("is_weekend", Value::Boolean(true))
    }

    #[rstest]
    #[case::pads_single_digit("LPAD(month::text, 2, '0')", "03")]
    #[case::truncates_long_input("LPAD('2024', 2, '0')", "20")]
    #[case::repeats_fill("LPAD('7', 5, 'ab')", "abab7")]
    #[case::default_fill("LPAD('x', 3)", "  x")]
    #[case::empty_fill_keeps_input("LPAD('x', 3, '')", "x")]
    #[case::right_pad("RPAD('x', 3, '-')", "x--")]
    #[case::concat_with_casts("CONCAT(year::text, '-', LPAD(month::text, 2, '0'))", "2024-03")]
    #[case::concat_skips_null("CONCAT('a', is_holiday, 'b')", "ab")]
    #[case::concat_boolean_output("CONCAT('weekend:', is_weekend)", "weekend:t")]
    #[case::text_cast_boolean("CONCAT('weekend:', is_weekend::text)", "weekend:true")]
    #[case::upper("UPPER(month_name)", "MARCH")]
    fn evaluates_string_functions(row: Row, #[case] sql: &str, #[case] expected: &str) {
        assert_eq!(eval(sql, &row), Value::String(expected.to_string()));
    }

    #[rstest]
    fn lpad_of_null_is_null(row: Row) {
        assert_eq!(eval("LPAD(is_holiday, 2, '0')", &row), Value::Null);
    }

    #[rstest]
    fn unknown_column_is_an_error(row: Row) {
        let expr = parse_expression("fiscal_week").unwrap();
        assert!(matches!(
            evaluate(&expr, &row),
            Err(SqlExprError::UnknownColumn(column)) if column == "fiscal_week"
        ));
    }

    #[rstest]
    #[case::column("year", DimensionType::Number)]
    #[case::qualified_column("dim_date.day_name", DimensionType::String)]
    #[case::time_column("date", DimensionType::Time)]
    #[case::flag("is_weekend", DimensionType::Boolean)]
    #[case::text_cast("quarter::text", DimensionType::String)]
    #[case::int_cast("month_name::integer", DimensionType::Number)]
    #[case::concat("CONCAT('Q', quarter::text, ' ', year::text)", DimensionType::String)]
    #[case::nested("(year)", DimensionType::Number)]
    #[case::literal("'Q'", DimensionType::String)]
    fn infers_types(#[case] sql: &str, #[case] expected: DimensionType) {
        let expr = parse_expression(sql).unwrap();
        assert_eq!(infer_type(&expr, &dim_date_table()).unwrap(), expected);
    }

    #[rstest]
    #[case::unknown_function("SUM(year)")]
    #[case::unknown_column("CONCAT(fiscal_week::text)")]
    #[case::binary_op("year + 1")]
    fn rejects_untyped_expressions(#[case] sql: &str) {
        let expr = parse_expression(sql).unwrap();
        assert!(infer_type(&expr, &dim_date_table()).is_err());
    }

    #[test]
    fn casts_strings_to_dates() {
        let row = Row::new().with("d", Value::String("2024-03-09".to_string()));
        assert_eq!(
            eval("d::date", &row),
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap())
        );
    }
}
