mod compile;
mod expression;

pub use compile::{compile_query, CompileError};
pub use expression::{evaluate, infer_type};

use sqlparser::ast::{Expr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::Token;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqlExprError {
    #[error("SQL parsing error: {0}")]
    SqlParseError(#[from] ParserError),

    #[error("Unexpected input after expression: {0}")]
    TrailingInput(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Unsupported SQL construct: {0}")]
    UnsupportedSqlConstruct(String),

    #[error("Invalid argument to {function}: {reason}")]
    InvalidFunctionArgument { function: String, reason: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

/// Parses a single member expression such as `LPAD(month::text, 2, '0')`.
pub fn parse_expression(sql: &str) -> Result<Expr, SqlExprError> {
    let dialect = PostgreSqlDialect {};
    let mut parser = Parser::new(&dialect).try_with_sql(sql)?;
    let expr = parser.parse_expr()?;

    if parser.peek_token().token != Token::EOF {
        return Err(SqlExprError::TrailingInput(sql.to_string()));
    }
    Ok(expr)
}

/// Round-trips a read-only statement through the parser, returning its
/// canonical rendering.
pub fn normalize_query(sql: &str) -> Result<String, SqlExprError> {
    let dialect = PostgreSqlDialect {};
    let statements = Parser::parse_sql(&dialect, sql)?;

    let output_queries: Result<Vec<String>, SqlExprError> = statements
        .into_iter()
        .map(|statement| match statement {
            Statement::Query(query) => Ok(query.to_string()),
            _ => Err(SqlExprError::PermissionDenied(
                "Only read-only SQL statements are allowed".to_string(),
            )),
        })
        .collect();

    Ok(output_queries?.join(";\n"))
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case::column("date_key")]
    #[case::cast("quarter::text")]
    #[case::concat("CONCAT('Q', quarter::text, ' ', year::text)")]
    #[case::lpad("CONCAT(year::text, '-', LPAD(month::text, 2, '0'))")]
    fn parses_member_expressions(#[case] sql: &str) {
        assert!(parse_expression(sql).is_ok());
    }

    #[rstest]
    #[case::unterminated("CONCAT(year")]
    #[case::trailing("year month")]
    #[case::empty("")]
    fn rejects_malformed_expressions(#[case] sql: &str) {
        assert!(parse_expression(sql).is_err());
    }

    #[rstest]
    #[case::update("UPDATE dim_date SET is_holiday = true")]
    #[case::delete("DELETE FROM dim_date")]
    fn normalize_rejects_writes(#[case] sql: &str) {
        assert!(matches!(
            normalize_query(sql),
            Err(SqlExprError::PermissionDenied(_))
        ));
    }

    #[test]
    fn normalize_is_stable() {
        let once = normalize_query(r#"select * from "03_gold".dim_date"#).unwrap();
        let twice = normalize_query(&once).unwrap();
        assert_eq!(once, twice);
    }
}
