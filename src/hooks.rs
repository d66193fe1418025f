//! Per-query extension points invoked by the host.
//!
//! Both hooks run for every incoming query, possibly on several threads at
//! once, so implementations must be pure: same inputs, same output, no side
//! effects. Which tenant or row-level policy to enforce is left to the
//! integrator; the defaults are a passthrough rewrite and a single shared
//! cache partition.

use crate::query::Query;
use chrono::{NaiveDate, NaiveDateTime};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_APP_ID: &str = "CUBEJS_APP";

#[derive(Error, Debug, PartialEq)]
pub enum HookError {
    #[error("Query rewrite failed: {0}")]
    Rewrite(String),
    #[error("Rewritten query broadens the original: {0}")]
    Broadened(String),
    #[error("Security context is missing claim '{0}'")]
    MissingClaim(String),
    #[error("App id must not be empty")]
    EmptyAppId,
}

/// Security context attached to a query, typically decoded JWT claims
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryContext {
    #[serde(default = "empty_object")]
    pub security_context: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl QueryContext {
    pub fn new(security_context: Value) -> Self {
        QueryContext { security_context }
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        QueryContext {
            security_context: empty_object(),
        }
    }
}

pub trait QueryRewriter: Send + Sync {
    /// Name reported in the host configuration document
    fn name(&self) -> &str {
        "custom"
    }

    fn rewrite(&self, query: Query, context: &QueryContext) -> Result<Query, HookError>;
}

pub trait TenantResolver: Send + Sync {
    /// Name reported in the host configuration document
    fn name(&self) -> &str {
        "custom"
    }

    /// Cache partition key for the given context. Must be non-empty and
    /// stable across calls.
    fn app_id(&self, context: &QueryContext) -> Result<String, HookError>;
}

/// Passes every query through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityRewriter;

impl QueryRewriter for IdentityRewriter {
    fn name(&self) -> &str {
        "identity"
    }

    fn rewrite(&self, query: Query, _context: &QueryContext) -> Result<Query, HookError> {
        Ok(query)
    }
}

/// Every context maps to the same partition. Only suitable for
/// single-tenant deployments.
#[derive(Debug, Clone)]
pub struct ConstantAppId {
    app_id: String,
}

impl ConstantAppId {
    pub fn new(app_id: &str) -> Self {
        ConstantAppId {
            app_id: app_id.to_string(),
        }
    }
}

impl Default for ConstantAppId {
    fn default() -> Self {
        Self::new(DEFAULT_APP_ID)
    }
}

impl TenantResolver for ConstantAppId {
    fn name(&self) -> &str {
        "constant"
    }

    fn app_id(&self, _context: &QueryContext) -> Result<String, HookError> {
        if self.app_id.is_empty() {
            return Err(HookError::EmptyAppId);
        }
        Ok(self.app_id.clone())
    }
}

/// Partitions the cache by one claim of the security context, producing
/// `{prefix}_{claim value}`.
#[derive(Debug, Clone)]
pub struct SecurityContextAppId {
    claim: String,
    prefix: String,
}

impl SecurityContextAppId {
    pub fn new(claim: &str, prefix: &str) -> Self {
        SecurityContextAppId {
            claim: claim.to_string(),
            prefix: prefix.to_string(),
        }
    }
}

impl TenantResolver for SecurityContextAppId {
    fn name(&self) -> &str {
        "security_context_claim"
    }

    fn app_id(&self, context: &QueryContext) -> Result<String, HookError> {
        let value = match context.security_context.get(&self.claim) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(HookError::MissingClaim(self.claim.clone())),
        };
        Ok(format!("{}_{}", self.prefix, value))
    }
}

/// Wraps a rewriter and rejects any output that is not a narrowing of its
/// input: members must stay the same, original filters must survive, date
/// ranges may only shrink and limits may only drop.
#[derive(Debug, Clone)]
pub struct NarrowingGuard<R> {
    inner: R,
}

impl<R: QueryRewriter> NarrowingGuard<R> {
    pub fn new(inner: R) -> Self {
        NarrowingGuard { inner }
    }
}

impl<R: QueryRewriter> QueryRewriter for NarrowingGuard<R> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn rewrite(&self, query: Query, context: &QueryContext) -> Result<Query, HookError> {
        let original = query.clone();
        let rewritten = self.inner.rewrite(query, context)?;
        check_narrowing(&original, &rewritten)?;
        debug!(
            "Rewrite by {} added {} filters",
            self.inner.name(),
            rewritten.filters.len().saturating_sub(original.filters.len())
        );
        Ok(rewritten)
    }
}

pub fn check_narrowing(original: &Query, rewritten: &Query) -> Result<(), HookError> {
    if original.measures != rewritten.measures || original.dimensions != rewritten.dimensions {
        return Err(HookError::Broadened(
            "requested members changed".to_string(),
        ));
    }

    if original.time_dimensions.len() != rewritten.time_dimensions.len() {
        return Err(HookError::Broadened(
            "time dimensions changed".to_string(),
        ));
    }
    for (before, after) in original.time_dimensions.iter().zip(&rewritten.time_dimensions) {
        if before.dimension != after.dimension || before.granularity != after.granularity {
            return Err(HookError::Broadened(format!(
                "time dimension {} changed",
                before.dimension
            )));
        }
        if let Some(range) = &before.date_range {
            let narrowed = match &after.date_range {
                Some(new_range) => range_contains(range, new_range),
                None => false,
            };
            if !narrowed {
                return Err(HookError::Broadened(format!(
                    "date range of {} widened",
                    before.dimension
                )));
            }
        }
    }

    if let Some(filter) = original
        .filters
        .iter()
        .find(|filter| !rewritten.filters.contains(filter))
    {
        return Err(HookError::Broadened(format!(
            "filter on {} removed",
            filter.member
        )));
    }

    if let Some(limit) = original.limit {
        match rewritten.limit {
            Some(new_limit) if new_limit <= limit => {}
            _ => return Err(HookError::Broadened("limit raised".to_string())),
        }
    }

    Ok(())
}

/// Whether `inner` lies within `outer`. Bounds are compared as dates, so a
/// bound that does not parse is never contained unless it is unchanged.
fn range_contains(outer: &[String; 2], inner: &[String; 2]) -> bool {
    if outer == inner {
        return true;
    }
    match (
        parse_bound(&outer[0]),
        parse_bound(&outer[1]),
        parse_bound(&inner[0]),
        parse_bound(&inner[1]),
    ) {
        (Some(from), Some(to), Some(new_from), Some(new_to)) => new_from >= from && new_to <= to,
        _ => false,
    }
}

fn parse_bound(value: &str) -> Option<NaiveDateTime> {
    const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::query::{Filter, FilterOperator, Granularity, TimeDimension};
    use rstest::*;
    use serde_json::json;

    #[fixture]
    fn query() -> Query {
        Query {
            measures: vec!["DimDate.count".to_string()],
            dimensions: vec!["DimDate.yearMonth".to_string()],
            time_dimensions: vec![TimeDimension {
                dimension: "DimDate.date".to_string(),
                granularity: Some(Granularity::Month),
                date_range: Some(["2024-01-01".to_string(), "2024-12-31".to_string()]),
            }],
            filters: vec![Filter {
                member: "DimDate.isWeekend".to_string(),
                operator: FilterOperator::Equals,
                values: vec!["false".to_string()],
            }],
            limit: Some(100),
            ..Default::default()
        }
    }

    /// Restricts every query to non-holiday dates.
    struct ExcludeHolidays;

    impl QueryRewriter for ExcludeHolidays {
        fn rewrite(&self, mut query: Query, _context: &QueryContext) -> Result<Query, HookError> {
            query.filters.push(Filter {
                member: "DimDate.isHoliday".to_string(),
                operator: FilterOperator::Equals,
                values: vec!["false".to_string()],
            });
            Ok(query)
        }
    }

    /// Broadens queries by dropping their filters.
    struct DropFilters;

    impl QueryRewriter for DropFilters {
        fn rewrite(&self, mut query: Query, _context: &QueryContext) -> Result<Query, HookError> {
            query.filters.clear();
            Ok(query)
        }
    }

    #[rstest]
    fn identity_rewrite_is_deterministic(query: Query) {
        let context = QueryContext::new(json!({"tenant_id": "acme"}));
        let first = IdentityRewriter.rewrite(query.clone(), &context).unwrap();
        let second = IdentityRewriter.rewrite(query.clone(), &context).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, query);
    }

    #[rstest]
    #[case::empty(json!({}))]
    #[case::tenant(json!({"tenant_id": "acme"}))]
    #[case::null(serde_json::Value::Null)]
    fn constant_app_id_is_stable(#[case] security_context: serde_json::Value) {
        let context = QueryContext::new(security_context);
        let resolver = ConstantAppId::default();
        let first = resolver.app_id(&context).unwrap();
        assert!(!first.is_empty());
        assert_eq!(first, resolver.app_id(&context).unwrap());
        assert_eq!(first, DEFAULT_APP_ID);
    }

    #[test]
    fn empty_constant_app_id_is_rejected() {
        let resolver = ConstantAppId::new("");
        assert_eq!(
            resolver.app_id(&QueryContext::default()),
            Err(HookError::EmptyAppId)
        );
    }

    #[rstest]
    #[case::string(json!({"tenant_id": "acme"}), "CUBEJS_APP_acme")]
    #[case::number(json!({"tenant_id": 42}), "CUBEJS_APP_42")]
    fn claim_app_id_partitions_by_tenant(
        #[case] security_context: serde_json::Value,
        #[case] expected: &str,
    ) {
        let resolver = SecurityContextAppId::new("tenant_id", DEFAULT_APP_ID);
        let context = QueryContext::new(security_context);
        assert_eq!(resolver.app_id(&context).unwrap(), expected);
        assert_eq!(resolver.app_id(&context).unwrap(), expected);
    }

    #[rstest]
    #[case::missing(json!({}))]
    #[case::empty(json!({"tenant_id": ""}))]
    #[case::wrong_type(json!({"tenant_id": ["a", "b"]}))]
    fn claim_app_id_requires_claim(#[case] security_context: serde_json::Value) {
        let resolver = SecurityContextAppId::new("tenant_id", DEFAULT_APP_ID);
        assert_eq!(
            resolver.app_id(&QueryContext::new(security_context)),
            Err(HookError::MissingClaim("tenant_id".to_string()))
        );
    }

    #[rstest]
    fn guard_accepts_added_filters(query: Query) {
        let guard = NarrowingGuard::new(ExcludeHolidays);
        let rewritten = guard.rewrite(query.clone(), &QueryContext::default()).unwrap();
        assert_eq!(rewritten.filters.len(), query.filters.len() + 1);
        assert_eq!(
            rewritten,
            guard.rewrite(query, &QueryContext::default()).unwrap()
        );
    }

    #[rstest]
    fn guard_rejects_removed_filters(query: Query) {
        let guard = NarrowingGuard::new(DropFilters);
        assert!(matches!(
            guard.rewrite(query, &QueryContext::default()),
            Err(HookError::Broadened(_))
        ));
    }

    #[rstest]
    fn narrower_date_range_and_limit_are_accepted(query: Query) {
        let mut narrowed = query.clone();
        narrowed.time_dimensions[0].date_range =
            Some(["2024-03-01".to_string(), "2024-06-30".to_string()]);
        narrowed.limit = Some(10);
        assert!(check_narrowing(&query, &narrowed).is_ok());
    }

    #[rstest]
    fn unpadded_bound_cannot_widen_range(mut query: Query) {
        query.time_dimensions[0].date_range =
            Some(["2024-02-01".to_string(), "2024-12-31".to_string()]);
        let mut widened = query.clone();
        widened.time_dimensions[0].date_range =
            Some(["2024-1-15".to_string(), "2024-12-31".to_string()]);
        assert!(matches!(
            check_narrowing(&query, &widened),
            Err(HookError::Broadened(_))
        ));
    }

    #[rstest]
    #[case::unpadded_inside(["2024-3-1", "2024-6-30"])]
    #[case::timestamps_inside(["2024-02-01T08:00:00", "2024-12-30 23:59:59.5"])]
    #[case::unchanged(["2024-01-01", "2024-12-31"])]
    fn bounds_are_compared_as_dates(query: Query, #[case] range: [&str; 2]) {
        let mut narrowed = query.clone();
        narrowed.time_dimensions[0].date_range = Some(range.map(str::to_string));
        assert!(check_narrowing(&query, &narrowed).is_ok());
    }

    #[rstest]
    #[case::wider_range(|q: &mut Query| q.time_dimensions[0].date_range = Some(["2023-01-01".to_string(), "2024-12-31".to_string()]))]
    #[case::dropped_range(|q: &mut Query| q.time_dimensions[0].date_range = None)]
    #[case::unparseable_bound(|q: &mut Query| q.time_dimensions[0].date_range = Some(["2024-03-01".to_string(), "end of time".to_string()]))]
    #[case::later_end_time(|q: &mut Query| q.time_dimensions[0].date_range = Some(["2024-01-01".to_string(), "2024-12-31T12:00:00".to_string()]))]
    #[case::raised_limit(|q: &mut Query| q.limit = Some(1000))]
    #[case::removed_limit(|q: &mut Query| q.limit = None)]
    #[case::extra_measure(|q: &mut Query| q.measures.push("DimDate.maxDate".to_string()))]
    #[case::changed_granularity(|q: &mut Query| q.time_dimensions[0].granularity = Some(Granularity::Day))]
    #[case::altered_filter(|q: &mut Query| q.filters[0].values = vec!["true".to_string()])]
    fn broadening_rewrites_are_rejected(query: Query, #[case] broaden: fn(&mut Query)) {
        let mut rewritten = query.clone();
        broaden(&mut rewritten);
        assert!(matches!(
            check_narrowing(&query, &rewritten),
            Err(HookError::Broadened(_))
        ));
    }

    #[test]
    fn context_defaults_to_empty_object() {
        let context: QueryContext = serde_json::from_str("{}").unwrap();
        assert_eq!(context.security_context, json!({}));
    }
}
