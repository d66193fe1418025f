use crate::query::Query;
use std::fmt;
use std::time::Duration;

/// Query cache entries are partitioned by app id, so two tenants never share
/// a result even for identical queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub app_id: String,
    pub query_fingerprint: String,
}

impl CacheKey {
    pub fn new(app_id: &str, query: &Query) -> Result<Self, serde_json::Error> {
        Ok(CacheKey {
            app_id: app_id.to_string(),
            query_fingerprint: query.fingerprint()?,
        })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.app_id, self.query_fingerprint)
    }
}

/// Whether a cached refresh-key result of the given age must be re-checked
/// before it is served.
pub fn needs_renewal(age: Duration, threshold: Duration) -> bool {
    age >= threshold
}
