use super::cache::CacheKey;
use super::HostError;
use crate::config::PlatformConfig;
use crate::hooks::{HookError, QueryContext};
use crate::query::Query;
use crate::semantic_model::SemanticModelStore;
use crate::sql_parser::compile_query;
use log::debug;
use std::sync::Arc;

/// A query ready for execution: rewritten, compiled and keyed.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedQuery {
    pub query: Query,
    pub app_id: String,
    pub sql: String,
    pub cache_key: CacheKey,
}

/// Runs the per-query pipeline the host applies before execution: the
/// rewrite hook, app id resolution, compilation and cache keying.
#[derive(Clone)]
pub struct HostSession<S: SemanticModelStore> {
    config: Arc<PlatformConfig>,
    store: S,
}

impl<S: SemanticModelStore> HostSession<S> {
    pub fn new(config: Arc<PlatformConfig>, store: S) -> Self {
        HostSession { config, store }
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Hook failures are returned to the caller as query errors; nothing is
    /// retried.
    pub fn prepare(
        &self,
        query: Query,
        context: &QueryContext,
    ) -> Result<PreparedQuery, HostError> {
        let rewriter = self.config.query_rewriter();
        let query = rewriter.rewrite(query, context)?;
        debug!("Query rewritten by '{}'", rewriter.name());

        let app_id = self.config.tenant_resolver().app_id(context)?;
        if app_id.is_empty() {
            return Err(HookError::EmptyAppId.into());
        }

        let sql = compile_query(&query, &self.store)?;
        let cache_key = CacheKey::new(&app_id, &query)?;
        debug!("Prepared query for {}: {}", app_id, sql);

        Ok(PreparedQuery {
            query,
            app_id,
            sql,
            cache_key,
        })
    }
}
