use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use log::debug;
use serde::Serialize;
use thiserror::Error;

use crate::hooks::{ConstantAppId, IdentityRewriter, QueryRewriter, TenantResolver};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envconfig::Error),
    #[error("{0} must be a positive integer")]
    NonPositive(&'static str),
    #[error("Failed to render host configuration: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Database connection consumed by the host platform.
#[derive(Envconfig, Clone)]
pub struct DbConfig {
    #[envconfig(from = "CUBEJS_DB_TYPE", default = "postgres")]
    pub db_type: String,
    #[envconfig(from = "CUBEJS_DB_HOST", default = "localhost")]
    pub host: String,
    #[envconfig(from = "CUBEJS_DB_PORT", default = "5432")]
    pub port: u16,
    #[envconfig(from = "CUBEJS_DB_NAME")]
    pub name: String,
    #[envconfig(from = "CUBEJS_DB_USER")]
    pub user: String,
    #[envconfig(from = "CUBEJS_DB_PASS")]
    pub password: String,
}

impl DbConfig {
    pub fn new() -> Result<Self, envconfig::Error> {
        let config = Self::init_from_env()?;
        debug!(
            "DbConfig loaded: db_type={}, host={}, port={}, name={}, user={}",
            config.db_type, config.host, config.port, config.name, config.user
        );
        Ok(config)
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("db_type", &self.db_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"********")
            .finish()
    }
}

/// Scheduling, caching and telemetry settings.
#[derive(Envconfig, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    #[envconfig(from = "CUBEJS_SCHEDULED_REFRESH_TIMER", default = "60")]
    pub scheduled_refresh_timer: u64,
    #[envconfig(from = "CUBEJS_REFRESH_KEY_RENEWAL_THRESHOLD", default = "120")]
    pub refresh_key_renewal_threshold: u64,
    #[envconfig(from = "CUBEJS_PRE_AGGREGATIONS_CONCURRENCY", default = "2")]
    pub pre_aggregations_concurrency: usize,
    #[envconfig(from = "CUBEJS_TELEMETRY", default = "false")]
    pub telemetry: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            scheduled_refresh_timer: 60,
            refresh_key_renewal_threshold: 120,
            pre_aggregations_concurrency: 2,
            telemetry: false,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, envconfig::Error> {
        let settings = Self::init_from_env()?;
        debug!("Settings loaded: {:?}", settings);
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduled_refresh_timer == 0 {
            return Err(ConfigError::NonPositive("scheduledRefreshTimer"));
        }
        if self.refresh_key_renewal_threshold == 0 {
            return Err(ConfigError::NonPositive("refreshKeyRenewalThreshold"));
        }
        if self.pre_aggregations_concurrency == 0 {
            return Err(ConfigError::NonPositive("concurrency"));
        }
        Ok(())
    }
}

#[derive(Envconfig, Clone)]
pub struct SemanticModelJSONConfig {
    #[envconfig(from = "SEMANTIC_MODELS_JSON_PATH")]
    pub json_path: Option<String>,
}

impl SemanticModelJSONConfig {
    pub fn new() -> Result<Self, envconfig::Error> {
        let config = Self::init_from_env()?;
        debug!(
            "SemanticModelJSONConfig loaded: json_path={:?}",
            config.json_path
        );
        Ok(config)
    }
}

/// Process-wide configuration handed to the host at startup.
///
/// Built once and shared by reference; there is no way to mutate it after
/// [`PlatformConfigBuilder::build`].
pub struct PlatformConfig {
    db: DbConfig,
    query_rewriter: Arc<dyn QueryRewriter>,
    tenant_resolver: Arc<dyn TenantResolver>,
    settings: Settings,
}

impl PlatformConfig {
    pub fn builder(db: DbConfig) -> PlatformConfigBuilder {
        PlatformConfigBuilder {
            db,
            query_rewriter: Arc::new(IdentityRewriter),
            tenant_resolver: Arc::new(ConstantAppId::default()),
            settings: Settings::default(),
        }
    }

    /// Database connection and settings from the environment, default hooks.
    pub fn from_env() -> Result<Self, ConfigError> {
        let db = DbConfig::new()?;
        let settings = Settings::new()?;
        Self::builder(db).settings(settings).build()
    }

    pub fn db(&self) -> &DbConfig {
        &self.db
    }

    pub fn query_rewriter(&self) -> &dyn QueryRewriter {
        self.query_rewriter.as_ref()
    }

    pub fn tenant_resolver(&self) -> &dyn TenantResolver {
        self.tenant_resolver.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn scheduled_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.settings.scheduled_refresh_timer)
    }

    pub fn refresh_key_renewal_threshold(&self) -> Duration {
        Duration::from_secs(self.settings.refresh_key_renewal_threshold)
    }

    pub fn pre_aggregations_concurrency(&self) -> usize {
        self.settings.pre_aggregations_concurrency
    }

    /// Configuration document in the host's expected layout. Hooks are
    /// listed by name.
    pub fn to_host_document(&self) -> Result<serde_json::Value, ConfigError> {
        let document = HostDocument {
            query_rewrite: self.query_rewriter.name(),
            context_to_app_id: self.tenant_resolver.name(),
            scheduled_refresh_timer: self.settings.scheduled_refresh_timer,
            orchestrator_options: OrchestratorOptions {
                query_cache_options: QueryCacheOptions {
                    refresh_key_renewal_threshold: self.settings.refresh_key_renewal_threshold,
                },
                pre_aggregations_options: PreAggregationsOptions {
                    queue_options: QueueOptions {
                        concurrency: self.settings.pre_aggregations_concurrency,
                    },
                },
            },
            telemetry: self.settings.telemetry,
        };
        Ok(serde_json::to_value(document)?)
    }
}

impl fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("db", &self.db)
            .field("query_rewriter", &self.query_rewriter.name())
            .field("tenant_resolver", &self.tenant_resolver.name())
            .field("settings", &self.settings)
            .finish()
    }
}

pub struct PlatformConfigBuilder {
    db: DbConfig,
    query_rewriter: Arc<dyn QueryRewriter>,
    tenant_resolver: Arc<dyn TenantResolver>,
    settings: Settings,
}

impl PlatformConfigBuilder {
    pub fn query_rewriter(mut self, rewriter: impl QueryRewriter + 'static) -> Self {
        self.query_rewriter = Arc::new(rewriter);
        self
    }

    pub fn tenant_resolver(mut self, resolver: impl TenantResolver + 'static) -> Self {
        self.tenant_resolver = Arc::new(resolver);
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<PlatformConfig, ConfigError> {
        self.settings.validate()?;
        debug!(
            "PlatformConfig built: query_rewrite={}, context_to_app_id={}",
            self.query_rewriter.name(),
            self.tenant_resolver.name()
        );
        Ok(PlatformConfig {
            db: self.db,
            query_rewriter: self.query_rewriter,
            tenant_resolver: self.tenant_resolver,
            settings: self.settings,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HostDocument<'a> {
    query_rewrite: &'a str,
    context_to_app_id: &'a str,
    scheduled_refresh_timer: u64,
    orchestrator_options: OrchestratorOptions,
    telemetry: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OrchestratorOptions {
    query_cache_options: QueryCacheOptions,
    pre_aggregations_options: PreAggregationsOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryCacheOptions {
    refresh_key_renewal_threshold: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PreAggregationsOptions {
    queue_options: QueueOptions,
}

#[derive(Serialize)]
struct QueueOptions {
    concurrency: usize,
}
