pub mod calendar;
pub mod config;
pub mod data_store;
pub mod hooks;
pub mod host;
pub mod query;
pub mod semantic_model;
pub mod sql_parser;

pub use config::PlatformConfig;
pub use host::HostSession;
