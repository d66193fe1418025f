use log::{error, info};
use serde_json::json;

use datalab_semantic::{
    config::{PlatformConfig, SemanticModelJSONConfig},
    semantic_model::{local_store::LocalSemanticModelStore, SemanticModelStore},
};

/// Prints the host configuration document and the loaded models as JSON.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = PlatformConfig::from_env().map_err(|e| {
        error!("Failed to initialize platform config: {}", e);
        e
    })?;

    let json_config = SemanticModelJSONConfig::new().map_err(|e| {
        error!("Failed to initialize semantic model config: {}", e);
        e
    })?;

    let store = match json_config.json_path.as_deref() {
        Some(path) => LocalSemanticModelStore::from_json_file(path),
        None => LocalSemanticModelStore::new(),
    }
    .map_err(|e| {
        error!("Failed to load semantic models: {}", e);
        e
    })?;

    let models = store.get_all_semantic_models()?;
    info!(
        "Loaded {} semantic models; refresh every {:?}, {} concurrent builds",
        models.len(),
        config.scheduled_refresh_interval(),
        config.pre_aggregations_concurrency()
    );

    let document = json!({
        "config": config.to_host_document()?,
        "models": models,
    });
    println!("{}", serde_json::to_string_pretty(&document)?);

    Ok(())
}
