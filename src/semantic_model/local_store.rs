use crate::data_store::{dim_date_table, BackingTable};
use crate::semantic_model::dim_date::dim_date;
use crate::semantic_model::{
    Dimension, Measure, SemanticModel, SemanticModelStore, SemanticModelStoreError,
};
use log::{debug, info};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;

/// Layout of a semantic model JSON file
#[derive(Debug, Deserialize)]
struct ModelFile {
    models: Vec<SemanticModel>,
    #[serde(default)]
    tables: Vec<BackingTable>,
}

#[derive(Clone)]
pub struct LocalSemanticModelStore {
    semantic_models: BTreeMap<String, SemanticModel>,
    backing_tables: BTreeMap<String, BackingTable>,
}

impl LocalSemanticModelStore {
    /// Store holding the built-in `DimDate` model.
    pub fn new() -> Result<Self, SemanticModelStoreError> {
        Self::from_models(vec![dim_date()], vec![dim_date_table()])
    }

    /// Loads models from a JSON file of the form
    /// `{"models": [...], "tables": [...]}`.
    ///
    /// The gold `dim_date` table is always known, so models selecting from
    /// it are type checked even when the file declares no tables.
    pub fn from_json_file(path: &str) -> Result<Self, SemanticModelStoreError> {
        let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SemanticModelStoreError::FileNotFound(path.to_string()),
            _ => SemanticModelStoreError::FileNotFound(format!("{}: {}", path, e)),
        })?;
        let store = Self::from_json_str(&contents)?;
        info!(
            "Loaded {} semantic models from {}",
            store.semantic_models.len(),
            path
        );
        Ok(store)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, SemanticModelStoreError> {
        let file: ModelFile = serde_json::from_str(contents)?;
        let mut tables = file.tables;
        tables.push(dim_date_table());
        Self::from_models(file.models, tables)
    }

    fn from_models(
        models: Vec<SemanticModel>,
        tables: Vec<BackingTable>,
    ) -> Result<Self, SemanticModelStoreError> {
        let mut table_index: HashMap<String, BackingTable> = HashMap::new();
        for table in tables {
            table_index.entry(table.name.clone()).or_insert(table);
        }

        let mut semantic_models = BTreeMap::new();
        let mut backing_tables = BTreeMap::new();
        for model in models {
            model.validate()?;
            if semantic_models.contains_key(&model.name) {
                return Err(SemanticModelStoreError::DuplicateModel(model.name));
            }

            match model
                .source_table()?
                .and_then(|name| table_index.get(&name))
            {
                Some(table) => {
                    model.validate_against(table)?;
                    backing_tables.insert(model.name.clone(), table.clone());
                }
                None => debug!(
                    "No table schema for model {}, skipping type checks",
                    model.name
                ),
            }
            semantic_models.insert(model.name.clone(), model);
        }

        Ok(LocalSemanticModelStore {
            semantic_models,
            backing_tables,
        })
    }
}

impl SemanticModelStore for LocalSemanticModelStore {
    fn get_semantic_model(&self, name: &str) -> Result<SemanticModel, SemanticModelStoreError> {
        match self.semantic_models.get(name) {
            Some(model) => Ok(model.clone()),
            None => Err(SemanticModelStoreError::ModelNotFound(name.to_string())),
        }
    }

    fn get_all_semantic_models(
        &self,
    ) -> Result<BTreeMap<String, SemanticModel>, SemanticModelStoreError> {
        Ok(self.semantic_models.clone())
    }

    fn get_measure(
        &self,
        model_name: &str,
        measure_name: &str,
    ) -> Result<Measure, SemanticModelStoreError> {
        let semantic_model = self.get_semantic_model(model_name)?;
        semantic_model.get_measure(measure_name).cloned()
    }

    fn get_dimension(
        &self,
        model_name: &str,
        dimension_name: &str,
    ) -> Result<Dimension, SemanticModelStoreError> {
        let semantic_model = self.get_semantic_model(model_name)?;
        semantic_model.get_dimension(dimension_name).cloned()
    }

    fn get_backing_table(&self, model_name: &str) -> Option<BackingTable> {
        self.backing_tables.get(model_name).cloned()
    }
}
