//! Model and dataset factories
//!
//! Names in configuration files resolve against explicit registries
//! populated at startup. A lookup failure is a configuration error raised
//! before any training begins, never a mid-run surprise.

use std::collections::HashMap;

use crate::config::RunConfig;
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::model::Model;

/// Builds a model for one run. Receives the resolved run configuration and
/// the training dataset the model will consume.
pub type ModelFactory =
    Box<dyn Fn(&RunConfig, &dyn Dataset) -> Result<Box<dyn Model>> + Send + Sync>;

/// Builds one split ("train", "valid", a test set name) of a dataset.
pub type DatasetFactory = Box<dyn Fn(&RunConfig, &str) -> Result<Box<dyn Dataset>> + Send + Sync>;

/// Name → factory registry for models and datasets.
#[derive(Default)]
pub struct Registry {
    models: HashMap<String, ModelFactory>,
    datasets: HashMap<String, DatasetFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_model(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&RunConfig, &dyn Dataset) -> Result<Box<dyn Model>> + Send + Sync + 'static,
    ) {
        self.models.insert(name.into(), Box::new(factory));
    }

    pub fn register_dataset(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&RunConfig, &str) -> Result<Box<dyn Dataset>> + Send + Sync + 'static,
    ) {
        self.datasets.insert(name.into(), Box::new(factory));
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn has_dataset(&self, name: &str) -> bool {
        self.datasets.contains_key(name)
    }

    pub fn create_model(
        &self,
        name: &str,
        config: &RunConfig,
        train_set: &dyn Dataset,
    ) -> Result<Box<dyn Model>> {
        let factory = self
            .models
            .get(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))?;
        factory(config, train_set)
    }

    pub fn create_dataset(
        &self,
        name: &str,
        config: &RunConfig,
        split: &str,
    ) -> Result<Box<dyn Dataset>> {
        let factory = self
            .datasets
            .get(name)
            .ok_or_else(|| Error::UnknownDataset(name.to_string()))?;
        factory(config, split)
    }
}
