//! Experiment configuration
//!
//! Loading, validation, and environment expansion. Expansion happens once
//! at startup: each environment's variable combinations become
//! fully-resolved [`RunConfig`]s, index-correspondent with their value
//! tuples.

mod cli;
mod schema;
mod validate;

pub use cli::{Cli, Command, EvaluateArgs, TrainArgs, ValidateArgs};
pub use schema::{
    value_to_string, BatchSizeSpec, EarlyStopSpec, EnvironmentSpec, ExperimentSpec, ReportSpec,
    RunConfig, TestParams, TrainParams, VariableSpec,
};
pub use validate::{validate_spec, ValidationError};

use std::path::Path;

use crate::error::{Error, Result};

/// A named sweep dimension set, expanded into runnable configurations.
///
/// `variables_list` and `configs_list` are equal length and
/// index-correspondent; both are immutable once constructed.
#[derive(Debug, Clone)]
pub struct Environment {
    pub name: String,
    pub title: Option<String>,
    pub default: bool,
    /// Ordered variable names.
    pub variable_names: Vec<String>,
    /// Per-dimension value lists (display form), in variable order.
    pub variable_values: Vec<Vec<String>>,
    /// Cartesian value tuples, one per variant.
    pub variables_list: Vec<Vec<String>>,
    /// Resolved run configuration per variant.
    pub configs_list: Vec<RunConfig>,
    pub report: ReportSpec,
}

/// Load an experiment specification from a YAML file.
pub fn load_spec(path: &Path) -> Result<ExperimentSpec> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    serde_yaml::from_str(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

/// Expand every environment of `spec` into value tuples and resolved run
/// configurations. A spec without environments yields one implicit
/// environment with a single variant.
pub fn expand_environments(spec: &ExperimentSpec, gpu: &[u32]) -> Result<Vec<Environment>> {
    let env_specs: Vec<EnvironmentSpec> = if spec.environments.is_empty() {
        vec![EnvironmentSpec {
            name: "main".to_string(),
            title: None,
            default: true,
            variables: Vec::new(),
            report: ReportSpec::default(),
        }]
    } else {
        spec.environments.clone()
    };

    let mut environments = Vec::with_capacity(env_specs.len());
    for env_spec in &env_specs {
        let variable_names: Vec<String> =
            env_spec.variables.iter().map(|v| v.name.clone()).collect();
        let variable_values: Vec<Vec<String>> = env_spec
            .variables
            .iter()
            .map(|v| v.values.iter().map(value_to_string).collect())
            .collect();

        let mut variables_list = Vec::new();
        let mut configs_list = Vec::new();
        for (index, combo) in cartesian(&env_spec.variables).into_iter().enumerate() {
            let mut config = RunConfig {
                experiment: spec.name.clone(),
                env_name: env_spec.name.clone(),
                model: spec.model.clone(),
                dataset: spec.dataset.clone(),
                train: spec.train.clone(),
                test: spec.test.clone(),
                overrides: Default::default(),
                gpu: gpu.to_vec(),
                log_dir: spec
                    .log_dir
                    .join(&spec.name)
                    .join(&env_spec.name)
                    .join(format!("variant_{index}")),
            };
            let mut tuple = Vec::with_capacity(combo.len());
            for (name, value) in variable_names.iter().zip(&combo) {
                config.apply_variable(name, value)?;
                tuple.push(value_to_string(value));
            }
            variables_list.push(tuple);
            configs_list.push(config);
        }

        environments.push(Environment {
            name: env_spec.name.clone(),
            title: env_spec.title.clone(),
            default: env_spec.default,
            variable_names,
            variable_values,
            variables_list,
            configs_list,
            report: env_spec.report.clone(),
        });
    }
    Ok(environments)
}

/// Pick the environments a sweep should run: the named ones, or every
/// environment marked `default` when no names are given.
pub fn select_environments(environments: Vec<Environment>, names: &[String]) -> Vec<Environment> {
    if names.is_empty() {
        environments.into_iter().filter(|e| e.default).collect()
    } else {
        environments
            .into_iter()
            .filter(|e| names.iter().any(|n| n == &e.name))
            .collect()
    }
}

/// Cartesian product of the variables' values, last dimension fastest.
fn cartesian(variables: &[VariableSpec]) -> Vec<Vec<serde_json::Value>> {
    let mut combos: Vec<Vec<serde_json::Value>> = vec![Vec::new()];
    for variable in variables {
        let mut next = Vec::with_capacity(combos.len() * variable.values.len());
        for combo in &combos {
            for value in &variable.values {
                let mut extended = combo.clone();
                extended.push(value.clone());
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}
