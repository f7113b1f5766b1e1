//! The fitted model artifact and its predictor.
//!
//! A `FittedModel` is the self-contained result of any fitting strategy. It is
//! serialized to a human-readable TOML file, the same artifact format used for
//! checkpoints, so trained models can be shared and applied elsewhere.

use crate::data::Partition;
use crate::objective::effective_weights;
use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Custom error type for model persistence and prediction.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("failed to read or write model file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML model file: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("failed to serialize model to TOML format: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("prediction data has {found} attributes, but the model was trained on {expected}")]
    MismatchedAttributeCount { found: usize, expected: usize },
}

/// A complete partitioned least squares model.
///
/// `a` holds the per-attribute direction coefficients (non-negative, summing
/// to one within each non-empty group), `b` the per-group scale coefficients;
/// the weight of attribute `m` is `a[m] * b[group_of(m)]`. The partition is
/// the one supplied at fitting time, copied unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedModel {
    /// Value of the regularized objective at the returned coefficients.
    pub objective: f64,
    // Scalar fields stay ahead of the array-valued ones so the TOML
    // serializer never has to emit a value after a table.
    pub intercept: f64,
    pub a: Array1<f64>,
    pub b: Array1<f64>,
    pub partition: Partition,
}

impl FittedModel {
    /// Predicts responses for new examples: `X_new (P .* a) b + t`.
    ///
    /// Pure function of the model and its input; the model is never mutated.
    pub fn predict(&self, x_new: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        if x_new.ncols() != self.partition.num_attributes() {
            return Err(ModelError::MismatchedAttributeCount {
                found: x_new.ncols(),
                expected: self.partition.num_attributes(),
            });
        }
        let weights = effective_weights(&self.partition, self.a.view(), self.b.view());
        Ok(x_new.dot(&weights) + self.intercept)
    }

    /// Saves the model as pretty-printed TOML.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let serialized = toml::to_string_pretty(self)?;
        let file = fs::File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(serialized.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Loads a model previously written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}
