//! Weight quantisation for neural network models stored as SafeTensors.
//!
//! ```no_run
//! let model = netquant::load("model.safetensors")?;
//! let quantised = netquant::quantise_weights(&model, 4, "kmeans")?;
//! netquant::save(&quantised, "model-4bit.safetensors")?;
//! # Ok::<(), netquant::Error>(())
//! ```

mod error;
mod model;
mod pack;
pub mod quantise;

use std::path::Path;

pub use error::{Error, Result};
pub use model::{element_count, Model, Weight};
pub use quantise::{dequantise, quantise_weights, quantise_weights_with, QuantisationMode, QuantiseSettings};
pub use safetensors::Dtype;

pub fn load(path: impl AsRef<Path>) -> Result<Model> {
    Model::load(path)
}

pub fn save(model: &Model, path: impl AsRef<Path>) -> Result<()> {
    model.save(path)
}
