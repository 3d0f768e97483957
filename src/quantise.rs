mod kmeans;
mod linear;

use std::str::FromStr;

use crate::{Error, Model, Result, Weight};

pub use kmeans::palettise;
pub use linear::{linear, linear_symmetric};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuantisationMode {
    /// Per-channel affine over `[min, max]`.
    Linear,
    /// Per-channel affine over `[-max|x|, max|x|]`.
    LinearSymmetric,
    /// 1-D k-means lookup table.
    KMeans,
    Dequantise,
}

impl FromStr for QuantisationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(Self::Linear),
            "linear_symmetric" => Ok(Self::LinearSymmetric),
            "kmeans" | "kmeans_lut" => Ok(Self::KMeans),
            "dequantization" | "dequantize" => Ok(Self::Dequantise),
            _ => Err(Error::UnknownMode(s.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuantiseSettings {
    /// Seed for k-means++ initialisation.
    pub seed: u64,
    /// Maximum number of Lloyd iterations per tensor.
    pub max_iters: usize,
}

impl Default for QuantiseSettings {
    fn default() -> Self {
        Self { seed: 0, max_iters: 100 }
    }
}

pub fn quantise_weights(model: &Model, bits: i32, mode: &str) -> Result<Model> {
    quantise_weights_with(model, bits, mode, &QuantiseSettings::default())
}

pub fn quantise_weights_with(model: &Model, bits: i32, mode: &str, settings: &QuantiseSettings) -> Result<Model> {
    let mode = mode.parse::<QuantisationMode>()?;

    let quantiser: fn(&[usize], &[f32], u8, &QuantiseSettings) -> Weight = match mode {
        QuantisationMode::Dequantise => return dequantise(model),
        QuantisationMode::Linear => |shape, values, bits, _| linear(shape, values, bits),
        QuantisationMode::LinearSymmetric => |shape, values, bits, _| linear_symmetric(shape, values, bits),
        QuantisationMode::KMeans => palettise,
    };

    let bits = match u8::try_from(bits) {
        Ok(b @ 1..=8) => b,
        _ => return Err(Error::InvalidBits(bits)),
    };

    tracing::info!("Quantising {} tensors with {mode:?} at {bits} bits", model.len());

    model.try_map(|name, weight| match weight {
        Weight::Float { shape, values } => {
            if values.iter().any(|x| !x.is_finite()) {
                return Err(Error::NonFinite { name: name.to_string() });
            }

            tracing::debug!("Quantising `{name}` {shape:?}");

            Ok(quantiser(shape, values, bits, settings))
        }
        Weight::Linear { .. } | Weight::Palette { .. } => Err(Error::AlreadyQuantised { name: name.to_string() }),
        Weight::Raw { dtype, .. } => {
            tracing::debug!("Skipping `{name}` with dtype {dtype:?}");
            Ok(weight.clone())
        }
    })
}

pub fn dequantise(model: &Model) -> Result<Model> {
    let quantised = model.weights().filter(|(_, weight)| weight.is_quantised()).count();

    if quantised == 0 {
        tracing::warn!("Model has no quantised weights, nothing to dequantise");
    } else {
        tracing::info!("Dequantising {quantised} tensors");
    }

    model.try_map(|_, weight| {
        Ok(match weight {
            Weight::Linear { shape, scale, bias, codes, .. } => {
                let per_channel = codes.len() / scale.len().max(1);
                let values = codes
                    .iter()
                    .enumerate()
                    .map(|(i, &code)| {
                        let c = i / per_channel.max(1);
                        (f64::from(code) * f64::from(scale[c]) + f64::from(bias[c])) as f32
                    })
                    .collect();

                Weight::Float { shape: shape.clone(), values }
            }
            Weight::Palette { shape, lut, indices, .. } => {
                let values = indices.iter().map(|&i| lut[usize::from(i)]).collect();
                Weight::Float { shape: shape.clone(), values }
            }
            other => other.clone(),
        })
    })
}
