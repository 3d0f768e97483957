use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
};

use safetensors::{tensor::TensorView, Dtype, SafeTensors};
use serde::{Deserialize, Serialize};

use crate::{
    pack::{pack_bits, unpack_bits},
    Error, Result,
};

const DESCRIPTOR_PREFIX: &str = "netquant.quantisation.";
const SCALE_SUFFIX: &str = ".netquant_scale";
const BIAS_SUFFIX: &str = ".netquant_bias";
const LUT_SUFFIX: &str = ".netquant_lut";

/// A single named parameter of a model.
#[derive(Clone, Debug, PartialEq)]
pub enum Weight {
    Float {
        shape: Vec<usize>,
        values: Vec<f32>,
    },
    /// Per-channel affine codes, `value = code * scale[c] + bias[c]`.
    Linear {
        shape: Vec<usize>,
        bits: u8,
        scale: Vec<f32>,
        bias: Vec<f32>,
        codes: Vec<u8>,
    },
    /// Indices into a table of centroids, `value = lut[index]`.
    Palette {
        shape: Vec<usize>,
        bits: u8,
        lut: Vec<f32>,
        indices: Vec<u8>,
    },
    /// Any dtype that is not quantised, kept byte for byte.
    Raw {
        dtype: Dtype,
        shape: Vec<usize>,
        data: Vec<u8>,
    },
}

impl Weight {
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Float { shape, .. }
            | Self::Linear { shape, .. }
            | Self::Palette { shape, .. }
            | Self::Raw { shape, .. } => shape,
        }
    }

    pub fn is_quantised(&self) -> bool {
        matches!(self, Self::Linear { .. } | Self::Palette { .. })
    }

    /// Number of channels a tensor of this shape is split into, along axis 0.
    pub fn channels(shape: &[usize]) -> usize {
        if shape.len() >= 2 {
            shape[0]
        } else {
            1
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Model {
    weights: BTreeMap<String, Weight>,
    metadata: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Descriptor {
    Linear { bits: u8, shape: Vec<usize> },
    Palette { bits: u8, shape: Vec<usize> },
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, weight: Weight) -> Option<Weight> {
        self.weights.insert(name.into(), weight)
    }

    pub fn get(&self, name: &str) -> Option<&Weight> {
        self.weights.get(name)
    }

    pub fn weights(&self) -> impl Iterator<Item = (&str, &Weight)> {
        self.weights.iter().map(|(name, weight)| (name.as_str(), weight))
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Builds a new model with the same metadata, mapping every weight through `f`.
    pub fn try_map<F>(&self, mut f: F) -> Result<Self>
    where
        F: FnMut(&str, &Weight) -> Result<Weight>,
    {
        let mut weights = BTreeMap::new();

        for (name, weight) in &self.weights {
            weights.insert(name.clone(), f(name, weight)?);
        }

        Ok(Self { weights, metadata: self.metadata.clone() })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let model = Self::from_bytes(&bytes)?;

        tracing::info!("Loaded {} tensors from {}", model.len(), path.display());

        Ok(model)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (_, header) = SafeTensors::read_metadata(bytes)?;
        let tensors = SafeTensors::deserialize(bytes)?;

        let mut descriptors = BTreeMap::new();
        let mut metadata = BTreeMap::new();

        for (key, value) in header.metadata().iter().flatten() {
            match key.strip_prefix(DESCRIPTOR_PREFIX) {
                Some(name) => {
                    descriptors.insert(name.to_string(), serde_json::from_str::<Descriptor>(value)?);
                }
                None => {
                    metadata.insert(key.clone(), value.clone());
                }
            }
        }

        let mut companions = Vec::new();
        let mut weights = BTreeMap::new();

        for (name, descriptor) in descriptors {
            let packed = tensor(&tensors, &name)?;
            if packed.dtype() != Dtype::U8 {
                return Err(Error::invalid_format(format!("`{name}` should be packed U8, found {:?}", packed.dtype())));
            }

            let bits = match &descriptor {
                Descriptor::Linear { bits, .. } | Descriptor::Palette { bits, .. } => *bits,
            };
            if !(1..=8).contains(&bits) {
                return Err(Error::invalid_format(format!("`{name}` has {bits} bits per element")));
            }

            let weight = match descriptor {
                Descriptor::Linear { bits, shape } => {
                    let scale_name = format!("{name}{SCALE_SUFFIX}");
                    let bias_name = format!("{name}{BIAS_SUFFIX}");
                    let scale = read_f32(&tensor(&tensors, &scale_name)?, &scale_name)?;
                    let bias = read_f32(&tensor(&tensors, &bias_name)?, &bias_name)?;

                    let channels = Weight::channels(&shape);
                    if scale.len() != channels || bias.len() != channels {
                        return Err(Error::invalid_format(format!(
                            "`{name}` has {channels} channels but {} scales and {} biases",
                            scale.len(),
                            bias.len()
                        )));
                    }

                    companions.extend([scale_name, bias_name]);
                    let codes = unpack_bits(packed.data(), bits, element_count(&shape))?;
                    Weight::Linear { shape, bits, scale, bias, codes }
                }
                Descriptor::Palette { bits, shape } => {
                    let lut_name = format!("{name}{LUT_SUFFIX}");
                    let lut = read_f32(&tensor(&tensors, &lut_name)?, &lut_name)?;
                    let indices = unpack_bits(packed.data(), bits, element_count(&shape))?;

                    if indices.iter().any(|&i| usize::from(i) >= lut.len()) {
                        return Err(Error::invalid_format(format!("`{name}` indexes past its lookup table")));
                    }

                    companions.push(lut_name);
                    Weight::Palette { shape, bits, lut, indices }
                }
            };

            weights.insert(name, weight);
        }

        for (name, view) in tensors.tensors() {
            if weights.contains_key(&name) || companions.contains(&name) {
                continue;
            }

            let shape = view.shape().to_vec();
            let weight = match view.dtype() {
                Dtype::F32 => Weight::Float { values: read_f32(&view, &name)?, shape },
                dtype => Weight::Raw { dtype, shape, data: view.data().to_vec() },
            };

            weights.insert(name, weight);
        }

        Ok(Self { weights, metadata })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes)?;

        tracing::info!("Saved {} tensors to {}", self.len(), path.display());

        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header: HashMap<String, String> =
            self.metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let mut buffers = Vec::new();

        for (name, weight) in &self.weights {
            match weight {
                Weight::Float { shape, values } => {
                    buffers.push((name.clone(), Dtype::F32, shape.clone(), f32_bytes(values)));
                }
                Weight::Linear { shape, bits, scale, bias, codes } => {
                    let descriptor = Descriptor::Linear { bits: *bits, shape: shape.clone() };
                    header.insert(format!("{DESCRIPTOR_PREFIX}{name}"), serde_json::to_string(&descriptor)?);

                    let packed = pack_bits(codes, *bits);
                    buffers.push((name.clone(), Dtype::U8, vec![packed.len()], packed));
                    buffers.push((format!("{name}{SCALE_SUFFIX}"), Dtype::F32, vec![scale.len()], f32_bytes(scale)));
                    buffers.push((format!("{name}{BIAS_SUFFIX}"), Dtype::F32, vec![bias.len()], f32_bytes(bias)));
                }
                Weight::Palette { shape, bits, lut, indices } => {
                    let descriptor = Descriptor::Palette { bits: *bits, shape: shape.clone() };
                    header.insert(format!("{DESCRIPTOR_PREFIX}{name}"), serde_json::to_string(&descriptor)?);

                    let packed = pack_bits(indices, *bits);
                    buffers.push((name.clone(), Dtype::U8, vec![packed.len()], packed));
                    buffers.push((format!("{name}{LUT_SUFFIX}"), Dtype::F32, vec![lut.len()], f32_bytes(lut)));
                }
                Weight::Raw { dtype, shape, data } => {
                    buffers.push((name.clone(), *dtype, shape.clone(), data.clone()));
                }
            }
        }

        let mut views = Vec::with_capacity(buffers.len());
        for (name, dtype, shape, data) in &buffers {
            views.push((name.as_str(), TensorView::new(*dtype, shape.clone(), data)?));
        }

        let header = if header.is_empty() { None } else { Some(header) };

        Ok(safetensors::serialize(views, &header)?)
    }
}

fn tensor<'data>(tensors: &SafeTensors<'data>, name: &str) -> Result<TensorView<'data>> {
    tensors
        .tensor(name)
        .map_err(|_| Error::invalid_format(format!("missing tensor `{name}`")))
}

fn read_f32(view: &TensorView, name: &str) -> Result<Vec<f32>> {
    if view.dtype() != Dtype::F32 {
        return Err(Error::invalid_format(format!("`{name}` should be F32, found {:?}", view.dtype())));
    }

    Ok(view
        .data()
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixed_model() -> Model {
        let mut model = Model::new();

        model.insert("fc.weight", Weight::Float { shape: vec![2, 3], values: vec![0.5, -1.0, 2.0, 0.0, 0.25, -0.75] });
        model.insert(
            "fc.bias",
            Weight::Linear { shape: vec![2], bits: 3, scale: vec![0.5], bias: vec![-1.0], codes: vec![0, 7] },
        );
        model.insert(
            "conv.weight",
            Weight::Palette { shape: vec![1, 5], bits: 2, lut: vec![-1.0, 0.0, 1.0], indices: vec![0, 2, 1, 1, 2] },
        );
        model.insert("steps", Weight::Raw { dtype: Dtype::I64, shape: vec![1], data: 42i64.to_le_bytes().to_vec() });
        model.set_metadata("format", "pt");

        model
    }

    #[test]
    fn bytes_reload_to_the_same_model() {
        let model = mixed_model();
        let bytes = model.to_bytes().unwrap();

        assert_eq!(Model::from_bytes(&bytes).unwrap(), model);
    }

    #[test]
    fn quantised_weights_are_stored_packed() {
        let bytes = mixed_model().to_bytes().unwrap();
        let tensors = SafeTensors::deserialize(&bytes).unwrap();

        let packed = tensors.tensor("conv.weight").unwrap();
        assert_eq!(packed.dtype(), Dtype::U8);
        assert_eq!(packed.shape(), &[2]);

        assert!(tensors.tensor("fc.bias.netquant_scale").is_ok());
        assert!(tensors.tensor("conv.weight.netquant_lut").is_ok());
    }

    #[test]
    fn missing_companion_tensor_is_an_error() {
        let mut header = HashMap::new();
        header.insert(
            format!("{DESCRIPTOR_PREFIX}w"),
            r#"{"kind":"palette","bits":2,"shape":[4]}"#.to_string(),
        );

        let packed = [0u8];
        let views = vec![("w", TensorView::new(Dtype::U8, vec![1], &packed).unwrap())];
        let bytes = safetensors::serialize(views, &Some(header)).unwrap();

        assert!(matches!(Model::from_bytes(&bytes), Err(Error::InvalidFormat(_))));
    }

    fn palette_file(bits: u8, dtype: Dtype) -> Vec<u8> {
        let mut header = HashMap::new();
        header.insert(
            format!("{DESCRIPTOR_PREFIX}w"),
            format!(r#"{{"kind":"palette","bits":{bits},"shape":[4]}}"#),
        );

        let packed = [0u8; 4];
        let lut = f32_bytes(&[0.0, 1.0]);
        let views = vec![
            ("w", TensorView::new(dtype, vec![4 / dtype.size()], &packed).unwrap()),
            ("w.netquant_lut", TensorView::new(Dtype::F32, vec![2], &lut).unwrap()),
        ];

        safetensors::serialize(views, &Some(header)).unwrap()
    }

    #[test]
    fn descriptor_bits_must_be_one_to_eight() {
        for bits in [0, 9, 16] {
            assert!(matches!(Model::from_bytes(&palette_file(bits, Dtype::U8)), Err(Error::InvalidFormat(_))));
        }
    }

    #[test]
    fn packed_tensor_must_be_bytes() {
        assert!(matches!(Model::from_bytes(&palette_file(8, Dtype::F32)), Err(Error::InvalidFormat(_))));
        assert!(Model::from_bytes(&palette_file(8, Dtype::U8)).is_ok());
    }

    #[test]
    fn garbage_is_not_a_model() {
        assert!(matches!(Model::from_bytes(b"not a model"), Err(Error::SafeTensors(_))));
    }
}
