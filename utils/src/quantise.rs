use std::{ffi::OsString, path::{Path, PathBuf}};

use netquant::{Model, QuantiseSettings};
use structopt::{clap::AppSettings, StructOpt};

#[derive(StructOpt, Debug)]
#[structopt(name = "quantise", about = "Quantise the weights of a SafeTensors model.")]
#[structopt(setting = AppSettings::AllowNegativeNumbers)]
pub struct QuantiseOptions {
    /// Model to read.
    pub input: PathBuf,
    /// Where to write the quantised model.
    pub output: PathBuf,
    /// 'linear', 'kmeans' or 'dequantization'.
    pub mode: String,
    /// Bits per weight, between 1 and 8.
    #[structopt(default_value = "8")]
    pub bits: i32,
    /// Seed for k-means initialisation.
    #[structopt(long, default_value = "0")]
    pub seed: u64,
    /// Maximum number of k-means refinement passes per tensor.
    #[structopt(long, default_value = "100")]
    pub max_iters: usize,
    /// Anything after the bit width is ignored.
    #[structopt(hidden = true)]
    pub ignored: Vec<String>,
}

pub fn parse_args<I>(args: I) -> Result<QuantiseOptions, structopt::clap::Error>
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
{
    QuantiseOptions::from_iter_safe(args)
}

pub fn usage(program: &str) -> String {
    format!("USAGE: {program} <input_model> <output_model> <mode> [<bits>]")
}

/// Loading, quantising and saving of models, all delegated.
pub trait ModelToolkit {
    type Model;

    fn load(&self, path: &Path) -> anyhow::Result<Self::Model>;

    fn quantise_weights(&self, model: Self::Model, bits: i32, mode: &str) -> anyhow::Result<Self::Model>;

    fn save(&self, model: &Self::Model, path: &Path) -> anyhow::Result<()>;
}

pub struct SafeTensorsToolkit {
    settings: QuantiseSettings,
}

impl SafeTensorsToolkit {
    pub fn new(settings: QuantiseSettings) -> Self {
        Self { settings }
    }
}

impl ModelToolkit for SafeTensorsToolkit {
    type Model = Model;

    fn load(&self, path: &Path) -> anyhow::Result<Model> {
        Ok(netquant::load(path)?)
    }

    fn quantise_weights(&self, model: Model, bits: i32, mode: &str) -> anyhow::Result<Model> {
        Ok(netquant::quantise_weights_with(&model, bits, mode, &self.settings)?)
    }

    fn save(&self, model: &Model, path: &Path) -> anyhow::Result<()> {
        Ok(netquant::save(model, path)?)
    }
}

impl QuantiseOptions {
    pub fn settings(&self) -> QuantiseSettings {
        QuantiseSettings { seed: self.seed, max_iters: self.max_iters }
    }

    pub fn run<T: ModelToolkit>(&self, toolkit: &T) -> anyhow::Result<()> {
        tracing::info!("Loading [{}]", self.input.display());
        let model = toolkit.load(&self.input)?;

        let quantised = toolkit.quantise_weights(model, self.bits, &self.mode)?;

        toolkit.save(&quantised, &self.output)
    }
}
