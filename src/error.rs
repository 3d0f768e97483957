use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SafeTensors error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error("Quantisation descriptor error: {0}")]
    Json(#[from] serde_json::Error),

    /// Mode tag is not one of the supported quantisation modes.
    #[error("Unknown quantisation mode `{0}`! Supported: 'linear', 'linear_symmetric', 'kmeans', 'dequantization'.")]
    UnknownMode(String),

    #[error("Invalid number of bits {0}, must be between 1 and 8!")]
    InvalidBits(i32),

    #[error("Tensor `{name}` is already quantised!")]
    AlreadyQuantised { name: String },

    #[error("Tensor `{name}` contains non-finite values!")]
    NonFinite { name: String },

    #[error("Invalid model file: {0}")]
    InvalidFormat(String),
}

impl Error {
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat(message.into())
    }
}
