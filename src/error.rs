//! Error types for style loading, parameters and tile decoding.

use thiserror::Error;

use crate::parameters::ParameterKind;

/// Configuration time errors, returned to the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// A required input was missing or empty.
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// The style document or CartoCSS source failed to parse or compile.
    #[error("{message}: {diagnostic}")]
    StyleParse { message: String, diagnostic: String },

    /// The style asset is missing or of an unknown type.
    #[error("Style format error: {0}")]
    StyleFormat(String),

    /// A style parameter that the current style does not declare.
    #[error("Could not find parameter: {0}")]
    NotFound(String),

    /// A parameter value could not be converted to the declared type.
    #[error("Cannot convert '{value}' to {kind}")]
    Conversion { value: String, kind: ParameterKind },
}

impl Error {
    pub(crate) fn style_parse<M: Into<String>, D: std::fmt::Display>(
        message: M,
        diagnostic: D,
    ) -> Self {
        Error::StyleParse {
            message: message.into(),
            diagnostic: diagnostic.to_string(),
        }
    }
}

/// Decode time errors. These never leave the decode entry points of
/// [`TileDecoder`](crate::TileDecoder), they are logged and turned into empty results.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid protobuf data: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("unable to decompress tile data: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed geometry: {0}")]
    Geometry(&'static str),

    #[error("tessellation failed: {0}")]
    Tessellation(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
