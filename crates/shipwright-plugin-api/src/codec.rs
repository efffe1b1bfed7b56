//! Body codecs.
//!
//! The protocol is codec-agnostic: a message body is a serialized request or
//! response in whatever encoding the client and the plugin agreed on. The
//! codec is part of the plugin descriptor, so both ends are configured from
//! the same place.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Errors produced while encoding or decoding a message body.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml encode: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("toml decode: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("body is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// The body encoding used on a plugin channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireCodec {
    /// TOML bodies, the default.
    #[default]
    Toml,
    /// JSON bodies.
    Json,
}

impl WireCodec {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            WireCodec::Json => Ok(serde_json::to_vec(value)?),
            WireCodec::Toml => Ok(toml::to_string(value)?.into_bytes()),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, CodecError> {
        match self {
            WireCodec::Json => Ok(serde_json::from_slice(body)?),
            WireCodec::Toml => Ok(toml::from_str(std::str::from_utf8(body)?)?),
        }
    }
}

impl std::fmt::Display for WireCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireCodec::Toml => f.write_str("toml"),
            WireCodec::Json => f.write_str("json"),
        }
    }
}

impl std::str::FromStr for WireCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "toml" => Ok(WireCodec::Toml),
            "json" => Ok(WireCodec::Json),
            other => Err(format!("unknown codec {other:?} (expected toml or json)")),
        }
    }
}
