//! Pluggable encoding of the persisted object.

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Error raised by a [`Codec`], boxing whatever the encoder reports.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct CodecError(Box<dyn std::error::Error + Send + Sync + 'static>);

impl CodecError {
    /// Wraps an encoder specific error.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Box::new(error))
    }

    /// Returns the wrapped error.
    pub fn into_inner(self) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self.0
    }
}

/// Encodes and decodes the whole object graph.
///
/// Implementations must fail on truncated input rather than return a partial
/// value, and must read back exactly what they wrote.
pub trait Codec: Send + Sync + 'static {
    /// Writes `value` to `writer`.
    fn encode<T, W>(&self, value: &T, writer: W) -> Result<(), CodecError>
    where
        T: Serialize,
        W: Write;

    /// Reads a complete value from `reader`.
    fn decode<T, R>(&self, reader: R) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
        R: Read;
}

/// JSON encoding via serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    /// Compact output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Indented output, easier to inspect by hand.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Codec for JsonCodec {
    fn encode<T, W>(&self, value: &T, writer: W) -> Result<(), CodecError>
    where
        T: Serialize,
        W: Write,
    {
        let result = if self.pretty {
            serde_json::to_writer_pretty(writer, value)
        } else {
            serde_json::to_writer(writer, value)
        };
        result.map_err(CodecError::new)
    }

    fn decode<T, R>(&self, reader: R) -> Result<T, CodecError>
    where
        T: DeserializeOwned,
        R: Read,
    {
        serde_json::from_reader(reader).map_err(CodecError::new)
    }
}
