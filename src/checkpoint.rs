//! Key/value storage for iterator checkpoints.
//!
//! Each iterator writes its entries under keys prefixed by its own name (see
//! [`full_name`]), so nested iterators can share one checkpoint.

use crate::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Sink for iterator state.
pub trait StateWriter {
    /// Records `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be stored.
    fn write_scalar(&mut self, key: &str, value: Value) -> Result<(), Error>;
}

/// Source of iterator state.
pub trait StateReader {
    fn contains(&self, key: &str) -> bool;

    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if `key` is absent.
    fn read_scalar(&self, key: &str) -> Result<&Value, Error>;
}

/// Returns the checkpoint key of `name` for the iterator named `prefix`.
#[must_use]
pub fn full_name(prefix: &str, name: &str) -> String {
    format!("{}:{}", prefix, name)
}

/// An in-memory checkpoint that serializes to JSON.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Checkpoint {
    entries: BTreeMap<String, Value>,
}

impl Checkpoint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes this checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a checkpoint produced by `to_bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not a valid checkpoint.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl StateWriter for Checkpoint {
    fn write_scalar(&mut self, key: &str, value: Value) -> Result<(), Error> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

impl StateReader for Checkpoint {
    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn read_scalar(&self, key: &str) -> Result<&Value, Error> {
        self.entries
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("checkpoint has no entry for {}", key)))
    }
}
