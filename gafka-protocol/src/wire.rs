//! Serde helpers for the JSON wire form.
//!
//! Opaque bytes travel as standard base64 strings. Optional fields are
//! omitted when absent; when present they must hold a real value, so an
//! explicit `null` is rejected instead of being read as "absent".

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{de, Deserialize, Deserializer, Serializer};

/// Deserializes a field that is present in the input into `Some(value)`.
///
/// Pair with `#[serde(default)]` so a missing field still becomes `None`.
pub(crate) fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

fn decode_base64<E: de::Error>(field: &str, encoded: &str) -> Result<Vec<u8>, E> {
    STANDARD
        .decode(encoded)
        .map_err(|e| E::custom(format!("invalid base64 in `{field}`: {e}")))
}

pub(crate) mod bytes {
    use super::*;

    pub(crate) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        decode_base64("value", &encoded)
    }
}

pub(crate) mod optional_bytes {
    use super::*;

    pub(crate) fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        decode_base64("key", &encoded).map(Some)
    }
}
