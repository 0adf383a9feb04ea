use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::{Anomaly, ParseError};

use super::StorageHandle;

#[derive(Debug, Clone)]
pub(crate) enum ReadState<T> {
    Missing,
    Unreadable(ParseError),
    Present(T),
}

impl<T> ReadState<T> {
    /// Collapses the read state into an optional value, logging unreadable
    /// data. Corrupt data is indistinguishable from absent data downstream.
    pub(crate) fn into_present(self) -> Option<T> {
        match self {
            Self::Present(value) => Some(value),
            Self::Missing => None,
            Self::Unreadable(error) => {
                warn!(
                    key = %error.key,
                    path = %error.path,
                    anomaly = %Anomaly::Parse,
                    error = %error.message,
                    "stored_value_unreadable_treated_as_absent"
                );
                None
            }
        }
    }
}

pub(crate) fn read_json<T: DeserializeOwned>(storage: &StorageHandle, key: &str) -> ReadState<T> {
    match storage.get(key) {
        None => ReadState::Missing,
        Some(raw) => match parse_json(key, &raw) {
            Ok(value) => ReadState::Present(value),
            Err(error) => ReadState::Unreadable(error),
        },
    }
}

pub(crate) fn parse_json<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, ParseError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize::<_, T>(&mut deserializer).map_err(|error| {
        let path = error.path().to_string();
        ParseError {
            key: key.to_string(),
            path: if path.is_empty() { ".".to_string() } else { path },
            message: error.into_inner().to_string(),
        }
    })
}

pub(crate) fn encode_json<T: Serialize>(key: &str, value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(text) => Some(text),
        Err(error) => {
            warn!(key, error = %error, "stored_value_encode_failed");
            None
        }
    }
}

pub(crate) fn write_json<T: Serialize>(storage: &StorageHandle, key: &str, value: &T) -> bool {
    match encode_json(key, value) {
        Some(text) => storage.set(key, &text),
        None => false,
    }
}
