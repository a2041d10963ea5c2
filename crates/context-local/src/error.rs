//! Error type for slot operations
//!
//! Reads and writes never fail on their own. The only failures a caller can
//! observe come from a fallible lazy initializer, from malformed
//! configuration text, or from a binding whose runtime type disagrees with
//! the slot reading it.

use crate::key::SlotKey;

/// Boxed error produced by a fallible lazy initializer
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by [`ContextSlot`](crate::ContextSlot) and its configuration
#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    /// The lazy initializer returned an error. Nothing was stored, so the
    /// next read on the same branch runs the initializer again.
    #[error("Initializer for {key}{} failed: {source}", label_suffix(.label))]
    Initializer {
        /// Slot whose initializer failed
        key: SlotKey,
        /// Optional human-readable slot label
        label: Option<String>,
        /// Error returned by the initializer
        #[source]
        source: BoxError,
    },

    /// The binding stored under the slot's key is not a `T`.
    #[error("Binding for {key} is not a {expected}")]
    TypeMismatch {
        /// Slot whose binding was read
        key: SlotKey,
        /// Type name the slot expected
        expected: &'static str,
    },

    /// Slot configuration could not be parsed
    #[error("Invalid slot configuration: {message}")]
    Config {
        /// Error message describing the invalid configuration
        message: String,
    },
}

fn label_suffix(label: &Option<String>) -> String {
    label
        .as_deref()
        .map(|label| format!(" ({label})"))
        .unwrap_or_default()
}

impl SlotError {
    /// Create an initializer failure
    pub fn initializer(key: SlotKey, label: Option<&str>, source: impl Into<BoxError>) -> Self {
        Self::Initializer {
            key,
            label: label.map(str::to_owned),
            source: source.into(),
        }
    }

    /// Create a type mismatch error for slot value type `T`
    pub fn type_mismatch<T>(key: SlotKey) -> Self {
        Self::TypeMismatch {
            key,
            expected: std::any::type_name::<T>(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether a later read can succeed without any other change
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Initializer { .. })
    }
}

impl From<toml::de::Error> for SlotError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// Standard Result type for slot operations
pub type Result<T> = std::result::Result<T, SlotError>;
