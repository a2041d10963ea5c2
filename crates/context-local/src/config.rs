//! Slot configuration.
//!
//! The lazy initializer is code and is handed to the builder directly; the
//! rest of a slot's configuration is plain data and can be loaded from TOML.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Where lazily created values are recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingScope {
    /// Created values are not tracked.
    #[default]
    Disabled,
    /// The slot owns a private tracker.
    PerSlot,
    /// Every slot over the same value type that selects this scope shares
    /// one process-wide tracker.
    SharedByType,
}

impl TrackingScope {
    /// Map the boolean tracking flag onto a scope
    pub fn from_flag(track: bool) -> Self {
        if track {
            Self::PerSlot
        } else {
            Self::Disabled
        }
    }

    /// Whether any tracker is attached
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// Data half of a slot's configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlotConfig {
    /// Label used in log events and error messages
    pub label: Option<String>,
    /// Where lazily created values are recorded
    pub tracking: TrackingScope,
}

impl SlotConfig {
    /// Parse a configuration table such as
    ///
    /// ```toml
    /// label = "request-user"
    /// tracking = "per_slot"
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Set the label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the tracking scope
    pub fn with_tracking(mut self, tracking: TrackingScope) -> Self {
        self.tracking = tracking;
        self
    }
}
