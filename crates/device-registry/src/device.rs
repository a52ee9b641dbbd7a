//! Device handles.

use serde::{Deserialize, Serialize};

/// Model marker for devices this system tracks.
///
/// Attached capture sources report a model/category string; only sources
/// matching this marker are ever surfaced. Capture cards, webcams, and
/// other video sources are ignored entirely.
pub const ELIGIBLE_MODEL_ID: &str = "Tethered Display";

/// A snapshot handle for a physically attached capture source.
///
/// The platform owns the real device object; this is a cheap, cloneable
/// view of its identity. `id` is stable for the lifetime of the physical
/// device and is the key the registry tracks it under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Stable unique identifier (e.g., the device node path or serial).
    pub id: String,

    /// Localized human-readable name for UI display.
    pub name: String,

    /// Reported model/category string, compared against the eligibility
    /// marker.
    pub model: String,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            model: model.into(),
        }
    }

    /// Whether this device belongs to the tracked category.
    pub fn is_eligible(&self) -> bool {
        self.model == ELIGIBLE_MODEL_ID
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}
