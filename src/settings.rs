//! Runtime toggle for lazy generation.

use std::sync::atomic::{AtomicBool, Ordering};

/// Where the lazy-generation switch lives.
///
/// When the switch is off the suppressor stands down and ingest keeps
/// its eagerly generated files, which is the stock pipeline behavior.
pub trait SettingsStore: Send + Sync {
    fn autogen_enabled(&self) -> bool;

    fn set_autogen_enabled(&self, enabled: bool);
}

/// Process-local settings, on by default.
#[derive(Debug)]
pub struct MemorySettings {
    autogen: AtomicBool,
}

impl MemorySettings {
    pub fn new(autogen_enabled: bool) -> Self {
        Self {
            autogen: AtomicBool::new(autogen_enabled),
        }
    }
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SettingsStore for MemorySettings {
    fn autogen_enabled(&self) -> bool {
        self.autogen.load(Ordering::Relaxed)
    }

    fn set_autogen_enabled(&self, enabled: bool) {
        self.autogen.store(enabled, Ordering::Relaxed);
    }
}
