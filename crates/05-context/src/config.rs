//! Environment/configuration knobs enumerated in spec.md §6.

use serde::Deserialize;
use std::path::PathBuf;

/// Default size of the shared-config region.
pub const DEFAULT_SHARED_CONFIG_MEMORY_SIZE: usize = 64 * 1024;

/// Default size of the control and feedback channel regions.
pub const DEFAULT_CHANNEL_SIZE: usize = 64 * 1024;

/// Default number of slots in the shared-config dictionary table.
pub const DEFAULT_DICTIONARY_ELEMENT_COUNT: usize = 2048;

/// Construction-time configuration for a [`crate::Context`].
///
/// Mirrors the teacher's runtime config structs: plain data, validated once
/// at construction rather than threaded through every call site. `Deserialize`
/// is derived so an embedder can load this from whatever config format it
/// already uses (JSON/TOML/env); this crate itself owns no format parser.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Rendezvous directory for anonymous-mode socket and sentinel file.
    pub socket_folder: PathBuf,
    /// Bytes of the shared-config region. Power-of-two recommended.
    pub shared_config_memory_size: usize,
    /// Bytes of the control channel region. Must be a power of two.
    pub control_channel_size: usize,
    /// Bytes of the feedback channel region. Must be a power of two.
    pub feedback_channel_size: usize,
    /// Slot count of the shared-config dictionary table. Must be a power of two.
    pub dictionary_element_count: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            socket_folder: default_socket_folder(),
            shared_config_memory_size: DEFAULT_SHARED_CONFIG_MEMORY_SIZE,
            control_channel_size: DEFAULT_CHANNEL_SIZE,
            feedback_channel_size: DEFAULT_CHANNEL_SIZE,
            dictionary_element_count: DEFAULT_DICTIONARY_ELEMENT_COUNT,
        }
    }
}

impl CoreConfig {
    /// Checks the power-of-two invariants the channel and dictionary layers
    /// require, before any region is mapped.
    pub fn validate(&self) -> Result<(), String> {
        if !self.control_channel_size.is_power_of_two() {
            return Err(format!(
                "control_channel_size {} is not a power of two",
                self.control_channel_size
            ));
        }
        if !self.feedback_channel_size.is_power_of_two() {
            return Err(format!(
                "feedback_channel_size {} is not a power of two",
                self.feedback_channel_size
            ));
        }
        if !self.dictionary_element_count.is_power_of_two() {
            return Err(format!(
                "dictionary_element_count {} is not a power of two",
                self.dictionary_element_count
            ));
        }
        Ok(())
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_folder.join("mlos.sock")
    }

    pub fn sentinel_path(&self) -> PathBuf {
        self.socket_folder.join("mlos.opened")
    }
}

#[cfg(unix)]
fn default_socket_folder() -> PathBuf {
    PathBuf::from("/var/tmp/mlos")
}

#[cfg(not(unix))]
fn default_socket_folder() -> PathBuf {
    std::env::temp_dir().join("mlos")
}
