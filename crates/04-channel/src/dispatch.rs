//! The dispatch table: one [`DispatchEntry`] per codegen type a channel
//! consumer understands, indexed by `codegen_type_index - 1` (index 0 of
//! the wire field is reserved for link frames, per the GLOSSARY).
//!
//! Modeled as a trait-object slice rather than a generated enum, since the
//! dispatch table is the one piece of the "external collaborators" surface
//! (spec.md §6) the core must consume without knowing the concrete set of
//! message types ahead of time.

use crate::variable::VariableFieldLayout;

/// One entry in a channel's dispatch table.
pub struct DispatchEntry {
    /// Must match the frame's `codegen_type_hash` for the frame to be
    /// accepted (spec §4.4.2 step 5).
    pub type_hash: u64,
    /// Size of this type's fixed part, not counting variable-length data.
    pub fixed_len: usize,
    /// Slot positions of this type's variable-length fields within the
    /// fixed part, in field order.
    pub variable_fields: &'static [VariableFieldLayout],
    /// Invoked with the full payload (fixed bytes followed by variable
    /// bytes) once a frame passes validation.
    pub callback: Box<dyn Fn(&[u8]) + Send + Sync>,
}

/// Table of [`DispatchEntry`] handed to a channel at construction time.
pub struct DispatchTable {
    entries: Vec<DispatchEntry>,
}

impl DispatchTable {
    pub fn new(entries: Vec<DispatchEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up the entry for a 1-based `codegen_type_index`.
    pub fn get(&self, codegen_type_index: u32) -> Option<&DispatchEntry> {
        if codegen_type_index == 0 {
            return None;
        }
        self.entries.get(codegen_type_index as usize - 1)
    }
}
