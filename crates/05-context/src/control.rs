//! Control messages the core itself originates (spec.md §6), framed through
//! `shmc-channel` using low `codegen_type_index` values the context crate
//! reserves for itself — distinct from the caller's own dispatch table range,
//! which starts at [`FIRST_CALLER_TYPE_INDEX`].

use shmc_config::{fnv1a_32, ConfigKey};

/// `codegen_type_index` for [`TerminateReaderThreadRequest`] on the control
/// and feedback channels.
pub const TERMINATE_READER_THREAD_TYPE_INDEX: u32 = 1;

/// `codegen_type_index` for [`RegisterSettingsAssemblyRequest`] on the
/// control channel.
pub const REGISTER_SETTINGS_ASSEMBLY_TYPE_INDEX: u32 = 2;

/// First `codegen_type_index` a caller's own dispatch table may use; indices
/// below this are reserved for the control messages above.
pub const FIRST_CALLER_TYPE_INDEX: u32 = 16;

fn type_hash(name: &str) -> u64 {
    fnv1a_32(name.as_bytes()) as u64
}

/// No-payload sentinel used to unblock an in-wait reader so it observes the
/// channel's `terminate` flag (spec.md §4.5).
pub struct TerminateReaderThreadRequest;

impl TerminateReaderThreadRequest {
    pub fn type_hash() -> u64 {
        type_hash("TerminateReaderThreadRequest")
    }
}

/// Asks the agent to load code generated for `assembly_index` (spec.md §4.5,
/// §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSettingsAssemblyRequest {
    pub assembly_index: u32,
}

impl RegisterSettingsAssemblyRequest {
    pub fn type_hash() -> u64 {
        type_hash("RegisterSettingsAssemblyRequest")
    }

    pub fn to_le_bytes(self) -> [u8; 4] {
        self.assembly_index.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        Self {
            assembly_index: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
        }
    }
}

/// Codegen type id this crate stamps on config records it publishes into the
/// global shared-config dictionary for registered settings assemblies.
pub const REGISTERED_SETTINGS_ASSEMBLY_CODEGEN_TYPE: u32 = 1;

/// Decodes the `{ assembly_index, dispatch_base_index }` prefix of a stored
/// `RegisteredSettingsAssembly` body (the `file_name` bytes follow).
pub fn decode_assembly_index(stored_body: &[u8]) -> u32 {
    u32::from_le_bytes(stored_body[0..4].try_into().expect("record body truncated"))
}

/// Builds a dictionary key for a `RegisteredSettingsAssembly` config record:
/// one per distinct `file_name`. spec.md §4.5 keys the registration by "an
/// incrementing assembly index", which this crate treats as the *value*
/// assigned on first registration (from [`GlobalRegion::registered_settings_assembly_count`](crate::global::GlobalRegion)),
/// not the dictionary's own probe key — `file_name` is the stable identity
/// that makes re-registration resolve to the same assembly index instead of
/// minting a fresh one every time. Decision recorded in `DESIGN.md`.
///
/// The serialized `{ assembly_index: u32, dispatch_base_index: u32,
/// file_name }` body is written into caller-owned `scratch`, since
/// [`ConfigKey::body_bytes`] wants a plain `&[u8]` rather than an owned
/// value.
pub fn registered_settings_assembly_key<'a>(
    file_name: &'a str,
    assembly_index: u32,
    dispatch_base_index: u32,
    scratch: &'a mut Vec<u8>,
) -> BoundKey<'a> {
    scratch.clear();
    scratch.extend_from_slice(&assembly_index.to_le_bytes());
    scratch.extend_from_slice(&dispatch_base_index.to_le_bytes());
    scratch.extend_from_slice(file_name.as_bytes());
    BoundKey { file_name, scratch }
}

/// A registered-settings-assembly dictionary key with its serialized body
/// already computed into caller-owned `scratch`.
pub struct BoundKey<'a> {
    file_name: &'a str,
    scratch: &'a [u8],
}

impl<'a> ConfigKey for BoundKey<'a> {
    fn codegen_type_index(&self) -> u32 {
        REGISTERED_SETTINGS_ASSEMBLY_CODEGEN_TYPE
    }

    fn key_bytes(&self) -> &[u8] {
        self.file_name.as_bytes()
    }

    fn body_bytes(&self) -> &[u8] {
        self.scratch
    }

    fn matches_stored(&self, stored_body: &[u8]) -> bool {
        // The body is `{ assembly_index: u32, dispatch_base_index: u32,
        // file_name }`; keys match when the file name suffix (after the
        // 8-byte prefix) agrees.
        let key = self.key_bytes();
        stored_body.len() >= 8 + key.len() && &stored_body[8..8 + key.len()] == key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminate_and_register_hashes_are_stable_and_distinct() {
        assert_eq!(TerminateReaderThreadRequest::type_hash(), TerminateReaderThreadRequest::type_hash());
        assert_ne!(
            TerminateReaderThreadRequest::type_hash(),
            RegisterSettingsAssemblyRequest::type_hash()
        );
    }

    #[test]
    fn register_settings_assembly_request_roundtrips() {
        let req = RegisterSettingsAssemblyRequest { assembly_index: 42 };
        let bytes = req.to_le_bytes();
        assert_eq!(RegisterSettingsAssemblyRequest::from_le_bytes(&bytes), req);
    }

    #[test]
    fn bound_key_matches_same_file_name_regardless_of_indices() {
        let mut scratch_a = Vec::new();
        let mut scratch_b = Vec::new();
        let a = registered_settings_assembly_key("physics.settings", 0, 0, &mut scratch_a);
        let body_a = a.body_bytes().to_vec();
        let b = registered_settings_assembly_key("physics.settings", 1, 7, &mut scratch_b);
        assert!(b.matches_stored(&body_a));
    }

    #[test]
    fn decode_assembly_index_reads_the_stored_prefix() {
        let mut scratch = Vec::new();
        let key = registered_settings_assembly_key("physics.settings", 5, 0, &mut scratch);
        assert_eq!(decode_assembly_index(key.body_bytes()), 5);
    }
}
