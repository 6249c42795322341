//! End-to-end named-mode scenarios spanning region mapping, the ring
//! channel, the shared-config dictionary, and context assembly together —
//! the seams unit tests inside each crate can't exercise on their own.

use shmc_core::{
    Context, ContextOptions, CoreConfig, DispatchEntry, VariableField, VariableFieldLayout,
    FIRST_CALLER_TYPE_INDEX,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

fn fresh_config() -> (tempfile::TempDir, CoreConfig) {
    let dir = tempfile::tempdir().unwrap();
    let config = CoreConfig {
        socket_folder: dir.path().to_path_buf(),
        ..CoreConfig::default()
    };
    (dir, config)
}

/// A caller application message: a fixed `Point { x: f32, y: f32 }` plus one
/// variable-length trailing name field, mirroring the `StringsPair`-shaped
/// messages spec.md §8 scenario 3 describes.
const POINT_TYPE_HASH: u64 = 0xc0ffee;
static POINT_VARIABLE_FIELDS: [VariableFieldLayout; 1] = [VariableFieldLayout { slot_offset: 8 }];

fn point_dispatch_entry(sink: Arc<Mutex<Vec<(f32, f32, Vec<u8>)>>>) -> DispatchEntry {
    DispatchEntry {
        type_hash: POINT_TYPE_HASH,
        fixed_len: 16,
        variable_fields: &POINT_VARIABLE_FIELDS,
        callback: Box::new(move |payload: &[u8]| {
            let x = f32::from_le_bytes(payload[0..4].try_into().unwrap());
            let y = f32::from_le_bytes(payload[4..8].try_into().unwrap());
            sink.lock().unwrap().push((x, y, payload[16..].to_vec()));
        }),
    }
}

#[test]
fn create_and_attach_exchange_a_point_over_the_feedback_channel() {
    let (_dir, config) = fresh_config();

    let received = Arc::new(Mutex::new(Vec::new()));
    let host = Context::create_named(config.clone(), ContextOptions::default()).unwrap();

    let guest_received = received.clone();
    let guest_options = ContextOptions {
        feedback_dispatch: vec![point_dispatch_entry(guest_received)],
        ..ContextOptions::default()
    };
    let guest = Context::attach_named(config, guest_options).unwrap();

    let mut fixed = [0u8; 16];
    fixed[0..4].copy_from_slice(&13.0f32.to_le_bytes());
    fixed[4..8].copy_from_slice(&17.0f32.to_le_bytes());
    let variable_fields = [VariableField {
        slot_offset: 8,
        data: b"origin",
    }];
    host.feedback_channel()
        .write(FIRST_CALLER_TYPE_INDEX, POINT_TYPE_HASH, &fixed, &variable_fields)
        .unwrap();

    assert!(guest.dispatch_one_feedback().unwrap());
    let got = received.lock().unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0], (13.0, 17.0, b"origin".to_vec()));
    drop(got);

    guest.close();
    host.close();
}

#[test]
fn settings_assembly_registration_is_idempotent_across_processes() {
    let (_dir, config) = fresh_config();

    let host = Context::create_named(config.clone(), ContextOptions::default()).unwrap();
    let first = host.register_settings_assembly("physics.settings", 0).unwrap();
    let again = host.register_settings_assembly("physics.settings", 0).unwrap();
    assert_eq!(first, again, "re-registering the same assembly must not mint a new index");

    let guest = Context::attach_named(config, ContextOptions::default()).unwrap();
    let seen_by_guest = guest.register_settings_assembly("physics.settings", 0).unwrap();
    assert_eq!(seen_by_guest, first, "the guest process must observe the same assembly index");

    let other = host.register_settings_assembly("graphics.settings", 0).unwrap();
    assert_ne!(other, first, "a distinct file name gets a distinct index");

    guest.close();
    host.close();
}

#[test]
fn terminate_control_channel_unblocks_a_busy_reader_thread() {
    let (_dir, config) = fresh_config();
    let ctx = Arc::new(Context::create_named(config, ContextOptions::default()).unwrap());
    let dispatched = Arc::new(AtomicU32::new(0));

    let reader_ctx = ctx.clone();
    let reader_dispatched = dispatched.clone();
    let reader = std::thread::spawn(move || {
        let _guard = reader_ctx.control_channel().enter_reader();
        while reader_ctx.dispatch_one_control().unwrap() {
            reader_dispatched.fetch_add(1, Ordering::Relaxed);
        }
    });

    std::thread::sleep(std::time::Duration::from_millis(20));
    ctx.terminate_control_channel().unwrap();
    reader.join().unwrap();
}
