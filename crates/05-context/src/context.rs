//! `Context`: the public endpoint (spec.md §4.5). Owns the global region,
//! the two channel regions, the shared-config region, and the wakeup
//! primitives for the two channels — assembled the way the teacher's
//! `ServicesHub` assembles its ports and engines.

use crate::config::CoreConfig;
use crate::control::{
    self, RegisterSettingsAssemblyRequest, TerminateReaderThreadRequest, FIRST_CALLER_TYPE_INDEX,
    REGISTER_SETTINGS_ASSEMBLY_TYPE_INDEX, TERMINATE_READER_THREAD_TYPE_INDEX,
};
use crate::error::{ContextError, ContextResult};
use crate::global::{self, GlobalRegion};
use crate::named::{self, NamedRegions, RefcountLock};
use crate::{anonymous, watcher::DescriptorWatcher};
use shmc_channel::{DispatchEntry, DispatchTable, LogAndContinue, NativeWait, Ring, WaitPrimitive};
use shmc_config::Dictionary;
use shmc_region::Region;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

/// Caller-supplied hooks and message tables threaded into the two channels'
/// dispatch tables alongside the two control messages the core itself
/// originates.
pub struct ContextOptions {
    /// Application dispatch entries for the control channel, starting at
    /// [`FIRST_CALLER_TYPE_INDEX`].
    pub control_dispatch: Vec<DispatchEntry>,
    /// Application dispatch entries for the feedback channel, starting at
    /// [`FIRST_CALLER_TYPE_INDEX`].
    pub feedback_dispatch: Vec<DispatchEntry>,
    /// Invoked when a `TerminateReaderThreadRequest` sentinel is dispatched
    /// on either channel (i.e. this process is the one being asked to stop
    /// reading). `Arc`-shared since both channels' dispatch tables wire up
    /// the same hook.
    pub on_terminate: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Invoked when a `RegisterSettingsAssemblyRequest` is dispatched on the
    /// control channel (normally only meaningful on the agent side).
    pub on_register_settings_assembly: Option<Box<dyn Fn(u32) + Send + Sync>>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            control_dispatch: Vec::new(),
            feedback_dispatch: Vec::new(),
            on_terminate: None,
            on_register_settings_assembly: None,
        }
    }
}

enum Mode {
    Named { refcount: RefcountLock, created: bool },
    Anonymous { watcher: Option<DescriptorWatcher> },
}

/// The messaging core's public endpoint.
pub struct Context {
    global: GlobalRegion,
    control_region: Region,
    feedback_region: Region,
    shared_config_region: Region,
    control: Ring<'static>,
    feedback: Ring<'static>,
    dictionary: Mutex<Dictionary<'static>>,
    mode: Mode,
}

/// Splices the two core-owned control messages into slots 1 and 2, leaves
/// slots 3..[`FIRST_CALLER_TYPE_INDEX`) as unreachable placeholders, and
/// appends the caller's own entries starting at [`FIRST_CALLER_TYPE_INDEX`].
fn build_dispatch_table(
    caller_entries: Vec<DispatchEntry>,
    on_terminate: Option<Arc<dyn Fn() + Send + Sync>>,
    on_register_settings_assembly: Option<Box<dyn Fn(u32) + Send + Sync>>,
) -> DispatchTable {
    let mut entries = Vec::with_capacity(FIRST_CALLER_TYPE_INDEX as usize - 1 + caller_entries.len());

    entries.push(DispatchEntry {
        type_hash: TerminateReaderThreadRequest::type_hash(),
        fixed_len: 0,
        variable_fields: &[],
        callback: Box::new(move |_payload: &[u8]| {
            if let Some(on_terminate) = &on_terminate {
                on_terminate();
            }
        }),
    });
    entries.push(DispatchEntry {
        type_hash: RegisterSettingsAssemblyRequest::type_hash(),
        fixed_len: 4,
        variable_fields: &[],
        callback: Box::new(move |payload: &[u8]| {
            if let Some(on_register) = &on_register_settings_assembly {
                let request = RegisterSettingsAssemblyRequest::from_le_bytes(payload);
                on_register(request.assembly_index);
            }
        }),
    });
    for _ in (REGISTER_SETTINGS_ASSEMBLY_TYPE_INDEX + 1)..FIRST_CALLER_TYPE_INDEX {
        entries.push(DispatchEntry {
            type_hash: 0,
            fixed_len: 0,
            variable_fields: &[],
            callback: Box::new(|_payload: &[u8]| {}),
        });
    }
    entries.extend(caller_entries);
    DispatchTable::new(entries)
}

impl Context {
    /// Creates a fresh named-mode context: this process brings up the agent.
    pub fn create_named(config: CoreConfig, options: ContextOptions) -> ContextResult<Self> {
        config.validate().map_err(|msg| ContextError::MalformedRecord(msg))?;
        let regions = named::create_all(&config, global::min_global_region_size())?;
        Self::assemble_named(config, regions, options, true)
    }

    /// Attaches to an already-created named-mode context.
    pub fn attach_named(config: CoreConfig, options: ContextOptions) -> ContextResult<Self> {
        config.validate().map_err(|msg| ContextError::MalformedRecord(msg))?;
        let regions = named::attach_all(&config)?;
        Self::assemble_named(config, regions, options, false)
    }

    fn assemble_named(
        config: CoreConfig,
        regions: NamedRegions,
        options: ContextOptions,
        created: bool,
    ) -> ContextResult<Self> {
        let NamedRegions {
            global: global_region,
            control: control_region,
            feedback: feedback_region,
            shared_config: shared_config_region,
            refcount,
            created: _,
        } = regions;

        let global = if created {
            GlobalRegion::init(global_region, 0)
        } else {
            GlobalRegion::attach(global_region)?
        };

        Self::finish_assembly(
            global,
            control_region,
            feedback_region,
            shared_config_region,
            &config,
            options,
            created,
            Mode::Named { refcount, created },
        )
    }

    /// Attaches in anonymous mode: either by FD exchange with an already
    /// running agent, or by creating our own mappings and arming the
    /// sentinel watcher for when an agent later appears (spec.md §4.5).
    pub fn attach_anonymous(config: CoreConfig, options: ContextOptions) -> ContextResult<Self> {
        config.validate().map_err(|msg| ContextError::MalformedRecord(msg))?;
        let regions = anonymous::construct(&config, global::min_global_region_size())?;
        let created = regions.watcher.is_some();

        let global = if created {
            GlobalRegion::init(regions.global, 0)
        } else {
            GlobalRegion::attach(regions.global)?
        };

        Self::finish_assembly(
            global,
            regions.control,
            regions.feedback,
            regions.shared_config,
            &config,
            options,
            created,
            Mode::Anonymous { watcher: regions.watcher },
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_assembly(
        mut global: GlobalRegion,
        mut control_region: Region,
        mut feedback_region: Region,
        mut shared_config_region: Region,
        config: &CoreConfig,
        options: ContextOptions,
        created: bool,
        mode: Mode,
    ) -> ContextResult<Self> {
        let wait: Arc<dyn WaitPrimitive> = Arc::new(NativeWait);

        let control_dispatch = build_dispatch_table(
            options.control_dispatch,
            options.on_terminate.clone(),
            options.on_register_settings_assembly,
        );
        let feedback_dispatch = build_dispatch_table(options.feedback_dispatch, options.on_terminate, None);

        let control_sync = global.control_sync_bytes();
        let control_buffer: &'static mut [u8] =
            unsafe { crate::raw::leak_region_bytes(&mut control_region) };
        let control = if created {
            Ring::init(control_buffer, control_sync, wait.clone(), Arc::new(LogAndContinue), control_dispatch)?
        } else {
            let ring = Ring::attach(control_buffer, control_sync, wait.clone(), Arc::new(LogAndContinue), control_dispatch)?;
            ring.initialize();
            ring
        };

        let feedback_sync = global.feedback_sync_bytes();
        let feedback_buffer: &'static mut [u8] =
            unsafe { crate::raw::leak_region_bytes(&mut feedback_region) };
        let feedback = if created {
            Ring::init(feedback_buffer, feedback_sync, wait, Arc::new(LogAndContinue), feedback_dispatch)?
        } else {
            let ring = Ring::attach(feedback_buffer, feedback_sync, wait, Arc::new(LogAndContinue), feedback_dispatch)?;
            ring.initialize();
            ring
        };

        let shared_config_buffer: &'static mut [u8] =
            unsafe { crate::raw::leak_region_bytes(&mut shared_config_region) };
        let dictionary = if created {
            Dictionary::init(shared_config_buffer, config.dictionary_element_count)
        } else {
            Dictionary::attach(shared_config_buffer, config.dictionary_element_count)
        };

        global.attached_process_count().fetch_add(1, Ordering::AcqRel);

        Ok(Self {
            global,
            control_region,
            feedback_region,
            shared_config_region,
            control,
            feedback,
            dictionary: Mutex::new(dictionary),
            mode,
        })
    }

    /// Registers a settings assembly, idempotently (spec.md §4.5): looks up
    /// `file_name` in the shared-config dictionary; if present, returns its
    /// already-assigned assembly index without touching the channel. If
    /// absent, assigns a fresh index from the global counter, publishes the
    /// record, and sends a `RegisterSettingsAssemblyRequest` on the control
    /// channel.
    pub fn register_settings_assembly(&self, file_name: &str, dispatch_base_index: u32) -> ContextResult<u32> {
        let mut dictionary = self.dictionary.lock().expect("dictionary mutex poisoned");

        let mut probe_scratch = Vec::new();
        let probe_key = control::registered_settings_assembly_key(file_name, 0, dispatch_base_index, &mut probe_scratch);
        if let Some(offset) = dictionary.lookup(&probe_key)? {
            return Ok(control::decode_assembly_index(dictionary.stored_body(offset)));
        }

        let assembly_index = self.global.registered_settings_assembly_count().fetch_add(1, Ordering::AcqRel);
        let mut scratch = Vec::new();
        let key = control::registered_settings_assembly_key(file_name, assembly_index, dispatch_base_index, &mut scratch);
        let offset = dictionary.create_or_update(&key)?;
        let resolved_index = control::decode_assembly_index(dictionary.stored_body(offset));
        drop(dictionary);

        let request = RegisterSettingsAssemblyRequest { assembly_index: resolved_index };
        self.control.write(
            REGISTER_SETTINGS_ASSEMBLY_TYPE_INDEX,
            RegisterSettingsAssemblyRequest::type_hash(),
            &request.to_le_bytes(),
            &[],
        )?;

        Ok(resolved_index)
    }

    /// Sets `terminate` on the control channel, unblocking any in-wait
    /// reader (spec.md §4.5). The sentinel write happens first so it rides
    /// through the ring normally, before the flag flip would reject it.
    pub fn terminate_control_channel(&self) -> ContextResult<()> {
        let _ = self.control.write(
            TERMINATE_READER_THREAD_TYPE_INDEX,
            TerminateReaderThreadRequest::type_hash(),
            &[],
            &[],
        );
        self.control.terminate();
        Ok(())
    }

    /// As [`Context::terminate_control_channel`], but for the feedback
    /// channel, and busy-waits until `active_reader_count` reaches zero
    /// (spec.md §4.5).
    pub fn terminate_feedback_channel(&self) -> ContextResult<()> {
        let _ = self.feedback.write(
            TERMINATE_READER_THREAD_TYPE_INDEX,
            TerminateReaderThreadRequest::type_hash(),
            &[],
            &[],
        );
        self.feedback.terminate();
        while self.feedback.active_reader_count() > 0 {
            std::thread::yield_now();
        }
        Ok(())
    }

    /// Dispatches one frame from the control channel, blocking until one
    /// arrives or the channel terminates.
    pub fn dispatch_one_control(&self) -> ContextResult<bool> {
        Ok(self.control.try_dispatch_one()?)
    }

    /// Dispatches one frame from the feedback channel, blocking until one
    /// arrives or the channel terminates.
    pub fn dispatch_one_feedback(&self) -> ContextResult<bool> {
        Ok(self.feedback.try_dispatch_one()?)
    }

    pub fn control_channel(&self) -> &Ring<'static> {
        &self.control
    }

    pub fn feedback_channel(&self) -> &Ring<'static> {
        &self.feedback
    }

    /// Unmaps all four regions. In named mode, unlinks the backing files
    /// only if this was the last attached process (spec.md §3's refcount
    /// invariant); in anonymous mode, the watcher thread (if any) is joined
    /// before the regions it references are torn down.
    ///
    /// Mirrors [`shmc_region::Region::close`]'s own idiom: dropping a
    /// `Context` without calling this still unmaps memory (via each field's
    /// own `Drop`), but skips the refcount decrement and named-file cleanup.
    pub fn close(mut self) {
        self.global.attached_process_count().fetch_sub(1, Ordering::AcqRel);

        match self.mode {
            Mode::Named { refcount, created: _ } => {
                let global_region = self.global.into_region();
                let regions = NamedRegions {
                    global: global_region,
                    control: self.control_region,
                    feedback: self.feedback_region,
                    shared_config: self.shared_config_region,
                    refcount,
                    created: false,
                };
                named::close_all(regions);
            }
            Mode::Anonymous { watcher } => {
                drop(watcher);
                // Anonymous regions are never named OS resources to unlink;
                // dropping each `Region` unmaps it.
                self.control_region.close(false);
                self.feedback_region.close(false);
                self.shared_config_region.close(false);
                self.global.into_region().close(false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_attach_named_round_trips_and_registers_an_assembly() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig {
            socket_folder: dir.path().to_path_buf(),
            ..CoreConfig::default()
        };

        let host = Context::create_named(config.clone(), ContextOptions::default()).unwrap();
        let first = host.register_settings_assembly("physics.settings", 0).unwrap();
        let second = host.register_settings_assembly("physics.settings", 99).unwrap();
        assert_eq!(first, second, "re-registration is idempotent");

        let guest = Context::attach_named(config, ContextOptions::default()).unwrap();
        let from_guest = guest.register_settings_assembly("physics.settings", 0).unwrap();
        assert_eq!(from_guest, first, "guest sees the same registration");

        guest.close();
        host.close();
    }

    #[test]
    fn terminate_feedback_channel_unblocks_a_waiting_reader() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig {
            socket_folder: dir.path().to_path_buf(),
            ..CoreConfig::default()
        };
        let ctx = Arc::new(Context::create_named(config, ContextOptions::default()).unwrap());

        let reader_ctx = ctx.clone();
        let reader = std::thread::spawn(move || {
            let _guard = reader_ctx.feedback_channel().enter_reader();
            while reader_ctx.dispatch_one_feedback().unwrap() {}
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        ctx.terminate_feedback_channel().unwrap();
        reader.join().unwrap();
    }
}
