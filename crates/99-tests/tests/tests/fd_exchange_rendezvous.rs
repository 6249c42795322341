//! Scenario 6 (spec.md §8): the target starts before the agent, creates its
//! own anonymous regions, and arms the sentinel watcher; the agent then
//! shows up, opens the sentinel, and receives all four region descriptors.

use shmc_context::{recv_record, Context, ContextOptions, CoreConfig};
use shmc_region::{Region, RegionType, REGION_SIGNATURE};
use std::os::unix::net::UnixListener;

#[test]
fn target_creates_regions_then_agent_attaches_via_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let config = CoreConfig {
        socket_folder: dir.path().to_path_buf(),
        ..CoreConfig::default()
    };

    // The target has no agent to talk to yet: it creates its own shareable
    // anonymous regions and arms the sentinel watcher in the background.
    let target = Context::attach_anonymous(config.clone(), ContextOptions::default()).unwrap();

    // The agent now shows up: it listens on the well-known socket and opens
    // the sentinel file, which the target's watcher is polling for.
    let listener = UnixListener::bind(config.socket_path()).unwrap();
    std::fs::File::create(config.sentinel_path()).unwrap();

    let (stream, _addr) = listener.accept().unwrap();

    let expected_order = [
        RegionType::Global,
        RegionType::Control,
        RegionType::Feedback,
        RegionType::SharedConfig,
    ];
    for expected_type in expected_order {
        let (record, fd) = recv_record(&stream).unwrap();
        assert_eq!(record.region_type, expected_type);
        assert!(record.contains_fd);
        assert_eq!(record.region_size, 64 * 1024, "every default region is 64 KiB");

        let fd = fd.expect("contains_fd was set");
        let region = Region::from_raw_fd(fd, record.region_size as usize).unwrap();
        assert_eq!(region.len(), 64 * 1024);

        // Only the global region installs a header before hand-off: the
        // control/feedback/shared-config regions are sized to leave no
        // header-sized slack, so their full mapped length stays a clean
        // power of two for the ring / a flat dictionary table+arena.
        if expected_type == RegionType::Global {
            let header = region.verify_header().unwrap();
            assert_eq!(header.signature, REGION_SIGNATURE);
        }
    }

    target.close();
}
