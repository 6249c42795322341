//! Mapped shared-memory regions: creation, attach, and lifecycle.
//!
//! Three ways a [`Region`] comes into existence, mirroring spec §4.5's two
//! construction paths plus the descriptor-exchange case:
//! * anonymous, heap-or-mmap backed, used only within one process (tests,
//!   the "client creates its own copy before the agent shows up" fallback);
//! * named, backed by a file at a well-known path (server mode);
//! * from an inherited file descriptor, backed by the same `memfd`-style
//!   anonymous object the peer created (anonymous mode after FD exchange).

use crate::error::{RegionError, RegionResult};
use crate::header::{RegionHeader, REGION_HEADER_LEN};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

enum Backing {
    #[cfg(unix)]
    Mapped { map: memmap2::MmapMut, file: Option<File> },
    Heap(Vec<u8>),
}

impl Backing {
    fn as_ptr(&self) -> *const u8 {
        match self {
            #[cfg(unix)]
            Backing::Mapped { map, .. } => map.as_ptr(),
            Backing::Heap(v) => v.as_ptr(),
        }
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        match self {
            #[cfg(unix)]
            Backing::Mapped { map, .. } => map.as_mut_ptr(),
            Backing::Heap(v) => v.as_mut_ptr(),
        }
    }
}

/// Whether the caller created this mapping (and so may be responsible for
/// unlinking its named OS resources) or merely attached to one that already
/// existed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Created,
    Attached,
}

/// A mapped shared-memory region plus enough bookkeeping to clean up the
/// backing OS resource exactly once.
///
/// `Region` is move-only: copying a mapping would silently double-own the
/// cleanup responsibility, which spec §4.1 forbids ("copying is forbidden").
pub struct Region {
    backing: Backing,
    len: usize,
    origin: Origin,
    named_path: Option<PathBuf>,
}

impl Region {
    /// Creates a fresh, zeroed anonymous region not shared with any other
    /// process by construction (no fd to hand out). Used for in-process
    /// tests and as the "create our own copy" fallback in anonymous mode
    /// before a shareable mapping is needed.
    pub fn create_anonymous(size: usize) -> RegionResult<Self> {
        #[cfg(unix)]
        {
            let mut map = memmap2::MmapOptions::new()
                .len(size)
                .map_anon()
                .map_err(RegionError::os)?;
            map.fill(0);
            return Ok(Self {
                backing: Backing::Mapped { map, file: None },
                len: size,
                origin: Origin::Created,
                named_path: None,
            });
        }
        #[cfg(not(unix))]
        {
            Ok(Self {
                backing: Backing::Heap(vec![0u8; size]),
                len: size,
                origin: Origin::Created,
                named_path: None,
            })
        }
    }

    /// Creates an anonymous region backed by a `memfd`-style file so its
    /// descriptor can be handed to a peer over a Unix-domain socket
    /// (spec §4.5, §6 FD-exchange wire record).
    #[cfg(unix)]
    pub fn create_anonymous_shareable(size: usize, debug_name: &str) -> RegionResult<Self> {
        let fd = create_memfd(debug_name).map_err(RegionError::os)?;
        let file = unsafe { File::from_raw_fd(fd) };
        file.set_len(size as u64).map_err(RegionError::os)?;
        let mut map = unsafe {
            memmap2::MmapOptions::new()
                .len(size)
                .map_mut(&file)
                .map_err(RegionError::os)?
        };
        map.fill(0);
        Ok(Self {
            backing: Backing::Mapped {
                map,
                file: Some(file),
            },
            len: size,
            origin: Origin::Created,
            named_path: None,
        })
    }

    /// Returns the raw descriptor backing this region, if it has one that
    /// can be duplicated and sent to a peer (see `shmc-context`'s FD
    /// exchange).
    #[cfg(unix)]
    pub fn as_raw_fd(&self) -> Option<RawFd> {
        match &self.backing {
            Backing::Mapped { file: Some(f), .. } => Some(f.as_raw_fd()),
            _ => None,
        }
    }

    /// Attaches to a region living behind an inherited anonymous file
    /// descriptor (the receiving side of an FD exchange). The descriptor is
    /// consumed.
    #[cfg(unix)]
    pub fn from_raw_fd(fd: OwnedFd, size: usize) -> RegionResult<Self> {
        let file = File::from(fd);
        let mut map = unsafe {
            memmap2::MmapOptions::new()
                .len(size)
                .map_mut(&file)
                .map_err(RegionError::os)?
        };
        // The peer already initialised this region; only zero it if empty.
        if map.iter().all(|b| *b == 0) {
            map.fill(0);
        }
        Ok(Self {
            backing: Backing::Mapped {
                map,
                file: Some(file),
            },
            len: size,
            origin: Origin::Attached,
            named_path: None,
        })
    }

    /// Creates a fresh, zeroed region at a named path (server mode).
    #[cfg(unix)]
    pub fn create_named(path: impl AsRef<Path>, size: usize) -> RegionResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(RegionError::os)?;
        file.set_len(size as u64).map_err(RegionError::os)?;
        let mut map = unsafe {
            memmap2::MmapOptions::new()
                .len(size)
                .map_mut(&file)
                .map_err(RegionError::os)?
        };
        map.fill(0);
        Ok(Self {
            backing: Backing::Mapped {
                map,
                file: Some(file),
            },
            len: size,
            origin: Origin::Created,
            named_path: Some(path.to_path_buf()),
        })
    }

    /// Attaches to an existing region at a named path (client mode).
    ///
    /// Verifies the attaching user owns the backing file, per spec §7's
    /// `AccessDenied` error kind.
    #[cfg(unix)]
    pub fn attach_named(path: impl AsRef<Path>) -> RegionResult<Self> {
        use std::os::unix::fs::MetadataExt;

        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(RegionError::os)?;
        let metadata = file.metadata().map_err(RegionError::os)?;

        // SAFETY: geteuid has no preconditions.
        let euid = unsafe { libc::geteuid() };
        if metadata.uid() != euid {
            return Err(RegionError::AccessDenied);
        }

        let size = metadata.len() as usize;
        let map = unsafe {
            memmap2::MmapOptions::new()
                .len(size)
                .map_mut(&file)
                .map_err(RegionError::os)?
        };
        Ok(Self {
            backing: Backing::Mapped {
                map,
                file: Some(file),
            },
            len: size,
            origin: Origin::Attached,
            named_path: Some(path.to_path_buf()),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the backing allocation covers exactly `len` bytes for the
        // lifetime of `self`.
        unsafe { std::slice::from_raw_parts(self.backing.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `Region` uniquely owns its backing allocation.
        unsafe { std::slice::from_raw_parts_mut(self.backing.as_mut_ptr(), self.len) }
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.backing.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.backing.as_mut_ptr()
    }

    /// Writes a fresh [`RegionHeader`] into the first 16 bytes of the region.
    pub fn install_header(&mut self, codegen_type_id: u32, region_id: u32) {
        let len = self.len as u32;
        let header = RegionHeader {
            signature: crate::header::REGION_SIGNATURE,
            region_size: len,
            codegen_type_id,
            region_id,
        };
        header.write_le(&mut self.as_mut_slice()[..REGION_HEADER_LEN]);
    }

    /// Verifies the region's header signature and that its declared size
    /// matches the observed mapping size (spec §3 region-header invariant).
    pub fn verify_header(&self) -> RegionResult<RegionHeader> {
        let header = RegionHeader::read_le(self.as_slice())
            .expect("region shorter than header, caller misconfigured sizes");
        if header.signature != crate::header::REGION_SIGNATURE {
            return Err(RegionError::BadSignature {
                expected: crate::header::REGION_SIGNATURE,
                found: header.signature,
            });
        }
        if header.region_size as usize != self.len {
            return Err(RegionError::SizeMismatch {
                declared: header.region_size,
                observed: self.len as u32,
            });
        }
        Ok(header)
    }

    /// Reinterprets the header's `codegen_type_id`, failing if it does not
    /// match `expected_type_id`.
    pub fn typed_view(&self, expected_type_id: u32) -> RegionResult<RegionHeader> {
        let header = self.verify_header()?;
        if header.codegen_type_id != expected_type_id {
            return Err(RegionError::TypeMismatch {
                expected: expected_type_id,
                found: header.codegen_type_id,
            });
        }
        Ok(header)
    }

    /// Unmaps the region. If `cleanup_on_close` is set and this handle
    /// created the backing named resource, unlinks it too.
    pub fn close(self, cleanup_on_close: bool) {
        if cleanup_on_close && self.origin == Origin::Created {
            if let Some(path) = &self.named_path {
                let _ = std::fs::remove_file(path);
                tracing::debug!(path = %path.display(), "unlinked named region");
            }
        }
        // Drop unmaps/deallocates.
    }
}

#[cfg(unix)]
fn create_memfd(debug_name: &str) -> std::io::Result<RawFd> {
    use std::ffi::CString;

    let name = CString::new(debug_name).unwrap_or_else(|_| CString::new("shmc-region").unwrap());
    // SAFETY: `name` is a valid NUL-terminated C string; flags request a
    // plain anonymous sealed-capable memfd. We check the returned fd for -1.
    let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(fd)
}

#[cfg(unix)]
impl IntoRawFd for Region {
    fn into_raw_fd(self) -> RawFd {
        match self.backing {
            Backing::Mapped { file: Some(f), .. } => f.into_raw_fd(),
            _ => panic!("region has no shareable file descriptor"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_region_is_zeroed_and_sized() {
        let region = Region::create_anonymous(4096).expect("create");
        assert_eq!(region.len(), 4096);
        assert!(region.as_slice().iter().all(|b| *b == 0));
    }

    #[test]
    fn header_roundtrip_through_region() {
        let mut region = Region::create_anonymous(65536).expect("create");
        region.install_header(7, 0x1000_0002);
        let header = region.typed_view(7).expect("type matches");
        assert_eq!(header.region_size, 65536);
        assert!(region.typed_view(8).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn named_region_roundtrips_through_a_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.shm");
        {
            let mut region = Region::create_named(&path, 65536).expect("create named");
            region.install_header(3, 0);
            region.close(false);
        }
        let region = Region::attach_named(&path).expect("attach named");
        assert_eq!(region.len(), 65536);
        region.typed_view(3).expect("type matches");
    }

    #[cfg(unix)]
    #[test]
    fn create_named_then_cleanup_unlinks_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region2.shm");
        let region = Region::create_named(&path, 4096).expect("create named");
        assert!(path.exists());
        region.close(true);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn shareable_anonymous_region_exposes_a_descriptor() {
        let region = Region::create_anonymous_shareable(4096, "test-region").expect("create");
        assert!(region.as_raw_fd().is_some());
    }
}
