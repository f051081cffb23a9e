//! `/dev/mem` register window
//!
//! Maps the BCM283x peripheral block once at startup. Every register access
//! is a single volatile 32-bit load or store. Offsets go through
//! [`check_offset`]; a rejected access is logged and dropped, reads of it
//! return 0.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

use platform::register::check_offset;
use platform::{RegisterBlock, RegisterError};

/// Physical memory device.
pub const DEV_MEM: &str = "/dev/mem";

/// Hardware backend errors
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// The memory device could not be opened (usually missing root).
    #[error("cannot open {}", path.display())]
    Open {
        /// Device path.
        path: PathBuf,
        /// OS error.
        #[source]
        source: io::Error,
    },
    /// `mmap` refused the window.
    #[error("cannot map {len:#x} bytes at physical {base:#x}")]
    Map {
        /// Physical base address.
        base: u64,
        /// Window size.
        len: usize,
        /// OS error.
        #[source]
        source: io::Error,
    },
    /// The base address does not fit the platform's `off_t`.
    #[error("physical base {0:#x} is out of range")]
    BaseOutOfRange(u64),
}

struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is device memory that stays valid until `Drop`; all
// accesses are individual volatile loads and stores of aligned u32s, which
// the hardware serializes.
unsafe impl Send for Mapping {}
// SAFETY: see `Send`.
unsafe impl Sync for Mapping {}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe the live mapping created in `open`;
        // no reference into it outlives the last `Arc`.
        let rc = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
        if rc != 0 {
            tracing::warn!(error = %io::Error::last_os_error(), "munmap failed");
        } else {
            tracing::debug!(len = self.len, "peripheral window unmapped");
        }
    }
}

/// A shared, mapped peripheral window. Clones share one mapping, which is
/// unmapped when the last clone drops.
#[derive(Clone)]
pub struct DevMem {
    map: Arc<Mapping>,
}

impl core::fmt::Debug for DevMem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DevMem").field("len", &self.map.len).finish()
    }
}

impl DevMem {
    /// Map `len` bytes of physical memory at `base` through [`DEV_MEM`].
    pub fn open(base: u64, len: usize) -> Result<Self, HardwareError> {
        Self::open_path(Path::new(DEV_MEM), base, len)
    }

    /// Map through an explicit device path.
    pub fn open_path(path: &Path, base: u64, len: usize) -> Result<Self, HardwareError> {
        let offset = libc::off_t::try_from(base).map_err(|_| HardwareError::BaseOutOfRange(base))?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|source| HardwareError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        // SAFETY: a fresh shared mapping of an open descriptor; the kernel
        // validates the range and we check for MAP_FAILED below.
        let raw = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                offset,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(HardwareError::Map {
                base,
                len,
                source: io::Error::last_os_error(),
            });
        }
        let ptr = NonNull::new(raw.cast::<u8>()).ok_or_else(|| HardwareError::Map {
            base,
            len,
            source: io::Error::from(io::ErrorKind::InvalidData),
        })?;
        tracing::info!(base = %format_args!("{base:#x}"), len, "peripheral window mapped");
        Ok(Self {
            map: Arc::new(Mapping { ptr, len }),
        })
    }

    fn register(&self, offset: usize) -> Result<*mut u32, RegisterError> {
        if let Err(err) = check_offset(offset, self.map.len) {
            tracing::error!(%err, "register access dropped");
            return Err(err);
        }
        // SAFETY: offset + 4 <= len, so the result stays inside the mapping.
        Ok(unsafe { self.map.ptr.as_ptr().add(offset) }.cast::<u32>())
    }
}

impl RegisterBlock for DevMem {
    fn len(&self) -> usize {
        self.map.len
    }

    fn read(&self, offset: usize) -> u32 {
        match self.register(offset) {
            // SAFETY: `register` returned an aligned pointer inside the mapping.
            Ok(reg) => unsafe { reg.read_volatile() },
            Err(_) => 0,
        }
    }

    fn write(&self, offset: usize, value: u32) {
        if let Ok(reg) = self.register(offset) {
            // SAFETY: as in `read`.
            unsafe { reg.write_volatile(value) };
        }
    }
}
