//! The backing pool: a memory-mapped file with an integrity-checked
//! header page and two page-aligned slot regions.
//!
//! The header's `active_region` field is the persistent root: it names the
//! region holding the authoritative slot array. Recovery installs its
//! output into the *inactive* region and flips the root afterwards, so a
//! crash between any two flushes leaves either the old array (replayed on
//! the next open) or the new one (recovery is idempotent on its own
//! output) — never a half-written root.

use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use memmap2::MmapMut;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::core::ring::CACHE_LINE;

/// Pool allocation granularity. The header occupies exactly one page and
/// each slot region starts on a page boundary, so slot alignment never
/// depends on what the mapping happens to give us.
pub const PAGE_SIZE: usize = 4096;

const MAGIC: [u8; 8] = *b"TRNSTILE";
const VERSION: u32 = 1;

/// On-media header, stored at offset 0 of the pool file.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
struct PoolHeader {
    magic: [u8; 8],
    version: u32,
    _reserved: u32,
    /// Usable slots; each region stores `capacity + 1` (one sentinel).
    capacity: u64,
    elem_size: u64,
    elem_align: u64,
    slot_stride: u64,
    region_len: u64,
    /// Root: which region (0 or 1) holds the authoritative slot array.
    active_region: u64,
    /// Bumped on every root flip.
    generation: u64,
    /// BLAKE3 of the pool file's basename; the layout is owned by its name.
    layout_tag: [u8; 32],
    /// BLAKE3 of this header with the checksum field zeroed.
    checksum: [u8; 32],
}

const HEADER_LEN: usize = core::mem::size_of::<PoolHeader>();

const _: () = {
    assert!(core::mem::size_of::<PoolHeader>() <= PAGE_SIZE);
};

impl PoolHeader {
    fn compute_checksum(&self) -> [u8; 32] {
        let mut copy = *self;
        copy.checksum = [0u8; 32];
        *blake3::hash(copy.as_bytes()).as_bytes()
    }
}

fn layout_tag_for(path: &Path) -> [u8; 32] {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    *blake3::hash(name.as_bytes()).as_bytes()
}

fn round_up(n: usize, multiple: usize) -> usize {
    n.div_ceil(multiple) * multiple
}

/// Slot geometry the pool is created with and validated against on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolGeometry {
    /// Usable slots.
    pub capacity: u64,
    /// Element image size in bytes.
    pub elem_size: u64,
    /// Element alignment in bytes.
    pub elem_align: u64,
    /// Distance between consecutive slots; a cache-line multiple.
    pub slot_stride: u64,
}

/// Pool operations that can fail.
#[derive(Debug)]
pub enum PoolError {
    /// Underlying file or mapping operation failed.
    Io(io::Error),
    /// The pool failed its integrity check. Fatal: no recovery is
    /// attempted on a pool we cannot trust.
    Corrupt(&'static str),
    /// The pool geometry does not match what the caller asked for.
    Layout(&'static str),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Io(err) => write!(f, "pool i/o error: {err}"),
            PoolError::Corrupt(reason) => write!(f, "pool is corrupt: {reason}"),
            PoolError::Layout(reason) => write!(f, "pool layout mismatch: {reason}"),
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PoolError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for PoolError {
    fn from(err: io::Error) -> Self {
        PoolError::Io(err)
    }
}

/// An exclusive, integrity-checked mapping of a pool file.
///
/// The file lock is held for the pool's lifetime: a pool has a single
/// owner at a time, and reopening is how ownership moves.
#[derive(Debug)]
pub struct Pool {
    path: PathBuf,
    file: std::fs::File,
    mmap: MmapMut,
    header: PoolHeader,
}

impl Pool {
    /// Create a fresh pool file with the given geometry. Both regions
    /// start zeroed, which is exactly the all-empty lap-0 slot state.
    pub fn create<P: AsRef<Path>>(path: P, geometry: PoolGeometry) -> Result<Self, PoolError> {
        let path = path.as_ref().to_path_buf();
        if geometry.capacity < 1 {
            return Err(PoolError::Layout("capacity must be at least 1"));
        }
        if geometry.slot_stride % CACHE_LINE as u64 != 0 || geometry.slot_stride == 0 {
            return Err(PoolError::Layout("slot stride must be a cache-line multiple"));
        }

        let slots_len = geometry
            .capacity
            .checked_add(1)
            .and_then(|n| n.checked_mul(geometry.slot_stride))
            .filter(|&n| n <= isize::MAX as u64 / 4)
            .ok_or(PoolError::Layout("pool geometry too large"))?;
        let region_len = round_up(slots_len as usize, PAGE_SIZE);
        let file_len = PAGE_SIZE + 2 * region_len;

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.try_lock_exclusive()?;
        file.set_len(file_len as u64)?;

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        let mut header = PoolHeader {
            magic: MAGIC,
            version: VERSION,
            _reserved: 0,
            capacity: geometry.capacity,
            elem_size: geometry.elem_size,
            elem_align: geometry.elem_align,
            slot_stride: geometry.slot_stride,
            region_len: region_len as u64,
            active_region: 0,
            generation: 0,
            layout_tag: layout_tag_for(&path),
            checksum: [0u8; 32],
        };
        header.checksum = header.compute_checksum();
        mmap[..HEADER_LEN].copy_from_slice(header.as_bytes());

        let pool = Self {
            path,
            file,
            mmap,
            header,
        };
        pool.persist(0, PAGE_SIZE)?;
        log::debug!(
            "created pool {:?}: capacity={} stride={} region_len={}",
            pool.path,
            geometry.capacity,
            geometry.slot_stride,
            region_len
        );
        Ok(pool)
    }

    /// Open and integrity-check an existing pool file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PoolError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        file.try_lock_exclusive()?;
        let file_len = file.metadata()?.len();
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        if mmap.len() < HEADER_LEN {
            return Err(PoolError::Corrupt("file shorter than header"));
        }
        let header = PoolHeader::read_from_bytes(&mmap[..HEADER_LEN])
            .map_err(|_| PoolError::Corrupt("unreadable header"))?;

        if header.magic != MAGIC {
            return Err(PoolError::Corrupt("bad magic"));
        }
        if header.version != VERSION {
            return Err(PoolError::Corrupt("unsupported version"));
        }
        if header.checksum != header.compute_checksum() {
            return Err(PoolError::Corrupt("header checksum mismatch"));
        }
        if header.layout_tag != layout_tag_for(&path) {
            return Err(PoolError::Corrupt("layout tag does not match pool name"));
        }
        if header.capacity < 1 {
            return Err(PoolError::Corrupt("zero capacity"));
        }
        if header.slot_stride == 0 || header.slot_stride % CACHE_LINE as u64 != 0 {
            return Err(PoolError::Corrupt("slot stride is not a cache-line multiple"));
        }
        if header.active_region > 1 {
            return Err(PoolError::Corrupt("root names a region that does not exist"));
        }
        let slots_len = header
            .capacity
            .checked_add(1)
            .and_then(|n| n.checked_mul(header.slot_stride))
            .ok_or(PoolError::Corrupt("region length inconsistent with geometry"))?;
        if header.region_len % PAGE_SIZE as u64 != 0
            || header.region_len < slots_len
            || header.region_len > isize::MAX as u64 / 4
        {
            return Err(PoolError::Corrupt("region length inconsistent with geometry"));
        }
        if file_len != PAGE_SIZE as u64 + 2 * header.region_len {
            return Err(PoolError::Corrupt("file size inconsistent with header"));
        }

        log::debug!(
            "opened pool {:?}: capacity={} active_region={} generation={}",
            path,
            header.capacity,
            header.active_region,
            header.generation
        );
        Ok(Self {
            path,
            file,
            mmap,
            header,
        })
    }

    /// Usable slots per region.
    pub fn capacity(&self) -> u64 {
        self.header.capacity
    }

    /// Element image size the pool was created for.
    pub fn elem_size(&self) -> u64 {
        self.header.elem_size
    }

    /// Element alignment the pool was created for.
    pub fn elem_align(&self) -> u64 {
        self.header.elem_align
    }

    /// Distance between consecutive slots.
    pub fn slot_stride(&self) -> u64 {
        self.header.slot_stride
    }

    /// Which region currently holds the authoritative slot array.
    pub fn active_region(&self) -> u64 {
        self.header.active_region
    }

    /// Root flip count.
    pub fn generation(&self) -> u64 {
        self.header.generation
    }

    pub(crate) fn region_len(&self) -> usize {
        self.header.region_len as usize
    }

    pub(crate) fn region_offset(&self, region: u64) -> usize {
        PAGE_SIZE + region as usize * self.region_len()
    }

    pub(crate) fn region(&self, region: u64) -> &[u8] {
        let start = self.region_offset(region);
        &self.mmap[start..start + self.region_len()]
    }

    pub(crate) fn region_mut(&mut self, region: u64) -> &mut [u8] {
        let start = self.region_offset(region);
        let len = self.region_len();
        &mut self.mmap[start..start + len]
    }

    pub(crate) fn base_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    /// Flush `[offset, offset + len)` to the persistence domain.
    ///
    /// Offsets are rounded out to page boundaries here rather than assumed
    /// pre-aligned, so callers may persist at slot granularity.
    pub fn persist(&self, offset: usize, len: usize) -> Result<(), PoolError> {
        let start = (offset & !(PAGE_SIZE - 1)).min(self.mmap.len());
        let end = round_up(offset.saturating_add(len), PAGE_SIZE).min(self.mmap.len());
        if start >= end {
            return Ok(());
        }
        self.mmap.flush_range(start, end - start)?;
        Ok(())
    }

    /// Flip the root to `region` and persist the header. The new region's
    /// contents must already be durable.
    pub(crate) fn set_active_region(&mut self, region: u64) -> Result<(), PoolError> {
        debug_assert!(region <= 1);
        self.header.active_region = region;
        self.header.generation += 1;
        self.header.checksum = self.header.compute_checksum();
        self.mmap[..HEADER_LEN].copy_from_slice(self.header.as_bytes());
        self.persist(0, PAGE_SIZE)
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        // Best effort: leave everything we can on media, then let the lock
        // go with the file handle.
        let _ = self.mmap.flush();
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
