//! Single-producer/single-consumer shared-memory ring buffer (spec §4.2).
//!
//! Layout: a fixed-size `N`-byte memory-mapped region. The first 16 bytes
//! are the header — `head` (8 bytes LE, consumer-owned) followed by `tail`
//! (8 bytes LE, producer-owned). The remaining `N - 16` bytes are the data
//! area, used as a logical ring of positions `0..data_len`.
//!
//! Framing is `[len: u32 LE][payload: len bytes]`. A record that would cross
//! the end of the data area is split: the bytes that fit are written at the
//! tail, the remainder wraps to the start of the data area; the reader
//! reassembles with the same rule. `head == tail` means empty; the buffer
//! always keeps at least one byte free so that state is never ambiguous
//! with "full".
//!
//! Exactly one writer and one reader are allowed per ring. The writer holds
//! a local mutex to serialize callers within this process; the reader does
//! not lock at all — cross-process ordering comes from the single-writer
//! discipline, not from the mutex.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::MmapMut;
use parking_lot::Mutex;
use thiserror::Error;

const HEADER_LEN: usize = 16;
const LEN_PREFIX: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    #[error("ring buffer full: required {required} bytes, {free} available")]
    Full { required: usize, free: usize },
    #[error("ring buffer empty")]
    Empty,
    #[error("ring buffer capacity too small: {0} bytes")]
    CapacityTooSmall(usize),
    #[error("io error: {0}")]
    Io(String),
}

/// A memory-mapped ring buffer backed by a file. Create one pair per
/// plugin (one per direction); the files — and this mapping — are scoped to
/// the plugin process's lifetime and unlinked on exit.
pub struct RingBuffer {
    mmap: MmapMut,
    data_len: usize,
    write_lock: Mutex<()>,
}

impl RingBuffer {
    /// Creates (or truncates) a file at `path` sized to `capacity` bytes and
    /// maps it. `capacity` must be larger than the header plus enough room
    /// for at least one zero-length record.
    pub fn create(path: &Path, capacity: usize) -> Result<Self, RingError> {
        if capacity <= HEADER_LEN + LEN_PREFIX {
            return Err(RingError::CapacityTooSmall(capacity));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| RingError::Io(e.to_string()))?;
        file.set_len(capacity as u64)
            .map_err(|e| RingError::Io(e.to_string()))?;
        Self::from_file(file, capacity)
    }

    /// Opens an existing ring file (the plugin side of the pair).
    pub fn open_existing(path: &Path) -> Result<Self, RingError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| RingError::Io(e.to_string()))?;
        let capacity = file
            .metadata()
            .map_err(|e| RingError::Io(e.to_string()))?
            .len() as usize;
        Self::from_file(file, capacity)
    }

    fn from_file(file: File, capacity: usize) -> Result<Self, RingError> {
        // SAFETY: the file is exclusively owned by this ring for its
        // lifetime (single-producer/single-consumer discipline enforced by
        // the caller); mapping it MAP_SHARED lets the hub and the plugin
        // process observe each other's writes.
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| RingError::Io(e.to_string()))?;
        Ok(Self {
            mmap,
            data_len: capacity - HEADER_LEN,
            write_lock: Mutex::new(()),
        })
    }

    fn head_atomic(&self) -> &AtomicU64 {
        // SAFETY: the mmap is at least HEADER_LEN bytes and 8-byte aligned
        // (page-aligned mappings always are); `head` occupies bytes [0, 8).
        unsafe { &*(self.mmap.as_ptr() as *const AtomicU64) }
    }

    fn tail_atomic(&self) -> &AtomicU64 {
        // SAFETY: same as `head_atomic`; `tail` occupies bytes [8, 16).
        unsafe { &*(self.mmap.as_ptr().add(8) as *const AtomicU64) }
    }

    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: casting away the immutable borrow is sound here because
        // all data-area access below goes through raw pointer writes/reads
        // guarded by the ring's single-writer/single-reader discipline, not
        // Rust's aliasing rules (the memory is shared with another process).
        unsafe { (self.mmap.as_ptr() as *mut u8).add(HEADER_LEN) }
    }

    fn occupied(&self, head: u64, tail: u64) -> usize {
        let data_len = self.data_len as u64;
        (((tail + data_len) - head) % data_len) as usize
    }

    /// Bytes available to a writer right now, i.e. `data_len - occupied`.
    /// A write of `required` bytes is rejected when `required >= free`,
    /// which guarantees at least one byte is always left unwritten and
    /// resolves the head==tail empty/full ambiguity.
    pub fn free(&self) -> usize {
        let head = self.head_atomic().load(Ordering::Acquire);
        let tail = self.tail_atomic().load(Ordering::Acquire);
        self.data_len - self.occupied(head, tail)
    }

    pub fn is_empty(&self) -> bool {
        self.head_atomic().load(Ordering::Acquire) == self.tail_atomic().load(Ordering::Acquire)
    }

    pub fn data_len(&self) -> usize {
        self.data_len
    }

    fn write_at(&self, pos: usize, bytes: &[u8]) -> usize {
        let data_len = self.data_len;
        let first_chunk = bytes.len().min(data_len - pos);
        let ptr = self.data_ptr();
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(pos), first_chunk);
            if first_chunk < bytes.len() {
                std::ptr::copy_nonoverlapping(
                    bytes.as_ptr().add(first_chunk),
                    ptr,
                    bytes.len() - first_chunk,
                );
            }
        }
        (pos + bytes.len()) % data_len
    }

    fn read_at(&self, pos: usize, out: &mut [u8]) -> usize {
        let data_len = self.data_len;
        let first_chunk = out.len().min(data_len - pos);
        let ptr = self.data_ptr();
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.add(pos), out.as_mut_ptr(), first_chunk);
            if first_chunk < out.len() {
                std::ptr::copy_nonoverlapping(
                    ptr,
                    out.as_mut_ptr().add(first_chunk),
                    out.len() - first_chunk,
                );
            }
        }
        (pos + out.len()) % data_len
    }

    /// Writes one framed record. Rejects writes that would not leave at
    /// least one byte free. Producer-only; serialized with an internal
    /// mutex so multiple threads in this process can share one `RingBuffer`
    /// handle safely, though the spec's single-writer discipline still
    /// assumes one logical producer across processes.
    pub fn write(&self, payload: &[u8]) -> Result<(), RingError> {
        let _guard = self.write_lock.lock();
        let required = LEN_PREFIX + payload.len();
        let head = self.head_atomic().load(Ordering::Acquire);
        let tail = self.tail_atomic().load(Ordering::Acquire);
        let free = self.data_len - self.occupied(head, tail);
        if required >= free {
            return Err(RingError::Full { required, free });
        }
        let pos = self.write_at(tail as usize, &(payload.len() as u32).to_le_bytes());
        let pos = self.write_at(pos, payload);
        self.tail_atomic().store(pos as u64, Ordering::Release);
        Ok(())
    }

    /// Reads one framed record, or `Err(RingError::Empty)` if `head == tail`.
    /// Consumer-only, lock-free.
    pub fn read(&self) -> Result<Vec<u8>, RingError> {
        let head = self.head_atomic().load(Ordering::Acquire);
        let tail = self.tail_atomic().load(Ordering::Acquire);
        if head == tail {
            return Err(RingError::Empty);
        }
        let mut len_bytes = [0u8; LEN_PREFIX];
        let pos = self.read_at(head as usize, &mut len_bytes);
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut payload = vec![0u8; len];
        let pos = self.read_at(pos, &mut payload);
        self.head_atomic().store(pos as u64, Ordering::Release);
        Ok(payload)
    }

    /// Drains every record currently available without re-checking the
    /// notifier in between, matching the consumer loop described in spec
    /// §4.2 ("drains all available records until the ring is observed
    /// empty, then re-waits").
    pub fn drain(&self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Ok(record) = self.read() {
            out.push(record);
        }
        out
    }
}

// SAFETY: `RingBuffer` only exposes synchronized access (atomics for the
// header, an internal mutex for writers); the underlying `MmapMut` is valid
// to share across threads for the lifetime of the mapping.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_ring(capacity: usize) -> (tempfile::TempDir, RingBuffer) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ring.bin");
        let ring = RingBuffer::create(&path, capacity).unwrap();
        (dir, ring)
    }

    #[test]
    fn empty_iff_head_equals_tail() {
        let (_dir, ring) = new_ring(256);
        assert!(ring.is_empty());
        ring.write(b"hello").unwrap();
        assert!(!ring.is_empty());
        ring.read().unwrap();
        assert!(ring.is_empty());
    }

    #[test]
    fn round_trip_is_byte_identical_and_fifo() {
        let (_dir, ring) = new_ring(512);
        let records: Vec<Vec<u8>> = (0..20).map(|i| vec![i as u8; i + 1]).collect();
        for record in &records {
            ring.write(record).unwrap();
        }
        for expected in &records {
            let got = ring.read().unwrap();
            assert_eq!(&got, expected);
        }
        assert_eq!(ring.read(), Err(RingError::Empty));
    }

    #[test]
    fn full_ring_reports_required_gte_free_to_writers() {
        let (_dir, ring) = new_ring(16 + 32); // data_len = 32
        let data_len = ring.data_len();
        // Fill to the boundary: largest payload that still leaves 1 byte free.
        let max_payload = data_len - 4 - 1;
        ring.write(&vec![7u8; max_payload]).unwrap();
        assert_eq!(ring.free(), 1);
        // One more byte of payload should now be rejected.
        let err = ring.write(&[1]).unwrap_err();
        assert!(matches!(err, RingError::Full { .. }));
    }

    #[test]
    fn wrap_around_split_record_reassembles_correctly() {
        let (_dir, ring) = new_ring(16 + 32);
        // Push the tail near the end of the data area, then drain, then
        // write a record that must wrap.
        ring.write(&vec![1u8; 20]).unwrap();
        ring.read().unwrap();
        let wrapping_payload = vec![9u8; 18];
        ring.write(&wrapping_payload).unwrap();
        assert_eq!(ring.read().unwrap(), wrapping_payload);
    }

    #[test]
    fn random_length_round_trip_matches_byte_for_byte() {
        use proptest::prelude::*;
        let (_dir, ring) = new_ring(16 + 4096);
        proptest!(ProptestConfig::with_cases(64), |(payload in proptest::collection::vec(any::<u8>(), 1..2048))| {
            // Drain anything left from a prior case so capacity doesn't creep.
            let _ = ring.drain();
            ring.write(&payload).unwrap();
            let got = ring.read().unwrap();
            prop_assert_eq!(got, payload);
        });
    }
}
