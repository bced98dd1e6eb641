// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Jonas Keller

//! Lock-free SPSC byte ring over a shared region.
//!
//! The control block is two atomic words at the head of the region: the
//! write index (owned by the producer) and the read index (owned by the
//! consumer), each a packed [`CycleIndex`]. Data follows immediately after.
//! Neither side ever takes a lock or makes a syscall: each side stores only
//! its own word (Release) and loads only the peer's (Acquire), so payload
//! bytes are visible to the peer before the index that exposes them.
//!
//! Exactly one producer and one consumer may operate on a channel at a time;
//! the role types make that a compile-time property rather than a convention.

use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::RingError;
use crate::index::{CycleIndex, HEADER_SIZE, MIN_REGION_SIZE, WORD_SIZE};
use crate::region::SharedMemoryRegion;

/// Non-owning view of a ring buffer living in a shared region.
///
/// Holds the local mapping's base address and the derived capacity, nothing
/// else: the index words and data area sit at fixed offsets from the base,
/// so a peer mapping the same region at a different virtual address derives
/// the same layout independently. The borrow ties the view's lifetime to the
/// mapping's.
pub struct RingBuffer<'a> {
    base: *mut u8,
    capacity: usize,
    _region: PhantomData<&'a SharedMemoryRegion>,
}

// SAFETY: the view is just a base pointer plus a length; all shared state
// behind it is accessed through atomics or as role-exclusive payload bytes.
unsafe impl Send for RingBuffer<'_> {}

impl<'a> RingBuffer<'a> {
    /// First-use construction: validate the region, zero both index words,
    /// return the descriptor.
    ///
    /// Exactly one side calls this, once, before any traffic. Everybody
    /// else - including the creating process when it re-maps - uses
    /// [`RingBuffer::attach`], which never touches the index words.
    pub fn create(region: &'a SharedMemoryRegion) -> Result<Self, RingError> {
        let ring = Self::over(region)?;
        ring.write_word().store(CycleIndex::ZERO.word(), Ordering::Release);
        ring.read_word().store(CycleIndex::ZERO.word(), Ordering::Release);
        Ok(ring)
    }

    /// Attach to an existing control block without modifying it.
    ///
    /// Both index words must decode against the locally computed capacity;
    /// a word that does not is what a control block initialized with a
    /// foreign word width (or scrambled memory) looks like, and the attach
    /// is refused rather than handing out a descriptor that would
    /// misinterpret the peer's indices.
    pub fn attach(region: &'a SharedMemoryRegion) -> Result<Self, RingError> {
        let ring = Self::over(region)?;
        let write_word = ring.write_word().load(Ordering::Acquire);
        let read_word = ring.read_word().load(Ordering::Acquire);
        if CycleIndex::decode(write_word, ring.capacity).is_none()
            || CycleIndex::decode(read_word, ring.capacity).is_none()
        {
            tracing::error!(
                write_word,
                read_word,
                capacity = ring.capacity,
                "attach rejected: control block does not decode"
            );
            return Err(RingError::IncompatibleControlBlock {
                word_bits: usize::BITS,
                write_word,
                read_word,
                capacity: ring.capacity,
            });
        }
        Ok(ring)
    }

    fn over(region: &'a SharedMemoryRegion) -> Result<Self, RingError> {
        let size = region.size();
        if size < MIN_REGION_SIZE {
            return Err(RingError::RegionTooSmall {
                size,
                min: MIN_REGION_SIZE,
            });
        }
        Ok(Self {
            base: region.as_ptr(),
            capacity: size - HEADER_SIZE,
            _region: PhantomData,
        })
    }

    /// Size of the data area in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Non-destructive health check: do both index words currently decode?
    pub fn is_valid(&self) -> bool {
        CycleIndex::decode(self.write_word().load(Ordering::Acquire), self.capacity).is_some()
            && CycleIndex::decode(self.read_word().load(Ordering::Acquire), self.capacity).is_some()
    }

    /// Take the producer role. Consumes the view; the write index word now
    /// has exactly one owner in this context.
    pub fn into_producer(self) -> Producer<'a> {
        Producer {
            ring: self,
            poisoned: false,
        }
    }

    /// Take the consumer role.
    pub fn into_consumer(self) -> Consumer<'a> {
        Consumer {
            ring: self,
            poisoned: false,
        }
    }

    fn write_word(&self) -> &AtomicUsize {
        // SAFETY: the region is at least MIN_REGION_SIZE bytes and mmap
        // returns page-aligned memory, so the first word is in bounds and
        // aligned.
        unsafe { &*(self.base as *const AtomicUsize) }
    }

    fn read_word(&self) -> &AtomicUsize {
        // SAFETY: as for write_word, one word further in.
        unsafe { &*(self.base.add(WORD_SIZE) as *const AtomicUsize) }
    }

    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: HEADER_SIZE is within the validated region bounds.
        unsafe { self.base.add(HEADER_SIZE) }
    }
}

/// Write half of the channel. The only owner of the write index word.
pub struct Producer<'a> {
    ring: RingBuffer<'a>,
    poisoned: bool,
}

// SAFETY: moving the producer moves the write role wholesale; there is never
// a second writer of its index word.
unsafe impl Send for Producer<'_> {}

impl Producer<'_> {
    /// Copy as much of `src` as currently fits, returning the byte count.
    ///
    /// Never blocks. `Ok(0)` means the buffer is full (or `src` is empty) -
    /// a flow-control signal, not an error. The copy is split in two when
    /// the span crosses the end of the data area, and the new write index is
    /// published with a Release store only after both copies are done.
    pub fn write(&mut self, src: &[u8]) -> Result<usize, RingError> {
        if self.poisoned {
            return Err(RingError::Poisoned);
        }
        if src.is_empty() {
            return Ok(0);
        }
        let capacity = self.ring.capacity;

        // Peer snapshot first; Acquire pairs with the consumer's Release
        // publish so freed space is only counted once its reads retired.
        let read_snapshot = self.ring.read_word().load(Ordering::Acquire);
        let read = self.decode_word(read_snapshot, "read")?;
        // Own word: nobody else writes it, a plain load suffices.
        let write_snapshot = self.ring.write_word().load(Ordering::Relaxed);
        let write = self.decode_word(write_snapshot, "write")?;

        let free = capacity - CycleIndex::used(write, read, capacity);
        if free == 0 {
            return Ok(0);
        }

        let n = src.len().min(free);
        let offset = write.offset();
        let first = n.min(capacity - offset);
        // SAFETY: offset < capacity (decoded invariant) and n <= free, so
        // both chunks stay inside the data area and inside free space the
        // consumer is not reading.
        unsafe {
            let data = self.ring.data_ptr();
            ptr::copy_nonoverlapping(src.as_ptr(), data.add(offset), first);
            if first < n {
                ptr::copy_nonoverlapping(src.as_ptr().add(first), data, n - first);
            }
        }

        // Publish last; Release pairs with the consumer's Acquire.
        let next = write.advance(n, capacity);
        self.ring.write_word().store(next.word(), Ordering::Release);
        Ok(n)
    }

    /// Size of the data area in bytes.
    pub fn capacity(&self) -> usize {
        self.ring.capacity
    }

    /// False once index corruption has been observed on this handle.
    pub fn is_valid(&self) -> bool {
        !self.poisoned
    }

    fn decode_word(&mut self, word: usize, which: &'static str) -> Result<CycleIndex, RingError> {
        match CycleIndex::decode(word, self.ring.capacity) {
            Some(index) => Ok(index),
            None => {
                self.poisoned = true;
                Err(RingError::IndexCorrupted {
                    which,
                    offset: CycleIndex::raw_offset(word),
                    capacity: self.ring.capacity,
                })
            }
        }
    }

    #[cfg(test)]
    fn index(&self) -> CycleIndex {
        CycleIndex::decode(
            self.ring.write_word().load(Ordering::Relaxed),
            self.ring.capacity,
        )
        .unwrap()
    }
}

/// Read half of the channel. The only owner of the read index word.
pub struct Consumer<'a> {
    ring: RingBuffer<'a>,
    poisoned: bool,
}

// SAFETY: as for Producer, with the read role.
unsafe impl Send for Consumer<'_> {}

impl Consumer<'_> {
    /// Copy up to `dst.len()` readable bytes into `dst`, returning the count.
    ///
    /// Mirror of [`Producer::write`]: `Ok(0)` means empty, the copy splits
    /// at the end of the data area, and the new read index is published with
    /// a Release store after the bytes have been copied out (the store is
    /// what allows the producer to overwrite them).
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize, RingError> {
        if self.poisoned {
            return Err(RingError::Poisoned);
        }
        if dst.is_empty() {
            return Ok(0);
        }
        let capacity = self.ring.capacity;

        // Acquire pairs with the producer's Release publish: any index we
        // observe here guarantees the payload bytes behind it are visible.
        let write_snapshot = self.ring.write_word().load(Ordering::Acquire);
        let write = self.decode_word(write_snapshot, "write")?;
        let read_snapshot = self.ring.read_word().load(Ordering::Relaxed);
        let read = self.decode_word(read_snapshot, "read")?;

        let used = CycleIndex::used(write, read, capacity);
        if used == 0 {
            return Ok(0);
        }

        let n = dst.len().min(used);
        let offset = read.offset();
        let first = n.min(capacity - offset);
        // SAFETY: offset < capacity and n <= used, so both chunks read bytes
        // the producer has already published and stopped touching.
        unsafe {
            let data = self.ring.data_ptr();
            ptr::copy_nonoverlapping(data.add(offset), dst.as_mut_ptr(), first);
            if first < n {
                ptr::copy_nonoverlapping(data, dst.as_mut_ptr().add(first), n - first);
            }
        }

        let next = read.advance(n, capacity);
        self.ring.read_word().store(next.word(), Ordering::Release);
        Ok(n)
    }

    /// Size of the data area in bytes.
    pub fn capacity(&self) -> usize {
        self.ring.capacity
    }

    /// False once index corruption has been observed on this handle.
    pub fn is_valid(&self) -> bool {
        !self.poisoned
    }

    fn decode_word(&mut self, word: usize, which: &'static str) -> Result<CycleIndex, RingError> {
        match CycleIndex::decode(word, self.ring.capacity) {
            Some(index) => Ok(index),
            None => {
                self.poisoned = true;
                Err(RingError::IndexCorrupted {
                    which,
                    offset: CycleIndex::raw_offset(word),
                    capacity: self.ring.capacity,
                })
            }
        }
    }

    #[cfg(test)]
    fn index(&self) -> CycleIndex {
        CycleIndex::decode(
            self.ring.read_word().load(Ordering::Relaxed),
            self.ring.capacity,
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MIN_CAPACITY;

    /// Region sized for an exact data-area capacity.
    fn region_with_capacity(capacity: usize) -> SharedMemoryRegion {
        SharedMemoryRegion::anonymous(HEADER_SIZE + capacity).expect("anonymous region")
    }

    /// Producer over a fresh control block plus a consumer attached to it.
    fn channel(region: &SharedMemoryRegion) -> (Producer<'_>, Consumer<'_>) {
        let producer = RingBuffer::create(region).expect("create").into_producer();
        let consumer = RingBuffer::attach(region).expect("attach").into_consumer();
        (producer, consumer)
    }

    #[test]
    fn test_create_rejects_undersized_region() {
        let region = SharedMemoryRegion::anonymous(MIN_REGION_SIZE - 1).expect("region");
        assert!(matches!(
            RingBuffer::create(&region),
            Err(RingError::RegionTooSmall { .. })
        ));
        assert!(matches!(
            RingBuffer::attach(&region),
            Err(RingError::RegionTooSmall { .. })
        ));
    }

    #[test]
    fn test_minimum_region_is_accepted() {
        let region = SharedMemoryRegion::anonymous(MIN_REGION_SIZE).expect("region");
        let ring = RingBuffer::create(&region).expect("create");
        assert_eq!(ring.capacity(), MIN_CAPACITY);
        assert!(ring.is_valid());
    }

    #[test]
    fn test_attach_rejects_foreign_control_block() {
        let region = region_with_capacity(64);
        // Scribble an offset far beyond the capacity into the write word, as
        // a control block written with a different word width would present.
        region_word(&region, 0).store(usize::MAX >> 1, Ordering::Release);
        assert!(matches!(
            RingBuffer::attach(&region),
            Err(RingError::IncompatibleControlBlock { .. })
        ));
    }

    fn region_word(region: &SharedMemoryRegion, word: usize) -> &AtomicUsize {
        // SAFETY: test regions are at least two words long and page-aligned.
        unsafe { &*(region.as_ptr().add(word * WORD_SIZE) as *const AtomicUsize) }
    }

    #[test]
    fn test_fifo_roundtrip() {
        let region = region_with_capacity(64);
        let (mut tx, mut rx) = channel(&region);

        assert_eq!(tx.write(b"hello").unwrap(), 5);
        assert_eq!(tx.write(b" world").unwrap(), 6);

        let mut buf = [0u8; 64];
        let n = rx.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello world");
    }

    #[test]
    fn test_empty_detection() {
        let region = region_with_capacity(64);
        let (mut tx, mut rx) = channel(&region);

        let mut buf = [0u8; 16];
        assert_eq!(rx.read(&mut buf).unwrap(), 0);

        tx.write(b"x").unwrap();
        assert_eq!(rx.read(&mut buf).unwrap(), 1);
        // Drained again.
        assert_eq!(rx.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_full_detection() {
        let region = region_with_capacity(8);
        let (mut tx, mut rx) = channel(&region);

        assert_eq!(tx.write(b"ABCDEFGH").unwrap(), 8);
        // Full: same offset, differing cycle.
        assert_eq!(tx.write(b"I").unwrap(), 0);
        assert_eq!(tx.write(b"I").unwrap(), 0);

        let mut buf = [0u8; 1];
        assert_eq!(rx.read(&mut buf).unwrap(), 1);
        assert_eq!(&buf, b"A");
        // One byte of space again.
        assert_eq!(tx.write(b"IJ").unwrap(), 1);
    }

    #[test]
    fn test_wrap_splits_copy_and_flips_cycle_once() {
        let region = region_with_capacity(8);
        let (mut tx, mut rx) = channel(&region);

        assert_eq!(tx.write(b"ABCDE").unwrap(), 5);
        assert_eq!(tx.index(), CycleIndex::from_parts(5, false));

        let mut buf = [0u8; 4];
        assert_eq!(rx.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"ABCD");
        assert_eq!(rx.index(), CycleIndex::from_parts(4, false));

        // 3 bytes land at offsets 5..8, 1 byte wraps to offset 0.
        assert_eq!(tx.write(b"FGHI").unwrap(), 4);
        assert_eq!(tx.index(), CycleIndex::from_parts(1, true));

        let mut buf = [0u8; 5];
        assert_eq!(rx.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"EFGHI");
        assert_eq!(rx.index(), CycleIndex::from_parts(1, true));
    }

    #[test]
    fn test_write_clamped_to_free_space() {
        let region = region_with_capacity(8);
        let (mut tx, mut rx) = channel(&region);

        assert_eq!(tx.write(b"ABCDE").unwrap(), 5);
        // Only 3 bytes free; the unread prefix must survive.
        assert_eq!(tx.write(b"FGHI").unwrap(), 3);
        assert_eq!(tx.index(), CycleIndex::from_parts(0, true));

        let mut buf = [0u8; 8];
        assert_eq!(rx.read(&mut buf).unwrap(), 8);
        assert_eq!(&buf, b"ABCDEFGH");
    }

    #[test]
    fn test_read_clamped_to_dst() {
        let region = region_with_capacity(16);
        let (mut tx, mut rx) = channel(&region);

        tx.write(b"abcdefgh").unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(rx.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"abc");
        let mut rest = [0u8; 16];
        let n = rx.read(&mut rest).unwrap();
        assert_eq!(&rest[..n], b"defgh");
    }

    #[test]
    fn test_cycle_parity_per_full_lap() {
        let region = region_with_capacity(8);
        let (mut tx, mut rx) = channel(&region);
        let mut buf = [0u8; 8];

        for lap in 1u32..=4 {
            assert_eq!(tx.write(b"01234567").unwrap(), 8);
            assert_eq!(tx.index(), CycleIndex::from_parts(0, lap % 2 == 1));
            assert_eq!(rx.read(&mut buf).unwrap(), 8);
            assert_eq!(rx.index(), tx.index());
        }
    }

    #[test]
    fn test_empty_slices_are_noops() {
        let region = region_with_capacity(8);
        let (mut tx, mut rx) = channel(&region);

        assert_eq!(tx.write(&[]).unwrap(), 0);
        assert_eq!(rx.read(&mut []).unwrap(), 0);
        assert_eq!(tx.index(), CycleIndex::ZERO);
        assert_eq!(rx.index(), CycleIndex::ZERO);
    }

    #[test]
    fn test_attach_never_mutates_the_control_block() {
        let region = region_with_capacity(16);
        let mut tx = RingBuffer::create(&region).expect("create").into_producer();
        tx.write(b"abc").unwrap();

        let before = (
            region_word(&region, 0).load(Ordering::Acquire),
            region_word(&region, 1).load(Ordering::Acquire),
        );
        for _ in 0..3 {
            let ring = RingBuffer::attach(&region).expect("attach");
            assert_eq!(ring.capacity(), 16);
        }
        let after = (
            region_word(&region, 0).load(Ordering::Acquire),
            region_word(&region, 1).load(Ordering::Acquire),
        );
        assert_eq!(before, after);
    }

    #[test]
    fn test_corruption_poisons_the_handle() {
        let region = region_with_capacity(8);
        let (mut tx, _rx) = channel(&region);

        // An offset >= capacity must be reported, never wrapped implicitly.
        region_word(&region, 1).store(8 + 5, Ordering::Release);
        assert!(matches!(
            tx.write(b"x"),
            Err(RingError::IndexCorrupted { which: "read", .. })
        ));
        assert!(!tx.is_valid());

        // Repairing the word does not un-poison the handle.
        region_word(&region, 1).store(0, Ordering::Release);
        assert!(matches!(tx.write(b"x"), Err(RingError::Poisoned)));
    }

    #[test]
    fn test_descriptor_health_check() {
        let region = region_with_capacity(8);
        let ring = RingBuffer::create(&region).expect("create");
        assert!(ring.is_valid());
        region_word(&region, 0).store(999, Ordering::Release);
        assert!(!ring.is_valid());
    }
}
