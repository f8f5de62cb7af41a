//! The type-erased open-addressing table.
//!
//! Keys and values are opaque byte regions whose sizes and alignments are
//! declared at construction time. The table owns one contiguous region laid
//! out by [`TableLayout`]: the key array, the value array, and one state tag
//! per slot. Collisions are resolved by double hashing and removals leave
//! tombstones that probing passes through and insertion reclaims.

use alloc::alloc::alloc_zeroed;
use alloc::alloc::dealloc;
use core::alloc::Layout;
use core::fmt::Debug;
use core::marker::PhantomData;
use core::ptr::NonNull;
use core::slice;

use crate::error::Error;
use crate::layout::TableLayout;
use crate::layout::floor_pow2;
use crate::probe::ProbeSeq;

/// Hash callback: maps a key's bytes to a raw 64-bit hash.
///
/// The table mixes the result itself, so the function does not need good
/// avalanche behavior, but it must be pure and deterministic, and consistent
/// with the table's [`EqFn`]: equal keys must produce equal hashes.
pub type HashFn = fn(&[u8]) -> u64;

/// Equality callback over two keys' bytes.
pub type EqFn = fn(&[u8], &[u8]) -> bool;

/// Smallest capacity a heap-owned table will ever have.
///
/// Dynamic capacities are normalized up to at least this many slots and
/// shrinking stops here. Fixed-buffer tables may be smaller.
pub const INITIAL_CAPACITY: usize = 32;

/// Slot has never held an entry since the last rehash. Zero so that a
/// zero-filled region starts all-empty.
const EMPTY: u8 = 0;
/// Slot holds a live key/value pair.
const USED: u8 = 1;
/// Tombstone: the entry was removed, probe chains continue through it, and
/// insertion may reclaim it.
const DELETED: u8 = 2;

/// Grow when the incoming entry would push occupied slots (live entries plus
/// tombstones) past 7/10 of capacity.
#[inline(always)]
fn grow_required(occupied: usize, capacity: usize) -> bool {
    (occupied as u128 + 1) * 10 > capacity as u128 * 7
}

/// Shrink when live entries fall below 7/40 of capacity (a quarter of the
/// grow threshold, so the two cannot oscillate).
#[inline(always)]
fn shrink_required(size: usize, capacity: usize) -> bool {
    (size as u128) * 40 < capacity as u128 * 7
}

/// Outcome of the insertion probe walk.
enum InsertSlot {
    /// A `USED` slot whose key compared equal: update in place.
    Existing(usize),
    /// An `EMPTY` slot: a brand-new occupancy.
    Fresh(usize),
    /// The first tombstone seen on the walk: reuse it.
    Reclaimed(usize),
}

/// A type-erased hash table over raw byte slots.
///
/// The lifetime parameter tracks a caller-provided backing buffer for tables
/// built with [`RawTable::new_in`]; heap-owned tables are
/// `RawTable<'static>`.
///
/// Keys and values are passed as byte slices whose lengths must equal the
/// sizes declared at construction; a mismatch is a caller bug and panics.
/// The table copies bytes in and out and never runs destructors, so stored
/// types must not own resources (in practice: `Copy` data).
///
/// # Example
///
/// ```rust
/// use core::alloc::Layout;
///
/// use byte_table::RawTable;
///
/// fn hash(key: &[u8]) -> u64 {
///     u32::from_ne_bytes(key.try_into().unwrap()) as u64
/// }
///
/// let mut table = RawTable::new(
///     16,
///     Layout::new::<u32>(),
///     Layout::new::<u16>(),
///     hash,
///     |a, b| a == b,
/// )
/// .unwrap();
///
/// table.insert(&7u32.to_ne_bytes(), &3u16.to_ne_bytes()).unwrap();
/// assert_eq!(table.get(&7u32.to_ne_bytes()), Some(&3u16.to_ne_bytes()[..]));
/// assert_eq!(table.len(), 1);
/// ```
pub struct RawTable<'buf> {
    data: NonNull<u8>,
    layout: TableLayout,
    capacity: usize,
    size: usize,
    occupied: usize,
    hash: HashFn,
    eq: EqFn,
    fixed: bool,
    _buffer: PhantomData<&'buf mut [u8]>,
}

impl Debug for RawTable<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RawTable")
            .field("size", &self.size)
            .field("occupied", &self.occupied)
            .field("capacity", &self.capacity)
            .field("fixed", &self.fixed)
            .finish_non_exhaustive()
    }
}

impl Drop for RawTable<'_> {
    fn drop(&mut self) {
        if self.fixed {
            return;
        }
        // SAFETY: Owned storage was allocated in `with_exact_capacity` with
        // exactly `self.layout.alloc_layout()`, and is not freed anywhere
        // else.
        unsafe {
            dealloc(self.data.as_ptr(), self.layout.alloc_layout());
        }
    }
}

impl RawTable<'static> {
    /// Creates a heap-owned table.
    ///
    /// `capacity` is normalized up to a power of two no smaller than
    /// [`INITIAL_CAPACITY`]. The region is zero-filled, which marks every
    /// slot empty. Fails with [`Error::AllocFailed`] if the allocator
    /// refuses.
    ///
    /// `hash` and `eq` must be pure, deterministic, and mutually consistent:
    /// `eq(a, b)` implies `hash(a) == hash(b)`.
    pub fn new(
        capacity: usize,
        key: Layout,
        value: Layout,
        hash: HashFn,
        eq: EqFn,
    ) -> Result<RawTable<'static>, Error> {
        let capacity = capacity
            .max(INITIAL_CAPACITY)
            .checked_next_power_of_two()
            .ok_or(Error::BadArg)?;
        Self::with_exact_capacity(capacity, key, value, hash, eq)
    }

    /// Allocates a zero-filled table at exactly `capacity` slots, which must
    /// already be a power of two.
    fn with_exact_capacity(
        capacity: usize,
        key: Layout,
        value: Layout,
        hash: HashFn,
        eq: EqFn,
    ) -> Result<RawTable<'static>, Error> {
        let layout = TableLayout::new(capacity, key, value)?;

        // SAFETY: The layout has nonzero size (at least one state tag per
        // slot and capacity >= 1). A null return is reported as an error
        // rather than dereferenced.
        let data = unsafe {
            NonNull::new(alloc_zeroed(layout.alloc_layout())).ok_or(Error::AllocFailed)?
        };

        Ok(RawTable {
            data,
            layout,
            capacity,
            size: 0,
            occupied: 0,
            hash,
            eq,
            fixed: false,
            _buffer: PhantomData,
        })
    }
}

impl<'buf> RawTable<'buf> {
    /// Creates a fixed-capacity table inside a caller-provided buffer.
    ///
    /// `capacity` is normalized *down* to a power of two (a fixed buffer
    /// cannot grow to cover a rounded-up request). Fails with
    /// [`Error::BadArg`] if the normalized capacity is zero, the buffer is
    /// smaller than [`required_bytes`](crate::layout::required_bytes) for
    /// it, or the buffer start does not satisfy the key/value alignment.
    ///
    /// Only the state region of the buffer is initialized; key and value
    /// bytes are left as-is and are meaningless until written by `insert`.
    /// The table never resizes: `insert` on a full table returns
    /// [`Error::Full`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use core::alloc::Layout;
    ///
    /// use byte_table::RawTable;
    /// use byte_table::required_bytes;
    ///
    /// let key = Layout::new::<u64>();
    /// let value = Layout::new::<u64>();
    /// let mut buffer = vec![0u64; required_bytes(300, key, value).unwrap().div_ceil(8)];
    /// // A u64 buffer satisfies the 8-byte alignment requirement.
    /// let buffer = unsafe {
    ///     core::slice::from_raw_parts_mut(buffer.as_mut_ptr().cast::<u8>(), buffer.len() * 8)
    /// };
    ///
    /// let table = RawTable::new_in(
    ///     buffer,
    ///     300,
    ///     key,
    ///     value,
    ///     |k| u64::from_ne_bytes(k.try_into().unwrap()),
    ///     |a, b| a == b,
    /// )
    /// .unwrap();
    /// assert_eq!(table.capacity(), 256);
    /// ```
    pub fn new_in(
        buffer: &'buf mut [u8],
        capacity: usize,
        key: Layout,
        value: Layout,
        hash: HashFn,
        eq: EqFn,
    ) -> Result<RawTable<'buf>, Error> {
        let capacity = floor_pow2(capacity).ok_or(Error::BadArg)?;
        let layout = TableLayout::new(capacity, key, value)?;

        if buffer.len() < layout.total_bytes() {
            return Err(Error::BadArg);
        }
        if buffer.as_ptr().addr() % layout.align() != 0 {
            return Err(Error::BadArg);
        }

        buffer[layout.states_offset()..layout.states_offset() + capacity].fill(EMPTY);

        Ok(RawTable {
            data: NonNull::from(&mut *buffer).cast::<u8>(),
            layout,
            capacity,
            size: 0,
            occupied: 0,
            hash,
            eq,
            fixed: true,
            _buffer: PhantomData,
        })
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` if the table holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of slots. Always a power of two.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live entries plus tombstones. This is the count the grow threshold is
    /// measured against, since tombstones lengthen probe chains just like
    /// live entries.
    pub fn occupied(&self) -> usize {
        self.occupied
    }

    /// Returns `true` if the table lives in a caller-provided buffer and
    /// never resizes.
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// The byte layout of the backing region.
    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    /// Looks up a key and borrows its value bytes.
    ///
    /// # Panics
    ///
    /// If `key.len()` differs from the declared key size.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        assert_eq!(
            key.len(),
            self.layout.key().size(),
            "key length must match the declared key size"
        );
        self.find_index(key).map(|index| self.value_bytes(index))
    }

    /// Returns `true` if the key is present.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Inserts a key/value pair, overwriting the value in place if the key
    /// is already present.
    ///
    /// A heap-owned table grows (rehashing every live entry) before the
    /// insert if the occupancy threshold would be crossed; failure to
    /// allocate the larger region aborts the insert with
    /// [`Error::AllocFailed`] and leaves the table unchanged. A
    /// fixed-buffer table returns [`Error::Full`] once no empty slot or
    /// tombstone remains.
    ///
    /// # Panics
    ///
    /// If `key.len()` or `value.len()` differ from the declared sizes.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        assert_eq!(
            key.len(),
            self.layout.key().size(),
            "key length must match the declared key size"
        );
        assert_eq!(
            value.len(),
            self.layout.value().size(),
            "value length must match the declared value size"
        );

        if !self.fixed && grow_required(self.occupied, self.capacity) {
            let doubled = self.capacity.checked_mul(2).ok_or(Error::BadArg)?;
            self.resize(doubled)?;
        }

        let slot = self.find_insert_slot(key)?;
        self.place(slot, key, value);
        Ok(())
    }

    /// Removes a key, optionally copying its value bytes into `value_out`.
    ///
    /// The slot becomes a tombstone: probe chains still pass through it and
    /// a later insert may reclaim it, so `occupied()` does not decrease. A
    /// heap-owned table shrinks (halving, floored at [`INITIAL_CAPACITY`])
    /// before the removal once live entries fall below the shrink
    /// threshold. Returns [`Error::NotFound`] if the key is absent.
    ///
    /// # Panics
    ///
    /// If `key.len()` or a provided `value_out.len()` differ from the
    /// declared sizes.
    pub fn remove(&mut self, key: &[u8], value_out: Option<&mut [u8]>) -> Result<(), Error> {
        assert_eq!(
            key.len(),
            self.layout.key().size(),
            "key length must match the declared key size"
        );
        if let Some(out) = &value_out {
            assert_eq!(
                out.len(),
                self.layout.value().size(),
                "value_out length must match the declared value size"
            );
        }

        if !self.fixed
            && self.capacity > INITIAL_CAPACITY
            && shrink_required(self.size, self.capacity)
        {
            self.resize((self.capacity / 2).max(INITIAL_CAPACITY))?;
        }

        let index = self.find_index(key).ok_or(Error::NotFound)?;
        if let Some(out) = value_out {
            out.copy_from_slice(self.value_bytes(index));
        }
        self.set_state(index, DELETED);
        self.size -= 1;
        Ok(())
    }

    /// Structural copy: a fresh heap-owned table at this table's capacity
    /// and types, with every live entry re-inserted through the probe walk.
    ///
    /// Tombstones are dropped, so the copy's probe chains are as short as a
    /// freshly built table's; physical slot positions may differ from the
    /// source.
    pub fn rehash_copy(&self) -> Result<RawTable<'static>, Error> {
        let mut target = RawTable::with_exact_capacity(
            self.capacity,
            self.layout.key(),
            self.layout.value(),
            self.hash,
            self.eq,
        )?;
        for index in 0..self.capacity {
            if self.state(index) != USED {
                continue;
            }
            let slot = target.find_insert_slot(self.key_bytes(index))?;
            target.place(slot, self.key_bytes(index), self.value_bytes(index));
        }
        Ok(target)
    }

    /// Verbatim copy: a fresh heap-owned table whose backing region is a
    /// byte-for-byte image of this one.
    ///
    /// Physical slot positions and tombstones are preserved exactly. Faster
    /// than [`RawTable::rehash_copy`] for large tables since no probing is
    /// done, but carries the source's tombstone overhead along.
    pub fn raw_copy(&self) -> Result<RawTable<'static>, Error> {
        let mut target = RawTable::with_exact_capacity(
            self.capacity,
            self.layout.key(),
            self.layout.value(),
            self.hash,
            self.eq,
        )?;
        // SAFETY: Both regions were computed by `TableLayout::new` from the
        // same capacity and field layouts, so they are `total_bytes()` long,
        // and they belong to distinct allocations (no overlap).
        unsafe {
            core::ptr::copy_nonoverlapping(
                self.data.as_ptr(),
                target.data.as_ptr(),
                self.layout.total_bytes(),
            );
        }
        target.size = self.size;
        target.occupied = self.occupied;
        Ok(target)
    }

    /// Bulk-inserts `pair_count` key/value pairs from a packed byte array.
    ///
    /// Each pair is laid out like `#[repr(C)] struct Pair { key, value }`:
    /// the value starts at the key size rounded up to the value alignment,
    /// and pairs advance by the value end rounded up to the larger of the
    /// two alignments. Pairs are inserted in order; the first failure stops
    /// the walk and is returned, leaving earlier pairs inserted.
    ///
    /// Fails with [`Error::BadArg`] if `bytes` is too short for
    /// `pair_count` pairs. If the hash or equality callbacks reinterpret
    /// key bytes as a typed value, `bytes` must start at the key alignment.
    pub fn extend_from_pairs(&mut self, bytes: &[u8], pair_count: usize) -> Result<(), Error> {
        let key_size = self.layout.key().size();
        let value_size = self.layout.value().size();
        let (pair, value_offset) = self
            .layout
            .key()
            .extend(self.layout.value())
            .map_err(|_| Error::BadArg)?;
        let pair_stride = pair.pad_to_align().size();

        if pair_count > 0 {
            let needed = (pair_count - 1)
                .checked_mul(pair_stride)
                .and_then(|n| n.checked_add(value_offset + value_size))
                .ok_or(Error::BadArg)?;
            if bytes.len() < needed {
                return Err(Error::BadArg);
            }
        }

        for i in 0..pair_count {
            let base = i * pair_stride;
            self.insert(
                &bytes[base..base + key_size],
                &bytes[base + value_offset..base + value_offset + value_size],
            )?;
        }
        Ok(())
    }

    /// Rebuilds the table at `new_capacity`, re-inserting every live entry.
    ///
    /// The replacement is built fully on the side and only swapped in on
    /// success, so any failure leaves the original table untouched.
    /// Tombstones never carry over. `Full` here would mean the load-factor
    /// arithmetic is wrong; it is propagated rather than trusted to be
    /// unreachable.
    fn resize(&mut self, new_capacity: usize) -> Result<(), Error> {
        debug_assert!(!self.fixed);

        let mut fresh: RawTable<'buf> = RawTable::with_exact_capacity(
            new_capacity,
            self.layout.key(),
            self.layout.value(),
            self.hash,
            self.eq,
        )?;

        for index in 0..self.capacity {
            if self.state(index) != USED {
                continue;
            }
            let slot = fresh.find_insert_slot(self.key_bytes(index))?;
            fresh.place(slot, self.key_bytes(index), self.value_bytes(index));
        }

        // The old region is released when `fresh` (now holding it) drops.
        core::mem::swap(self, &mut fresh);
        Ok(())
    }

    /// Lookup walk: skip tombstones, stop at the first empty slot or after
    /// visiting every slot once.
    fn find_index(&self, key: &[u8]) -> Option<usize> {
        let mut probe = ProbeSeq::new((self.hash)(key), self.capacity);
        for _ in 0..self.capacity {
            let index = probe.index();
            match self.state(index) {
                EMPTY => return None,
                USED if (self.eq)(self.key_bytes(index), key) => return Some(index),
                _ => {}
            }
            probe.advance();
        }
        None
    }

    /// Insert walk: like `find_index`, but remembers the first tombstone so
    /// insertion can reclaim it instead of consuming a fresh empty slot.
    fn find_insert_slot(&self, key: &[u8]) -> Result<InsertSlot, Error> {
        let mut probe = ProbeSeq::new((self.hash)(key), self.capacity);
        let mut tombstone = None;
        for _ in 0..self.capacity {
            let index = probe.index();
            match self.state(index) {
                EMPTY => {
                    return Ok(match tombstone {
                        Some(reuse) => InsertSlot::Reclaimed(reuse),
                        None => InsertSlot::Fresh(index),
                    });
                }
                USED if (self.eq)(self.key_bytes(index), key) => {
                    return Ok(InsertSlot::Existing(index));
                }
                DELETED if tombstone.is_none() => tombstone = Some(index),
                _ => {}
            }
            probe.advance();
        }
        // Every slot visited without an empty: only reachable when occupied
        // == capacity, i.e. on a fixed-buffer table.
        match tombstone {
            Some(reuse) => Ok(InsertSlot::Reclaimed(reuse)),
            None => Err(Error::Full),
        }
    }

    /// Writes the pair into the chosen slot and updates the counters.
    ///
    /// A reclaimed tombstone was already counted in `occupied`, so only
    /// `size` moves; an update in place moves neither.
    fn place(&mut self, slot: InsertSlot, key: &[u8], value: &[u8]) {
        match slot {
            InsertSlot::Existing(index) => {
                self.write_value(index, value);
            }
            InsertSlot::Fresh(index) => {
                self.write_key(index, key);
                self.write_value(index, value);
                self.set_state(index, USED);
                self.size += 1;
                self.occupied += 1;
            }
            InsertSlot::Reclaimed(index) => {
                self.write_key(index, key);
                self.write_value(index, value);
                self.set_state(index, USED);
                self.size += 1;
            }
        }
        debug_assert!(self.size <= self.occupied && self.occupied <= self.capacity);
    }

    fn state(&self, index: usize) -> u8 {
        debug_assert!(index < self.capacity);
        // SAFETY: `index < capacity`, so the tag lies within the state
        // region, which was initialized at construction.
        unsafe { *self.data.as_ptr().add(self.layout.states_offset() + index) }
    }

    fn set_state(&mut self, index: usize, tag: u8) {
        debug_assert!(index < self.capacity);
        // SAFETY: Same bounds as `state`, and we hold `&mut self`.
        unsafe {
            *self.data.as_ptr().add(self.layout.states_offset() + index) = tag;
        }
    }

    fn key_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.capacity);
        // SAFETY: Slot `index` of the key array lies within the region by
        // the layout computation.
        unsafe { self.data.as_ptr().add(index * self.layout.key_stride()) }
    }

    fn value_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.capacity);
        // SAFETY: Slot `index` of the value array lies within the region by
        // the layout computation.
        unsafe {
            self.data
                .as_ptr()
                .add(self.layout.values_offset() + index * self.layout.value_stride())
        }
    }

    fn key_bytes(&self, index: usize) -> &[u8] {
        // SAFETY: The slot is in bounds; owned regions are zero-initialized
        // and fixed buffers come from a live `&mut [u8]`, so the bytes are
        // initialized either way.
        unsafe { slice::from_raw_parts(self.key_ptr(index), self.layout.key().size()) }
    }

    fn value_bytes(&self, index: usize) -> &[u8] {
        // SAFETY: Same as `key_bytes`.
        unsafe { slice::from_raw_parts(self.value_ptr(index), self.layout.value().size()) }
    }

    fn write_key(&mut self, index: usize, key: &[u8]) {
        // SAFETY: The slot is in bounds and sized `key().size()`; the source
        // is caller memory, which cannot alias the table's region through a
        // shared `&[u8]` while we hold `&mut self`.
        unsafe {
            core::ptr::copy_nonoverlapping(key.as_ptr(), self.key_ptr(index), key.len());
        }
    }

    fn write_value(&mut self, index: usize, value: &[u8]) {
        // SAFETY: Same as `write_key`.
        unsafe {
            core::ptr::copy_nonoverlapping(value.as_ptr(), self.value_ptr(index), value.len());
        }
    }
}
