use alloc::alloc::handle_alloc_error;
use core::alloc::Layout;
use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::slice;

use foldhash::fast::FixedState;

use crate::error::Error;
use crate::raw_table::RawTable;

/// Borrows a value's bytes for handing to the erased table.
fn as_bytes<T>(value: &T) -> &[u8] {
    // SAFETY: Any `T` is readable as `size_of::<T>()` bytes at its own
    // address for the lifetime of the reference.
    unsafe { slice::from_raw_parts((value as *const T).cast::<u8>(), size_of::<T>()) }
}

/// Erased hash callback for a concrete key type.
///
/// The table stores keys at the alignment of `K` and hands back slices that
/// start on a key slot, so the cast is aligned. Hashing goes through `&K` and
/// the `Hash` impl rather than the raw bytes, which keeps padding bytes out
/// of the hash.
fn erased_hash<K: Hash>(bytes: &[u8]) -> u64 {
    debug_assert_eq!(bytes.len(), size_of::<K>());
    // SAFETY: `bytes` spans a properly aligned, initialized `K`, either the
    // caller's borrowed key or a key slot the table previously copied a `K`
    // into.
    let key = unsafe { &*bytes.as_ptr().cast::<K>() };
    FixedState::default().hash_one(key)
}

/// Erased equality callback for a concrete key type.
fn erased_eq<K: Eq>(a: &[u8], b: &[u8]) -> bool {
    // SAFETY: Same as `erased_hash`, for both operands.
    unsafe { *a.as_ptr().cast::<K>() == *b.as_ptr().cast::<K>() }
}

/// A typed hash map backed by the erased [`RawTable`].
///
/// Layouts and the hash/equality callbacks are derived from `K`, with
/// foldhash as the (deterministic) hasher. Keys and values are stored by
/// copy inside the table's single allocation, which is why both must be
/// `Copy`: the table never runs destructors.
///
/// # Examples
///
/// ```rust
/// use byte_table::Map;
///
/// let mut map: Map<(u16, u16), u64> = Map::new();
/// map.insert((3, 4), 25).unwrap();
/// assert_eq!(map.get(&(3, 4)), Some(&25));
/// assert_eq!(map.remove(&(3, 4)), Some(25));
/// assert!(map.is_empty());
/// ```
pub struct Map<K, V> {
    table: RawTable<'static>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> Map<K, V>
where
    K: Copy + Hash + Eq,
    V: Copy,
{
    /// Creates an empty map at the minimum capacity.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty map that can hold at least `capacity` entries
    /// before growing.
    ///
    /// Aborts via [`handle_alloc_error`] if the allocator refuses; use
    /// [`Map::try_with_capacity`] to observe the failure instead.
    pub fn with_capacity(capacity: usize) -> Self {
        match Self::try_with_capacity(capacity) {
            Ok(map) => map,
            Err(_) => handle_alloc_error(Layout::new::<(K, V)>()),
        }
    }

    /// Fallible construction: reports [`Error::AllocFailed`] instead of
    /// aborting.
    pub fn try_with_capacity(capacity: usize) -> Result<Self, Error> {
        let table = RawTable::new(
            capacity,
            Layout::new::<K>(),
            Layout::new::<V>(),
            erased_hash::<K>,
            erased_eq::<K>,
        )?;
        Ok(Map {
            table,
            _marker: PhantomData,
        })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Number of slots in the backing table. Always a power of two.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Borrows the value stored for `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.table.get(as_bytes(key)).map(|bytes| {
            // SAFETY: Value slots are aligned to `align_of::<V>()` by the
            // table layout and hold a `V` copied in by `insert`.
            unsafe { &*bytes.as_ptr().cast::<V>() }
        })
    }

    /// Returns `true` if `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.table.contains_key(as_bytes(key))
    }

    /// Inserts an entry, overwriting the value if `key` is already present.
    ///
    /// The only error a heap-owned table can report here is
    /// [`Error::AllocFailed`] from a failed growth.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), Error> {
        self.table.insert(as_bytes(&key), as_bytes(&value))
    }

    /// Removes `key` and returns its value, or `None` if absent.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        // Zeroed rather than uninit so the byte view handed to the table is
        // initialized memory.
        let mut out = MaybeUninit::<V>::zeroed();
        // SAFETY: The slice covers exactly the `V`-sized buffer above.
        let out_bytes =
            unsafe { slice::from_raw_parts_mut(out.as_mut_ptr().cast::<u8>(), size_of::<V>()) };
        match self.table.remove(as_bytes(key), Some(out_bytes)) {
            // SAFETY: On success the table copied a live `V` into the
            // buffer.
            Ok(()) => Some(unsafe { out.assume_init() }),
            Err(_) => None,
        }
    }
}

impl<K, V> Default for Map<K, V>
where
    K: Copy + Hash + Eq,
    V: Copy,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Debug for Map<K, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Map")
            .field("len", &self.table.len())
            .field("capacity", &self.table.capacity())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_operations() {
        let mut map: Map<u64, u32> = Map::new();
        assert!(map.is_empty());

        map.insert(1, 10).unwrap();
        map.insert(2, 20).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&1), Some(&10));
        assert_eq!(map.get(&2), Some(&20));
        assert_eq!(map.get(&3), None);

        map.insert(1, 11).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&1), Some(&11));

        assert_eq!(map.remove(&1), Some(11));
        assert_eq!(map.remove(&1), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn keys_with_padding_bytes() {
        // (u8, u64) has 7 padding bytes; hashing and equality go through
        // the typed key, so padding cannot cause false misses.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        struct Id {
            tag: u8,
            serial: u64,
        }

        let mut map: Map<Id, i32> = Map::new();
        for serial in 0..64u64 {
            map.insert(
                Id {
                    tag: (serial % 3) as u8,
                    serial,
                },
                serial as i32,
            )
            .unwrap();
        }
        for serial in 0..64u64 {
            let key = Id {
                tag: (serial % 3) as u8,
                serial,
            };
            assert_eq!(map.get(&key), Some(&(serial as i32)));
        }
        assert_eq!(map.get(&Id { tag: 9, serial: 0 }), None);
    }

    #[test]
    fn growth_beyond_initial_capacity() {
        let mut map: Map<u32, u32> = Map::with_capacity(0);
        let initial = map.capacity();
        for k in 0..500u32 {
            map.insert(k, k.wrapping_mul(7)).unwrap();
        }
        assert!(map.capacity() > initial);
        for k in 0..500u32 {
            assert_eq!(map.get(&k), Some(&k.wrapping_mul(7)));
        }
    }

    #[cfg(feature = "std")]
    #[test]
    fn differential_against_std_hashmap() {
        use std::collections::HashMap;

        use rand::Rng;
        use rand::SeedableRng;
        use rand::rngs::SmallRng;

        let mut rng = SmallRng::seed_from_u64(42);
        let mut map: Map<u32, u16> = Map::new();
        let mut reference: HashMap<u32, u16> = HashMap::new();

        for _ in 0..5_000usize {
            let key = rng.random_range(0..256u32);
            if rng.random_range(0..4u8) < 3 {
                let value: u16 = rng.random();
                map.insert(key, value).unwrap();
                reference.insert(key, value);
            } else {
                assert_eq!(map.remove(&key), reference.remove(&key));
            }
            assert_eq!(map.len(), reference.len());
        }
        for (key, value) in &reference {
            assert_eq!(map.get(key), Some(value));
        }
    }
}
