use core::alloc::Layout;

use crate::error::Error;

/// Byte layout of a table's backing region.
///
/// One contiguous allocation holds three parallel arrays: `capacity` key
/// slots of `key_stride` bytes each, then `capacity` value slots of
/// `value_stride` bytes (base rounded up to the value alignment), then one
/// `u8` state tag per slot. Strides are the field sizes rounded up to their
/// alignments so every slot of each array is properly aligned.
///
/// Built with [`core::alloc::Layout::extend`], which performs exactly this
/// round-up-to-alignment arithmetic and tracks the maximum alignment for the
/// combined allocation.
#[derive(Debug, Clone, Copy)]
pub struct TableLayout {
    key: Layout,
    value: Layout,
    key_stride: usize,
    value_stride: usize,
    values_offset: usize,
    states_offset: usize,
    combined: Layout,
}

impl TableLayout {
    /// Computes the layout for `capacity` slots of the given key and value
    /// types.
    ///
    /// `capacity` must already be a power of two. Fails with
    /// [`Error::BadArg`] if the region size overflows.
    pub fn new(capacity: usize, key: Layout, value: Layout) -> Result<Self, Error> {
        debug_assert!(capacity.is_power_of_two());

        let key_stride = key.pad_to_align().size();
        let value_stride = value.pad_to_align().size();

        let keys = Layout::from_size_align(
            key_stride.checked_mul(capacity).ok_or(Error::BadArg)?,
            key.align(),
        )
        .map_err(|_| Error::BadArg)?;
        let values = Layout::from_size_align(
            value_stride.checked_mul(capacity).ok_or(Error::BadArg)?,
            value.align(),
        )
        .map_err(|_| Error::BadArg)?;
        let states = Layout::array::<u8>(capacity).map_err(|_| Error::BadArg)?;

        let (combined, values_offset) = keys.extend(values).map_err(|_| Error::BadArg)?;
        let (combined, states_offset) = combined.extend(states).map_err(|_| Error::BadArg)?;

        Ok(TableLayout {
            key,
            value,
            key_stride,
            value_stride,
            values_offset,
            states_offset,
            combined,
        })
    }

    /// The declared key type layout.
    pub fn key(&self) -> Layout {
        self.key
    }

    /// The declared value type layout.
    pub fn value(&self) -> Layout {
        self.value
    }

    /// Distance in bytes between consecutive key slots.
    pub fn key_stride(&self) -> usize {
        self.key_stride
    }

    /// Distance in bytes between consecutive value slots.
    pub fn value_stride(&self) -> usize {
        self.value_stride
    }

    /// Offset of the value array within the region.
    pub fn values_offset(&self) -> usize {
        self.values_offset
    }

    /// Offset of the state tag array within the region.
    pub fn states_offset(&self) -> usize {
        self.states_offset
    }

    /// Total size of the region in bytes.
    pub fn total_bytes(&self) -> usize {
        self.combined.size()
    }

    /// Minimum alignment a backing buffer must satisfy.
    pub fn align(&self) -> usize {
        self.combined.align()
    }

    /// The allocation layout for the whole region.
    pub(crate) fn alloc_layout(&self) -> Layout {
        self.combined
    }
}

/// Largest power of two less than or equal to `n`, or `None` for zero.
pub(crate) fn floor_pow2(n: usize) -> Option<usize> {
    if n == 0 {
        None
    } else {
        Some(1usize << (usize::BITS - 1 - n.leading_zeros()))
    }
}

/// Bytes a caller-provided buffer must hold for a fixed-capacity table.
///
/// The requested `capacity` is first rounded *down* to a power of two, since
/// a fixed-buffer table can never grow past what the caller allocated. Fails
/// with [`Error::BadArg`] if the rounded capacity is zero.
///
/// # Examples
///
/// ```rust
/// use core::alloc::Layout;
///
/// use byte_table::required_bytes;
///
/// // 300 rounds down to 256 slots.
/// let bytes = required_bytes(300, Layout::new::<u64>(), Layout::new::<u8>()).unwrap();
/// assert_eq!(bytes, 256 * 8 + 256 + 256);
/// ```
pub fn required_bytes(capacity: usize, key: Layout, value: Layout) -> Result<usize, Error> {
    let capacity = floor_pow2(capacity).ok_or(Error::BadArg)?;
    Ok(TableLayout::new(capacity, key, value)?.total_bytes())
}
