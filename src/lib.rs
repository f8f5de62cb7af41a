#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod error;

/// Offset and stride arithmetic for the packed key/value/state allocation.
pub mod layout;

/// A typed map over `Copy` keys and values, backed by the erased table.
///
/// This module wraps `RawTable` and derives the layouts and hash/equality
/// callbacks from ordinary `Hash + Eq` types, hashing with foldhash.
#[cfg(feature = "foldhash")]
pub mod map;

mod probe;

pub mod raw_table;

pub use error::Error;
pub use layout::TableLayout;
pub use layout::required_bytes;
#[cfg(feature = "foldhash")]
pub use map::Map;
pub use raw_table::RawTable;
