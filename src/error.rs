//! Error types for the `byte-table` crate.

/// Errors reported by table construction and mutation.
///
/// Every fallible operation returns `Result<_, Error>`; the table performs no
/// retries of its own. Resize-on-demand is the only automatic recovery and is
/// invisible to the caller unless the resize itself fails, in which case the
/// triggering operation is aborted before any state is mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The allocator could not provide the backing region. The table (if it
    /// already existed) is left in its prior valid state.
    #[error("allocation of the table's backing region failed")]
    AllocFailed,

    /// No free slot is available. Only reachable on fixed-buffer tables,
    /// which cannot grow.
    #[error("table is full and cannot grow")]
    Full,

    /// Invalid construction parameters: a zero capacity after normalization,
    /// a caller buffer that is too small or misaligned, or layout arithmetic
    /// that overflows `usize`.
    #[error("invalid argument for table construction")]
    BadArg,

    /// The key was not present.
    #[error("key not found")]
    NotFound,

    /// Reserved for invariant violations; not produced on any core path.
    #[error("internal invariant violated")]
    Internal,
}
