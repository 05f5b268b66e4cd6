use thiserror::Error;

/// Reasons a resize or grow request can be refused.
///
/// Plain allocations (`allocate`, `push`, `fill`, ...) report exhaustion with
/// `None` instead. In every case the structure is left exactly as it was
/// before the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The backend (parent arena or the OS) could not supply the bytes.
    #[error("backend could not supply {requested} bytes")]
    OutOfMemory {
        /// Number of bytes requested from the backend.
        requested: usize,
    },
    /// Arena storage is only ever extended, never handed back.
    #[error("arena-backed storage cannot shrink from {capacity} to {requested} slots")]
    ShrinkUnsupported {
        /// Current capacity in slots.
        capacity: usize,
        /// Requested capacity in slots.
        requested: usize,
    },
    /// Size computation overflowed.
    #[error("capacity overflow")]
    CapacityOverflow,
}
