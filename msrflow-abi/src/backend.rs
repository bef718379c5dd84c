//! Rust-side backend contract consumed by the agent.

/// MSR hardware address. Opaque to the agent, interpreted by the backend.
pub type MsrAddr = u64;

/// MSR register content.
pub type MsrVal = u64;

/// Execution core identifier, 0-based in a contiguous id space.
pub type CoreId = u32;

/// Core topology as reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreInfo {
    /// Number of addressable cores.
    pub num_cores: usize,
    /// Highest valid core id.
    pub max_id: usize,
}

impl CoreInfo {
    /// Whether the core id space is the contiguous range `[0, num_cores - 1]`.
    ///
    /// Sparse core id spaces are not supported by the agent and must be
    /// rejected before the engine starts.
    pub fn is_contiguous(&self) -> bool {
        self.num_cores > 0 && self.max_id == self.num_cores - 1
    }
}

/// Errors a backend can report through its lifecycle operations.
///
/// Batched register I/O never errors through this type: partial or total
/// failure is conveyed by the done count alone.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend rejected system type '{system}'")]
    Rejected { system: String },

    #[error("cannot read core information")]
    CoreInfo,

    #[error("backend shutdown failed")]
    Destroy,

    #[error("backend is no longer bound")]
    Unbound,
}

/// One host-environment implementation of batched MSR access.
///
/// Initialization is not part of the trait: a backend only exists once its
/// module-level `init` has accepted the declared system type (see
/// [`crate::ffi`]). `destroy` is here so the owner can release the backend's
/// resources exactly once before unloading it.
///
/// All three batch operations take parallel slices of equal length; the
/// return value is the number of (address, core) pairs that succeeded.
pub trait Backend: Send {
    /// Report the core topology of the host environment.
    fn coreinfo(&mut self) -> Result<CoreInfo, BackendError>;

    /// Read `addrs[i]` on `cores[i]` into `vals[i]` for every position.
    fn read_batch(&mut self, addrs: &[MsrAddr], cores: &[CoreId], vals: &mut [MsrVal]) -> usize;

    /// Write `vals[i]` to `addrs[i]` on `cores[i]` for every position.
    fn write_batch(&mut self, addrs: &[MsrAddr], vals: &[MsrVal], cores: &[CoreId]) -> usize;

    /// For every position: read the current content of `addrs[i]` on
    /// `cores[i]`, write `vals[i]` to it, and store the prior content back
    /// into `vals[i]`.
    ///
    /// This read-and-swap primitive lets a caller apply a value and report
    /// what the register held before, in one batch.
    fn read_write_batch(&mut self, addrs: &[MsrAddr], vals: &mut [MsrVal], cores: &[CoreId])
        -> usize;

    /// Release all resources acquired at initialization.
    fn destroy(&mut self) -> Result<(), BackendError>;
}
