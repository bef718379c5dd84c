//! # msrflow-abi
//!
//! The contract between the msrflow agent and its host-environment backend
//! modules.
//!
//! Register access is never performed by the agent itself. It goes through a
//! backend bound at run time: a loadable module that knows how to reach the
//! MSRs of one host environment (bare-metal Linux through the msr device
//! files, the Xen hypervisor through hypercalls, ...). This crate defines
//! that contract twice, once for each side of the boundary:
//!
//! - [`Backend`] is the Rust-side trait the agent consumes. The scheduling
//!   engine only ever sees `&mut dyn Backend`.
//! - [`ffi`] names the six C-ABI symbols a loadable module must export and
//!   their exact function-pointer types. Module authors depend on this crate
//!   to get the signatures right; the agent's loader uses the same constants
//!   to resolve them.
//!
//! ## Batch semantics
//!
//! All register I/O is batched: one call covers `len` parallel
//! (address, core) pairs. A backend may reorder internally (e.g. coalesce an
//! identical address across cores into one multi-core operation) but must
//! keep positional correspondence in its outputs. The returned done count is
//! the number of pairs that succeeded; anything less than `len` is a partial
//! failure and the caller must not take partial credit.

pub mod backend;
pub mod ffi;

pub use backend::{Backend, BackendError, CoreId, CoreInfo, MsrAddr, MsrVal};
