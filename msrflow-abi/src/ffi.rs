//! C ABI exported by loadable backend modules.
//!
//! A backend module is a shared object exporting the six symbols below with
//! `extern "C"` linkage. The agent resolves all six before calling anything;
//! a module missing any of them is skipped during discovery.
//!
//! Lifecycle functions return `0` on success and a negative value on
//! failure. Batch functions return the number of positions that succeeded,
//! which is `len` on full success.
//!
//! A module written in Rust would export them as:
//!
//! ```ignore
//! use msrflow_abi::{CoreId, MsrAddr, MsrVal};
//! use std::ffi::c_char;
//!
//! #[no_mangle]
//! pub unsafe extern "C" fn msrflow_init(sysname: *const c_char) -> i8 { /* ... */ 0 }
//! ```

use core::ffi::c_char;

use crate::backend::{CoreId, MsrAddr, MsrVal};

/// Validate that this module applies to the given system type and acquire
/// whatever resources register access needs. Called at most once per load.
pub const INIT: &str = "msrflow_init";

/// Release everything `msrflow_init` acquired.
pub const DESTROY: &str = "msrflow_destroy";

/// Report the number of addressable cores and the highest core id.
pub const COREINFO: &str = "msrflow_coreinfo";

/// Batched read: fill `vals[i]` from `addrs[i]` on `cores[i]`.
pub const RDMSR_ARR: &str = "msrflow_rdmsr_arr";

/// Batched write: store `vals[i]` to `addrs[i]` on `cores[i]`.
pub const WRMSR_ARR: &str = "msrflow_wrmsr_arr";

/// Batched read-and-swap: write `vals[i]`, returning the prior content in
/// its place.
pub const RWMSR_ARR: &str = "msrflow_rwmsr_arr";

pub type InitFn = unsafe extern "C" fn(sysname: *const c_char) -> i8;

pub type DestroyFn = unsafe extern "C" fn() -> i8;

pub type CoreinfoFn = unsafe extern "C" fn(num_cores: *mut usize, max_id: *mut usize) -> i8;

pub type RdmsrArrFn = unsafe extern "C" fn(
    vals: *mut MsrVal,
    addrs: *const MsrAddr,
    cores: *const CoreId,
    len: usize,
) -> usize;

pub type WrmsrArrFn = unsafe extern "C" fn(
    addrs: *const MsrAddr,
    vals: *const MsrVal,
    cores: *const CoreId,
    len: usize,
) -> usize;

pub type RwmsrArrFn = unsafe extern "C" fn(
    addrs: *const MsrAddr,
    vals: *mut MsrVal,
    cores: *const CoreId,
    len: usize,
) -> usize;
