//! Backend discovery and binding.
//!
//! The registry scans an ordered list of path groups (each a colon-delimited
//! directory list) for a loadable module implementing the backend contract
//! for the declared system type. The first candidate, in native directory
//! order, whose six symbols all resolve and whose `init` accepts the system
//! type is bound; nothing after it is tried. Unreadable directories and
//! failing candidates are skipped.
//!
//! Discovery is kept apart from the contract itself: [`ModuleLoader`] is the
//! seam, [`DynamicLoader`] the production implementation on top of
//! `libloading`. A build with statically linked backends only needs another
//! `ModuleLoader`.

use std::ffi::CString;
use std::fs;
use std::path::{Path, PathBuf};

use libloading::Library;
use thiserror::Error;

use crate::error::MsrflowError;
use msrflow_abi::{ffi, Backend, BackendError, CoreId, CoreInfo, MsrAddr, MsrVal};

/// Why one candidate module was skipped. Never fatal on its own; the scan
/// moves on to the next candidate.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot load module: {0}")]
    Open(#[source] libloading::Error),

    #[error("missing function '{symbol}'")]
    MissingSymbol {
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },

    #[error("cannot initialize for system type '{system}'")]
    InitRejected { system: String },

    #[error("system type contains an interior NUL")]
    BadSystemName,
}

/// Opens one candidate file as a backend, `init` included. Failure means
/// "not this one", not "stop scanning".
pub trait ModuleLoader {
    fn open(&self, path: &Path, system: &str) -> Result<Box<dyn Backend>, LoadError>;
}

/// Production loader: `dlopen` the candidate, resolve the six contract
/// symbols, run `init`.
pub struct DynamicLoader;

fn symbol<T: Copy>(lib: &Library, name: &'static str) -> Result<T, LoadError> {
    unsafe { lib.get::<T>(name.as_bytes()) }
        .map(|sym| *sym)
        .map_err(|source| LoadError::MissingSymbol {
            symbol: name,
            source,
        })
}

impl ModuleLoader for DynamicLoader {
    fn open(&self, path: &Path, system: &str) -> Result<Box<dyn Backend>, LoadError> {
        let lib = unsafe { Library::new(path) }.map_err(LoadError::Open)?;

        let init: ffi::InitFn = symbol(&lib, ffi::INIT)?;
        let destroy: ffi::DestroyFn = symbol(&lib, ffi::DESTROY)?;
        let coreinfo: ffi::CoreinfoFn = symbol(&lib, ffi::COREINFO)?;
        let rdmsr_arr: ffi::RdmsrArrFn = symbol(&lib, ffi::RDMSR_ARR)?;
        let wrmsr_arr: ffi::WrmsrArrFn = symbol(&lib, ffi::WRMSR_ARR)?;
        let rwmsr_arr: ffi::RwmsrArrFn = symbol(&lib, ffi::RWMSR_ARR)?;

        let sysname = CString::new(system).map_err(|_| LoadError::BadSystemName)?;
        if unsafe { init(sysname.as_ptr()) } != 0 {
            return Err(LoadError::InitRejected {
                system: system.to_string(),
            });
        }

        Ok(Box::new(DynBackend {
            destroy,
            coreinfo,
            rdmsr_arr,
            wrmsr_arr,
            rwmsr_arr,
            _lib: lib,
        }))
    }
}

/// A successfully initialized loadable module. The function pointers stay
/// valid as long as `_lib` is held, which is exactly this struct's lifetime.
struct DynBackend {
    destroy: ffi::DestroyFn,
    coreinfo: ffi::CoreinfoFn,
    rdmsr_arr: ffi::RdmsrArrFn,
    wrmsr_arr: ffi::WrmsrArrFn,
    rwmsr_arr: ffi::RwmsrArrFn,
    _lib: Library,
}

impl Backend for DynBackend {
    fn coreinfo(&mut self) -> Result<CoreInfo, BackendError> {
        let mut num_cores = 0usize;
        let mut max_id = 0usize;
        if unsafe { (self.coreinfo)(&mut num_cores, &mut max_id) } != 0 {
            return Err(BackendError::CoreInfo);
        }
        Ok(CoreInfo { num_cores, max_id })
    }

    fn read_batch(&mut self, addrs: &[MsrAddr], cores: &[CoreId], vals: &mut [MsrVal]) -> usize {
        debug_assert_eq!(addrs.len(), cores.len());
        debug_assert_eq!(addrs.len(), vals.len());
        unsafe { (self.rdmsr_arr)(vals.as_mut_ptr(), addrs.as_ptr(), cores.as_ptr(), addrs.len()) }
    }

    fn write_batch(&mut self, addrs: &[MsrAddr], vals: &[MsrVal], cores: &[CoreId]) -> usize {
        debug_assert_eq!(addrs.len(), cores.len());
        debug_assert_eq!(addrs.len(), vals.len());
        unsafe { (self.wrmsr_arr)(addrs.as_ptr(), vals.as_ptr(), cores.as_ptr(), addrs.len()) }
    }

    fn read_write_batch(
        &mut self,
        addrs: &[MsrAddr],
        vals: &mut [MsrVal],
        cores: &[CoreId],
    ) -> usize {
        debug_assert_eq!(addrs.len(), cores.len());
        debug_assert_eq!(addrs.len(), vals.len());
        unsafe { (self.rwmsr_arr)(addrs.as_ptr(), vals.as_mut_ptr(), cores.as_ptr(), addrs.len()) }
    }

    fn destroy(&mut self) -> Result<(), BackendError> {
        if unsafe { (self.destroy)() } != 0 {
            return Err(BackendError::Destroy);
        }
        Ok(())
    }
}

/// The bound backend plus its identity (the module path it was loaded
/// from). Every delegated call runs inside a tracing span carrying that
/// identity, so diagnostics emitted during a backend call are tagged with
/// the module and the annotation is restored when the call returns.
pub struct BoundBackend {
    name: String,
    inner: Option<Box<dyn Backend>>,
}

impl std::fmt::Debug for BoundBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundBackend")
            .field("name", &self.name)
            .field("bound", &self.inner.is_some())
            .finish()
    }
}

impl BoundBackend {
    fn new(path: PathBuf, inner: Box<dyn Backend>) -> Self {
        BoundBackend {
            name: path.display().to_string(),
            inner: Some(inner),
        }
    }

    /// The resolved module path, used to tag diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the module's `destroy` and release it. Calling this on an
    /// already unbound backend is a no-op.
    pub fn unbind(&mut self) {
        if let Some(mut backend) = self.inner.take() {
            let _span = tracing::debug_span!("backend", module = %self.name).entered();
            if let Err(err) = backend.destroy() {
                tracing::warn!("{err}");
            }
        }
    }
}

impl Drop for BoundBackend {
    fn drop(&mut self) {
        self.unbind();
    }
}

impl Backend for BoundBackend {
    fn coreinfo(&mut self) -> Result<CoreInfo, BackendError> {
        let _span = tracing::debug_span!("backend", module = %self.name).entered();
        match self.inner.as_mut() {
            Some(backend) => backend.coreinfo(),
            None => Err(BackendError::Unbound),
        }
    }

    fn read_batch(&mut self, addrs: &[MsrAddr], cores: &[CoreId], vals: &mut [MsrVal]) -> usize {
        let _span = tracing::debug_span!("backend", module = %self.name).entered();
        match self.inner.as_mut() {
            Some(backend) => backend.read_batch(addrs, cores, vals),
            None => 0,
        }
    }

    fn write_batch(&mut self, addrs: &[MsrAddr], vals: &[MsrVal], cores: &[CoreId]) -> usize {
        let _span = tracing::debug_span!("backend", module = %self.name).entered();
        match self.inner.as_mut() {
            Some(backend) => backend.write_batch(addrs, vals, cores),
            None => 0,
        }
    }

    fn read_write_batch(
        &mut self,
        addrs: &[MsrAddr],
        vals: &mut [MsrVal],
        cores: &[CoreId],
    ) -> usize {
        let _span = tracing::debug_span!("backend", module = %self.name).entered();
        match self.inner.as_mut() {
            Some(backend) => backend.read_write_batch(addrs, vals, cores),
            None => 0,
        }
    }

    fn destroy(&mut self) -> Result<(), BackendError> {
        self.unbind();
        Ok(())
    }
}

/// Scans search paths and binds the first compatible module.
pub struct Registry<L = DynamicLoader> {
    loader: L,
}

impl Registry<DynamicLoader> {
    pub fn new() -> Self {
        Registry {
            loader: DynamicLoader,
        }
    }
}

impl Default for Registry<DynamicLoader> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ModuleLoader> Registry<L> {
    pub fn with_loader(loader: L) -> Self {
        Registry { loader }
    }

    /// Bind the first module, in scan order, that satisfies the contract
    /// for `system`.
    ///
    /// `path_groups` are scanned in order; each group is a colon-delimited
    /// directory list. Within a directory, entries come in the platform's
    /// native listing order. Exhausting every group without a successful
    /// `init` is fatal.
    pub fn resolve(
        &self,
        system: &str,
        path_groups: &[String],
    ) -> Result<BoundBackend, MsrflowError> {
        for group in path_groups {
            for dir in group.split(':').filter(|dir| !dir.is_empty()) {
                let entries = match fs::read_dir(dir) {
                    Ok(entries) => entries,
                    Err(err) => {
                        tracing::debug!("skipping path directory '{dir}': {err}");
                        continue;
                    }
                };
                tracing::debug!("scanning path directory: '{dir}'");

                for entry in entries.flatten() {
                    let path = entry.path();
                    if !path.is_file() {
                        continue;
                    }

                    match self.loader.open(&path, system) {
                        Ok(backend) => {
                            tracing::debug!("found module: '{}'", path.display());
                            return Ok(BoundBackend::new(path, backend));
                        }
                        Err(err) => {
                            tracing::debug!("skipping '{}': {err}", path.display());
                        }
                    }
                }
            }
        }

        Err(MsrflowError::NoModule {
            system: system.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs::File;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct NullBackend {
        destroys: Arc<AtomicUsize>,
    }

    impl Backend for NullBackend {
        fn coreinfo(&mut self) -> Result<CoreInfo, BackendError> {
            Ok(CoreInfo {
                num_cores: 4,
                max_id: 3,
            })
        }

        fn read_batch(&mut self, addrs: &[MsrAddr], _: &[CoreId], _: &mut [MsrVal]) -> usize {
            addrs.len()
        }

        fn write_batch(&mut self, addrs: &[MsrAddr], _: &[MsrVal], _: &[CoreId]) -> usize {
            addrs.len()
        }

        fn read_write_batch(
            &mut self,
            addrs: &[MsrAddr],
            _: &mut [MsrVal],
            _: &[CoreId],
        ) -> usize {
            addrs.len()
        }

        fn destroy(&mut self) -> Result<(), BackendError> {
            self.destroys.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Accepts every candidate whose file name is not listed in `reject`,
    /// recording each attempt.
    struct FakeLoader {
        reject: Vec<String>,
        attempts: RefCell<Vec<PathBuf>>,
        destroys: Arc<AtomicUsize>,
    }

    impl FakeLoader {
        fn new(reject: &[&str]) -> Self {
            FakeLoader {
                reject: reject.iter().map(|s| s.to_string()).collect(),
                attempts: RefCell::new(Vec::new()),
                destroys: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl ModuleLoader for FakeLoader {
        fn open(&self, path: &Path, system: &str) -> Result<Box<dyn Backend>, LoadError> {
            self.attempts.borrow_mut().push(path.to_path_buf());
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if self.reject.contains(&name) {
                return Err(LoadError::InitRejected {
                    system: system.to_string(),
                });
            }
            Ok(Box::new(NullBackend {
                destroys: Arc::clone(&self.destroys),
            }))
        }
    }

    fn scan_order(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|entry| entry.path())
            .collect()
    }

    #[test]
    fn first_candidate_in_scan_order_wins() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("mod_a.so")).unwrap();
        File::create(dir.path().join("mod_b.so")).unwrap();
        let expected = scan_order(dir.path());

        let registry = Registry::with_loader(FakeLoader::new(&[]));
        let bound = registry
            .resolve("linux", &[dir.path().display().to_string()])
            .unwrap();

        // Both candidates satisfy the contract; only the first in native
        // directory order may be attempted.
        assert_eq!(bound.name(), expected[0].display().to_string());
        assert_eq!(registry.loader.attempts.borrow().len(), 1);
    }

    #[test]
    fn rejected_candidates_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("mod_a.so")).unwrap();
        File::create(dir.path().join("mod_b.so")).unwrap();
        let expected = scan_order(dir.path());
        let first = expected[0].file_name().unwrap().to_string_lossy();

        let registry = Registry::with_loader(FakeLoader::new(&[&first]));
        let bound = registry
            .resolve("linux", &[dir.path().display().to_string()])
            .unwrap();

        assert_eq!(bound.name(), expected[1].display().to_string());
        assert_eq!(registry.loader.attempts.borrow().len(), 2);
    }

    #[test]
    fn unreadable_directory_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("mod.so")).unwrap();

        let registry = Registry::with_loader(FakeLoader::new(&[]));
        let groups = vec![
            "/nonexistent/module/dir".to_string(),
            dir.path().display().to_string(),
        ];

        assert!(registry.resolve("linux", &groups).is_ok());
    }

    #[test]
    fn colon_delimited_group_scanned_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        File::create(first.path().join("rejected.so")).unwrap();
        File::create(second.path().join("accepted.so")).unwrap();

        let registry = Registry::with_loader(FakeLoader::new(&["rejected.so"]));
        let group = format!("{}:{}", first.path().display(), second.path().display());
        let bound = registry.resolve("xen", &[group]).unwrap();

        assert!(bound.name().ends_with("accepted.so"));
        assert_eq!(registry.loader.attempts.borrow().len(), 2);
    }

    #[test]
    fn exhausted_search_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("mod.so")).unwrap();

        let registry = Registry::with_loader(FakeLoader::new(&["mod.so"]));
        let err = registry
            .resolve("xen", &[dir.path().display().to_string()])
            .unwrap_err();

        assert!(matches!(err, MsrflowError::NoModule { system } if system == "xen"));
    }

    #[test]
    fn unbind_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("mod.so")).unwrap();

        let loader = FakeLoader::new(&[]);
        let destroys = Arc::clone(&loader.destroys);
        let registry = Registry::with_loader(loader);
        let mut bound = registry
            .resolve("linux", &[dir.path().display().to_string()])
            .unwrap();

        bound.unbind();
        bound.unbind();
        drop(bound);

        assert_eq!(destroys.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unbound_backend_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("mod.so")).unwrap();

        let registry = Registry::with_loader(FakeLoader::new(&[]));
        let mut bound = registry
            .resolve("linux", &[dir.path().display().to_string()])
            .unwrap();
        bound.unbind();

        assert!(matches!(bound.coreinfo(), Err(BackendError::Unbound)));
        assert_eq!(bound.read_batch(&[0x10], &[0], &mut [0]), 0);
    }
}
