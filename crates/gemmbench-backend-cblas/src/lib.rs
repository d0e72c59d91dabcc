//! Host BLAS SGEMM provider.
//!
//! Binds `cblas_sgemm` from whichever BLAS shared object is installed,
//! resolved at runtime rather than link time. Which library actually
//! answers is reported through the provenance registry, so a build that
//! silently fell back from an optimized BLAS to a generic one is visible
//! in the result record.

use libloading::Library;
use log::debug;

use gemmbench::backend::{BackendError, BackendResult, SgemmBackend};
use gemmbench::provenance::{self, EngineInfo, HOST_BLAS_PROBES};
use gemmbench::shape::ProblemShape;

// CBLAS enums, stable across every implementation.
const CBLAS_ROW_MAJOR: i32 = 101;
const CBLAS_NO_TRANS: i32 = 111;

type CblasSgemmFn = unsafe extern "C" fn(
    order: i32,
    trans_a: i32,
    trans_b: i32,
    m: i32,
    n: i32,
    k: i32,
    alpha: f32,
    a: *const f32,
    lda: i32,
    b: *const f32,
    ldb: i32,
    beta: f32,
    c: *mut f32,
    ldc: i32,
);

/// Shared objects probed for `cblas_sgemm`, in order. The first one that
/// loads and exports the symbol wins.
const LIBRARY_CANDIDATES: &[&str] = &[
    "libopenblas.so.0",
    "libopenblas.so",
    "libcblas.so.3",
    "libcblas.so",
    "libblis.so.4",
    "libblis.so",
    "libmkl_rt.so.2",
    "libmkl_rt.so",
    "libopenblas.dylib",
    "libcblas.dylib",
];

pub struct CblasBackend;

impl CblasBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CblasBackend {
    fn default() -> Self {
        Self::new()
    }
}

struct CblasInner {
    // Keeps the provider mapped for as long as the copied fn pointer is
    // callable.
    _lib: Library,
    sgemm: CblasSgemmFn,
    shape: ProblemShape,
}

pub struct CblasHandle {
    inner: Option<CblasInner>,
}

fn load_blas_library() -> BackendResult<(Library, CblasSgemmFn)> {
    for candidate in LIBRARY_CANDIDATES {
        // SAFETY: dynamic library probe; no symbols invoked here.
        let lib = match unsafe { Library::new(candidate) } {
            Ok(lib) => lib,
            Err(_) => continue,
        };
        // SAFETY: symbol type matches the CBLAS sgemm prototype.
        match unsafe { lib.get::<CblasSgemmFn>(b"cblas_sgemm\0") } {
            Ok(sym) => {
                debug!("bound cblas_sgemm from {candidate}");
                let sgemm = *sym;
                drop(sym);
                return Ok((lib, sgemm));
            }
            Err(_) => continue,
        }
    }
    Err(BackendError::init(format!(
        "no host BLAS providing cblas_sgemm found (tried {})",
        LIBRARY_CANDIDATES.join(", ")
    )))
}

fn as_i32(dim: usize, what: &str) -> BackendResult<i32> {
    i32::try_from(dim).map_err(|_| BackendError::execution(format!("{what} exceeds i32 range")))
}

impl SgemmBackend for CblasBackend {
    type Handle = CblasHandle;

    fn prepare(&self, shape: ProblemShape) -> BackendResult<Self::Handle> {
        let (lib, sgemm) = load_blas_library()?;
        Ok(CblasHandle {
            inner: Some(CblasInner {
                _lib: lib,
                sgemm,
                shape,
            }),
        })
    }

    fn multiply(
        &self,
        handle: &mut Self::Handle,
        a: &[f32],
        b: &[f32],
        c: &mut [f32],
    ) -> BackendResult<()> {
        let inner = handle.inner.as_ref().ok_or(BackendError::Released)?;
        inner.shape.check_buffers(a, b, c)?;
        let ProblemShape { m, n, k } = inner.shape;
        let (m_i32, n_i32, k_i32) = (
            as_i32(m, "matrix dimension m")?,
            as_i32(n, "matrix dimension n")?,
            as_i32(k, "matrix dimension k")?,
        );

        // Row-major C = A·B, no transposes: lda=K, ldb=N, ldc=N.
        // SAFETY: slices were validated against the prepared shape and the
        // fn pointer stays valid while `_lib` is held by the handle.
        unsafe {
            (inner.sgemm)(
                CBLAS_ROW_MAJOR,
                CBLAS_NO_TRANS,
                CBLAS_NO_TRANS,
                m_i32,
                n_i32,
                k_i32,
                1.0,
                a.as_ptr(),
                k_i32,
                b.as_ptr(),
                n_i32,
                0.0,
                c.as_mut_ptr(),
                n_i32,
            );
        }
        Ok(())
    }

    fn release(&self, handle: &mut Self::Handle) {
        // Dropping the inner state unmaps the library; second call finds
        // None and does nothing.
        handle.inner.take();
    }

    fn describe(&self, handle: &Self::Handle) -> EngineInfo {
        match handle.inner.as_ref() {
            Some(inner) => provenance::resolve(
                inner.sgemm as *const std::ffi::c_void,
                HOST_BLAS_PROBES,
            ),
            None => EngineInfo::unknown(),
        }
    }
}
