//! cuBLAS session owned by the backend handle: created after the driver
//! context, destroyed before it.

use std::ffi::c_void;
use std::sync::Arc;

use gemmbench::backend::{BackendError, BackendResult};
use libloading::Library;

use crate::device::{load_symbol, CudaDriver, DeviceBuffer};

type CublasStatus = i32;
type CublasHandle = *mut c_void;

const CUBLAS_STATUS_SUCCESS: CublasStatus = 0;
const CUBLAS_OP_N: i32 = 0;

type CublasCreateFn = unsafe extern "C" fn(handle: *mut CublasHandle) -> CublasStatus;
type CublasDestroyFn = unsafe extern "C" fn(handle: CublasHandle) -> CublasStatus;
type CublasGetVersionFn =
    unsafe extern "C" fn(handle: CublasHandle, version: *mut i32) -> CublasStatus;
type CublasSgemmFn = unsafe extern "C" fn(
    handle: CublasHandle,
    transa: i32,
    transb: i32,
    m: i32,
    n: i32,
    k: i32,
    alpha: *const f32,
    a: *const f32,
    lda: i32,
    b: *const f32,
    ldb: i32,
    beta: *const f32,
    c: *mut f32,
    ldc: i32,
) -> CublasStatus;

struct CublasFns {
    create: CublasCreateFn,
    destroy: CublasDestroyFn,
    get_version: CublasGetVersionFn,
    sgemm: CublasSgemmFn,
}

pub(crate) struct CublasContext {
    _lib: Library,
    fns: CublasFns,
    handle: usize,
    driver: Arc<CudaDriver>,
}

impl Drop for CublasContext {
    fn drop(&mut self) {
        if self.handle != 0 {
            // SAFETY: handle is created once and destroyed once on drop.
            let _ = unsafe { (self.fns.destroy)(self.handle as CublasHandle) };
            self.handle = 0;
        }
    }
}

impl CublasContext {
    pub(crate) fn new(driver: Arc<CudaDriver>) -> BackendResult<Self> {
        let lib = load_cublas_library()?;
        let fns = CublasFns {
            create: load_symbol(&lib, b"cublasCreate_v2\0")?,
            destroy: load_symbol(&lib, b"cublasDestroy_v2\0")?,
            get_version: load_symbol(&lib, b"cublasGetVersion_v2\0")?,
            sgemm: load_symbol(&lib, b"cublasSgemm_v2\0")?,
        };

        driver.ensure_current()?;
        let mut handle: CublasHandle = std::ptr::null_mut();
        // SAFETY: cublasCreate_v2 initializes the out handle pointer.
        unsafe {
            check_cublas(
                (fns.create)(&mut handle as *mut CublasHandle),
                "cublasCreate_v2",
            )
            .map_err(|err| BackendError::init(err.to_string()))?;
        }

        Ok(Self {
            _lib: lib,
            fns,
            handle: handle as usize,
            driver,
        })
    }

    /// Enqueues row-major `C = A·B` on the default stream. Asynchronous
    /// with respect to the host; the caller observes completion through
    /// the driver barrier.
    pub(crate) fn sgemm_row_major(
        &self,
        a: &DeviceBuffer,
        b: &DeviceBuffer,
        c: &DeviceBuffer,
        m: usize,
        n: usize,
        k: usize,
    ) -> BackendResult<()> {
        let m_i32 = i32::try_from(m)
            .map_err(|_| BackendError::execution("matrix dimension m exceeds i32"))?;
        let n_i32 = i32::try_from(n)
            .map_err(|_| BackendError::execution("matrix dimension n exceeds i32"))?;
        let k_i32 = i32::try_from(k)
            .map_err(|_| BackendError::execution("matrix dimension k exceeds i32"))?;

        self.driver.ensure_current()?;
        let alpha = 1.0f32;
        let beta = 0.0f32;
        // Row-major C = A·B through the column-major API: C^T = B^T·A^T,
        // so the operand order and m/n swap.
        // SAFETY: pointers are live device allocations sized for m, n, k;
        // alpha/beta are host pointers (default cuBLAS pointer mode).
        unsafe {
            check_cublas(
                (self.fns.sgemm)(
                    self.handle as CublasHandle,
                    CUBLAS_OP_N,
                    CUBLAS_OP_N,
                    n_i32,
                    m_i32,
                    k_i32,
                    &alpha,
                    b.device_ptr() as usize as *const f32,
                    n_i32,
                    a.device_ptr() as usize as *const f32,
                    k_i32,
                    &beta,
                    c.device_ptr() as usize as *mut f32,
                    n_i32,
                ),
                "cublasSgemm_v2",
            )?;
        }
        Ok(())
    }

    /// Library version as reported by the running cuBLAS, e.g. `12.4.3`.
    pub(crate) fn version_string(&self) -> Option<String> {
        let mut version: i32 = 0;
        // SAFETY: valid handle and out pointer.
        let rc = unsafe { (self.fns.get_version)(self.handle as CublasHandle, &mut version) };
        if rc != CUBLAS_STATUS_SUCCESS || version <= 0 {
            return None;
        }
        let major = version / 10000;
        let minor = (version % 10000) / 100;
        let patch = version % 100;
        Some(format!("{major}.{minor}.{patch}"))
    }

    /// Address of the SGEMM entry point actually invoked, for module
    /// attribution.
    pub(crate) fn sgemm_addr(&self) -> *const c_void {
        self.fns.sgemm as *const c_void
    }
}

fn load_cublas_library() -> BackendResult<Library> {
    let candidates = [
        "libcublas.so.12",
        "libcublas.so.11",
        "libcublas.so",
        "cublas64_12.dll",
        "cublas64_11.dll",
    ];

    for candidate in candidates {
        // SAFETY: dynamic library probe only.
        if let Ok(lib) = unsafe { Library::new(candidate) } {
            return Ok(lib);
        }
    }

    Err(BackendError::init(
        "failed to load cuBLAS library (tried libcublas.so.12, libcublas.so.11, libcublas.so, cublas64_12.dll, cublas64_11.dll)",
    ))
}

fn check_cublas(status: CublasStatus, call: &str) -> BackendResult<()> {
    if status == CUBLAS_STATUS_SUCCESS {
        Ok(())
    } else {
        Err(BackendError::execution(format!(
            "cuBLAS call {call} failed with status {status}"
        )))
    }
}
