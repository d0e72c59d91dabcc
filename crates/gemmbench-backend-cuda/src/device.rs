//! Minimal CUDA driver API surface for the device SGEMM provider:
//! one context, shape-sized buffers, transfers, and the synchronization
//! barrier the timing protocol requires.

use std::ffi::c_void;
use std::sync::{Arc, OnceLock};

use gemmbench::backend::{BackendError, BackendResult};
use gemmbench::provenance::DeviceInfo;
use libloading::Library;

type CUresult = i32;
type CUdevice = i32;
type CUcontext = *mut c_void;
type CUdeviceptr = u64;

const CUDA_SUCCESS: CUresult = 0;
const CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR: i32 = 75;
const CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR: i32 = 76;

type CuInitFn = unsafe extern "C" fn(flags: u32) -> CUresult;
type CuDeviceGetFn = unsafe extern "C" fn(device: *mut CUdevice, ordinal: i32) -> CUresult;
type CuDeviceGetNameFn =
    unsafe extern "C" fn(name: *mut i8, len: i32, dev: CUdevice) -> CUresult;
type CuDeviceGetAttributeFn =
    unsafe extern "C" fn(value: *mut i32, attrib: i32, dev: CUdevice) -> CUresult;
type CuCtxCreateV2Fn =
    unsafe extern "C" fn(ctx: *mut CUcontext, flags: u32, dev: CUdevice) -> CUresult;
type CuCtxDestroyV2Fn = unsafe extern "C" fn(ctx: CUcontext) -> CUresult;
type CuCtxSetCurrentFn = unsafe extern "C" fn(ctx: CUcontext) -> CUresult;
type CuCtxSynchronizeFn = unsafe extern "C" fn() -> CUresult;
type CuMemAllocV2Fn = unsafe extern "C" fn(dptr: *mut CUdeviceptr, bytesize: usize) -> CUresult;
type CuMemFreeV2Fn = unsafe extern "C" fn(dptr: CUdeviceptr) -> CUresult;
type CuMemcpyHtoDV2Fn = unsafe extern "C" fn(
    dst_device: CUdeviceptr,
    src_host: *const c_void,
    byte_count: usize,
) -> CUresult;
type CuMemcpyDtoHV2Fn = unsafe extern "C" fn(
    dst_host: *mut c_void,
    src_device: CUdeviceptr,
    byte_count: usize,
) -> CUresult;
type CuMemsetD8V2Fn =
    unsafe extern "C" fn(dst_device: CUdeviceptr, value: u8, count: usize) -> CUresult;

struct DriverFns {
    cu_init: CuInitFn,
    cu_device_get: CuDeviceGetFn,
    cu_device_get_name: CuDeviceGetNameFn,
    cu_device_get_attribute: CuDeviceGetAttributeFn,
    cu_ctx_create_v2: CuCtxCreateV2Fn,
    cu_ctx_destroy_v2: CuCtxDestroyV2Fn,
    cu_ctx_set_current: CuCtxSetCurrentFn,
    cu_ctx_synchronize: CuCtxSynchronizeFn,
    cu_mem_alloc_v2: CuMemAllocV2Fn,
    cu_mem_free_v2: CuMemFreeV2Fn,
    cu_memcpy_hto_d_v2: CuMemcpyHtoDV2Fn,
    cu_memcpy_dto_h_v2: CuMemcpyDtoHV2Fn,
    cu_memset_d8_v2: CuMemsetD8V2Fn,
}

/// Process-wide CUDA driver context. Created lazily on the first
/// `prepare`; destroyed when the last Arc drops at process exit, after
/// every handle-owned buffer and session is gone.
pub struct CudaDriver {
    _lib: Library,
    fns: DriverFns,
    device: CUdevice,
    // Stored as usize so the driver stays Send/Sync.
    ctx: usize,
}

impl Drop for CudaDriver {
    fn drop(&mut self) {
        if self.ctx != 0 {
            // SAFETY: context is owned by this driver and destroyed once.
            let _ = unsafe { (self.fns.cu_ctx_destroy_v2)(self.ctx_ptr()) };
            self.ctx = 0;
        }
    }
}

static CUDA_DRIVER: OnceLock<Result<Arc<CudaDriver>, String>> = OnceLock::new();

pub fn is_available() -> bool {
    driver().is_ok()
}

pub fn driver() -> BackendResult<Arc<CudaDriver>> {
    let init = CUDA_DRIVER.get_or_init(|| match CudaDriver::new() {
        Ok(driver) => Ok(Arc::new(driver)),
        Err(err) => Err(err.to_string()),
    });
    match init {
        Ok(driver) => Ok(Arc::clone(driver)),
        Err(msg) => Err(BackendError::init(format!("CUDA driver unavailable: {msg}"))),
    }
}

impl CudaDriver {
    fn new() -> BackendResult<Self> {
        let lib = load_cuda_library()?;
        let fns = DriverFns {
            cu_init: load_symbol(&lib, b"cuInit\0")?,
            cu_device_get: load_symbol(&lib, b"cuDeviceGet\0")?,
            cu_device_get_name: load_symbol(&lib, b"cuDeviceGetName\0")?,
            cu_device_get_attribute: load_symbol(&lib, b"cuDeviceGetAttribute\0")?,
            cu_ctx_create_v2: load_symbol(&lib, b"cuCtxCreate_v2\0")?,
            cu_ctx_destroy_v2: load_symbol(&lib, b"cuCtxDestroy_v2\0")?,
            cu_ctx_set_current: load_symbol(&lib, b"cuCtxSetCurrent\0")?,
            cu_ctx_synchronize: load_symbol(&lib, b"cuCtxSynchronize\0")?,
            cu_mem_alloc_v2: load_symbol(&lib, b"cuMemAlloc_v2\0")?,
            cu_mem_free_v2: load_symbol(&lib, b"cuMemFree_v2\0")?,
            cu_memcpy_hto_d_v2: load_symbol(&lib, b"cuMemcpyHtoD_v2\0")?,
            cu_memcpy_dto_h_v2: load_symbol(&lib, b"cuMemcpyDtoH_v2\0")?,
            cu_memset_d8_v2: load_symbol(&lib, b"cuMemsetD8_v2\0")?,
        };

        // SAFETY: calls follow the CUDA driver API contract with valid
        // out pointers.
        unsafe {
            check_cu((fns.cu_init)(0), "cuInit")?;
            let mut dev: CUdevice = 0;
            check_cu(
                (fns.cu_device_get)(&mut dev as *mut CUdevice, 0),
                "cuDeviceGet",
            )?;
            let mut ctx: CUcontext = std::ptr::null_mut();
            check_cu(
                (fns.cu_ctx_create_v2)(&mut ctx as *mut CUcontext, 0, dev),
                "cuCtxCreate_v2",
            )?;
            check_cu((fns.cu_ctx_set_current)(ctx), "cuCtxSetCurrent")?;
            Ok(Self {
                _lib: lib,
                fns,
                device: dev,
                ctx: ctx as usize,
            })
        }
    }

    pub fn ensure_current(&self) -> BackendResult<()> {
        // SAFETY: context was created by this driver and lives until drop.
        unsafe { check_cu((self.fns.cu_ctx_set_current)(self.ctx_ptr()), "cuCtxSetCurrent") }
    }

    /// Device barrier: blocks until all enqueued work has completed.
    pub fn synchronize(&self) -> BackendResult<()> {
        self.ensure_current()?;
        // SAFETY: no arguments; synchronizes the current context.
        unsafe { check_cu((self.fns.cu_ctx_synchronize)(), "cuCtxSynchronize") }
    }

    pub fn alloc(self: &Arc<Self>, bytes: usize) -> BackendResult<DeviceBuffer> {
        self.ensure_current()?;
        let mut ptr: CUdeviceptr = 0;
        // SAFETY: `ptr` is a valid out pointer for the allocation.
        unsafe {
            (check_cu(
                (self.fns.cu_mem_alloc_v2)(&mut ptr as *mut CUdeviceptr, bytes),
                "cuMemAlloc_v2",
            ))
            .map_err(|err| BackendError::allocation(format!("device buffer ({bytes} bytes): {err}")))?;
        }
        Ok(DeviceBuffer {
            driver: Arc::clone(self),
            ptr,
            bytes,
        })
    }

    /// Device name plus compute capability as an `sm_XY` architecture tag.
    pub fn device_info(&self) -> Option<DeviceInfo> {
        let mut name_buf = [0u8; 128];
        let mut major: i32 = 0;
        let mut minor: i32 = 0;
        // SAFETY: out buffers are valid and sized; device ordinal came
        // from cuDeviceGet.
        let ok = unsafe {
            (self.fns.cu_device_get_name)(
                name_buf.as_mut_ptr() as *mut i8,
                name_buf.len() as i32,
                self.device,
            ) == CUDA_SUCCESS
                && (self.fns.cu_device_get_attribute)(
                    &mut major,
                    CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR,
                    self.device,
                ) == CUDA_SUCCESS
                && (self.fns.cu_device_get_attribute)(
                    &mut minor,
                    CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR,
                    self.device,
                ) == CUDA_SUCCESS
        };
        if !ok {
            return None;
        }
        let end = name_buf.iter().position(|&b| b == 0).unwrap_or(name_buf.len());
        Some(DeviceInfo {
            name: String::from_utf8_lossy(&name_buf[..end]).into_owned(),
            arch: format!("sm_{major}{minor}"),
        })
    }

    fn ctx_ptr(&self) -> CUcontext {
        self.ctx as CUcontext
    }
}

/// One device allocation, sized at `prepare` and freed exactly once on
/// drop.
pub struct DeviceBuffer {
    driver: Arc<CudaDriver>,
    ptr: CUdeviceptr,
    bytes: usize,
}

impl DeviceBuffer {
    pub fn device_ptr(&self) -> u64 {
        self.ptr
    }

    pub fn upload_f32(&self, src: &[f32]) -> BackendResult<()> {
        let byte_count = std::mem::size_of_val(src);
        if byte_count != self.bytes {
            return Err(BackendError::execution(format!(
                "upload size {byte_count} does not match buffer size {}",
                self.bytes
            )));
        }
        self.driver.ensure_current()?;
        // SAFETY: destination is a live device allocation of `bytes`;
        // source host slice covers exactly that range.
        unsafe {
            check_cu(
                (self.driver.fns.cu_memcpy_hto_d_v2)(
                    self.ptr,
                    src.as_ptr() as *const c_void,
                    byte_count,
                ),
                "cuMemcpyHtoD_v2",
            )
        }
    }

    pub fn download_f32(&self, dst: &mut [f32]) -> BackendResult<()> {
        let byte_count = std::mem::size_of_val(dst);
        if byte_count != self.bytes {
            return Err(BackendError::execution(format!(
                "download size {byte_count} does not match buffer size {}",
                self.bytes
            )));
        }
        self.driver.ensure_current()?;
        // SAFETY: source is a live device allocation of `bytes`;
        // destination host slice is writable for that range.
        unsafe {
            check_cu(
                (self.driver.fns.cu_memcpy_dto_h_v2)(
                    dst.as_mut_ptr() as *mut c_void,
                    self.ptr,
                    byte_count,
                ),
                "cuMemcpyDtoH_v2",
            )
        }
    }

    pub fn zero(&self) -> BackendResult<()> {
        self.driver.ensure_current()?;
        // SAFETY: memset count is bounded by the allocation size.
        unsafe {
            check_cu(
                (self.driver.fns.cu_memset_d8_v2)(self.ptr, 0, self.bytes),
                "cuMemsetD8_v2",
            )
        }
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        // SAFETY: pointer was allocated by this driver and freed once.
        let _ = unsafe { (self.driver.fns.cu_mem_free_v2)(self.ptr) };
    }
}

fn load_cuda_library() -> BackendResult<Library> {
    let candidates = ["libcuda.so.1", "libcuda.so", "nvcuda.dll", "libcuda.dylib"];

    for candidate in candidates {
        // SAFETY: dynamic library probe only; no symbols invoked here.
        if let Ok(lib) = unsafe { Library::new(candidate) } {
            return Ok(lib);
        }
    }

    Err(BackendError::init(
        "failed to load CUDA driver library (tried libcuda.so.1, libcuda.so, nvcuda.dll, libcuda.dylib)",
    ))
}

pub(crate) fn load_symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> BackendResult<T> {
    // SAFETY: caller provides the expected symbol type from the API.
    let sym = unsafe { lib.get::<T>(name) }.map_err(|err| {
        BackendError::init(format!(
            "failed to resolve symbol {}: {err}",
            String::from_utf8_lossy(name)
        ))
    })?;
    Ok(*sym)
}

pub(crate) fn check_cu(code: CUresult, op: &str) -> BackendResult<()> {
    if code == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(BackendError::execution(format!(
            "CUDA driver call {op} failed with code {code}"
        )))
    }
}
