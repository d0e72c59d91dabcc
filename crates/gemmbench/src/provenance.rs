//! Runtime identity of the numeric library answering SGEMM calls.
//!
//! Build-time linkage says nothing about which shared object actually
//! resolves a symbol once the process is running. Given the address of the
//! entry point a backend invokes, this module finds the owning module and
//! then probes a fixed, priority-ordered registry of known introspection
//! symbols (OpenBLAS, BLIS, MKL) for a self-reported identity string.
//! First match wins; the registry order is fixed and deliberately not
//! re-ranked.
//!
//! Every lookup failure degrades to a placeholder field. Nothing in here
//! returns an error or can abort a benchmark run.

use serde::Serialize;

pub const ENGINE_UNKNOWN: &str = "unknown";

/// Longest identity string captured from a probed library.
pub const MAX_INFO_LEN: usize = 256;

/// Optional device identity for GPU providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub arch: String,
}

/// Provenance record attached to every benchmark report.
///
/// Optional fields are omitted from JSON when inapplicable, never null.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
}

impl EngineInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            config: None,
            module: None,
            device: None,
        }
    }

    /// Complete record with every field degraded to its placeholder.
    pub fn unknown() -> Self {
        Self::named(ENGINE_UNKNOWN)
    }
}

/// How a known introspection symbol reports its identity string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeSignature {
    /// `const char* f(void)` returning a static NUL-terminated string.
    CStringGetter,
    /// `void f(char* buf, int len)` filling a caller-owned buffer.
    BufferFill,
}

/// Which record field the captured string lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoField {
    Version,
    Config,
}

/// One entry of the introspection registry: symbol name, expected
/// signature, and how to present a successful capture.
#[derive(Debug, Clone, Copy)]
pub struct SymbolProbe {
    /// Reported engine name when this probe answers.
    pub engine: &'static str,
    /// NUL-terminated symbol name.
    pub symbol: &'static [u8],
    pub signature: ProbeSignature,
    pub field: InfoField,
}

/// Known host BLAS introspection entry points, tried in this order.
/// First found wins.
pub const HOST_BLAS_PROBES: &[SymbolProbe] = &[
    SymbolProbe {
        engine: "OpenBLAS",
        symbol: b"openblas_get_config\0",
        signature: ProbeSignature::CStringGetter,
        field: InfoField::Config,
    },
    SymbolProbe {
        engine: "BLIS",
        symbol: b"bli_info_get_version_str\0",
        signature: ProbeSignature::CStringGetter,
        field: InfoField::Version,
    },
    SymbolProbe {
        engine: "MKL",
        symbol: b"mkl_get_version_string\0",
        signature: ProbeSignature::BufferFill,
        field: InfoField::Version,
    },
];

/// Resolves the provenance record for the library backing `entry_point`.
///
/// The module path comes from the dynamic loader; the identity string from
/// the first registry probe whose symbol exists either in that module or
/// anywhere in the global namespace. All failures degrade silently:
/// no known symbol → record with just the module path; no module either →
/// [`EngineInfo::unknown`].
pub fn resolve(entry_point: *const std::ffi::c_void, probes: &[SymbolProbe]) -> EngineInfo {
    let module = module_of(entry_point);

    if let Some(mut info) = imp::probe_registry(module.as_deref(), probes) {
        info.module = module;
        return info;
    }

    match module {
        Some(path) => {
            let mut info = EngineInfo::unknown();
            info.module = Some(path);
            info
        }
        None => EngineInfo::unknown(),
    }
}

/// Path of the loaded module that owns `entry_point`, if the dynamic
/// loader can attribute it.
pub fn module_of(entry_point: *const std::ffi::c_void) -> Option<String> {
    imp::module_of(entry_point)
}

/// Truncates to the capture bound and replaces invalid UTF-8 rather than
/// rejecting the string.
pub(crate) fn bounded_lossy(bytes: &[u8]) -> String {
    let end = bytes.len().min(MAX_INFO_LEN);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(unix)]
mod imp {
    use super::{
        bounded_lossy, EngineInfo, InfoField, ProbeSignature, SymbolProbe, MAX_INFO_LEN,
    };
    use libloading::os::unix::Library;
    use log::debug;
    use std::ffi::{c_char, c_int, CStr};

    type CStringGetterFn = unsafe extern "C" fn() -> *const c_char;
    type BufferFillFn = unsafe extern "C" fn(buf: *mut c_char, len: c_int);

    pub(super) fn module_of(entry_point: *const std::ffi::c_void) -> Option<String> {
        if entry_point.is_null() {
            return None;
        }
        let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
        // SAFETY: dladdr only inspects loader metadata for the address;
        // `info` is a valid out pointer.
        let rc = unsafe { libc::dladdr(entry_point, &mut info) };
        if rc == 0 || info.dli_fname.is_null() {
            return None;
        }
        // SAFETY: dli_fname points at a NUL-terminated path owned by the
        // loader for the lifetime of the mapping.
        let path = unsafe { CStr::from_ptr(info.dli_fname) };
        Some(bounded_lossy(path.to_bytes()))
    }

    /// Tries each probe against the owning module first (without loading
    /// anything new into the process), then the global namespace.
    pub(super) fn probe_registry(
        module: Option<&str>,
        probes: &[SymbolProbe],
    ) -> Option<EngineInfo> {
        let local = module.and_then(open_resident);
        let global = Library::this();

        for probe in probes {
            let captured = local
                .as_ref()
                .and_then(|lib| invoke_probe(lib, probe))
                .or_else(|| invoke_probe(&global, probe));
            if let Some(value) = captured {
                let mut info = EngineInfo::named(probe.engine);
                match probe.field {
                    InfoField::Version => info.version = Some(value),
                    InfoField::Config => info.config = Some(value),
                }
                return Some(info);
            }
        }
        None
    }

    /// Re-opens an already-mapped module without loading it afresh.
    fn open_resident(path: &str) -> Option<Library> {
        // SAFETY: RTLD_NOLOAD only bumps the refcount of a mapping that is
        // already resident; no initializers run.
        unsafe { Library::open(Some(path), libc::RTLD_NOLOAD | libc::RTLD_LAZY).ok() }
    }

    fn invoke_probe(lib: &Library, probe: &SymbolProbe) -> Option<String> {
        match probe.signature {
            ProbeSignature::CStringGetter => {
                // SAFETY: symbol type is the documented signature for this
                // registry entry.
                let getter = unsafe { lib.get::<CStringGetterFn>(probe.symbol) }.ok()?;
                // SAFETY: registry getters return a static NUL-terminated
                // string or NULL.
                let ptr = unsafe { getter() };
                if ptr.is_null() {
                    debug!(
                        "introspection symbol {} returned NULL",
                        String::from_utf8_lossy(probe.symbol)
                    );
                    return None;
                }
                // SAFETY: non-NULL return is a valid C string per the
                // library contract; capture is bounded afterwards.
                let bytes = unsafe { CStr::from_ptr(ptr) }.to_bytes();
                Some(bounded_lossy(bytes))
            }
            ProbeSignature::BufferFill => {
                // SAFETY: symbol type is the documented signature for this
                // registry entry.
                let fill = unsafe { lib.get::<BufferFillFn>(probe.symbol) }.ok()?;
                let mut buf = [0u8; MAX_INFO_LEN];
                // SAFETY: the callee writes at most `len` bytes into the
                // caller-owned buffer and NUL-terminates.
                unsafe { fill(buf.as_mut_ptr() as *mut c_char, buf.len() as c_int) };
                let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
                if end == 0 {
                    return None;
                }
                Some(bounded_lossy(&buf[..end]))
            }
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use super::{EngineInfo, SymbolProbe};

    pub(super) fn module_of(_entry_point: *const std::ffi::c_void) -> Option<String> {
        None
    }

    pub(super) fn probe_registry(
        _module: Option<&str>,
        _probes: &[SymbolProbe],
    ) -> Option<EngineInfo> {
        None
    }
}
