use thiserror::Error;

use crate::provenance::EngineInfo;
use crate::shape::ProblemShape;

/// Where in the measurement protocol a kernel invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelPhase {
    /// The single untimed invocation preceding the measured loop.
    Warmup,
    /// 0-based index within the timed loop.
    Iteration(usize),
}

impl std::fmt::Display for KernelPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelPhase::Warmup => write!(f, "warmup"),
            KernelPhase::Iteration(i) => write!(f, "iteration {i}"),
        }
    }
}

/// Error surfaced by backends and the timing harness.
///
/// Allocation and init failures abort before any timing; a kernel failure
/// invalidates the measurement and stops the loop at the failing
/// invocation. Provenance lookups never produce an error at all — they
/// degrade to placeholder fields instead.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Host or device buffer acquisition failed.
    #[error("allocation failed: {what}")]
    Allocation { what: String },

    /// Library, session, or device-context creation failed. Any partially
    /// acquired resources have already been released.
    #[error("backend initialization failed: {message}")]
    Init { message: String },

    /// A provider call reported non-success, outside the timed loop.
    #[error("backend execution failure: {status}")]
    Execution { status: String },

    /// A warmup or timed kernel invocation failed. Carries the provider
    /// status and where in the protocol it happened.
    #[error("kernel execution failed at {phase}: {status}")]
    Kernel { phase: KernelPhase, status: String },

    /// Operation on a handle after `release`.
    #[error("backend handle already released")]
    Released,
}

impl BackendError {
    pub fn allocation(what: impl Into<String>) -> Self {
        BackendError::Allocation { what: what.into() }
    }

    pub fn init(message: impl Into<String>) -> Self {
        BackendError::Init {
            message: message.into(),
        }
    }

    pub fn execution(status: impl Into<String>) -> Self {
        BackendError::Execution {
            status: status.into(),
        }
    }

    /// Tags a provider failure with the protocol phase it happened in.
    /// Used by the harness; already-tagged errors pass through unchanged.
    pub fn in_phase(self, phase: KernelPhase) -> Self {
        match self {
            BackendError::Execution { status } => BackendError::Kernel { phase, status },
            other => other,
        }
    }
}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// One concrete SGEMM provider plus its resource lifecycle.
///
/// The handle is created once per problem shape, reused across repeated
/// kernel calls, and destroyed once. Handle states are
/// Uninitialized → Ready → Destroyed: `prepare` produces a Ready handle,
/// `release` destroys it (idempotently), and every other operation on a
/// destroyed handle returns [`BackendError::Released`].
///
/// Computes `C = A·B` with alpha=1, beta=0, row-major, no transposes.
/// Buffer sizes are fixed by the shape given to `prepare`; `multiply`
/// rejects mismatched views.
pub trait SgemmBackend {
    type Handle;

    /// Acquires all provider resources for `shape` (device buffers,
    /// library sessions). On failure, everything partially acquired is
    /// released before the error is returned.
    fn prepare(&self, shape: ProblemShape) -> BackendResult<Self::Handle>;

    /// One SGEMM invocation. Fast path: no allocation. Device providers
    /// may enqueue asynchronously; completion is observed via
    /// [`SgemmBackend::synchronize`].
    fn multiply(
        &self,
        handle: &mut Self::Handle,
        a: &[f32],
        b: &[f32],
        c: &mut [f32],
    ) -> BackendResult<()>;

    /// Blocks until all previously enqueued kernel work has finished.
    /// The harness calls this inside the timed region, immediately before
    /// stopping the clock. Host providers have nothing to wait for.
    fn synchronize(&self, _handle: &mut Self::Handle) -> BackendResult<()> {
        Ok(())
    }

    /// One-time result readback into `c`, outside the timed region.
    /// Host providers already wrote `c` in place.
    fn finalize_output(&self, _handle: &mut Self::Handle, _c: &mut [f32]) -> BackendResult<()> {
        Ok(())
    }

    /// Destroys the handle. Idempotent: releasing an already-released
    /// handle is a no-op, never an error or a double-free.
    fn release(&self, handle: &mut Self::Handle);

    /// Reports the identity of the numeric library answering calls.
    /// Infallible: introspection failures degrade to placeholder fields.
    fn describe(&self, handle: &Self::Handle) -> EngineInfo;
}
