//! Reference SGEMM provider: a deterministic triple-nested loop.
//!
//! Serves as the portability fallback and as the GFLOP/s floor every
//! accelerated provider is compared against. No provider resources beyond
//! the shape recorded at `prepare`.

use gemmbench::backend::{BackendError, BackendResult, SgemmBackend};
use gemmbench::provenance::EngineInfo;
use gemmbench::shape::ProblemShape;

pub struct RefBackend;

impl RefBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RefBackend {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RefHandle {
    shape: Option<ProblemShape>,
}

/// Row-major C = A·B, alpha=1, beta=0. O(M·N·K) scalar multiply-adds,
/// no accumulation across calls: C is fully overwritten.
pub fn sgemm_ref(shape: ProblemShape, a: &[f32], b: &[f32], c: &mut [f32]) {
    let (m, n, k) = (shape.m, shape.n, shape.k);
    for i in 0..m {
        let ai = &a[i * k..(i + 1) * k];
        let ci = &mut c[i * n..(i + 1) * n];
        for j in 0..n {
            let mut sum = 0.0f32;
            for (kk, &aik) in ai.iter().enumerate() {
                sum += aik * b[kk * n + j];
            }
            ci[j] = sum;
        }
    }
}

impl SgemmBackend for RefBackend {
    type Handle = RefHandle;

    fn prepare(&self, shape: ProblemShape) -> BackendResult<Self::Handle> {
        Ok(RefHandle { shape: Some(shape) })
    }

    fn multiply(
        &self,
        handle: &mut Self::Handle,
        a: &[f32],
        b: &[f32],
        c: &mut [f32],
    ) -> BackendResult<()> {
        let shape = handle.shape.ok_or(BackendError::Released)?;
        shape.check_buffers(a, b, c)?;
        sgemm_ref(shape, a, b, c);
        Ok(())
    }

    fn release(&self, handle: &mut Self::Handle) {
        handle.shape = None;
    }

    fn describe(&self, _handle: &Self::Handle) -> EngineInfo {
        let mut info = EngineInfo::named("reference");
        info.version = Some(env!("CARGO_PKG_VERSION").to_string());
        info
    }
}
