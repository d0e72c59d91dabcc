use serde::Serialize;

use crate::backend::{BackendError, BackendResult};

/// Immutable problem dimensions for one benchmark run.
///
/// A is M×K, B is K×N, C is M×N, all row-major `f32`. A shape is fixed for
/// the lifetime of a backend handle; buffer sizes derived from it never
/// change after `prepare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProblemShape {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl ProblemShape {
    pub fn new(m: usize, n: usize, k: usize) -> BackendResult<Self> {
        if m == 0 || n == 0 || k == 0 {
            return Err(BackendError::execution(format!(
                "problem dimensions must be positive (got M={m}, N={n}, K={k})"
            )));
        }
        Ok(Self { m, n, k })
    }

    /// Square default: M = N.
    pub fn square(n: usize, k: usize) -> BackendResult<Self> {
        Self::new(n, n, k)
    }

    pub fn a_len(&self) -> usize {
        self.m * self.k
    }

    pub fn b_len(&self) -> usize {
        self.k * self.n
    }

    pub fn c_len(&self) -> usize {
        self.m * self.n
    }

    pub fn a_bytes(&self) -> usize {
        self.a_len() * std::mem::size_of::<f32>()
    }

    pub fn b_bytes(&self) -> usize {
        self.b_len() * std::mem::size_of::<f32>()
    }

    pub fn c_bytes(&self) -> usize {
        self.c_len() * std::mem::size_of::<f32>()
    }

    /// Total host footprint of the three matrices, for the report.
    pub fn total_bytes(&self) -> u64 {
        self.a_bytes() as u64 + self.b_bytes() as u64 + self.c_bytes() as u64
    }

    /// Checks caller-supplied buffer views against the shape fixed at
    /// `prepare` time. Backends call this at the top of `multiply`.
    pub fn check_buffers(&self, a: &[f32], b: &[f32], c: &[f32]) -> BackendResult<()> {
        if a.len() != self.a_len() || b.len() != self.b_len() || c.len() != self.c_len() {
            return Err(BackendError::execution(format!(
                "buffer sizes do not match prepared shape {}x{}x{}: \
                 got A={}, B={}, C={} (want {}, {}, {})",
                self.m,
                self.n,
                self.k,
                a.len(),
                b.len(),
                c.len(),
                self.a_len(),
                self.b_len(),
                self.c_len()
            )));
        }
        Ok(())
    }
}
