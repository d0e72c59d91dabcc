//! Core contract for the SGEMM micro-benchmark harness.
//!
//! A benchmark run drives a single [`backend::SgemmBackend`] through a
//! uniform protocol: prepare a handle for a fixed [`shape::ProblemShape`],
//! run one untimed warmup, time `repeats` back-to-back kernel invocations
//! against an injected monotonic clock, then read the result back. The
//! [`provenance`] module identifies which concrete numeric library answered
//! the calls at runtime, independent of what was linked at build time.

pub mod backend;
pub mod clock;
pub mod fill;
pub mod harness;
pub mod provenance;
pub mod report;
pub mod shape;

pub use backend::{BackendError, BackendResult, SgemmBackend};
pub use clock::{MonotonicClock, SystemClock};
pub use harness::{run_timed, TimingResult};
pub use provenance::{DeviceInfo, EngineInfo};
pub use report::BenchRecord;
pub use shape::ProblemShape;
