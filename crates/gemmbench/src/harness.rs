use log::debug;

use crate::backend::{BackendResult, KernelPhase, SgemmBackend};
use crate::clock::MonotonicClock;
use crate::shape::ProblemShape;

/// Outcome of one timed run: elapsed wall-clock seconds covering exactly
/// `repeats` kernel invocations, nothing else.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingResult {
    pub elapsed_sec: f64,
    pub repeats: usize,
}

impl TimingResult {
    /// Sustained throughput: 2 flops per multiply-add, `2·M·N·K·repeats`
    /// total over the elapsed window.
    pub fn gflops(&self, shape: ProblemShape) -> f64 {
        let flops = 2.0 * shape.m as f64 * shape.n as f64 * shape.k as f64 * self.repeats as f64;
        flops / (self.elapsed_sec * 1e9)
    }
}

/// Drives the measurement protocol against a prepared handle:
///
/// 1. one untimed warmup invocation plus a device barrier, absorbing
///    first-call costs (library init, JIT, page faults, input upload);
/// 2. clock start;
/// 3. exactly `repeats` back-to-back invocations with no intervening host
///    work;
/// 4. device barrier, then clock stop — enqueued device work is fully
///    covered by the timed window;
/// 5. untimed one-time result readback into `c`.
///
/// A failing invocation aborts immediately with the failing phase attached;
/// the loop is never resumed and partial timings are never reported.
pub fn run_timed<B, C>(
    backend: &B,
    handle: &mut B::Handle,
    a: &[f32],
    b: &[f32],
    c: &mut [f32],
    repeats: usize,
    clock: &C,
) -> BackendResult<TimingResult>
where
    B: SgemmBackend,
    C: MonotonicClock,
{
    backend
        .multiply(handle, a, b, c)
        .map_err(|e| e.in_phase(KernelPhase::Warmup))?;
    backend
        .synchronize(handle)
        .map_err(|e| e.in_phase(KernelPhase::Warmup))?;

    let start = clock.now_sec();
    for iteration in 0..repeats {
        backend
            .multiply(handle, a, b, c)
            .map_err(|e| e.in_phase(KernelPhase::Iteration(iteration)))?;
    }
    backend
        .synchronize(handle)
        .map_err(|e| e.in_phase(KernelPhase::Iteration(repeats.saturating_sub(1))))?;
    let elapsed_sec = clock.now_sec() - start;

    backend.finalize_output(handle, c)?;

    debug!("timed {repeats} kernel invocations in {elapsed_sec:.6}s");
    Ok(TimingResult {
        elapsed_sec,
        repeats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, SgemmBackend};
    use crate::provenance::EngineInfo;
    use std::cell::Cell;

    /// Scripted clock: every sample advances by a fixed step.
    struct FakeClock {
        step: f64,
        ticks: Cell<u64>,
    }

    impl FakeClock {
        fn new(step: f64) -> Self {
            Self {
                step,
                ticks: Cell::new(0),
            }
        }

        fn samples(&self) -> u64 {
            self.ticks.get()
        }
    }

    impl MonotonicClock for FakeClock {
        fn now_sec(&self) -> f64 {
            let n = self.ticks.get();
            self.ticks.set(n + 1);
            n as f64 * self.step
        }
    }

    /// Test double that counts invocations and can fail on a chosen
    /// timed iteration.
    struct ProbeBackend {
        fail_at_timed_iteration: Option<usize>,
        fail_warmup: bool,
    }

    struct ProbeHandle {
        shape: ProblemShape,
        multiply_calls: usize,
        synchronize_calls: usize,
        finalize_calls: usize,
    }

    impl SgemmBackend for ProbeBackend {
        type Handle = ProbeHandle;

        fn prepare(&self, shape: ProblemShape) -> BackendResult<Self::Handle> {
            Ok(ProbeHandle {
                shape,
                multiply_calls: 0,
                synchronize_calls: 0,
                finalize_calls: 0,
            })
        }

        fn multiply(
            &self,
            handle: &mut Self::Handle,
            a: &[f32],
            b: &[f32],
            c: &mut [f32],
        ) -> BackendResult<()> {
            handle.shape.check_buffers(a, b, c)?;
            let call = handle.multiply_calls;
            handle.multiply_calls += 1;
            if call == 0 && self.fail_warmup {
                return Err(BackendError::execution("injected warmup failure"));
            }
            // Call 0 is the warmup; timed iteration i is call i + 1.
            if let Some(fail_at) = self.fail_at_timed_iteration {
                if call == fail_at + 1 {
                    return Err(BackendError::execution("injected status 7"));
                }
            }
            Ok(())
        }

        fn synchronize(&self, handle: &mut Self::Handle) -> BackendResult<()> {
            handle.synchronize_calls += 1;
            Ok(())
        }

        fn finalize_output(&self, handle: &mut Self::Handle, _c: &mut [f32]) -> BackendResult<()> {
            handle.finalize_calls += 1;
            Ok(())
        }

        fn release(&self, _handle: &mut Self::Handle) {}

        fn describe(&self, _handle: &Self::Handle) -> EngineInfo {
            EngineInfo::unknown()
        }
    }

    fn buffers(shape: ProblemShape) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
        (
            vec![0.0; shape.a_len()],
            vec![0.0; shape.b_len()],
            vec![0.0; shape.c_len()],
        )
    }

    #[test]
    fn timed_region_covers_exactly_repeats_invocations() {
        let backend = ProbeBackend {
            fail_at_timed_iteration: None,
            fail_warmup: false,
        };
        let shape = ProblemShape::new(2, 2, 2).expect("shape");
        let mut handle = backend.prepare(shape).expect("prepare");
        let (a, b, mut c) = buffers(shape);
        let clock = FakeClock::new(0.5);

        let timing =
            run_timed(&backend, &mut handle, &a, &b, &mut c, 7, &clock).expect("timed run");

        // Warmup plus 7 timed calls, never repeats + 1 inside the clock.
        assert_eq!(handle.multiply_calls, 8);
        assert_eq!(timing.repeats, 7);
        // Exactly two clock samples bracket the loop; warmup happens
        // before the first one.
        assert_eq!(clock.samples(), 2);
        assert!((timing.elapsed_sec - 0.5).abs() < 1e-12);
        // Barrier after warmup and at the end of the timed region.
        assert_eq!(handle.synchronize_calls, 2);
        // Readback happens once, after the clock stopped.
        assert_eq!(handle.finalize_calls, 1);
    }

    #[test]
    fn kernel_failure_stops_loop_and_reports_iteration() {
        let backend = ProbeBackend {
            fail_at_timed_iteration: Some(3),
            fail_warmup: false,
        };
        let shape = ProblemShape::new(2, 2, 2).expect("shape");
        let mut handle = backend.prepare(shape).expect("prepare");
        let (a, b, mut c) = buffers(shape);
        let clock = FakeClock::new(1.0);

        let err = run_timed(&backend, &mut handle, &a, &b, &mut c, 10, &clock)
            .expect_err("injected failure");

        match err {
            BackendError::Kernel {
                phase: KernelPhase::Iteration(i),
                status,
            } => {
                assert_eq!(i, 3);
                assert!(status.contains("status 7"));
            }
            other => panic!("expected kernel error, got {other:?}"),
        }
        // Warmup + iterations 0..=2 succeeded, iteration 3 failed, and
        // no further kernel calls were made.
        assert_eq!(handle.multiply_calls, 5);
        assert_eq!(handle.finalize_calls, 0);
    }

    #[test]
    fn warmup_failure_is_tagged_as_warmup() {
        let backend = ProbeBackend {
            fail_at_timed_iteration: None,
            fail_warmup: true,
        };
        let shape = ProblemShape::new(2, 2, 2).expect("shape");
        let mut handle = backend.prepare(shape).expect("prepare");
        let (a, b, mut c) = buffers(shape);
        let clock = FakeClock::new(1.0);

        let err = run_timed(&backend, &mut handle, &a, &b, &mut c, 4, &clock)
            .expect_err("injected warmup failure");
        assert!(matches!(
            err,
            BackendError::Kernel {
                phase: KernelPhase::Warmup,
                ..
            }
        ));
        // The clock was never sampled.
        assert_eq!(clock.samples(), 0);
    }

    #[test]
    fn gflops_scales_linearly_with_repeats() {
        let shape = ProblemShape::new(64, 64, 64).expect("shape");
        let base = TimingResult {
            elapsed_sec: 0.25,
            repeats: 1,
        };
        let tenfold = TimingResult {
            elapsed_sec: 0.25,
            repeats: 10,
        };
        let expected = 2.0 * 64.0 * 64.0 * 64.0 / (0.25 * 1e9);
        assert!((base.gflops(shape) - expected).abs() < 1e-12);
        assert!((tenfold.gflops(shape) - 10.0 * expected).abs() < 1e-9);
    }
}
