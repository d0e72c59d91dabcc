//! Benchmark driver: parses the problem shape and repeat count, allocates
//! and fills host buffers, runs the timing protocol against the provider
//! compiled into this artifact, and prints the JSON result record.
//!
//! Fatal errors print a diagnostic to stderr and exit non-zero; the JSON
//! record is only emitted on full success.

use anyhow::Context;
use clap::Parser;
use log::info;

use gemmbench::backend::{BackendError, SgemmBackend};
use gemmbench::clock::SystemClock;
use gemmbench::fill::{checksum, lcg_fill};
use gemmbench::harness::run_timed;
use gemmbench::report::BenchRecord;
use gemmbench::shape::ProblemShape;

// The active provider is a build-configuration choice; exactly one is
// compiled in, with the reference loop as the default.
#[cfg(feature = "cuda")]
use gemmbench_backend_cuda::CudaBackend as ActiveBackend;

#[cfg(all(feature = "cblas", not(feature = "cuda")))]
use gemmbench_backend_cblas::CblasBackend as ActiveBackend;

#[cfg(not(any(feature = "cuda", feature = "cblas")))]
use gemmbench_backend_ref::RefBackend as ActiveBackend;

/// Dense single-precision matrix-multiply micro-benchmark.
#[derive(Debug, Parser)]
#[command(name = "gemmbench", version)]
struct Args {
    /// Columns of B and C; also rows of A and C (square default: M = N).
    #[arg(default_value_t = 2048, value_parser = clap::value_parser!(u64).range(1..))]
    n: u64,

    /// Inner dimension: columns of A, rows of B.
    #[arg(default_value_t = 2048, value_parser = clap::value_parser!(u64).range(1..))]
    k: u64,

    /// Timed kernel invocations (warmup excluded).
    #[arg(default_value_t = 50, value_parser = clap::value_parser!(u64).range(1..))]
    repeats: u64,
}

/// Host allocation that surfaces OOM as an error instead of aborting.
fn alloc_host(len: usize, what: &str) -> Result<Vec<f32>, BackendError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| BackendError::allocation(format!("host buffer {what} ({len} elements)")))?;
    buf.resize(len, 0.0);
    Ok(buf)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let shape = ProblemShape::square(args.n as usize, args.k as usize)?;
    let repeats = args.repeats as usize;

    let mut a = alloc_host(shape.a_len(), "A")?;
    let mut b = alloc_host(shape.b_len(), "B")?;
    let mut c = alloc_host(shape.c_len(), "C")?;
    lcg_fill(&mut a, 1);
    lcg_fill(&mut b, 2);

    let backend = ActiveBackend::new();
    let mut handle = backend
        .prepare(shape)
        .context("backend initialization failed")?;

    let clock = SystemClock::new();
    let outcome = run_timed(&backend, &mut handle, &a, &b, &mut c, repeats, &clock);
    let timing = match outcome {
        Ok(timing) => timing,
        Err(err) => {
            backend.release(&mut handle);
            return Err(err).context("benchmark run failed");
        }
    };

    let engine = backend.describe(&handle);
    backend.release(&mut handle);
    info!(
        "engine {} finished {} repeats in {:.6}s",
        engine.name, timing.repeats, timing.elapsed_sec
    );

    let record = BenchRecord::new(engine, shape, timing, checksum(&c));
    println!("{}", record.to_json()?);
    Ok(())
}
