use gemmbench::backend::{BackendError, SgemmBackend};
use gemmbench::clock::SystemClock;
use gemmbench::fill::lcg_fill;
use gemmbench::harness::run_timed;
use gemmbench::shape::ProblemShape;
use gemmbench_backend_ref::{sgemm_ref, RefBackend};

#[test]
fn small_integer_inputs_multiply_exactly() {
    // Integer-valued f32 inputs small enough that every multiply-add is
    // exact, so the triple loop must match the hand-computed product
    // bit-for-bit.
    let shape = ProblemShape::new(2, 3, 2).expect("shape");
    let a = [1.0, 2.0, 3.0, 4.0]; // 2x2
    let b = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]; // 2x3
    let mut c = [0.0f32; 6];

    let backend = RefBackend::new();
    let mut handle = backend.prepare(shape).expect("prepare");
    backend
        .multiply(&mut handle, &a, &b, &mut c)
        .expect("multiply");

    assert_eq!(c, [9.0, 12.0, 15.0, 19.0, 26.0, 33.0]);
    backend.release(&mut handle);
}

#[test]
fn identity_matrix_is_a_fixed_point() {
    let shape = ProblemShape::new(3, 3, 3).expect("shape");
    let mut a = vec![0.0f32; 9];
    lcg_fill(&mut a, 5);
    let eye = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
    let mut c = vec![0.0f32; 9];

    sgemm_ref(shape, &a, &eye, &mut c);
    assert_eq!(a, c);
}

#[test]
fn multiply_is_idempotent_for_identical_inputs() {
    let shape = ProblemShape::new(5, 4, 6).expect("shape");
    let mut a = vec![0.0f32; shape.a_len()];
    let mut b = vec![0.0f32; shape.b_len()];
    lcg_fill(&mut a, 1);
    lcg_fill(&mut b, 2);

    let backend = RefBackend::new();
    let mut handle = backend.prepare(shape).expect("prepare");

    let mut first = vec![0.0f32; shape.c_len()];
    backend
        .multiply(&mut handle, &a, &b, &mut first)
        .expect("first multiply");

    // Freshly reset output, identical inputs: no hidden accumulation.
    let mut second = vec![0.0f32; shape.c_len()];
    backend
        .multiply(&mut handle, &a, &b, &mut second)
        .expect("second multiply");

    assert_eq!(first, second);
}

#[test]
fn mismatched_buffers_are_rejected() {
    let shape = ProblemShape::new(4, 4, 4).expect("shape");
    let backend = RefBackend::new();
    let mut handle = backend.prepare(shape).expect("prepare");

    let a = vec![0.0f32; shape.a_len()];
    let b = vec![0.0f32; shape.b_len() + 1];
    let mut c = vec![0.0f32; shape.c_len()];
    let err = backend
        .multiply(&mut handle, &a, &b, &mut c)
        .expect_err("wrong B size");
    assert!(matches!(err, BackendError::Execution { .. }));
}

#[test]
fn double_release_is_a_noop_and_use_after_release_errors() {
    let shape = ProblemShape::new(2, 2, 2).expect("shape");
    let backend = RefBackend::new();
    let mut handle = backend.prepare(shape).expect("prepare");

    backend.release(&mut handle);
    backend.release(&mut handle); // second release must not crash

    let a = vec![0.0f32; 4];
    let b = vec![0.0f32; 4];
    let mut c = vec![0.0f32; 4];
    let err = backend
        .multiply(&mut handle, &a, &b, &mut c)
        .expect_err("multiply after release");
    assert!(matches!(err, BackendError::Released));
}

#[test]
fn end_to_end_square_4_matches_triple_loop() {
    // The canonical cross-provider scenario: M=N=K=4, repeats=1, LCG
    // seeds 1 and 2. For the reference provider the harness output must
    // equal a direct kernel call bit-for-bit.
    let shape = ProblemShape::new(4, 4, 4).expect("shape");
    let mut a = vec![0.0f32; shape.a_len()];
    let mut b = vec![0.0f32; shape.b_len()];
    lcg_fill(&mut a, 1);
    lcg_fill(&mut b, 2);

    let mut expected = vec![0.0f32; shape.c_len()];
    sgemm_ref(shape, &a, &b, &mut expected);

    let backend = RefBackend::new();
    let mut handle = backend.prepare(shape).expect("prepare");
    let mut c = vec![0.0f32; shape.c_len()];
    let clock = SystemClock::new();
    let timing = run_timed(&backend, &mut handle, &a, &b, &mut c, 1, &clock).expect("timed run");
    backend.release(&mut handle);

    assert_eq!(timing.repeats, 1);
    assert!(timing.elapsed_sec >= 0.0);
    assert_eq!(c, expected);
}

#[test]
fn describe_reports_reference_engine() {
    let backend = RefBackend::new();
    let handle = backend.prepare(ProblemShape::new(2, 2, 2).expect("shape")).expect("prepare");
    let info = backend.describe(&handle);
    assert_eq!(info.name, "reference");
    assert!(info.version.is_some());
    assert!(info.device.is_none());
}
