//! Deterministic matrix initialization and the informational checksum.
//!
//! Same generator across every provider so end-to-end results are
//! comparable bit-for-bit: a fixed LCG mapped into [-1, 1).

/// Fills `buf` with a deterministic pseudo-random pattern derived from
/// `seed`. A zero seed is coerced to 1 so the generator never sticks.
pub fn lcg_fill(buf: &mut [f32], seed: u32) {
    let mut x = if seed == 0 { 1 } else { seed };
    for slot in buf.iter_mut() {
        x = x.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        *slot = ((x >> 8) & 0xFFFF) as f32 / 32_768.0 - 1.0;
    }
}

/// Informational checksum over the result matrix: f64 accumulation,
/// reported at f32 precision. Not a correctness verification.
pub fn checksum(buf: &[f32]) -> f32 {
    let mut sum = 0.0f64;
    for &v in buf {
        sum += v as f64;
    }
    sum as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_is_deterministic_per_seed() {
        let mut a = vec![0.0f32; 64];
        let mut b = vec![0.0f32; 64];
        lcg_fill(&mut a, 1);
        lcg_fill(&mut b, 1);
        assert_eq!(a, b);

        lcg_fill(&mut b, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn fill_stays_in_unit_interval() {
        let mut buf = vec![0.0f32; 4096];
        lcg_fill(&mut buf, 7);
        assert!(buf.iter().all(|&v| (-1.0..1.0).contains(&v)));
    }

    #[test]
    fn zero_seed_matches_seed_one() {
        let mut a = vec![0.0f32; 16];
        let mut b = vec![0.0f32; 16];
        lcg_fill(&mut a, 0);
        lcg_fill(&mut b, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_accumulates_in_f64() {
        assert_eq!(checksum(&[]), 0.0);
        assert_eq!(checksum(&[1.5, -0.5, 2.0]), 3.0);
        // Many small values that would lose precision under naive f32
        // accumulation still sum cleanly through the f64 accumulator.
        let buf = vec![0.25f32; 1 << 20];
        assert_eq!(checksum(&buf), (1 << 18) as f32);
    }
}
