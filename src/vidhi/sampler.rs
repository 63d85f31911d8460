//! Beta and Gamma sampling for Thompson selection.
//!
//! Gamma variates come from Marsaglia-Tsang squeeze rejection for shape
//! ≥ 1, with the `Gamma(a) = Gamma(a+1) · U^{1/a}` transform below 1.
//! Beta is the usual gamma ratio; degenerate draws (underflow to a zero
//! sum) return 0.5 rather than NaN.

use rand::Rng;

/// Draw a standard normal via Box-Muller.
fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    loop {
        let u1: f64 = rng.r#gen();
        if u1 <= f64::MIN_POSITIVE {
            continue;
        }
        let u2: f64 = rng.r#gen();
        return (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
    }
}

/// Draw from Gamma(shape, 1).
///
/// Non-finite or non-positive shapes yield 0.
pub fn sample_gamma<R: Rng + ?Sized>(rng: &mut R, shape: f64) -> f64 {
    if !shape.is_finite() || shape <= 0.0 {
        return 0.0;
    }
    if shape < 1.0 {
        // Boost the shape past 1, then transform back down.
        let boosted = sample_gamma(rng, shape + 1.0);
        let u: f64 = rng.r#gen();
        return boosted * u.powf(1.0 / shape);
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let x = sample_standard_normal(rng);
        let v = (1.0 + c * x).powi(3);
        if v <= 0.0 {
            continue;
        }
        let u: f64 = rng.r#gen();
        if u < 1.0 - 0.0331 * x.powi(4) {
            return d * v;
        }
        if u.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
            return d * v;
        }
    }
}

/// Draw from Beta(alpha, beta).
///
/// Degenerate cases (zero or underflowed gamma sum) return 0.5.
pub fn sample_beta<R: Rng + ?Sized>(rng: &mut R, alpha: f64, beta: f64) -> f64 {
    let x = sample_gamma(rng, alpha);
    let y = sample_gamma(rng, beta);
    let sum = x + y;
    if !sum.is_finite() || sum <= 0.0 {
        return 0.5;
    }
    x / sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn gamma_mean_matches_shape() {
        let mut rng = rng();
        for shape in [0.5f64, 1.0, 2.5, 8.0] {
            let n = 20_000;
            let mean: f64 = (0..n).map(|_| sample_gamma(&mut rng, shape)).sum::<f64>() / n as f64;
            assert!(
                (mean - shape).abs() < shape * 0.1 + 0.05,
                "shape {shape}: mean {mean}"
            );
        }
    }

    #[test]
    fn gamma_is_nonnegative() {
        let mut rng = rng();
        for _ in 0..1_000 {
            assert!(sample_gamma(&mut rng, 0.3) >= 0.0);
        }
    }

    #[test]
    fn degenerate_shapes_return_zero() {
        let mut rng = rng();
        assert_eq!(sample_gamma(&mut rng, 0.0), 0.0);
        assert_eq!(sample_gamma(&mut rng, -1.0), 0.0);
        assert_eq!(sample_gamma(&mut rng, f64::NAN), 0.0);
    }

    #[test]
    fn beta_stays_in_unit_interval() {
        let mut rng = rng();
        for _ in 0..2_000 {
            let draw = sample_beta(&mut rng, 3.0, 2.0);
            assert!((0.0..=1.0).contains(&draw), "draw = {draw}");
        }
    }

    #[test]
    fn beta_mean_matches_parameters() {
        let mut rng = rng();
        let n = 20_000;
        let mean: f64 = (0..n).map(|_| sample_beta(&mut rng, 8.0, 2.0)).sum::<f64>() / n as f64;
        // Expected mean = 8 / (8 + 2).
        assert!((mean - 0.8).abs() < 0.02, "mean = {mean}");
    }

    #[test]
    fn degenerate_beta_returns_half() {
        let mut rng = rng();
        assert_eq!(sample_beta(&mut rng, 0.0, 0.0), 0.5);
    }

    #[test]
    fn high_evidence_separates_arms() {
        let mut rng = rng();
        let n = 2_000;
        let mut good_wins = 0;
        for _ in 0..n {
            let good = sample_beta(&mut rng, 90.0, 10.0);
            let bad = sample_beta(&mut rng, 10.0, 90.0);
            if good > bad {
                good_wins += 1;
            }
        }
        assert!(good_wins > n * 95 / 100, "good_wins = {good_wins}");
    }
}
