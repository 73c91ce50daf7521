//! Event quality evaluation.
//!
//! Compares the network magnitude with the median station magnitude and the
//! number of picked stations with the number of stations that delivered
//! data, then maps both discrepancies to a validity likelihood through a
//! table of magnitude bands.

/// Likelihood assigned per satisfied tier; the last entry applies when no
/// tier is satisfied.
const LIKELIHOODS: [f64; 4] = [0.99, 0.8, 0.4, 0.2];

/// Likelihood above which an event counts as valid.
const VALID_LIKELIHOOD: f64 = 0.5;

/// `(delta_pick, delta_mag)` limits of the strict, relaxed and loose tiers
/// for one magnitude band.
struct Band {
    /// Exclusive upper magnitude bound
    below: f64,
    limits: [(f64, f64); 3],
}

const BANDS: [Band; 6] = [
    Band {
        below: 1.5,
        limits: [(0.2, 0.2), (0.3, 0.3), (0.5, 0.5)],
    },
    Band {
        below: 2.0,
        limits: [(0.25, 0.2), (0.35, 0.3), (0.5, 0.5)],
    },
    Band {
        below: 2.5,
        limits: [(0.3, 0.2), (0.4, 0.3), (0.6, 0.5)],
    },
    Band {
        below: 3.0,
        limits: [(0.4, 0.2), (0.5, 0.3), (0.7, 0.5)],
    },
    Band {
        below: 4.0,
        limits: [(0.5, 0.25), (0.6, 0.35), (0.8, 0.5)],
    },
    Band {
        below: f64::INFINITY,
        limits: [(0.6, 0.3), (0.7, 0.4), (0.9, 0.6)],
    },
];

/// Normalized absolute difference, 0 when both are zero.
fn relative_difference(a: f64, b: f64) -> f64 {
    let denominator = a.max(b);
    if denominator <= 0.0 || denominator.is_nan() {
        return 0.0;
    }
    ((a - b).abs() / denominator).clamp(0.0, 1.0)
}

/// `|M − Mmed| / max(M, Mmed)` clamped to `[0, 1]`.
#[must_use]
pub fn delta_mag(magnitude: f64, median: f64) -> f64 {
    relative_difference(magnitude, median)
}

/// `|picked − available| / max(picked, available)` in `[0, 1]`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn delta_pick(picked: usize, available: usize) -> f64 {
    relative_difference(picked as f64, available as f64)
}

/// Table lookup of the validity likelihood.
#[must_use]
pub fn likelihood(magnitude: f64, delta_pick: f64, delta_mag: f64) -> f64 {
    let band = BANDS
        .iter()
        .find(|b| magnitude < b.below)
        .unwrap_or(&BANDS[BANDS.len() - 1]);

    band.limits
        .iter()
        .position(|&(pick, mag)| delta_pick < pick && delta_mag < mag)
        .map_or(LIKELIHOODS[3], |tier| LIKELIHOODS[tier])
}

/// Quality diagnostics attached to an estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quality {
    pub delta_mag: f64,
    pub delta_pick: f64,
    pub likelihood: f64,
    pub is_valid: bool,
}

/// Evaluate an estimate against its median and station counts.
#[must_use]
pub fn evaluate(magnitude: f64, median: f64, picked: usize, available: usize) -> Quality {
    let dm = delta_mag(magnitude, median);
    let dp = delta_pick(picked, available);
    let l = likelihood(magnitude, dp, dm);
    Quality {
        delta_mag: dm,
        delta_pick: dp,
        likelihood: l,
        is_valid: l > VALID_LIKELIHOOD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deltas() {
        assert!((delta_mag(4.0, 3.0) - 0.25).abs() < 1e-12);
        assert!((delta_mag(3.0, 4.0) - 0.25).abs() < 1e-12);
        assert!(delta_mag(0.0, 0.0).abs() < f64::EPSILON);
        assert!((delta_pick(3, 4) - 0.25).abs() < 1e-12);
        assert!(delta_pick(0, 0).abs() < f64::EPSILON);
        assert!((delta_pick(0, 5) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_deltas_in_unit_range() {
        for (m, med) in [(0.5, 9.0), (9.0, 0.5), (2.0, -1.0), (-1.0, -2.0)] {
            let d = delta_mag(m, med);
            assert!((0.0..=1.0).contains(&d), "{m} {med} -> {d}");
        }
        for (p, a) in [(0, 1), (1, 0), (7, 3), (100, 1)] {
            let d = delta_pick(p, a);
            assert!((0.0..=1.0).contains(&d));
        }
    }

    #[test]
    fn test_tiers() {
        assert!((likelihood(1.0, 0.0, 0.0) - 0.99).abs() < f64::EPSILON);
        assert!((likelihood(1.0, 0.25, 0.1) - 0.8).abs() < f64::EPSILON);
        assert!((likelihood(1.0, 0.45, 0.1) - 0.4).abs() < f64::EPSILON);
        assert!((likelihood(1.0, 0.5, 0.1) - 0.2).abs() < f64::EPSILON);
        // Limits are exclusive
        assert!((likelihood(1.0, 0.2, 0.0) - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_band_boundaries() {
        // 1.5 belongs to the "< 2.0" band
        assert!((likelihood(1.49, 0.22, 0.0) - 0.8).abs() < f64::EPSILON);
        assert!((likelihood(1.5, 0.22, 0.0) - 0.99).abs() < f64::EPSILON);
        assert!((likelihood(2.0, 0.27, 0.0) - 0.99).abs() < f64::EPSILON);
        assert!((likelihood(2.5, 0.35, 0.0) - 0.99).abs() < f64::EPSILON);
        assert!((likelihood(3.0, 0.45, 0.22) - 0.99).abs() < f64::EPSILON);
        // 4.0 belongs to the top band
        assert!((likelihood(3.99, 0.55, 0.0) - 0.8).abs() < f64::EPSILON);
        assert!((likelihood(4.0, 0.55, 0.0) - 0.99).abs() < f64::EPSILON);
        assert!((likelihood(7.5, 0.95, 0.0) - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validity() {
        let q = evaluate(3.2, 3.0, 4, 5);
        assert!(q.is_valid);
        assert!((q.likelihood - 0.99).abs() < f64::EPSILON);

        let q = evaluate(3.2, 3.0, 1, 10);
        assert!(!q.is_valid);
        assert!((q.likelihood - 0.2).abs() < f64::EPSILON);

        // Loose tier is not enough
        let q = evaluate(1.0, 1.0, 6, 10);
        assert!((q.likelihood - 0.4).abs() < f64::EPSILON);
        assert!(!q.is_valid);
    }
}
