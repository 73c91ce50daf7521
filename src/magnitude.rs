//! Network magnitude by grid search.

use crate::equations::{AttenuationTable, StationInput};

/// Smallest trial magnitude.
pub const MIN_MAGNITUDE: f64 = 0.5;

/// Largest trial magnitude.
pub const MAX_MAGNITUDE: f64 = 9.0;

/// Trial magnitude increment.
pub const MAGNITUDE_STEP: f64 = 0.01;

/// Number of increments between the smallest and largest trial.
const STEPS: u32 = 850;

/// Trial magnitude of grid index `k`, computed without accumulated error.
fn trial(k: u32) -> f64 {
    MIN_MAGNITUDE + f64::from(k) * MAGNITUDE_STEP
}

/// Magnitude minimizing the summed station likelihood terms.
///
/// Ties keep the smallest trial magnitude. Returns `None` for an empty
/// input list.
#[must_use]
pub fn grid_search(inputs: &[StationInput], table: &AttenuationTable) -> Option<f64> {
    if inputs.is_empty() {
        return None;
    }

    let mut best: Option<(f64, f64)> = None;
    for k in 0..=STEPS {
        let m = trial(k);
        let objective: f64 = inputs.iter().map(|input| table.likelihood(input, m)).sum();
        if best.is_none_or(|(_, min)| objective < min) {
            best = Some((m, objective));
        }
    }

    debug_assert!((trial(STEPS) - MAX_MAGNITUDE).abs() < 1e-9);
    best.map(|(m, _)| m)
}

/// Upper median: the element at index `len / 2` in sorted order.
#[must_use]
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    let mid = sorted.len() / 2;
    let (_, m, _) = sorted.select_nth_unstable_by(mid, f64::total_cmp);
    Some(*m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equations::tests::scenario_amplitudes;
    use crate::site::SoilClass;

    fn scenario_input(distance_km: f64) -> StationInput {
        let (z, h) = scenario_amplitudes();
        StationInput::new(z, h, SoilClass::Rock, distance_km, &AttenuationTable::cua_heaton())
            .unwrap()
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(grid_search(&[], &AttenuationTable::cua_heaton()), None);
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_grid_bounds() {
        assert!((trial(0) - MIN_MAGNITUDE).abs() < 1e-12);
        assert!((trial(STEPS) - MAX_MAGNITUDE).abs() < 1e-9);
    }

    #[test]
    fn test_single_station_optimum() {
        let table = AttenuationTable::cua_heaton();
        let input = scenario_input(15.0);
        let m = grid_search(std::slice::from_ref(&input), &table).unwrap();

        // Brute force on a ten times finer grid
        let (best, _) = (0..=8500)
            .map(|k| MIN_MAGNITUDE + f64::from(k) * 0.001)
            .map(|m| (m, table.likelihood(&input, m)))
            .fold((f64::NAN, f64::INFINITY), |acc, (m, l)| if l < acc.1 { (m, l) } else { acc });

        assert!((m - best).abs() <= 0.01, "grid {m} vs brute force {best}");
        assert!(m > MIN_MAGNITUDE && m < MAX_MAGNITUDE);
    }

    #[test]
    fn test_deterministic() {
        let table = AttenuationTable::cua_heaton();
        let inputs = vec![scenario_input(10.0), scenario_input(40.0), scenario_input(80.0)];
        let first = grid_search(&inputs, &table);
        for _ in 0..3 {
            assert_eq!(grid_search(&inputs, &table), first);
        }
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0]), Some(3.0));
        assert_eq!(median(&[4.0, 1.0]), Some(4.0));
        assert_eq!(median(&[2.5, 0.5, 1.5]), Some(1.5));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(3.0));
    }
}
