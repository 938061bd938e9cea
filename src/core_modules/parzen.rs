// THEORY:
// A tree-structured Parzen estimator over the log-volume unit cube of one subset.
// After a few uniform startup samples the observations are split into a "good"
// quarter and the rest. Candidates are drawn around good points, and the one with
// the highest density ratio good/bad is evaluated next. Each evaluation is spent
// where earlier ones did well, which matters when the candidate set is large and
// the budget per subset is small.

use crate::core_modules::optimizer::{SearchContext, log_scale};
use rand::Rng;
use std::f64::consts::TAU;
use std::ops::ControlFlow;

const GOOD_FRACTION: f64 = 0.25;
const CANDIDATE_DRAWS: usize = 24;
const STARTUP_SAMPLES: usize = 10;
const SAMPLES_PER_SUBSET: usize = 48;
const MIN_BANDWIDTH: f64 = 0.05;
const MAX_BANDWIDTH: f64 = 0.5;

struct Observation {
    unit: Vec<f64>,
    score: f64,
}

/// Spends a fixed number of evaluations on the volumes of `subset`.
pub(crate) fn optimize_subset(
    context: &mut SearchContext<'_>,
    rng: &mut impl Rng,
    subset: &[usize],
) -> ControlFlow<()> {
    let bounds = context.bounds(subset);
    let dims = subset.len();
    let mut history: Vec<Observation> = Vec::with_capacity(SAMPLES_PER_SUBSET);

    for sample in 0..SAMPLES_PER_SUBSET {
        let unit = if sample < STARTUP_SAMPLES {
            (0..dims).map(|_| rng.random::<f64>()).collect()
        } else {
            propose(&mut history, dims, rng)
        };

        let mut volumes: Vec<f64> = unit.iter().zip(&bounds).map(|(&u, &b)| log_scale(u, b)).collect();
        context.repair(subset, &mut volumes);
        let score = context.evaluate(subset, &volumes)?;
        history.push(Observation { unit, score });
    }
    ControlFlow::Continue(())
}

/// Draws candidates around the good observations and keeps the one that is most
/// likely under the good density relative to the bad one.
fn propose(history: &mut [Observation], dims: usize, rng: &mut impl Rng) -> Vec<f64> {
    history.sort_by(|a, b| a.score.total_cmp(&b.score));
    let good_count = ((history.len() as f64 * GOOD_FRACTION).ceil() as usize).clamp(1, history.len() - 1);
    let (good, bad) = history.split_at(good_count);
    let good_bandwidth = bandwidths(good, dims);
    let bad_bandwidth = bandwidths(bad, dims);

    let mut best: Option<(f64, Vec<f64>)> = None;
    for _ in 0..CANDIDATE_DRAWS {
        let centre = &good[rng.random_range(0..good.len())].unit;
        let candidate: Vec<f64> = centre
            .iter()
            .zip(&good_bandwidth)
            .map(|(&mu, &sigma)| (mu + sigma * standard_normal(rng)).clamp(0.0, 1.0))
            .collect();

        let ratio = log_density(&candidate, good, &good_bandwidth) - log_density(&candidate, bad, &bad_bandwidth);
        if best.as_ref().is_none_or(|(best_ratio, _)| ratio > *best_ratio) {
            best = Some((ratio, candidate));
        }
    }
    best.map(|(_, candidate)| candidate)
        .unwrap_or_else(|| (0..dims).map(|_| rng.random::<f64>()).collect())
}

/// Per-dimension kernel widths from the spread of `points` (Scott's rule).
fn bandwidths(points: &[Observation], dims: usize) -> Vec<f64> {
    let n = points.len() as f64;
    let factor = n.powf(-1.0 / (dims as f64 + 4.0));
    (0..dims)
        .map(|j| {
            let mean = points.iter().map(|p| p.unit[j]).sum::<f64>() / n;
            let variance = points.iter().map(|p| (p.unit[j] - mean).powi(2)).sum::<f64>() / n;
            (variance.sqrt() * factor).clamp(MIN_BANDWIDTH, MAX_BANDWIDTH)
        })
        .collect()
}

/// Log of the Gaussian mixture density of `points` at `x` (constant terms dropped).
fn log_density(x: &[f64], points: &[Observation], bandwidth: &[f64]) -> f64 {
    let norm: f64 = bandwidth.iter().map(|s| s.ln()).sum();
    let log_kernels: Vec<f64> = points
        .iter()
        .map(|p| {
            let exponent: f64 = x
                .iter()
                .zip(&p.unit)
                .zip(bandwidth)
                .map(|((xi, mi), s)| -0.5 * ((xi - mi) / s).powi(2))
                .sum();
            exponent - norm
        })
        .collect();
    let peak = log_kernels.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let sum: f64 = log_kernels.iter().map(|k| (k - peak).exp()).sum();
    peak + (sum / points.len() as f64).ln()
}

/// Box-Muller transform.
fn standard_normal(rng: &mut impl Rng) -> f64 {
    let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    fn observations(points: &[(f64, f64)]) -> Vec<Observation> {
        points
            .iter()
            .map(|&(u, score)| Observation { unit: vec![u], score })
            .collect()
    }

    #[test]
    fn proposals_concentrate_near_good_observations() {
        let mut rng = Pcg32::seed_from_u64(9);
        let mut history = observations(&[
            (0.10, 1.0),
            (0.12, 1.5),
            (0.11, 1.2),
            (0.80, 30.0),
            (0.85, 35.0),
            (0.90, 40.0),
            (0.70, 25.0),
            (0.60, 20.0),
        ]);
        let near = (0..50)
            .filter(|_| propose(&mut history, 1, &mut rng)[0] < 0.4)
            .count();
        assert!(near >= 40, "only {near} of 50 proposals near the good region");
    }

    #[test]
    fn proposals_stay_in_the_unit_cube() {
        let mut rng = Pcg32::seed_from_u64(1);
        let mut history: Vec<Observation> = (0..12)
            .map(|i| Observation {
                unit: vec![i as f64 / 11.0, 1.0 - i as f64 / 11.0],
                score: i as f64,
            })
            .collect();
        for _ in 0..100 {
            let proposal = propose(&mut history, 2, &mut rng);
            assert!(proposal.iter().all(|u| (0.0..=1.0).contains(u)));
        }
    }

    #[test]
    fn box_muller_is_roughly_standard() {
        let mut rng = Pcg32::seed_from_u64(2);
        let samples: Vec<f64> = (0..20_000).map(|_| standard_normal(&mut rng)).collect();
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / samples.len() as f64;
        assert!(mean.abs() < 0.05);
        assert!((variance - 1.0).abs() < 0.05);
    }
}
