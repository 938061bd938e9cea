// THEORY:
// Classic DE/rand/1/bin over the volumes of one paint subset. A small population is
// seeded log-uniformly inside each paint's volume box; every generation each member
// is challenged by a trial vector `a + F * (b - c)` crossed over with it, and the
// trial replaces the member when it mixes at least as close to the target.
// The search context owns the budget, so a generation can be cut short by any
// evaluation; the break is propagated straight out with `?`.

use crate::core_modules::optimizer::{SearchContext, log_scale};
use rand::Rng;
use std::ops::ControlFlow;

const MUTATION: f64 = 0.7;
const CROSSOVER: f64 = 0.9;
const GENERATIONS_PER_SUBSET: usize = 40;
const MIN_POPULATION: usize = 8;

struct Member {
    volumes: Vec<f64>,
    score: f64,
}

/// Optimizes the volumes of `subset` for a bounded number of generations.
pub(crate) fn optimize_subset(
    context: &mut SearchContext<'_>,
    rng: &mut impl Rng,
    subset: &[usize],
) -> ControlFlow<()> {
    let bounds = context.bounds(subset);
    let dims = subset.len();
    let size = (dims * 6).max(MIN_POPULATION);

    let mut population = Vec::with_capacity(size);
    for _ in 0..size {
        let mut volumes: Vec<f64> = bounds.iter().map(|&b| log_scale(rng.random(), b)).collect();
        context.repair(subset, &mut volumes);
        let score = context.evaluate(subset, &volumes)?;
        population.push(Member { volumes, score });
    }

    for _ in 0..GENERATIONS_PER_SUBSET {
        for i in 0..size {
            let [a, b, c] = distinct_others(rng, size, i);
            let forced = rng.random_range(0..dims);

            let mut trial: Vec<f64> = (0..dims)
                .map(|j| {
                    if j == forced || rng.random::<f64>() < CROSSOVER {
                        population[a].volumes[j]
                            + MUTATION * (population[b].volumes[j] - population[c].volumes[j])
                    } else {
                        population[i].volumes[j]
                    }
                })
                .collect();
            context.repair(subset, &mut trial);

            let score = context.evaluate(subset, &trial)?;
            if score <= population[i].score {
                population[i] = Member { volumes: trial, score };
            }
        }
    }
    ControlFlow::Continue(())
}

/// Three distinct population indices, all different from `current`.
fn distinct_others(rng: &mut impl Rng, size: usize, current: usize) -> [usize; 3] {
    let mut picked = [current; 3];
    let mut count = 0;
    while count < 3 {
        let candidate = rng.random_range(0..size);
        if candidate != current && !picked[..count].contains(&candidate) {
            picked[count] = candidate;
            count += 1;
        }
    }
    picked
}
