// THEORY:
// Choosing *which* paints to mix is a combinatorial problem: 90 candidates and up
// to 5 paints per formula already give tens of millions of subsets. The sampler
// never enumerates them. It hands the optimizer one subset at a time:
// 1.  First a greedy guess: the paint closest to the target, the partner whose
//     mass tone best "brackets" the target with it, then the next nearest paints.
// 2.  Then random subsets of random size, biased towards a pool of the paints
//     nearest the target but still able to reach any candidate.
// Already-tried subsets are skipped while fresh ones can still be found, so small
// candidate sets are covered quickly and large ones are sampled broadly.

use crate::core_modules::color_value::Lab;
use crate::core_modules::paint::PaintProperties;
use rand::Rng;
use std::collections::HashSet;

const NEAR_POOL_MIN: usize = 10;
const NEAR_POOL_BIAS: f64 = 0.5;
const FRESH_ATTEMPTS: usize = 16;

/// Hands out subsets of candidate indices, sorted ascending.
pub(crate) struct SubsetSampler {
    /// Candidate indices ordered by mass-tone distance to the target.
    ranked: Vec<usize>,
    /// Mass tones, indexed like the candidates.
    tones: Vec<Lab>,
    target: Lab,
    max_size: usize,
    near_pool: usize,
    tried: HashSet<Vec<usize>>,
    greedy_issued: bool,
}

impl SubsetSampler {
    pub(crate) fn new(candidates: &[&PaintProperties], target: Lab, max_paint_count: usize) -> Self {
        let tones: Vec<Lab> = candidates.iter().map(|p| p.mass_tone.lab()).collect();
        let mut ranked: Vec<usize> = (0..candidates.len()).collect();
        ranked.sort_by(|&a, &b| tones[a].delta_e(&target).total_cmp(&tones[b].delta_e(&target)));

        let max_size = max_paint_count.min(candidates.len());
        Self {
            near_pool: (max_size * 2).max(NEAR_POOL_MIN).min(candidates.len()),
            ranked,
            tones,
            target,
            max_size,
            tried: HashSet::new(),
            greedy_issued: false,
        }
    }

    pub(crate) fn next_subset(&mut self, rng: &mut impl Rng) -> Vec<usize> {
        if !self.greedy_issued {
            self.greedy_issued = true;
            let subset = self.greedy_subset();
            self.tried.insert(subset.clone());
            return subset;
        }

        let mut subset = self.random_subset(rng);
        for _ in 0..FRESH_ATTEMPTS {
            if !self.tried.contains(&subset) {
                break;
            }
            subset = self.random_subset(rng);
        }
        self.tried.insert(subset.clone());
        subset
    }

    fn greedy_subset(&self) -> Vec<usize> {
        let nearest = self.ranked[0];
        let partner = self
            .ranked
            .iter()
            .copied()
            .filter(|&i| i != nearest)
            .min_by(|&a, &b| {
                let da = segment_distance(&self.target, &self.tones[nearest], &self.tones[a]);
                let db = segment_distance(&self.target, &self.tones[nearest], &self.tones[b]);
                da.total_cmp(&db)
            });

        let mut subset = vec![nearest];
        subset.extend(partner);
        for &index in &self.ranked {
            if subset.len() >= self.max_size {
                break;
            }
            if !subset.contains(&index) {
                subset.push(index);
            }
        }
        subset.sort_unstable();
        subset
    }

    fn random_subset(&self, rng: &mut impl Rng) -> Vec<usize> {
        let size = if self.max_size <= 2 {
            self.max_size
        } else {
            rng.random_range(2..=self.max_size)
        };
        let mut subset = Vec::with_capacity(size);
        while subset.len() < size {
            let index = if rng.random::<f64>() < NEAR_POOL_BIAS {
                self.ranked[rng.random_range(0..self.near_pool)]
            } else {
                rng.random_range(0..self.ranked.len())
            };
            if !subset.contains(&index) {
                subset.push(index);
            }
        }
        subset.sort_unstable();
        subset
    }
}

/// Distance from `point` to the segment between `a` and `b` in Lab.
fn segment_distance(point: &Lab, a: &Lab, b: &Lab) -> f64 {
    let ab = [b.l - a.l, b.a - a.a, b.b - a.b];
    let ap = [point.l - a.l, point.a - a.a, point.b - a.b];
    let length_sq: f64 = ab.iter().map(|c| c * c).sum();
    if length_sq == 0.0 {
        return point.delta_e(a);
    }
    let t = (ab.iter().zip(&ap).map(|(x, y)| x * y).sum::<f64>() / length_sq).clamp(0.0, 1.0);
    let closest = Lab::new(a.l + t * ab[0], a.a + t * ab[1], a.b + t * ab[2]);
    point.delta_e(&closest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::color_value::ColorValue;
    use crate::core_modules::paint::PaintRecord;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    fn paints(hexes: &[&str]) -> Vec<PaintProperties> {
        hexes
            .iter()
            .enumerate()
            .map(|(i, hex)| {
                let color = ColorValue::from_hex(hex).unwrap();
                PaintProperties::new(PaintRecord {
                    id: format!("p{i}"),
                    name: hex.to_string(),
                    k: 0.5,
                    s: 0.5,
                    opacity: 0.8,
                    tinting_strength: 0.8,
                    mass_tone: color.clone(),
                    undertone: color,
                })
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn greedy_subset_brackets_the_target() {
        let owned = paints(&["#000000", "#FFFFFF", "#FF0000", "#00FF00", "#0000FF"]);
        let candidates: Vec<&PaintProperties> = owned.iter().collect();
        let grey = ColorValue::from_hex("#777777").unwrap().lab();
        let mut sampler = SubsetSampler::new(&candidates, grey, 2);
        let mut rng = Pcg32::seed_from_u64(7);

        assert_eq!(sampler.next_subset(&mut rng), vec![0, 1]);
    }

    #[test]
    fn random_subsets_respect_size_and_distinctness() {
        let owned = paints(&[
            "#000000", "#FFFFFF", "#FF0000", "#00FF00", "#0000FF", "#FFFF00", "#00FFFF", "#FF00FF",
        ]);
        let candidates: Vec<&PaintProperties> = owned.iter().collect();
        let target = Lab::new(50.0, 10.0, 10.0);
        let mut sampler = SubsetSampler::new(&candidates, target, 4);
        let mut rng = Pcg32::seed_from_u64(42);

        for _ in 0..200 {
            let subset = sampler.next_subset(&mut rng);
            assert!((2..=4).contains(&subset.len()));
            let unique: HashSet<_> = subset.iter().collect();
            assert_eq!(unique.len(), subset.len());
            assert!(subset.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn segment_distance_handles_degenerate_segments() {
        let a = Lab::new(50.0, 0.0, 0.0);
        let p = Lab::new(53.0, 4.0, 0.0);
        assert!((segment_distance(&p, &a, &a) - 5.0).abs() < 1e-12);
        let b = Lab::new(60.0, 0.0, 0.0);
        assert!((segment_distance(&p, &a, &b) - 4.0).abs() < 1e-12);
    }
}
