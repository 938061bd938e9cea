// THEORY:
// A `MixingFormula` is the engine's answer: which paints, how many millilitres of
// each, and what share of the total each one is. Percentages are never stored
// independently of volumes; they are always recomputed from them, so the sum stays
// at 100 and the two views cannot drift apart.
//
// `VolumeConstraints` describes the operator's limits. Besides validating itself,
// it knows how to `repair` any proposed vector of volumes into the feasible box:
// the search engine proposes freely and lets the constraints pull proposals back,
// which keeps numeric edge cases (zero, negative, NaN volumes) local.

use crate::error::FormulaError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const MAX_FORMULA_PAINTS: usize = 5;
/// Smallest volume a paint may contribute once it is part of a formula.
pub const MIN_PAINT_VOLUME_ML: f64 = 0.1;
const REPAIR_PASSES: usize = 6;

/// One paint's share of a formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaintRatio {
    pub paint_id: String,
    pub volume_ml: f64,
    pub percentage: f64,
}

/// An ordered set of 1-5 distinct paints with their volumes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MixingFormula {
    ratios: Vec<PaintRatio>,
    total_volume_ml: f64,
}

impl MixingFormula {
    /// Builds a formula from `(paint_id, volume_ml)` pairs, deriving percentages.
    pub fn from_volumes<I, S>(volumes: I) -> Result<Self, FormulaError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let pairs: Vec<(String, f64)> = volumes.into_iter().map(|(id, v)| (id.into(), v)).collect();

        if pairs.is_empty() {
            return Err(FormulaError::Empty);
        }
        if pairs.len() > MAX_FORMULA_PAINTS {
            return Err(FormulaError::TooManyPaints {
                count: pairs.len(),
                max: MAX_FORMULA_PAINTS,
            });
        }

        let mut seen = HashSet::with_capacity(pairs.len());
        for (paint_id, volume_ml) in &pairs {
            if !seen.insert(paint_id.as_str()) {
                return Err(FormulaError::DuplicatePaint(paint_id.clone()));
            }
            if !(volume_ml.is_finite() && *volume_ml > 0.0) {
                return Err(FormulaError::NonPositiveVolume {
                    paint_id: paint_id.clone(),
                    volume_ml: *volume_ml,
                });
            }
        }

        let total_volume_ml: f64 = pairs.iter().map(|(_, v)| v).sum();
        let ratios = pairs
            .into_iter()
            .map(|(paint_id, volume_ml)| PaintRatio {
                percentage: volume_ml * 100.0 / total_volume_ml,
                paint_id,
                volume_ml,
            })
            .collect();

        Ok(Self {
            ratios,
            total_volume_ml,
        })
    }

    pub fn ratios(&self) -> &[PaintRatio] {
        &self.ratios
    }

    pub fn total_volume_ml(&self) -> f64 {
        self.total_volume_ml
    }

    pub fn len(&self) -> usize {
        self.ratios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratios.is_empty()
    }

    pub fn percentage_sum(&self) -> f64 {
        self.ratios.iter().map(|r| r.percentage).sum()
    }

    pub fn volumes(&self) -> Vec<(String, f64)> {
        self.ratios
            .iter()
            .map(|r| (r.paint_id.clone(), r.volume_ml))
            .collect()
    }

    /// Scales every volume by the same factor so the total equals `target_total_ml`.
    pub fn rescaled(&self, target_total_ml: f64) -> Result<Self, FormulaError> {
        if !(target_total_ml.is_finite() && target_total_ml > 0.0) {
            return Err(FormulaError::InvalidConstraints(format!(
                "cannot rescale to a total of {target_total_ml} ml"
            )));
        }
        let factor = target_total_ml / self.total_volume_ml;
        Self::from_volumes(
            self.ratios
                .iter()
                .map(|r| (r.paint_id.clone(), r.volume_ml * factor)),
        )
    }
}

/// Optional per-paint volume limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PaintVolumeBounds {
    #[serde(default)]
    pub min_ml: Option<f64>,
    #[serde(default)]
    pub max_ml: Option<f64>,
}

/// The operator's volume limits for a formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeConstraints {
    pub min_total_volume_ml: f64,
    pub max_total_volume_ml: f64,
    #[serde(default)]
    pub per_paint: HashMap<String, PaintVolumeBounds>,
    /// Allows the final formula to be rescaled proportionally.
    #[serde(default)]
    pub allow_scaling: bool,
    /// The exact total scaling aims for; without it scaling only fixes totals
    /// that fall outside the min/max bounds.
    #[serde(default)]
    pub target_total_volume_ml: Option<f64>,
}

impl Default for VolumeConstraints {
    fn default() -> Self {
        Self {
            min_total_volume_ml: 10.0,
            max_total_volume_ml: 1000.0,
            per_paint: HashMap::new(),
            allow_scaling: false,
            target_total_volume_ml: None,
        }
    }
}

impl VolumeConstraints {
    pub fn validate(&self) -> Result<(), FormulaError> {
        let (min, max) = (self.min_total_volume_ml, self.max_total_volume_ml);
        if !(min.is_finite() && max.is_finite() && min > 0.0 && min <= max) {
            return Err(FormulaError::InvalidConstraints(format!(
                "total volume bounds [{min}, {max}] ml are not a positive range"
            )));
        }
        for (paint_id, bounds) in &self.per_paint {
            let lo = bounds.min_ml.unwrap_or(MIN_PAINT_VOLUME_ML);
            let hi = bounds.max_ml.unwrap_or(max);
            if !(lo.is_finite() && hi.is_finite() && lo > 0.0 && lo <= hi) {
                return Err(FormulaError::InvalidConstraints(format!(
                    "paint '{paint_id}' bounds [{lo}, {hi}] ml are not a positive range"
                )));
            }
        }
        if let Some(target) = self.target_total_volume_ml {
            if !(target.is_finite() && target > 0.0) {
                return Err(FormulaError::InvalidConstraints(format!(
                    "target total volume {target} ml must be positive"
                )));
            }
        }
        Ok(())
    }

    /// The volume box for one paint.
    pub fn bounds_for(&self, paint_id: &str) -> (f64, f64) {
        let bounds = self.per_paint.get(paint_id).copied().unwrap_or_default();
        let lo = bounds.min_ml.unwrap_or(MIN_PAINT_VOLUME_ML).max(MIN_PAINT_VOLUME_ML);
        let hi = bounds
            .max_ml
            .unwrap_or(self.max_total_volume_ml)
            .min(self.max_total_volume_ml)
            .max(lo);
        (lo, hi)
    }

    /// Pulls a proposal back into the feasible region: per-paint clamp, then the
    /// total is nudged into `[min_total, max_total]` by scaling the paints that
    /// still have room. Non-finite proposals fall back to the paint's lower bound.
    pub fn repair(&self, paint_ids: &[&str], volumes: &mut [f64]) {
        let bounds: Vec<(f64, f64)> = paint_ids.iter().map(|id| self.bounds_for(id)).collect();
        for (volume, (lo, hi)) in volumes.iter_mut().zip(&bounds) {
            *volume = if volume.is_finite() { volume.clamp(*lo, *hi) } else { *lo };
        }

        for _ in 0..REPAIR_PASSES {
            let total: f64 = volumes.iter().sum();
            if self.contains_total(total) {
                return;
            }
            let wanted = total.clamp(self.min_total_volume_ml, self.max_total_volume_ml);
            let growing = wanted > total;
            let free: f64 = volumes
                .iter()
                .zip(&bounds)
                .filter(|(v, (lo, hi))| if growing { **v < *hi } else { **v > *lo })
                .map(|(v, _)| *v)
                .sum();
            if free <= 0.0 {
                return;
            }
            let factor = (free + wanted - total) / free;
            for (volume, (lo, hi)) in volumes.iter_mut().zip(&bounds) {
                let has_room = if growing { *volume < *hi } else { *volume > *lo };
                if has_room {
                    *volume = (*volume * factor).clamp(*lo, *hi);
                }
            }
        }
    }

    pub fn contains_total(&self, total_ml: f64) -> bool {
        (self.min_total_volume_ml..=self.max_total_volume_ml).contains(&total_ml)
    }

    /// The total a scalable formula should be rescaled to, if any.
    pub fn scaling_target(&self, total_ml: f64) -> Option<f64> {
        if !self.allow_scaling {
            return None;
        }
        match self.target_total_volume_ml {
            Some(target) => Some(target),
            None if !self.contains_total(total_ml) => {
                Some(total_ml.clamp(self.min_total_volume_ml, self.max_total_volume_ml))
            }
            None => None,
        }
    }
}
