// THEORY:
// A `PaintProperties` record is a "dumb" optical description of one tube of paint:
// how strongly it absorbs (`k`) and scatters (`s`) light, how opaque it is, how
// strongly it tints a mixture, and the colors it shows at full strength (mass tone)
// and thinned out (undertone). Records are immutable once loaded and owned by a
// `PaintCatalog`, which is shared read-only across every worker through an `Arc`.
//
// The mixing model works with per-channel K/S ratios rather than colors, so those
// are precomputed here once per paint instead of once per candidate evaluation.

use crate::core_modules::color_value::ColorValue;
use crate::error::CatalogError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Per-channel absorption/scattering ratio in linear sRGB.
pub type KsRatio = [f64; 3];

/// Reflectance is floored so that a perfectly black channel keeps a finite K/S.
pub const REFLECTANCE_FLOOR: f64 = 1e-4;

const DEMO_CATALOG: &str = include_str!("../../data/demo_catalog.json");

/// The serialized form of a paint, as found in catalog files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaintRecord {
    pub id: String,
    pub name: String,
    pub k: f64,
    pub s: f64,
    pub opacity: f64,
    pub tinting_strength: f64,
    pub mass_tone: ColorValue,
    pub undertone: ColorValue,
}

/// The optical properties of a single paint.
#[derive(Debug, Clone, Serialize)]
pub struct PaintProperties {
    pub id: String,
    pub name: String,
    /// Aggregate absorption coefficient (0..1).
    pub k: f64,
    /// Aggregate scattering coefficient (0..1).
    pub s: f64,
    pub opacity: f64,
    /// Relative influence on a mixture, independent of volume fraction.
    pub tinting_strength: f64,
    pub mass_tone: ColorValue,
    pub undertone: ColorValue,
    /// Derived: how much the undertone shows through when the paint is diluted.
    pub transparency_index: f64,
    #[serde(skip)]
    mass_tone_ks: KsRatio,
    #[serde(skip)]
    undertone_ks: KsRatio,
}

impl PaintProperties {
    pub fn new(record: PaintRecord) -> Result<Self, CatalogError> {
        for (field, value) in [
            ("k", record.k),
            ("s", record.s),
            ("opacity", record.opacity),
            ("tinting_strength", record.tinting_strength),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CatalogError::InvalidCoefficient {
                    id: record.id,
                    field,
                    value,
                });
            }
        }

        Ok(Self {
            transparency_index: ((1.0 - record.opacity) * (1.0 - record.k)).clamp(0.0, 1.0),
            mass_tone_ks: ks_ratio(&record.mass_tone),
            undertone_ks: ks_ratio(&record.undertone),
            id: record.id,
            name: record.name,
            k: record.k,
            s: record.s,
            opacity: record.opacity,
            tinting_strength: record.tinting_strength,
            mass_tone: record.mass_tone,
            undertone: record.undertone,
        })
    }

    pub fn mass_tone_ks(&self) -> &KsRatio {
        &self.mass_tone_ks
    }

    pub fn undertone_ks(&self) -> &KsRatio {
        &self.undertone_ks
    }
}

/// Kubelka-Munk K/S of an opaque layer: (1 - R)^2 / 2R per channel.
pub fn ks_ratio(color: &ColorValue) -> KsRatio {
    color.lab().to_linear_rgb().map(|channel| {
        let reflectance = channel.clamp(REFLECTANCE_FLOOR, 1.0);
        (1.0 - reflectance).powi(2) / (2.0 * reflectance)
    })
}

/// Inverse of `ks_ratio` for a single channel.
pub fn reflectance_from_ks(ks: f64) -> f64 {
    (1.0 + ks - (ks * ks + 2.0 * ks).sqrt()).clamp(0.0, 1.0)
}

/// A read-only collection of paints keyed by id.
#[derive(Debug, Clone, Default)]
pub struct PaintCatalog {
    paints: HashMap<String, PaintProperties>,
}

impl PaintCatalog {
    pub fn from_records(records: Vec<PaintRecord>) -> Result<Self, CatalogError> {
        let mut paints = HashMap::with_capacity(records.len());
        for record in records {
            let paint = PaintProperties::new(record)?;
            if paints.contains_key(&paint.id) {
                return Err(CatalogError::DuplicatePaint(paint.id));
            }
            paints.insert(paint.id.clone(), paint);
        }
        Ok(Self { paints })
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let records: Vec<PaintRecord> = serde_json::from_str(json)?;
        Self::from_records(records)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// The bundled demo catalog of common artist pigments.
    pub fn demo() -> Result<Self, CatalogError> {
        Self::from_json(DEMO_CATALOG)
    }

    pub fn get(&self, id: &str) -> Option<&PaintProperties> {
        self.paints.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.paints.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.paints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paints.is_empty()
    }

    /// Paint ids in a stable (sorted) order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.paints.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, hex: &str) -> PaintRecord {
        PaintRecord {
            id: id.to_string(),
            name: id.to_uppercase(),
            k: 0.4,
            s: 0.6,
            opacity: 0.5,
            tinting_strength: 0.8,
            mass_tone: ColorValue::from_hex(hex).unwrap(),
            undertone: ColorValue::from_hex(hex).unwrap(),
        }
    }

    #[test]
    fn demo_catalog_loads() {
        let catalog = PaintCatalog::demo().unwrap();
        assert!(catalog.len() >= 12);
        assert!(catalog.contains("titanium_white"));
        let white = catalog.get("titanium_white").unwrap();
        assert!(white.mass_tone.lab().l > 90.0);
    }

    #[test]
    fn transparency_index_is_derived() {
        let paint = PaintProperties::new(record("p", "#884422")).unwrap();
        assert!((paint.transparency_index - 0.3).abs() < 1e-12);
    }

    #[test]
    fn coefficients_outside_unit_range_are_rejected() {
        let mut bad = record("bad", "#112233");
        bad.tinting_strength = 1.5;
        let err = PaintProperties::new(bad).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::InvalidCoefficient { field: "tinting_strength", .. }
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = PaintCatalog::from_records(vec![record("a", "#111111"), record("a", "#222222")])
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicatePaint(id) if id == "a"));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            PaintCatalog::from_json("[{\"id\": 3}]"),
            Err(CatalogError::Parse(_))
        ));
    }

    #[test]
    fn ks_round_trips_through_reflectance() {
        for reflectance in [0.001, 0.05, 0.2, 0.5, 0.9, 1.0] {
            let ks = (1.0 - reflectance) * (1.0f64 - reflectance) / (2.0 * reflectance);
            assert!((reflectance_from_ks(ks) - reflectance).abs() < 1e-9);
        }
    }
}
