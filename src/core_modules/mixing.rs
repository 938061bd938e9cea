// THEORY:
// The mixing predictor answers one question: "if these paints are mixed at these
// volumes, what color comes out?" It is a pure function over immutable paint data,
// which is what lets every worker call it thousands of times per second without
// coordination.
//
// The model is two-constant Kubelka-Munk, applied per linear-sRGB channel:
// 1.  Each paint contributes absorption K = s * (K/S) and scattering S = s, where
//     (K/S) comes from its mass-tone reflectance and s is its scattering strength.
// 2.  Contributions are weighted by volume fraction times tinting strength, so a
//     weak tinter moves the mixture less than its volume alone would suggest.
// 3.  A transparent paint that is heavily diluted leans towards its undertone.
// 4.  The mixed K/S is inverted back into reflectance, R = 1 + K/S - sqrt((K/S)^2 +
//     2 K/S), and from there into Lab.
// At full strength (a single paint) every correction vanishes and the mass tone
// is returned unchanged.

use crate::core_modules::color_value::{ColorValue, Lab};
use crate::core_modules::paint::{PaintProperties, reflectance_from_ks};
use crate::error::MixingError;

const MIN_TINTING_STRENGTH: f64 = 0.01;
const MIN_SCATTERING: f64 = 0.01;
const UNDERTONE_INFLUENCE: f64 = 0.5;

/// One paint and the volume of it that goes into the mixture.
#[derive(Debug, Clone, Copy)]
pub struct MixComponent<'a> {
    pub paint: &'a PaintProperties,
    pub volume_ml: f64,
}

impl<'a> MixComponent<'a> {
    pub fn new(paint: &'a PaintProperties, volume_ml: f64) -> Self {
        Self { paint, volume_ml }
    }
}

/// Predicts the mixed color as a full `ColorValue`.
pub fn predict(components: &[MixComponent<'_>]) -> Result<ColorValue, MixingError> {
    Ok(ColorValue::from_lab_clamped(predict_lab(components)?))
}

/// Predicts the mixed color as a Lab triple. This is the optimizer's hot path.
pub fn predict_lab(components: &[MixComponent<'_>]) -> Result<Lab, MixingError> {
    let first = components.first().ok_or(MixingError::EmptyMixture)?;

    let mut total_volume = 0.0;
    for component in components {
        if !(component.volume_ml.is_finite() && component.volume_ml > 0.0) {
            return Err(MixingError::InvalidVolume {
                paint_id: component.paint.id.clone(),
                volume_ml: component.volume_ml,
            });
        }
        total_volume += component.volume_ml;
    }

    if components.len() == 1 {
        return Ok(first.paint.mass_tone.lab());
    }

    let mut absorption = [0.0f64; 3];
    let mut scattering = 0.0f64;
    for component in components {
        let paint = component.paint;
        let fraction = component.volume_ml / total_volume;
        let weight = fraction * paint.tinting_strength.max(MIN_TINTING_STRENGTH);
        let scatter = paint.s.max(MIN_SCATTERING);
        let undertone_share = paint.transparency_index * (1.0 - fraction) * UNDERTONE_INFLUENCE;

        let mass = paint.mass_tone_ks();
        let under = paint.undertone_ks();
        for channel in 0..3 {
            let ks = (1.0 - undertone_share) * mass[channel] + undertone_share * under[channel];
            absorption[channel] += weight * scatter * ks;
        }
        scattering += weight * scatter;
    }

    let reflectance = absorption.map(|k| reflectance_from_ks(k / scattering));
    Ok(Lab::from_linear_rgb(reflectance))
}

/// The ΔE76 distance between two colors.
pub fn color_difference(a: &ColorValue, b: &ColorValue) -> f64 {
    a.delta_e(b)
}
