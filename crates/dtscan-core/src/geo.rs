//! Distance and licence-range filters used when choosing which test centers
//! to scan.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

const STATUTE_MILES_PER_NAUTICAL_ARC_MINUTE: f64 = 1.1515;
const KM_PER_MILE: f64 = 1.609_344;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Great-circle distance between two points in kilometres, using the
/// spherical law of cosines.
///
/// The cosine term is clamped to `[-1, 1]`; floating-point error otherwise
/// pushes identical points just above 1 and `acos` returns NaN.
#[must_use]
pub fn distance_km(a: Coordinates, b: Coordinates) -> f64 {
    let rlat1 = PI * a.latitude / 180.0;
    let rlat2 = PI * b.latitude / 180.0;
    let rtheta = PI * (a.longitude - b.longitude) / 180.0;

    let cos_arc = rlat1.sin() * rlat2.sin() + rlat1.cos() * rlat2.cos() * rtheta.cos();
    let arc_degrees = cos_arc.clamp(-1.0, 1.0).acos() * 180.0 / PI;
    let miles = arc_degrees * 60.0 * STATUTE_MILES_PER_NAUTICAL_ARC_MINUTE;
    miles * KM_PER_MILE
}

/// Whether a center's licence-type entry covers the selected class.
///
/// `range` is either a single class code (`"G2"`) matched exactly, or an
/// `"X-Y"` span. A span matches classes whose code has the same length as `X`
/// and whose first character falls between the first characters of `X` and
/// `Y`, inclusive. Anything else never matches.
#[must_use]
pub fn is_in_license_range(range: &str, selected: &str) -> bool {
    let parts: Vec<&str> = range.split('-').collect();
    if let [start, end] = parts.as_slice() {
        if start.chars().count() != selected.chars().count() {
            return false;
        }
        let (Some(lo), Some(hi), Some(class)) = (
            start.chars().next(),
            end.chars().next(),
            selected.chars().next(),
        ) else {
            return false;
        };
        (lo..=hi).contains(&class)
    } else {
        range == selected
    }
}
