use dtscan_core::{distance_km, is_in_license_range, Coordinates, SearchParameters};

use crate::types::{DriveTestCentre, LocationHour};

/// A test center eligible for scanning.
#[derive(Debug, Clone, PartialEq)]
pub struct Center {
    pub id: i64,
    pub name: String,
    /// Distance from the search origin.
    pub distance_km: f64,
    pub is_closed: bool,
    pub supported_classes: Vec<String>,
    pub weekly_hours: Vec<LocationHour>,
}

/// Keep the centers that offer the selected class within the search radius,
/// nearest first.
#[must_use]
pub fn select_centers(centres: Vec<DriveTestCentre>, params: &SearchParameters) -> Vec<Center> {
    let selected = params.license_class.code();
    let mut centers: Vec<Center> = centres
        .into_iter()
        .filter_map(|centre| {
            let distance = distance_km(
                params.origin,
                Coordinates::new(centre.latitude, centre.longitude),
            );
            let Some(supported_classes) = centre.licence_test_types else {
                tracing::trace!(center = %centre.name, "licence types undefined");
                return None;
            };
            if !supported_classes
                .iter()
                .any(|range| is_in_license_range(range, selected))
            {
                tracing::trace!(center = %centre.name, licence_class = selected, "licence class not offered");
                return None;
            }
            if distance > params.radius_km {
                tracing::trace!(
                    center = %centre.name,
                    radius_km = params.radius_km,
                    distance_km = distance,
                    "too far away"
                );
                return None;
            }
            Some(Center {
                id: centre.id,
                name: centre.name,
                distance_km: distance,
                is_closed: centre.is_closed,
                supported_classes,
                weekly_hours: centre.location_hours,
            })
        })
        .collect();
    centers.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    centers
}
