// Mean earth radius used by the rest of the fleet tooling
const EARTH_RADIUS_METERS: f64 = 6_367_000.0;

/// Great-circle distance in meters between two (lng, lat) positions given in degrees.
pub fn haversine_meters(lng1: f64, lat1: f64, lng2: f64, lat2: f64) -> f64 {
    let (lng1, lat1, lng2, lat2) = (
        lng1.to_radians(),
        lat1.to_radians(),
        lng2.to_radians(),
        lat2.to_radians(),
    );
    let dlng = lng2 - lng1;
    let dlat = lat2 - lat1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    // Rounding can push this slightly outside [0, 1] for coincident or antipodal points
    let a = a.clamp(0.0, 1.0);
    2.0 * EARTH_RADIUS_METERS * a.sqrt().asin()
}

/// Element-wise haversine over equal-length coordinate arrays.
pub fn haversine_many(lng1: &[f64], lat1: &[f64], lng2: &[f64], lat2: &[f64]) -> Vec<f64> {
    assert!(
        lng1.len() == lat1.len() && lat1.len() == lng2.len() && lng2.len() == lat2.len(),
        "haversine_many needs equal-length inputs"
    );
    lng1.iter()
        .zip(lat1)
        .zip(lng2.iter().zip(lat2))
        .map(|((lng1, lat1), (lng2, lat2))| haversine_meters(*lng1, *lat1, *lng2, *lat2))
        .collect()
}
