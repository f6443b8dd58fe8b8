/******************************************************************************
 *                                                                            *
 * WGS84 geo primitives shared by the zone, device, and marker systems:      *
 * haversine distance, initial bearing, local equirectangular projection      *
 * for spawn placement, and uniform sampling in disks and annuli.             *
 *                                                                            *
 ******************************************************************************/

use rand::Rng;

use crate::errors::{GameError, GameResult};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Latitude/longitude must be finite and inside the WGS84 envelope.
/// The boundary values themselves (±90, ±180) are accepted.
pub fn validate_coordinates(lat: f64, lng: f64) -> GameResult<()> {
    if !lat.is_finite() || !lng.is_finite() {
        return Err(GameError::Validation("coordinates must be finite".to_string()));
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(GameError::Validation(format!("latitude {} out of range [-90, 90]", lat)));
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(GameError::Validation(format!("longitude {} out of range [-180, 180]", lng)));
    }
    Ok(())
}

/// Great-circle distance in meters between two WGS84 points.
pub fn haversine_distance_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Initial bearing in degrees from north, normalized to [0, 360).
pub fn bearing_deg(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Projects a point `distance_m` away at `bearing_rad` using the local
/// equirectangular approximation. Good to well under a meter at the zone
/// scales involved (hundreds of meters to a few kilometers).
pub fn offset_point(lat: f64, lng: f64, bearing_rad: f64, distance_m: f64) -> (f64, f64) {
    let d_lat = (distance_m * bearing_rad.cos()) / EARTH_RADIUS_M;
    let d_lng = (distance_m * bearing_rad.sin()) / (EARTH_RADIUS_M * lat.to_radians().cos());
    (lat + d_lat.to_degrees(), lng + d_lng.to_degrees())
}

/// Uniformly distributed point inside a disk around the center.
pub fn random_point_in_disk(
    rng: &mut impl Rng,
    center_lat: f64,
    center_lng: f64,
    radius_m: f64,
) -> (f64, f64) {
    let bearing = rng.gen_range(0.0..std::f64::consts::TAU);
    // sqrt keeps the area density uniform instead of clustering at the center
    let distance = radius_m * rng.gen::<f64>().sqrt();
    offset_point(center_lat, center_lng, bearing, distance)
}

/// Point at a uniformly random angle and a uniformly random radial distance
/// in [min_m, max_m]. Zone spawning deliberately samples the radial distance
/// uniformly (not area-uniform) so new zones skew toward the player.
pub fn random_point_in_annulus(
    rng: &mut impl Rng,
    center_lat: f64,
    center_lng: f64,
    min_m: f64,
    max_m: f64,
) -> (f64, f64) {
    let bearing = rng.gen_range(0.0..std::f64::consts::TAU);
    let distance = if min_m >= max_m { min_m } else { rng.gen_range(min_m..=max_m) };
    offset_point(center_lat, center_lng, bearing, distance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn coordinates_at_the_envelope_are_accepted() {
        assert!(validate_coordinates(90.0, 180.0).is_ok());
        assert!(validate_coordinates(-90.0, -180.0).is_ok());
        assert!(validate_coordinates(0.0, 0.0).is_ok());
    }

    #[test]
    fn coordinates_just_beyond_the_envelope_are_rejected() {
        assert!(validate_coordinates(90.0001, 0.0).is_err());
        assert!(validate_coordinates(-90.0001, 0.0).is_err());
        assert!(validate_coordinates(0.0, 180.0001).is_err());
        assert!(validate_coordinates(0.0, -180.0001).is_err());
        assert!(validate_coordinates(f64::NAN, 0.0).is_err());
        assert!(validate_coordinates(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn haversine_matches_one_degree_at_the_equator() {
        // One degree of longitude at the equator is ~111.195 km for R = 6371 km.
        let d = haversine_distance_m(0.0, 0.0, 0.0, 1.0);
        assert!((d - 111_194.9).abs() < 10.0, "got {}", d);

        let d = haversine_distance_m(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_194.9).abs() < 10.0, "got {}", d);
    }

    #[test]
    fn haversine_is_zero_for_identical_points() {
        assert_eq!(haversine_distance_m(48.1486, 17.1077, 48.1486, 17.1077), 0.0);
    }

    #[test]
    fn bearing_hits_the_cardinal_directions() {
        assert!((bearing_deg(0.0, 0.0, 1.0, 0.0) - 0.0).abs() < 0.01); // north
        assert!((bearing_deg(0.0, 0.0, 0.0, 1.0) - 90.0).abs() < 0.01); // east
        assert!((bearing_deg(1.0, 0.0, 0.0, 0.0) - 180.0).abs() < 0.01); // south
        assert!((bearing_deg(0.0, 1.0, 0.0, 0.0) - 270.0).abs() < 0.01); // west
    }

    #[test]
    fn offset_point_round_trips_through_haversine() {
        let (lat, lng) = (48.1486, 17.1077);
        for (bearing, distance) in [(0.0f64, 250.0f64), (1.1, 900.0), (3.9, 2_000.0)] {
            let (lat2, lng2) = offset_point(lat, lng, bearing, distance);
            let measured = haversine_distance_m(lat, lng, lat2, lng2);
            assert!(
                (measured - distance).abs() < distance * 0.005 + 0.5,
                "bearing {} distance {} measured {}",
                bearing,
                distance,
                measured
            );
        }
    }

    #[test]
    fn annulus_samples_stay_inside_the_requested_band() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let (lat, lng) = random_point_in_annulus(&mut rng, 48.1486, 17.1077, 250.0, 800.0);
            let d = haversine_distance_m(48.1486, 17.1077, lat, lng);
            assert!(d >= 245.0 && d <= 805.0, "distance {} outside annulus", d);
        }
    }

    #[test]
    fn disk_samples_stay_inside_the_radius() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let (lat, lng) = random_point_in_disk(&mut rng, 10.0, 20.0, 300.0);
            let d = haversine_distance_m(10.0, 20.0, lat, lng);
            assert!(d <= 302.0, "distance {} outside disk", d);
        }
    }

    #[test]
    fn degenerate_annulus_collapses_to_its_minimum() {
        let mut rng = StdRng::seed_from_u64(3);
        let (lat, lng) = random_point_in_annulus(&mut rng, 0.0, 0.0, 400.0, 400.0);
        let d = haversine_distance_m(0.0, 0.0, lat, lng);
        assert!((d - 400.0).abs() < 2.0);
    }
}
