//! Distributor assignment.
//!
//! Candidate distributors are narrowed in SQL with a latitude/longitude
//! bounding box over the indexed coordinate columns; the haversine distance
//! then picks the single closest one inside the radius.

use serde::{Deserialize, Serialize};

use crate::db::DbPool;
use crate::error::{AppError, AppResult};

const EARTH_RADIUS_M: f64 = 6_371_000.0;
/// Metres per degree of latitude (and of longitude at the equator).
const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;
/// Slack on the box so great-circle edges never fall outside it.
const BOX_PADDING: f64 = 1.01;

/// GeoJSON-style point. Coordinates are `[longitude, latitude]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type", default = "point_type")]
    pub kind: String,
    pub coordinates: [f64; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

fn point_type() -> String {
    "Point".to_string()
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self { kind: point_type(), coordinates: [longitude, latitude], address: None }
    }

    pub fn longitude(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn latitude(&self) -> f64 {
        self.coordinates[1]
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.kind != "Point" {
            return Err(AppError::Validation("Location type must be 'Point'".to_string()));
        }
        let (lng, lat) = (self.longitude(), self.latitude());
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(AppError::Validation(
                "Invalid longitude: must be between -180 and 180".to_string(),
            ));
        }
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(AppError::Validation(
                "Invalid latitude: must be between -90 and 90".to_string(),
            ));
        }
        Ok(())
    }

    /// Great-circle distance in metres.
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude().to_radians();
        let lat2 = other.latitude().to_radians();
        let d_lat = (other.latitude() - self.latitude()).to_radians();
        let d_lon = (other.longitude() - self.longitude()).to_radians();

        let a = (d_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_M * c
    }
}

/// Bounding box (min_lat, max_lat, min_lng, max_lng) that contains every point
/// within `radius_m` of `center`. Longitude span widens toward the poles and is
/// clamped to the full range when the box would wrap.
pub fn bounding_box(center: &GeoPoint, radius_m: f64) -> (f64, f64, f64, f64) {
    let lat = center.latitude();
    let lng = center.longitude();
    let radius_m = radius_m * BOX_PADDING;
    let d_lat = radius_m / METERS_PER_DEGREE;

    let min_lat = (lat - d_lat).max(-90.0);
    let max_lat = (lat + d_lat).min(90.0);

    let cos_lat = lat.to_radians().cos();
    if cos_lat < 1e-6 || min_lat <= -90.0 || max_lat >= 90.0 {
        return (min_lat, max_lat, -180.0, 180.0);
    }
    let d_lng = radius_m / (METERS_PER_DEGREE * cos_lat);
    let (min_lng, max_lng) = (lng - d_lng, lng + d_lng);
    if min_lng < -180.0 || max_lng > 180.0 {
        return (min_lat, max_lat, -180.0, 180.0);
    }
    (min_lat, max_lat, min_lng, max_lng)
}

/// Id of the closest active distributor within `max_distance_m`, if any.
pub async fn nearest_distributor(
    db: &DbPool,
    location: &GeoPoint,
    max_distance_m: f64,
) -> AppResult<Option<String>> {
    let (min_lat, max_lat, min_lng, max_lng) = bounding_box(location, max_distance_m);

    let candidates: Vec<(String, f64, f64)> = sqlx::query_as(
        "SELECT id, longitude, latitude FROM users
         WHERE role = 'distributor' AND active = 1
           AND latitude IS NOT NULL AND longitude IS NOT NULL
           AND latitude BETWEEN ? AND ?
           AND longitude BETWEEN ? AND ?",
    )
    .bind(min_lat)
    .bind(max_lat)
    .bind(min_lng)
    .bind(max_lng)
    .fetch_all(db)
    .await?;

    let nearest = candidates
        .into_iter()
        .map(|(id, lng, lat)| (id, location.distance_to(&GeoPoint::new(lng, lat))))
        .filter(|(_, d)| *d <= max_distance_m)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(id, distance)| {
            tracing::debug!(distributor = %id, distance_m = distance, "nearest distributor");
            id
        });

    Ok(nearest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_zero_for_same_point() {
        let p = GeoPoint::new(72.8777, 19.0760);
        assert!(p.distance_to(&p) < 1e-6);
    }

    #[test]
    fn test_distance_mumbai_to_pune() {
        let mumbai = GeoPoint::new(72.8777, 19.0760);
        let pune = GeoPoint::new(73.8567, 18.5204);
        let km = mumbai.distance_to(&pune) / 1000.0;
        assert!((115.0..125.0).contains(&km), "got {km} km");
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = GeoPoint::new(77.2090, 28.6139);
        let b = GeoPoint::new(77.2300, 28.6500);
        assert!((a.distance_to(&b) - b.distance_to(&a)).abs() < 1e-6);
    }

    #[test]
    fn test_bounding_box_contains_radius() {
        let center = GeoPoint::new(72.8777, 19.0760);
        let (min_lat, max_lat, min_lng, max_lng) = bounding_box(&center, 10_000.0);
        // A point 9.9 km due east must fall inside the box
        let east = GeoPoint::new(72.8777 + 9_900.0 / (METERS_PER_DEGREE * 19.0760f64.to_radians().cos()), 19.0760);
        let north = GeoPoint::new(72.8777, 19.0760 + 9_990.0 / METERS_PER_DEGREE);
        assert!(center.distance_to(&east) < 10_000.0);
        assert!(east.longitude() >= min_lng && east.longitude() <= max_lng);
        assert!(center.distance_to(&north) < 10_000.0);
        assert!(north.latitude() <= max_lat);
        assert!(min_lat < 19.0760);
    }

    #[test]
    fn test_bounding_box_near_pole_spans_all_longitudes() {
        let center = GeoPoint::new(10.0, 89.99);
        let (_, max_lat, min_lng, max_lng) = bounding_box(&center, 10_000.0);
        assert_eq!(max_lat, 90.0);
        assert_eq!((min_lng, max_lng), (-180.0, 180.0));
    }

    #[test]
    fn test_bounding_box_across_antimeridian() {
        let center = GeoPoint::new(179.99, 0.0);
        let (_, _, min_lng, max_lng) = bounding_box(&center, 10_000.0);
        assert_eq!((min_lng, max_lng), (-180.0, 180.0));
    }

    #[test]
    fn test_validate_ranges() {
        assert!(GeoPoint::new(72.0, 19.0).validate().is_ok());
        assert!(GeoPoint::new(181.0, 19.0).validate().is_err());
        assert!(GeoPoint::new(72.0, -91.0).validate().is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).validate().is_err());

        let mut p = GeoPoint::new(0.0, 0.0);
        p.kind = "Polygon".into();
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_deserialize_defaults_type() {
        let p: GeoPoint = serde_json::from_str(r#"{"coordinates":[72.8,19.1]}"#).unwrap();
        assert_eq!(p.kind, "Point");
        assert_eq!(p.longitude(), 72.8);
        assert_eq!(p.latitude(), 19.1);
    }
}
