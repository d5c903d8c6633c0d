use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Coord {
    pub lat: f64,
    pub lng: f64,
}

impl Coord {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine great-circle distance between two lat/lng points in kilometers.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Even-odd ray casting in lat/lng space. Polygons may be open or closed;
/// fewer than three vertices never contain anything.
pub fn point_in_polygon(point: Coord, polygon: &[Coord]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (a, b) = (polygon[i], polygon[j]);
        if (a.lat > point.lat) != (b.lat > point.lat) {
            let cross_lng = (b.lng - a.lng) * (point.lat - a.lat) / (b.lat - a.lat) + a.lng;
            if point.lng < cross_lng {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Centroid of `(point, weight)` pairs. Non-positive weights count as 1.
/// Returns `None` for an empty slice.
pub fn weighted_centroid(points: &[(Coord, f64)]) -> Option<Coord> {
    if points.is_empty() {
        return None;
    }

    let (mut lat, mut lng, mut total) = (0.0, 0.0, 0.0);
    for (p, w) in points {
        let w = if *w > 0.0 && w.is_finite() { *w } else { 1.0 };
        lat += p.lat * w;
        lng += p.lng * w;
        total += w;
    }
    Some(Coord::new(lat / total, lng / total))
}

static LEGACY_COORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[\(\[]?\s*(-?\d+(?:\.\d+)?)\s*[,;\s]\s*(-?\d+(?:\.\d+)?)\s*[\)\]]?\s*$")
        .expect("valid regex")
});

/// Parse a free-form legacy coordinate string: `"lat,lng"`, `"(lat, lng)"`,
/// `"[lat lng]"` or `"lat;lng"`. Out-of-range values are rejected.
pub fn parse_legacy_coordinates(raw: &str) -> Option<Coord> {
    let caps = LEGACY_COORD_RE.captures(raw)?;
    let lat: f64 = caps.get(1)?.as_str().parse().ok()?;
    let lng: f64 = caps.get(2)?.as_str().parse().ok()?;
    let coord = Coord::new(lat, lng);
    coord.is_valid().then_some(coord)
}
