//! Geographic primitives shared by the cache, jurisdiction routing, and
//! provider adapters.
//!
//! Coordinates are WGS84 decimal degrees throughout. Distances are meters.

use serde::{Deserialize, Serialize};

/// Mean earth radius in meters (spherical approximation)
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS84 point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle distance to another point in meters (haversine).
    ///
    /// Accurate to well under 0.5% for the sub-kilometer tolerances used by
    /// the spatial cache.
    pub fn distance_meters(&self, other: &LatLng) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlng = (other.lng - self.lng).to_radians();

        let a = (dlat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_M * c
    }

    /// Coarse spatial bucket key: coordinates truncated to 3 decimal places
    /// (~110 m of latitude). Used as a pre-filter index for tolerance-based
    /// cache lookup; candidates from the bucket and its neighbors still get
    /// an exact distance check.
    pub fn bucket(&self) -> SpatialBucket {
        SpatialBucket {
            lat_milli: (self.lat * 1000.0).floor() as i32,
            lng_milli: (self.lng * 1000.0).floor() as i32,
        }
    }

    /// Validate that the point is a plausible WGS84 coordinate.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Grid cell identifier for spatial pre-filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpatialBucket {
    pub lat_milli: i32,
    pub lng_milli: i32,
}

impl SpatialBucket {
    /// The bucket itself plus its 8 neighbors. A tolerance radius up to
    /// ~100 m can straddle a cell edge, so lookups scan the full ring.
    pub fn with_neighbors(&self) -> [SpatialBucket; 9] {
        let mut cells = [*self; 9];
        let mut i = 0;
        for dlat in -1..=1 {
            for dlng in -1..=1 {
                cells[i] = SpatialBucket {
                    lat_milli: self.lat_milli + dlat,
                    lng_milli: self.lng_milli + dlng,
                };
                i += 1;
            }
        }
        cells
    }
}

/// Axis-aligned bounding box, used for jurisdiction routing and canonical
/// service-area pre-filters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn contains(&self, point: &LatLng) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lng >= self.min_lng
            && point.lng <= self.max_lng
    }

    /// Expand the box by approximately `meters` on every side.
    ///
    /// Longitude degrees shrink with latitude; uses the cosine at the box
    /// center, which is fine for the city-scale boxes this serves.
    pub fn expanded_by_meters(&self, meters: f64) -> BoundingBox {
        let dlat = meters / 111_320.0;
        let center_lat = (self.min_lat + self.max_lat) / 2.0;
        let dlng = meters / (111_320.0 * center_lat.to_radians().cos().max(0.01));
        BoundingBox {
            min_lat: self.min_lat - dlat,
            max_lat: self.max_lat + dlat,
            min_lng: self.min_lng - dlng,
            max_lng: self.max_lng + dlng,
        }
    }
}

/// Normalize a postal address for use as a cache key: lowercase, trimmed,
/// interior whitespace collapsed.
pub fn normalize_address(address: &str) -> String {
    address
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
