//! Geographic coordinates accepted by the engine.

use crate::error::ClimatologyError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated point on the globe, in decimal degrees.
///
/// Latitude lies in `[-90, 90]` and longitude in `[-180, 180]`. Construct it with
/// [`GeoPoint::new`], which rejects out-of-range or non-finite coordinates.
///
/// # Examples
///
/// ```
/// use climatology::GeoPoint;
///
/// let paris = GeoPoint::new(48.8566, 2.3522).unwrap();
/// assert_eq!(paris.latitude(), 48.8566);
/// assert!(GeoPoint::new(91.0, 0.0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ClimatologyError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(ClimatologyError::InvalidCoordinate {
                latitude,
                longitude,
            });
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(ClimatologyError::InvalidCoordinate {
                latitude,
                longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Great-circle distance to another point in kilometers.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine::distance(
            haversine::Location {
                latitude: self.latitude,
                longitude: self.longitude,
            },
            haversine::Location {
                latitude: other.latitude,
                longitude: other.longitude,
            },
            haversine::Units::Kilometers,
        )
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.latitude, self.longitude)
    }
}
