//! Coordinates and trip endpoints.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    /// Create a coordinate, rejecting values outside the valid ranges.
    ///
    /// # Examples
    ///
    /// ```
    /// use trip_matcher::domain::LatLng;
    ///
    /// assert!(LatLng::new(6.5244, 3.3792).is_ok());
    /// assert!(LatLng::new(91.0, 0.0).is_err());
    /// ```
    pub fn new(lat: f64, lng: f64) -> Result<Self, DomainError> {
        let point = Self { lat, lng };
        point.validate()?;
        Ok(point)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        let lat_ok = self.lat.is_finite() && (-90.0..=90.0).contains(&self.lat);
        let lng_ok = self.lng.is_finite() && (-180.0..=180.0).contains(&self.lng);
        if lat_ok && lng_ok {
            Ok(())
        } else {
            Err(DomainError::InvalidCoordinate {
                lat: self.lat,
                lng: self.lng,
            })
        }
    }

    /// Great-circle distance to `other` in metres.
    pub fn haversine_m(&self, other: &LatLng) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlng = (other.lng - self.lng).to_radians();

        let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * h.sqrt().asin()
    }
}

impl fmt::Display for LatLng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lat, self.lng)
    }
}

/// One end of a trip: where it starts or where it finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub location: LatLng,

    /// Tolerance radius around `location`, in metres.
    pub radius: f64,

    /// City name used to narrow candidate queries.
    pub city: String,
}

impl Endpoint {
    pub fn new(location: LatLng, radius: f64, city: impl Into<String>) -> Self {
        Self {
            location,
            radius,
            city: city.into(),
        }
    }

    pub(crate) fn validate(&self, field: &'static str) -> Result<(), DomainError> {
        self.location.validate()?;
        if !self.radius.is_finite() || self.radius < 0.0 {
            return Err(DomainError::InvalidField {
                field,
                reason: format!("radius must be a non-negative number, got {}", self.radius),
            });
        }
        if self.city.trim().is_empty() {
            return Err(DomainError::InvalidField {
                field,
                reason: "city cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}
