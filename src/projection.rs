//! Coordinate projection for downstream consumers of assembled areas.
//!
//! Supports plain WGS84 degrees (EPSG:4326) and spherical web mercator
//! (EPSG:3857). Latitudes fed to the mercator functions must lie strictly
//! between -90 and 90 degrees.

use std::f64::consts::FRAC_PI_2;
use std::fmt;

use crate::osm::Location;

/// Earth radius used by the EPSG:3857 spherical mercator, in meters.
pub const EARTH_RADIUS_FOR_EPSG3857: f64 = 6_378_137.0;

/// Projected coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

impl Coordinates {
    pub fn new(x: f64, y: f64) -> Coordinates {
        Coordinates { x, y }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

pub fn lon_to_x(lon: f64) -> f64 {
    EARTH_RADIUS_FOR_EPSG3857 * lon.to_radians()
}

pub fn lat_to_y(lat: f64) -> f64 {
    EARTH_RADIUS_FOR_EPSG3857 * (lat.to_radians() / 2.0 + std::f64::consts::FRAC_PI_4).tan().ln()
}

pub fn x_to_lon(x: f64) -> f64 {
    (x / EARTH_RADIUS_FOR_EPSG3857).to_degrees()
}

pub fn y_to_lat(y: f64) -> f64 {
    ((y / EARTH_RADIUS_FOR_EPSG3857).exp().atan() * 2.0 - FRAC_PI_2).to_degrees()
}

/// The two output projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    /// EPSG:4326, coordinates stay in degrees.
    #[default]
    Wgs84,
    /// EPSG:3857, coordinates in mercator meters.
    WebMercator,
}

impl Projection {
    pub fn from_epsg(epsg: u32) -> Option<Projection> {
        match epsg {
            4326 => Some(Projection::Wgs84),
            3857 => Some(Projection::WebMercator),
            _ => None,
        }
    }

    pub fn epsg(self) -> u32 {
        match self {
            Projection::Wgs84 => 4326,
            Projection::WebMercator => 3857,
        }
    }

    pub fn project(self, location: Location) -> Coordinates {
        match self {
            Projection::Wgs84 => Coordinates::new(location.lon(), location.lat()),
            Projection::WebMercator => {
                Coordinates::new(lon_to_x(location.lon()), lat_to_y(location.lat()))
            }
        }
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mercator_anchors() {
        assert_eq!(lon_to_x(0.0), 0.0);
        assert!(lat_to_y(0.0).abs() < 1e-9);
        // Half the equatorial circumference.
        assert!((lon_to_x(180.0) - 20_037_508.342_789_244).abs() < 1e-6);
    }

    #[test]
    fn mercator_round_trip() {
        for &(lon, lat) in &[(13.377, 52.516), (-122.419, 37.774), (151.209, -33.868)] {
            assert!((x_to_lon(lon_to_x(lon)) - lon).abs() < 1e-9);
            assert!((y_to_lat(lat_to_y(lat)) - lat).abs() < 1e-9);
        }
    }

    #[test]
    fn wgs84_passes_degrees_through() {
        let projected = Projection::Wgs84.project(Location::new(13.377, 52.516));
        assert!((projected.x - 13.377).abs() < 1e-7);
        assert!((projected.y - 52.516).abs() < 1e-7);
    }

    #[test]
    fn epsg_codes() {
        assert_eq!(Projection::from_epsg(4326), Some(Projection::Wgs84));
        assert_eq!(Projection::from_epsg(3857), Some(Projection::WebMercator));
        assert_eq!(Projection::from_epsg(32633), None);
        assert_eq!(Projection::WebMercator.epsg(), 3857);
        assert_eq!(Projection::WebMercator.to_string(), "EPSG:3857");
    }
}
