//! Explicit projections used before any area or distance computation.
//!
//! - Lambert cylindrical equal-area for overlap fractions: degree tiles have
//!   non-constant area away from the equator, so areas are never taken in the
//!   (lon, lat) plane.
//! - Local azimuthal-equidistant approximation around an event for metric
//!   buffers; accurate at the footprint radii used here (tens to a few hundred
//!   km, mid/low latitudes).

use geo::{Coord, LineString, MapCoords, Polygon};

/// Mean Earth radius (IUGG), km.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Vertices used to approximate a circular footprint.
pub const DEFAULT_BUFFER_SEGMENTS: usize = 64;

/// Lon/lat (degrees) → Lambert cylindrical equal-area (km).
#[inline]
pub fn to_equal_area(c: Coord<f64>) -> Coord<f64> {
    Coord { x: EARTH_RADIUS_KM * c.x.to_radians(), y: EARTH_RADIUS_KM * c.y.to_radians().sin() }
}

/// Lambert cylindrical equal-area (km) → lon/lat (degrees).
#[inline]
pub fn from_equal_area(c: Coord<f64>) -> Coord<f64> {
    Coord {
        x: (c.x / EARTH_RADIUS_KM).to_degrees(),
        y: (c.y / EARTH_RADIUS_KM).clamp(-1.0, 1.0).asin().to_degrees(),
    }
}

/// Project a lon/lat polygon into the equal-area plane.
pub fn project_equal_area(poly: &Polygon<f64>) -> Polygon<f64> {
    poly.map_coords(to_equal_area)
}

/// Area of a lon/lat cell `[lon0, lon1] × [lat0, lat1]` in km².
pub fn cell_area_km2(lon0: f64, lat0: f64, lon1: f64, lat1: f64) -> f64 {
    EARTH_RADIUS_KM
        * EARTH_RADIUS_KM
        * (lon1 - lon0).to_radians().abs()
        * (lat1.to_radians().sin() - lat0.to_radians().sin()).abs()
}

/// Local metric frame (km) centred on `origin`.
#[derive(Debug, Clone, Copy)]
pub struct LocalMetric {
    origin: Coord<f64>,
    cos_lat: f64,
}

impl LocalMetric {
    /// Frame centred on a lon/lat origin.
    pub fn new(origin: Coord<f64>) -> Self {
        Self { origin, cos_lat: origin.y.to_radians().cos().max(1e-6) }
    }

    /// Lon/lat → local (east, north) km.
    pub fn forward(&self, c: Coord<f64>) -> Coord<f64> {
        Coord {
            x: EARTH_RADIUS_KM * (c.x - self.origin.x).to_radians() * self.cos_lat,
            y: EARTH_RADIUS_KM * (c.y - self.origin.y).to_radians(),
        }
    }

    /// Local (east, north) km → lon/lat.
    pub fn inverse(&self, c: Coord<f64>) -> Coord<f64> {
        Coord {
            x: self.origin.x + (c.x / (EARTH_RADIUS_KM * self.cos_lat)).to_degrees(),
            y: self.origin.y + (c.y / EARTH_RADIUS_KM).to_degrees(),
        }
    }
}

/// Circular footprint of `radius_km` around a lon/lat point, returned in lon/lat.
///
/// The circle is built in the local metric frame and reprojected back, so
/// its east-west extent in degrees widens with latitude.
pub fn buffer_point(lon: f64, lat: f64, radius_km: f64, segments: usize) -> Polygon<f64> {
    let frame = LocalMetric::new(Coord { x: lon, y: lat });
    let segments = segments.max(8);
    let mut ring: Vec<Coord<f64>> = (0..segments)
        .map(|k| {
            let theta = 2.0 * std::f64::consts::PI * k as f64 / segments as f64;
            frame.inverse(Coord { x: radius_km * theta.cos(), y: radius_km * theta.sin() })
        })
        .collect();
    ring.push(ring[0]);
    Polygon::new(LineString::from(ring), vec![])
}
