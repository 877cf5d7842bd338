//! Input records delivered, already cleaned, by the data collaborators.

use ec_core::{DisasterCategory, Error, Result, SpeciesId, YearRange};
use geo::Polygon;

/// A georeferenced species occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct OccurrenceEvent {
    /// Species observed.
    pub species: SpeciesId,
    /// Longitude, degrees.
    pub lon: f64,
    /// Latitude, degrees.
    pub lat: f64,
    /// Observation year.
    pub year: i32,
}

/// Known habitat of a species (single polygon; multi-part ranges are merged upstream).
#[derive(Debug, Clone, PartialEq)]
pub struct RangePolygon {
    /// Species the range belongs to.
    pub species: SpeciesId,
    /// Range geometry in lon/lat.
    pub polygon: Polygon<f64>,
}

/// A point-located disaster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisasterEvent {
    /// Disaster category.
    pub category: DisasterCategory,
    /// Longitude, degrees.
    pub lon: f64,
    /// Latitude, degrees.
    pub lat: f64,
    /// Year of occurrence.
    pub year: i32,
}

pub(crate) fn check_coordinates(kind: &str, idx: usize, lon: f64, lat: f64) -> Result<()> {
    if !lon.is_finite() || !lat.is_finite() {
        return Err(Error::Data(format!("{kind} #{idx}: missing or non-finite coordinates")));
    }
    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(Error::Data(format!("{kind} #{idx}: coordinates ({lon}, {lat}) out of range")));
    }
    Ok(())
}

pub(crate) fn check_year(kind: &str, idx: usize, year: i32, range: &YearRange) -> Result<()> {
    if !range.contains(year) {
        return Err(Error::Data(format!(
            "{kind} #{idx}: year {year} outside time range [{}, {}]",
            range.start, range.end
        )));
    }
    Ok(())
}
