//! Common data types shared across the engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::{Error, Result};

/// Identifier of a spatial unit (grid tile).
///
/// Derived from the tile's row/column position, never from insertion order, so
/// the same configuration yields the same identifiers on every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId(u64);

impl UnitId {
    /// Identifier of the tile at (`row`, `col`), row 0 being the southernmost.
    pub fn from_row_col(row: u32, col: u32) -> Self {
        Self(((row as u64) << 32) | col as u64)
    }

    /// Tile row.
    pub fn row(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Tile column.
    pub fn col(self) -> u32 {
        (self.0 & 0xffff_ffff) as u32
    }

    /// Raw value, used as a cluster key.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}c{}", self.row(), self.col())
    }
}

/// Species identifier (external taxon key or name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpeciesId(pub String);

impl SpeciesId {
    /// Build from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpeciesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Geographic bounding region in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western edge.
    pub min_lon: f64,
    /// Southern edge.
    pub min_lat: f64,
    /// Eastern edge.
    pub max_lon: f64,
    /// Northern edge.
    pub max_lat: f64,
}

impl BoundingBox {
    /// Build and validate a region.
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self> {
        let b = Self { min_lon, min_lat, max_lon, max_lat };
        b.validate()?;
        Ok(b)
    }

    /// Check that the region is finite, non-empty and inside lon/lat limits.
    pub fn validate(&self) -> Result<()> {
        let vals = [self.min_lon, self.min_lat, self.max_lon, self.max_lat];
        if vals.iter().any(|v| !v.is_finite()) {
            return Err(Error::Validation("bounding region must be finite".into()));
        }
        if self.min_lon >= self.max_lon || self.min_lat >= self.max_lat {
            return Err(Error::Validation(format!(
                "bounding region is empty or inverted: [{}, {}, {}, {}]",
                self.min_lon, self.min_lat, self.max_lon, self.max_lat
            )));
        }
        if self.min_lon < -180.0 || self.max_lon > 180.0 || self.min_lat < -90.0 || self.max_lat > 90.0
        {
            return Err(Error::Validation("bounding region outside lon/lat limits".into()));
        }
        Ok(())
    }

    /// Closed containment test.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }
}

/// Inclusive range of years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    /// First year (inclusive).
    pub start: i32,
    /// Last year (inclusive).
    pub end: i32,
}

impl YearRange {
    /// Build and validate.
    pub fn new(start: i32, end: i32) -> Result<Self> {
        if start > end {
            return Err(Error::Validation(format!("time range inverted: {start} > {end}")));
        }
        Ok(Self { start, end })
    }

    /// Inclusive membership.
    pub fn contains(&self, year: i32) -> bool {
        year >= self.start && year <= self.end
    }

    /// Number of years in the range.
    pub fn len(&self) -> usize {
        (self.end - self.start + 1).max(0) as usize
    }

    /// `true` when the range holds no year.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate the years in order.
    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.start..=self.end
    }
}

/// Closed set of disaster categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisasterCategory {
    /// Earthquake.
    Earthquake,
    /// Riverine, coastal or flash flood.
    Flood,
    /// Tropical cyclone or convective storm.
    Storm,
    /// Wildfire.
    Wildfire,
    /// Drought.
    Drought,
    /// Volcanic activity.
    Volcanic,
    /// Landslide or mass movement.
    Landslide,
    /// Heat wave or cold wave.
    ExtremeTemperature,
}

/// Identifying method behind an estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Static two-way fixed effects.
    TwfeStatic,
    /// Dynamic event study (unit fixed effects, lead/lag indicators).
    EventStudy,
    /// Cross-fitted partially linear DML, pooled sample.
    DmlAte,
    /// DML with an event-time indicator as the treatment.
    DmlEventTime,
    /// DML fit independently within one subgroup.
    DmlSubgroup,
    /// Cohort-specific ATT from the staggered estimator.
    StaggeredCohort,
    /// Treated-weighted aggregate of cohort ATTs.
    StaggeredAggregate,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::TwfeStatic => "twfe_static",
            Method::EventStudy => "event_study",
            Method::DmlAte => "dml_ate",
            Method::DmlEventTime => "dml_event_time",
            Method::DmlSubgroup => "dml_subgroup",
            Method::StaggeredCohort => "staggered_cohort",
            Method::StaggeredAggregate => "staggered_aggregate",
        };
        f.write_str(s)
    }
}

/// Sub-key of a repeated estimate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubKey {
    /// Treatment cohort (first-treated year).
    Cohort(i32),
    /// Event-time offset.
    Offset(i32),
    /// Subgroup label (e.g. species).
    Subgroup(String),
}

impl fmt::Display for SubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubKey::Cohort(g) => write!(f, "cohort={g}"),
            SubKey::Offset(k) => write!(f, "offset={k}"),
            SubKey::Subgroup(s) => write!(f, "subgroup={s}"),
        }
    }
}

/// A single effect estimate with normal-approximation inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectEstimate {
    /// Method tag.
    pub method: Method,
    /// Cohort, offset or subgroup for repeated estimates.
    pub sub_key: Option<SubKey>,
    /// Point estimate.
    pub estimate: f64,
    /// Standard error.
    pub std_error: f64,
    /// Lower confidence bound.
    pub ci_lower: f64,
    /// Upper confidence bound.
    pub ci_upper: f64,
    /// Two-sided p-value against zero.
    pub p_value: f64,
    /// Confidence level of the interval.
    pub conf_level: f64,
    /// Number of observations behind the estimate.
    pub n_obs: usize,
}

impl EffectEstimate {
    /// Build an estimate with a normal confidence interval and two-sided p-value.
    pub fn normal(
        method: Method,
        sub_key: Option<SubKey>,
        estimate: f64,
        std_error: f64,
        n_obs: usize,
        conf_level: f64,
    ) -> Result<Self> {
        if !(conf_level > 0.0 && conf_level < 1.0) {
            return Err(Error::Validation(format!("conf_level must be in (0,1), got {conf_level}")));
        }
        if !estimate.is_finite() || !(std_error >= 0.0) {
            return Err(Error::Computation(format!(
                "{method}: non-finite estimate ({estimate}) or invalid standard error ({std_error})"
            )));
        }
        let z = normal_critical_value(conf_level);
        Ok(Self {
            method,
            sub_key,
            estimate,
            std_error,
            ci_lower: estimate - z * std_error,
            ci_upper: estimate + z * std_error,
            p_value: two_sided_p_value(estimate, std_error),
            conf_level,
            n_obs,
        })
    }

    /// `true` if the confidence interval contains `value`.
    pub fn covers(&self, value: f64) -> bool {
        self.ci_lower <= value && value <= self.ci_upper
    }

    /// z-statistic (`estimate / std_error`).
    pub fn z_stat(&self) -> f64 {
        if self.std_error > 0.0 {
            self.estimate / self.std_error
        } else if self.estimate == 0.0 {
            0.0
        } else {
            self.estimate.signum() * f64::INFINITY
        }
    }
}

#[inline]
fn standard_normal() -> Normal {
    // Safe by construction for mean=0, sigma=1.
    Normal::new(0.0, 1.0).expect("standard normal should be constructible")
}

/// Two-sided normal critical value for a confidence level (1.96 at 0.95).
pub fn normal_critical_value(conf_level: f64) -> f64 {
    standard_normal().inverse_cdf(0.5 + conf_level / 2.0)
}

/// Two-sided p-value of `estimate / std_error` under the standard normal.
pub fn two_sided_p_value(estimate: f64, std_error: f64) -> f64 {
    if std_error <= 0.0 {
        return if estimate == 0.0 { 1.0 } else { 0.0 };
    }
    let z = (estimate / std_error).abs();
    (2.0 * (1.0 - standard_normal().cdf(z))).clamp(0.0, 1.0)
}

/// A unit of work (fold, cohort, offset, subgroup) that was not estimated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skipped {
    /// Which unit of work.
    pub key: SubKey,
    /// Why it was skipped.
    pub reason: String,
}

/// Estimates of a repeated procedure, labeled with the sub-units that were skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimateSet {
    /// Successfully estimated sub-units, in key order.
    pub estimates: Vec<EffectEstimate>,
    /// Sub-units excluded from the set.
    pub skipped: Vec<Skipped>,
}

impl EstimateSet {
    /// `true` when every sub-unit was estimated.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    /// Look up the estimate for a sub-key.
    pub fn get(&self, key: &SubKey) -> Option<&EffectEstimate> {
        self.estimates.iter().find(|e| e.sub_key.as_ref() == Some(key))
    }
}
