//! Study configuration.
//!
//! One immutable [`StudyConfig`] value is threaded by reference through every
//! entry point; nothing reads module-level state.

use serde::{Deserialize, Serialize};

use crate::types::{BoundingBox, DisasterCategory, YearRange};
use crate::{Error, Result};

/// How the binary treatment regressor is derived from the treatment panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentDefinition {
    /// Treated from the first-treated year onward (`year >= first_treated_year`).
    #[default]
    Absorbing,
    /// Treated only in unit-years with a disaster footprint.
    Contemporaneous,
}

/// Entity absorbed by the "unit" fixed effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixedEffectEntity {
    /// Spatial unit.
    #[default]
    Unit,
    /// Spatial unit × species.
    UnitSpecies,
}

/// Event-time window `[lower, upper]` with an omitted reference period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventWindow {
    /// Earliest offset (leads are negative).
    pub lower: i32,
    /// Latest offset.
    pub upper: i32,
    /// Omitted period, coefficient fixed at zero.
    pub reference: i32,
}

impl Default for EventWindow {
    fn default() -> Self {
        Self { lower: -3, upper: 3, reference: -1 }
    }
}

impl EventWindow {
    /// Offsets carrying an indicator, ascending, reference excluded.
    pub fn offsets(&self) -> Vec<i32> {
        (self.lower..=self.upper).filter(|&k| k != self.reference).collect()
    }

    /// Check ordering and that the reference lies inside the window.
    pub fn validate(&self) -> Result<()> {
        if self.lower > self.upper {
            return Err(Error::Validation(format!(
                "event window inverted: [{}, {}]",
                self.lower, self.upper
            )));
        }
        if self.reference < self.lower || self.reference > self.upper {
            return Err(Error::Validation(format!(
                "reference period {} outside event window [{}, {}]",
                self.reference, self.lower, self.upper
            )));
        }
        if self.lower == self.upper {
            return Err(Error::Validation("event window holds only the reference period".into()));
        }
        Ok(())
    }
}

/// Nuisance learner selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LearnerConfig {
    /// Ridge-regularized least squares with intercept.
    Linear {
        /// L2 penalty on non-intercept coefficients.
        ridge: f64,
    },
    /// Bagged regression trees with per-split feature subsampling.
    Forest {
        /// Number of trees.
        n_trees: usize,
        /// Maximum depth of each tree.
        max_depth: usize,
        /// Minimum number of samples in a leaf.
        min_samples_leaf: usize,
        /// Fraction of features considered at each split, in (0, 1].
        max_features: f64,
    },
}

impl Default for LearnerConfig {
    fn default() -> Self {
        LearnerConfig::Forest { n_trees: 100, max_depth: 8, min_samples_leaf: 5, max_features: 0.5 }
    }
}

impl LearnerConfig {
    fn validate(&self) -> Result<()> {
        match *self {
            LearnerConfig::Linear { ridge } => {
                if !(ridge >= 0.0 && ridge.is_finite()) {
                    return Err(Error::Validation(format!("ridge must be >= 0, got {ridge}")));
                }
            }
            LearnerConfig::Forest { n_trees, max_depth, min_samples_leaf, max_features } => {
                if n_trees == 0 || max_depth == 0 {
                    return Err(Error::Validation("forest needs n_trees >= 1 and max_depth >= 1".into()));
                }
                if min_samples_leaf == 0 {
                    return Err(Error::Validation("min_samples_leaf must be >= 1".into()));
                }
                if !(max_features > 0.0 && max_features <= 1.0) {
                    return Err(Error::Validation(format!(
                        "max_features must be in (0, 1], got {max_features}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Covariates handed to the nuisance models.
///
/// The treatment and the outcome are never part of this set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Unit centroid longitude and latitude.
    pub coordinates: bool,
    /// Calendar year.
    pub year: bool,
    /// One-hot species identity.
    pub species: bool,
    /// Coarsening factor for unit identity: tiles are grouped into
    /// `unit_bin_size × unit_bin_size` blocks, one-hot encoded. 0 disables.
    pub unit_bin_size: u32,
    /// NDVI, temperature and precipitation from the covariate table.
    pub environmental: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self { coordinates: true, year: true, species: true, unit_bin_size: 4, environmental: false }
    }
}

/// Cross-fitting settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmlConfig {
    /// Number of folds K.
    pub n_folds: usize,
    /// Minimum rows per fold.
    pub min_fold_size: usize,
    /// Minimum rows per subgroup in the subgroup variant.
    pub min_subgroup_size: usize,
    /// Seed for fold assignment and learner randomness.
    pub seed: u64,
    /// Learner for E[Y | X].
    pub outcome_learner: LearnerConfig,
    /// Learner for E[D | X].
    pub treatment_learner: LearnerConfig,
    /// Covariate set.
    pub features: FeatureConfig,
    /// Keep per-model training indices for a cross-fitting audit.
    pub record_audit: bool,
}

impl Default for DmlConfig {
    fn default() -> Self {
        Self {
            n_folds: 5,
            min_fold_size: 20,
            min_subgroup_size: 100,
            seed: 42,
            outcome_learner: LearnerConfig::default(),
            treatment_learner: LearnerConfig::default(),
            features: FeatureConfig::default(),
            record_audit: false,
        }
    }
}

/// Staggered cohort estimator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaggeredConfig {
    /// Drop rows of later cohorts once they are treated themselves, so they
    /// serve only as not-yet-treated comparisons.
    pub trim_later_cohorts: bool,
}

impl Default for StaggeredConfig {
    fn default() -> Self {
        Self { trim_later_cohorts: true }
    }
}

/// Environmental covariate grid settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CovariateConfig {
    /// Desired covariate grid size in km.
    pub grid_size_km: f64,
    /// Finest resolution available for NDVI, in km.
    pub ndvi_min_res_km: f64,
    /// Finest resolution available for temperature and precipitation, in km.
    pub climate_min_res_km: f64,
}

impl Default for CovariateConfig {
    fn default() -> Self {
        Self { grid_size_km: 25.0, ndvi_min_res_km: 0.25, climate_min_res_km: 25.0 }
    }
}

/// Complete configuration of one study run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    /// Bounding region of the tiling.
    pub region: BoundingBox,
    /// Tile edge length in degrees.
    pub resolution_deg: f64,
    /// Inclusive study period.
    pub time_range: YearRange,
    /// Disaster footprint radius in km.
    pub buffer_radius_km: f64,
    /// Restrict (unit, species) pairs to overlapping range polygons.
    pub range_filtering: bool,
    /// Binary treatment regressor definition.
    pub treatment_definition: TreatmentDefinition,
    /// Entity absorbed by the unit fixed effect.
    pub fixed_effect_entity: FixedEffectEntity,
    /// Disaster categories to consider; `None` keeps all.
    pub disaster_categories: Option<Vec<DisasterCategory>>,
    /// Event-study window.
    pub event_window: EventWindow,
    /// Confidence level of reported intervals.
    pub confidence_level: f64,
    /// Cross-fitting.
    pub dml: DmlConfig,
    /// Staggered cohort estimator.
    pub staggered: StaggeredConfig,
    /// Environmental covariates.
    pub covariates: CovariateConfig,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            region: BoundingBox { min_lon: -10.0, min_lat: 35.0, max_lon: 30.0, max_lat: 60.0 },
            resolution_deg: 1.0,
            time_range: YearRange { start: 2000, end: 2020 },
            buffer_radius_km: 50.0,
            range_filtering: true,
            treatment_definition: TreatmentDefinition::default(),
            fixed_effect_entity: FixedEffectEntity::default(),
            disaster_categories: None,
            event_window: EventWindow::default(),
            confidence_level: 0.95,
            dml: DmlConfig::default(),
            staggered: StaggeredConfig::default(),
            covariates: CovariateConfig::default(),
        }
    }
}

impl StudyConfig {
    /// Parse and validate a JSON document. Missing fields take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check every field; the first violation is returned.
    pub fn validate(&self) -> Result<()> {
        self.region.validate()?;
        if !(self.resolution_deg > 0.0 && self.resolution_deg.is_finite()) {
            return Err(Error::Validation(format!(
                "resolution_deg must be > 0, got {}",
                self.resolution_deg
            )));
        }
        if self.time_range.start > self.time_range.end {
            return Err(Error::Validation(format!(
                "time range inverted: {} > {}",
                self.time_range.start, self.time_range.end
            )));
        }
        if !(self.buffer_radius_km > 0.0 && self.buffer_radius_km.is_finite()) {
            return Err(Error::Validation(format!(
                "buffer_radius_km must be > 0, got {}",
                self.buffer_radius_km
            )));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(Error::Validation(format!(
                "confidence_level must be in (0,1), got {}",
                self.confidence_level
            )));
        }
        self.event_window.validate()?;
        if self.dml.n_folds < 2 {
            return Err(Error::Validation(format!("n_folds must be >= 2, got {}", self.dml.n_folds)));
        }
        if self.dml.min_fold_size == 0 {
            return Err(Error::Validation("min_fold_size must be >= 1".into()));
        }
        self.dml.outcome_learner.validate()?;
        self.dml.treatment_learner.validate()?;
        let c = &self.covariates;
        if !(c.grid_size_km > 0.0 && c.ndvi_min_res_km > 0.0 && c.climate_min_res_km > 0.0) {
            return Err(Error::Validation("covariate resolutions must be > 0".into()));
        }
        Ok(())
    }
}
