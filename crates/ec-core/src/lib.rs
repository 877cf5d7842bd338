//! # ec-core
//!
//! Core types and traits for the disaster/occupancy causal panel engine.
//!
//! This crate defines:
//! - the error taxonomy ([`Error`]) shared by every layer,
//! - shared data types ([`UnitId`], [`SpeciesId`], [`BoundingBox`], [`YearRange`],
//!   [`EffectEstimate`], [`EstimateSet`]),
//! - the nuisance-model capability ([`Regressor`], [`FittedRegressor`]),
//! - the immutable study configuration ([`StudyConfig`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{
    CovariateConfig, DmlConfig, EventWindow, FeatureConfig, FixedEffectEntity, LearnerConfig,
    StaggeredConfig, StudyConfig, TreatmentDefinition,
};
pub use error::{Error, Result};
pub use traits::{FittedRegressor, Regressor};
pub use types::{
    BoundingBox, DisasterCategory, EffectEstimate, EstimateSet, Method, Skipped, SpeciesId, SubKey,
    UnitId, YearRange, normal_critical_value, two_sided_p_value,
};
