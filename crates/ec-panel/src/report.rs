//! Data-quality warnings collected while building panels.

use ec_core::SpeciesId;
use serde::{Deserialize, Serialize};

/// A non-fatal data-quality problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataWarning {
    /// No range polygon was supplied for a species while filtering is enabled.
    MissingRange {
        /// Affected species.
        species: SpeciesId,
    },
    /// The range polygon was rejected; the species contributes no rows.
    InvalidRange {
        /// Affected species.
        species: SpeciesId,
        /// Geometry error message.
        reason: String,
    },
    /// The range polygon does not overlap any unit.
    EmptyRange {
        /// Affected species.
        species: SpeciesId,
    },
    /// Occurrences that fell outside the bounding region.
    OccurrencesOutsideRegion {
        /// How many.
        count: usize,
    },
    /// Occurrences located in units outside the species' range.
    OccurrencesOutsideRange {
        /// Affected species.
        species: SpeciesId,
        /// How many.
        count: usize,
    },
    /// A disaster footprint could not be intersected with the tiling.
    InvalidFootprint {
        /// Index of the event in the input.
        event: usize,
        /// Geometry error message.
        reason: String,
    },
    /// Disasters whose footprint did not reach any unit.
    FootprintsOutsideRegion {
        /// How many.
        count: usize,
    },
}

/// Warnings gathered by one builder run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    /// Warnings in the order they were raised.
    pub warnings: Vec<DataWarning>,
}

impl BuildReport {
    pub(crate) fn warn(&mut self, w: DataWarning) {
        log::warn!("data quality: {w:?}");
        self.warnings.push(w);
    }

    /// Append another report.
    pub fn extend(&mut self, other: BuildReport) {
        self.warnings.extend(other.warnings);
    }

    /// `true` when nothing was reported.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}
