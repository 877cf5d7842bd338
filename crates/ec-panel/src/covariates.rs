//! Environmental covariates (NDVI, temperature, precipitation) per cell-year.
//!
//! Values are supplied by an external fetcher at the source's native grid.
//! Coordinates are snapped to that grid by rounding to the nearest multiple
//! of the effective resolution, `max(grid_size_km, source_min_res_km) / 111`
//! degrees; NDVI and the climate variables use separate grids.

use std::collections::{BTreeSet, HashMap};

use ec_core::{CovariateConfig, Error, Result};
use serde::{Deserialize, Serialize};

/// Kilometres per degree used to convert covariate resolutions.
pub const KM_PER_DEGREE: f64 = 111.0;

/// Environmental covariates attached to an analysis row. Absent values stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentalCovariates {
    /// Mean NDVI over the year, 0-1.
    pub ndvi: Option<f64>,
    /// Mean daily temperature, °C.
    pub temp_mean_c: Option<f64>,
    /// Annual precipitation sum, mm.
    pub precip_sum_mm: Option<f64>,
}

impl EnvironmentalCovariates {
    /// Values in fixed order, or `None` if any is absent.
    pub fn complete(&self) -> Option<[f64; 3]> {
        Some([self.ndvi?, self.temp_mean_c?, self.precip_sum_mm?])
    }
}

/// Which covariate source a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovariateSource {
    /// Vegetation index.
    Ndvi,
    /// Temperature and precipitation.
    Climate,
}

/// A snapped (year, cell) that still needs a value from the fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CovariateRequest {
    /// Source to query.
    pub source: CovariateSource,
    /// Year.
    pub year: i32,
    /// Snapped latitude.
    pub lat: f64,
    /// Snapped longitude.
    pub lon: f64,
}

/// Snapping grid of one covariate source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CovariateGrid {
    resolution_km: f64,
    resolution_deg: f64,
}

impl CovariateGrid {
    /// Grid at `max(grid_size_km, min_res_km)`.
    pub fn new(grid_size_km: f64, min_res_km: f64) -> Result<Self> {
        let resolution_km = grid_size_km.max(min_res_km);
        if !(resolution_km > 0.0 && resolution_km.is_finite()) {
            return Err(Error::Validation(format!(
                "covariate resolution must be > 0 km, got {resolution_km}"
            )));
        }
        Ok(Self { resolution_km, resolution_deg: resolution_km / KM_PER_DEGREE })
    }

    /// Effective resolution in km.
    pub fn resolution_km(&self) -> f64 {
        self.resolution_km
    }

    /// Effective resolution in degrees.
    pub fn resolution_deg(&self) -> f64 {
        self.resolution_deg
    }

    /// Integer cell (lat index, lon index) of a coordinate.
    pub fn cell(&self, lat: f64, lon: f64) -> (i64, i64) {
        ((lat / self.resolution_deg).round() as i64, (lon / self.resolution_deg).round() as i64)
    }

    /// Snapped (lat, lon) of a coordinate.
    pub fn snap(&self, lat: f64, lon: f64) -> (f64, f64) {
        let (i, j) = self.cell(lat, lon);
        (i as f64 * self.resolution_deg, j as f64 * self.resolution_deg)
    }
}

type CellKey = (i32, i64, i64);

/// Covariate values keyed by (year, snapped cell).
#[derive(Debug, Clone)]
pub struct CovariateTable {
    ndvi_grid: CovariateGrid,
    climate_grid: CovariateGrid,
    ndvi: HashMap<CellKey, Option<f64>>,
    climate: HashMap<CellKey, (Option<f64>, Option<f64>)>,
}

impl CovariateTable {
    /// Empty table with grids derived from the configuration.
    pub fn new(config: &CovariateConfig) -> Result<Self> {
        Ok(Self {
            ndvi_grid: CovariateGrid::new(config.grid_size_km, config.ndvi_min_res_km)?,
            climate_grid: CovariateGrid::new(config.grid_size_km, config.climate_min_res_km)?,
            ndvi: HashMap::new(),
            climate: HashMap::new(),
        })
    }

    /// NDVI snapping grid.
    pub fn ndvi_grid(&self) -> &CovariateGrid {
        &self.ndvi_grid
    }

    /// Temperature/precipitation snapping grid.
    pub fn climate_grid(&self) -> &CovariateGrid {
        &self.climate_grid
    }

    /// Record an NDVI value (raw fetch result; `None` when the fetch found nothing).
    pub fn insert_ndvi(&mut self, lat: f64, lon: f64, year: i32, ndvi: Option<f64>) {
        let (i, j) = self.ndvi_grid.cell(lat, lon);
        self.ndvi.insert((year, i, j), ndvi);
    }

    /// Record temperature and precipitation for a cell-year.
    pub fn insert_climate(
        &mut self,
        lat: f64,
        lon: f64,
        year: i32,
        temp_mean_c: Option<f64>,
        precip_sum_mm: Option<f64>,
    ) {
        let (i, j) = self.climate_grid.cell(lat, lon);
        self.climate.insert((year, i, j), (temp_mean_c, precip_sum_mm));
    }

    /// Covariates for a location and year.
    pub fn lookup(&self, lat: f64, lon: f64, year: i32) -> EnvironmentalCovariates {
        let (i, j) = self.ndvi_grid.cell(lat, lon);
        let ndvi = self.ndvi.get(&(year, i, j)).copied().flatten();
        let (i, j) = self.climate_grid.cell(lat, lon);
        let (temp_mean_c, precip_sum_mm) =
            self.climate.get(&(year, i, j)).copied().unwrap_or((None, None));
        EnvironmentalCovariates { ndvi, temp_mean_c, precip_sum_mm }
    }

    /// Unique snapped cell-years among `points` (lat, lon, year) with no entry yet.
    ///
    /// Cells already attempted (even with an absent result) are not requested
    /// again. Requests are sorted by source, then year descending.
    pub fn pending_requests(
        &self,
        points: impl IntoIterator<Item = (f64, f64, i32)>,
    ) -> Vec<CovariateRequest> {
        let mut ndvi: BTreeSet<CellKey> = BTreeSet::new();
        let mut climate: BTreeSet<CellKey> = BTreeSet::new();
        for (lat, lon, year) in points {
            let (i, j) = self.ndvi_grid.cell(lat, lon);
            if !self.ndvi.contains_key(&(year, i, j)) {
                ndvi.insert((year, i, j));
            }
            let (i, j) = self.climate_grid.cell(lat, lon);
            if !self.climate.contains_key(&(year, i, j)) {
                climate.insert((year, i, j));
            }
        }
        let to_request = |source: CovariateSource, res_deg: f64, set: BTreeSet<CellKey>| {
            set.into_iter().rev().map(move |(year, i, j)| CovariateRequest {
                source,
                year,
                lat: i as f64 * res_deg,
                lon: j as f64 * res_deg,
            })
        };
        to_request(CovariateSource::Ndvi, self.ndvi_grid.resolution_deg, ndvi)
            .chain(to_request(CovariateSource::Climate, self.climate_grid.resolution_deg, climate))
            .collect()
    }
}
