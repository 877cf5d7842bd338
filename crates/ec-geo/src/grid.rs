//! Regular tiling of a bounding region and the queries built on it.
//!
//! Tiles are laid out row-major from the south-west corner. Every tile covers
//! the half-open cell `[lon0, lon1) × [lat0, lat1)`; the last row and column
//! are closed on the region's outer edge and clipped to it when the extent is
//! not a multiple of the resolution. The tiling is exhaustive and
//! non-overlapping, and a point on a shared edge belongs to exactly one tile.

use std::collections::BTreeMap;

use ec_core::{BoundingBox, Error, Result, StudyConfig, UnitId};
use geo::{Area, BooleanOps, BoundingRect, Coord, Polygon, Rect};

use crate::projection::{cell_area_km2, project_equal_area, to_equal_area};
use crate::validate::validate_polygon;

/// Overlap fractions at or below this value are treated as touching edges.
const FRACTION_EPS: f64 = 1e-12;

/// Hard cap on the number of tiles of one tiling.
const MAX_TILES: usize = 50_000_000;

/// One tile of the tiling.
#[derive(Debug, Clone)]
pub struct SpatialUnit {
    /// Stable identifier derived from (row, col).
    pub id: UnitId,
    /// Row, 0 = southernmost.
    pub row: u32,
    /// Column, 0 = westernmost.
    pub col: u32,
    /// Tile polygon in lon/lat.
    pub polygon: Polygon<f64>,
    /// Tile centre (lon, lat).
    pub centroid: (f64, f64),
    /// Area in km² (equal-area projection).
    pub area_km2: f64,
    projected: Polygon<f64>,
}

/// Precomputed tiling, shared read-only by all downstream builders.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    region: BoundingBox,
    resolution: f64,
    n_rows: u32,
    n_cols: u32,
    units: Vec<SpatialUnit>,
}

impl SpatialIndex {
    /// Build the tiling of `region` at `resolution` degrees.
    pub fn build(region: BoundingBox, resolution: f64) -> Result<Self> {
        region.validate()?;
        if !(resolution > 0.0 && resolution.is_finite()) {
            return Err(Error::Validation(format!("resolution must be > 0, got {resolution}")));
        }
        let n_cols = n_cells(region.max_lon - region.min_lon, resolution);
        let n_rows = n_cells(region.max_lat - region.min_lat, resolution);
        if n_rows.saturating_mul(n_cols) > MAX_TILES {
            return Err(Error::Validation(format!(
                "tiling of {n_rows}×{n_cols} tiles exceeds the {MAX_TILES} tile cap"
            )));
        }

        let mut units = Vec::with_capacity(n_rows * n_cols);
        for row in 0..n_rows {
            let lat0 = region.min_lat + row as f64 * resolution;
            let lat1 = (region.min_lat + (row + 1) as f64 * resolution).min(region.max_lat);
            for col in 0..n_cols {
                let lon0 = region.min_lon + col as f64 * resolution;
                let lon1 = (region.min_lon + (col + 1) as f64 * resolution).min(region.max_lon);
                let rect = Rect::new(Coord { x: lon0, y: lat0 }, Coord { x: lon1, y: lat1 });
                let polygon = rect.to_polygon();
                let projected = Rect::new(
                    to_equal_area(Coord { x: lon0, y: lat0 }),
                    to_equal_area(Coord { x: lon1, y: lat1 }),
                )
                .to_polygon();
                let (row, col) = (row as u32, col as u32);
                units.push(SpatialUnit {
                    id: UnitId::from_row_col(row, col),
                    row,
                    col,
                    polygon,
                    centroid: ((lon0 + lon1) / 2.0, (lat0 + lat1) / 2.0),
                    area_km2: cell_area_km2(lon0, lat0, lon1, lat1),
                    projected,
                });
            }
        }
        log::debug!("spatial index: {n_rows} rows × {n_cols} cols at {resolution}°");

        Ok(Self { region, resolution, n_rows: n_rows as u32, n_cols: n_cols as u32, units })
    }

    /// Build from the study configuration.
    pub fn from_config(config: &StudyConfig) -> Result<Self> {
        Self::build(config.region, config.resolution_deg)
    }

    /// Bounding region.
    pub fn region(&self) -> &BoundingBox {
        &self.region
    }

    /// Tile edge length in degrees.
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Number of tile rows.
    pub fn n_rows(&self) -> u32 {
        self.n_rows
    }

    /// Number of tile columns.
    pub fn n_cols(&self) -> u32 {
        self.n_cols
    }

    /// Number of tiles.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// `true` if the tiling has no tile (never the case for a valid region).
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// All tiles, row-major.
    pub fn units(&self) -> &[SpatialUnit] {
        &self.units
    }

    /// Tile by identifier.
    pub fn unit(&self, id: UnitId) -> Option<&SpatialUnit> {
        if id.row() >= self.n_rows || id.col() >= self.n_cols {
            return None;
        }
        self.units.get(id.row() as usize * self.n_cols as usize + id.col() as usize)
    }

    /// Tile containing a point, or `None` outside the region.
    pub fn locate(&self, lon: f64, lat: f64) -> Option<UnitId> {
        if !lon.is_finite() || !lat.is_finite() || !self.region.contains(lon, lat) {
            return None;
        }
        let col = cell_of(lon, self.region.min_lon, self.resolution, self.n_cols);
        let row = cell_of(lat, self.region.min_lat, self.resolution, self.n_rows);
        Some(UnitId::from_row_col(row, col))
    }

    /// Fraction of each tile's area covered by a lon/lat polygon.
    ///
    /// Only tiles with positive overlap are returned. Areas are computed in
    /// the equal-area projection. Polygons entirely outside the region yield
    /// an empty map.
    pub fn overlap_fraction(&self, poly: &Polygon<f64>) -> Result<BTreeMap<UnitId, f64>> {
        validate_polygon(poly)?;
        let mut out = BTreeMap::new();
        let Some(bbox) = poly.bounding_rect() else {
            return Ok(out);
        };
        let r = &self.region;
        if bbox.max().x < r.min_lon
            || bbox.min().x > r.max_lon
            || bbox.max().y < r.min_lat
            || bbox.min().y > r.max_lat
        {
            return Ok(out);
        }

        let col0 = cell_of(bbox.min().x.max(r.min_lon), r.min_lon, self.resolution, self.n_cols);
        let col1 = cell_of(bbox.max().x.min(r.max_lon), r.min_lon, self.resolution, self.n_cols);
        let row0 = cell_of(bbox.min().y.max(r.min_lat), r.min_lat, self.resolution, self.n_rows);
        let row1 = cell_of(bbox.max().y.min(r.max_lat), r.min_lat, self.resolution, self.n_rows);

        let projected = project_equal_area(poly);
        for row in row0..=row1 {
            for col in col0..=col1 {
                let unit = &self.units[row as usize * self.n_cols as usize + col as usize];
                let tile_area = unit.projected.unsigned_area();
                if tile_area <= 0.0 {
                    continue;
                }
                let inter = projected.intersection(&unit.projected).unsigned_area();
                let frac = (inter / tile_area).clamp(0.0, 1.0);
                if frac > FRACTION_EPS {
                    out.insert(unit.id, frac);
                }
            }
        }
        Ok(out)
    }
}

fn n_cells(extent: f64, resolution: f64) -> usize {
    // Tolerate extents that are a multiple of the resolution up to rounding.
    let raw = extent / resolution;
    let rounded = raw.round();
    let n = if (raw - rounded).abs() < 1e-9 { rounded } else { raw.ceil() };
    (n as usize).max(1)
}

/// Index of the half-open cell containing `v`, consistent with the tile edges
/// `origin + k * resolution`. Values on the outer edge go to the last cell.
fn cell_of(v: f64, origin: f64, resolution: f64, n: u32) -> u32 {
    let last = n as i64 - 1;
    let mut k = (((v - origin) / resolution).floor() as i64).clamp(0, last);
    if k > 0 && v < origin + k as f64 * resolution {
        k -= 1;
    } else if k < last && v >= origin + (k + 1) as f64 * resolution {
        k += 1;
    }
    k as u32
}
