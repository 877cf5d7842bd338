//! # ec-geo
//!
//! Spatial indexer: a deterministic regular tiling of a bounding region with
//! point-location and polygon-overlap queries.
//!
//! The index is built once and is read-only afterwards; it is `Sync` and can
//! be queried concurrently without locking.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Regular tiling, `locate`, `overlap_fraction`.
pub mod grid;
/// Equal-area and local metric projections, geodesic buffers.
pub mod projection;
/// Polygon validity checks.
pub mod validate;

pub use grid::{SpatialIndex, SpatialUnit};
pub use projection::{DEFAULT_BUFFER_SEGMENTS, buffer_point};
pub use validate::validate_polygon;
