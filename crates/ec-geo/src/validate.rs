//! Polygon validity checks applied before any overlap computation.

use ec_core::{Error, Result};
use geo::algorithm::line_intersection::{LineIntersection, line_intersection};
use geo::{Area, BoundingRect, Line, LineString, Polygon};

/// Check that a lon/lat polygon is usable for overlap queries.
///
/// Rejects non-finite coordinates, rings with fewer than three distinct
/// vertices, zero-area exteriors and self-intersecting rings.
pub fn validate_polygon(poly: &Polygon<f64>) -> Result<()> {
    validate_ring(poly.exterior(), "exterior")?;
    if poly.exterior().0.len() >= 4 && Polygon::new(poly.exterior().clone(), vec![]).unsigned_area() <= 0.0 {
        return Err(Error::Geometry("exterior ring has zero area".into()));
    }
    for (k, ring) in poly.interiors().iter().enumerate() {
        validate_ring(ring, &format!("interior ring {k}"))?;
    }
    Ok(())
}

fn validate_ring(ring: &LineString<f64>, label: &str) -> Result<()> {
    if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err(Error::Geometry(format!("{label}: non-finite coordinate")));
    }
    // geo closes rings on construction, so a triangle has 4 coordinates.
    if ring.0.len() < 4 {
        return Err(Error::Geometry(format!(
            "{label}: needs at least 3 distinct vertices, got {}",
            ring.0.len().saturating_sub(1)
        )));
    }
    if let Some((a, b)) = first_self_intersection(ring) {
        return Err(Error::Geometry(format!("{label}: self-intersection between edges {a} and {b}")));
    }
    Ok(())
}

/// Index pair of the first two non-adjacent edges that touch or cross.
fn first_self_intersection(ring: &LineString<f64>) -> Option<(usize, usize)> {
    let lines: Vec<Line<f64>> =
        ring.lines().filter(|l| l.start != l.end).collect();
    let m = lines.len();
    let boxes: Vec<_> = lines.iter().map(|l| l.bounding_rect()).collect();
    for i in 0..m {
        for j in (i + 2)..m {
            // First and last edges share the closing vertex.
            if i == 0 && j == m - 1 {
                continue;
            }
            let (bi, bj) = (boxes[i], boxes[j]);
            if bi.max().x < bj.min().x
                || bj.max().x < bi.min().x
                || bi.max().y < bj.min().y
                || bj.max().y < bi.min().y
            {
                continue;
            }
            match line_intersection(lines[i], lines[j]) {
                Some(LineIntersection::SinglePoint { .. }) | Some(LineIntersection::Collinear { .. }) => {
                    return Some((i, j));
                }
                None => {}
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn accepts_simple_square_with_hole() {
        let poly = polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 4.0), (x: 0.0, y: 4.0)],
            interiors: [[(x: 1.0, y: 1.0), (x: 2.0, y: 1.0), (x: 2.0, y: 2.0), (x: 1.0, y: 2.0)]],
        );
        validate_polygon(&poly).unwrap();
    }

    #[test]
    fn rejects_bow_tie() {
        let poly = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 2.0), (x: 2.0, y: 0.0), (x: 0.0, y: 2.0)];
        let err = validate_polygon(&poly).unwrap_err();
        assert!(matches!(err, Error::Geometry(_)), "{err}");
    }

    #[test]
    fn rejects_degenerate_rings() {
        let line = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)];
        assert!(validate_polygon(&line).is_err());

        let flat = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 2.0, y: 0.0)];
        assert!(validate_polygon(&flat).is_err());

        let nan = polygon![(x: 0.0, y: 0.0), (x: f64::NAN, y: 0.0), (x: 1.0, y: 1.0)];
        assert!(validate_polygon(&nan).is_err());
    }
}
