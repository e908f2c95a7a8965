//! Perspective engine: pure geometry for the projection warp.
//!
//! Computes the planar homography mapping an axis-aligned source rectangle
//! onto an arbitrary destination quadrilateral, embedded as a CSS-style 4×4
//! `matrix3d` transform, and validates the quadrilateral (convexity and
//! viewport bounds). No I/O; callers own error display.

use nalgebra::{Matrix4, SMatrix, SVector, Vector4};
use thiserror::Error;

use crate::domain::{Corner, CornerSet, Point};

/// Geometry failures surfaced to the calibration layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    /// The four correspondences are collinear or coincident; no homography
    /// exists.
    #[error("degenerate quadrilateral: no perspective transform exists")]
    DegenerateQuad,
}

/// Visual guide line along one quadrilateral edge: rotation plus a
/// midpoint-anchored placement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuideLine {
    pub angle_deg: f64,
    pub top: f64,
    pub left: f64,
    pub length: f64,
}

/// Compute the projective transform mapping the source rectangle corners
/// onto the destination corners, both as flat `[x0,y0,..,x3,y3]` arrays in
/// TL, TR, BL, BR order.
///
/// The homography is solved exactly from the 4 correspondences via the
/// standard 8-equation linear system and embedded as a 4×4 matrix with
/// identity z row/column, ready to serialize as a CSS `matrix3d`.
///
/// # Errors
///
/// [`GeometryError::DegenerateQuad`] when the system is singular (collinear
/// or coincident corners).
///
/// # Examples
/// ```
/// use proyeccion::geometry::{apply_transform, compute_transform};
///
/// let src = [0.0, 0.0, 100.0, 0.0, 0.0, 100.0, 100.0, 100.0];
/// let dst = [10.0, 5.0, 90.0, 15.0, 0.0, 95.0, 110.0, 105.0];
/// let m = compute_transform(&src, &dst).expect("convex quad");
/// let (x, y) = apply_transform(&m, 100.0, 0.0);
/// assert!((x - 90.0).abs() < 1e-9 && (y - 15.0).abs() < 1e-9);
/// ```
pub fn compute_transform(src: &[f64; 8], dst: &[f64; 8]) -> Result<Matrix4<f64>, GeometryError> {
    // Unknowns h0..h7 with h8 fixed to 1: for each correspondence
    // (x,y) -> (u,v),
    //   [x y 1 0 0 0 -ux -uy] h = u
    //   [0 0 0 x y 1 -vx -vy] h = v
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for i in 0..4 {
        let (x, y) = (src[2 * i], src[2 * i + 1]);
        let (u, v) = (dst[2 * i], dst[2 * i + 1]);

        a[(2 * i, 0)] = x;
        a[(2 * i, 1)] = y;
        a[(2 * i, 2)] = 1.0;
        a[(2 * i, 6)] = -u * x;
        a[(2 * i, 7)] = -u * y;
        b[2 * i] = u;

        a[(2 * i + 1, 3)] = x;
        a[(2 * i + 1, 4)] = y;
        a[(2 * i + 1, 5)] = 1.0;
        a[(2 * i + 1, 6)] = -v * x;
        a[(2 * i + 1, 7)] = -v * y;
        b[2 * i + 1] = v;
    }

    let h = a.lu().solve(&b).ok_or(GeometryError::DegenerateQuad)?;
    if h.iter().any(|value| !value.is_finite()) {
        return Err(GeometryError::DegenerateQuad);
    }

    // A rank-deficient homography collapses the plane onto a line; catch it
    // here rather than trusting the solver's pivoting to hit an exact zero.
    let det = h[0] * (h[4] - h[5] * h[7]) - h[1] * (h[3] - h[5] * h[6])
        + h[2] * (h[3] * h[7] - h[4] * h[6]);
    if det.abs() < 1e-9 {
        return Err(GeometryError::DegenerateQuad);
    }

    // Embed the 3×3 homography into a 4×4 with identity z row/column.
    Ok(Matrix4::new(
        h[0], h[1], 0.0, h[2], //
        h[3], h[4], 0.0, h[5], //
        0.0, 0.0, 1.0, 0.0, //
        h[6], h[7], 0.0, 1.0,
    ))
}

/// Apply the transform to a point and dehomogenise.
pub fn apply_transform(m: &Matrix4<f64>, x: f64, y: f64) -> (f64, f64) {
    let p = m * Vector4::new(x, y, 0.0, 1.0);
    (p.x / p.w, p.y / p.w)
}

/// Render the transform as a CSS `matrix3d(...)` string (column-major).
pub fn matrix3d(m: &Matrix4<f64>) -> String {
    let cells: Vec<String> = m.as_slice().iter().map(|v| format!("{v}")).collect();
    format!("matrix3d({})", cells.join(", "))
}

/// Signed area determinant of three points.
fn determinant(p0: Point, p1: Point, p2: Point) -> f64 {
    p0.x * p1.y + p1.x * p2.y + p2.x * p0.y - p0.y * p1.x - p1.y * p2.x - p2.y * p0.x
}

/// Returns `true` when the quadrilateral is concave or self-intersecting.
///
/// Checks the determinant sign of consecutive corner triples across both
/// diagonals; a sign flip (or an exactly zero determinant) is an error.
pub fn has_polygon_error(corners: &CornerSet) -> bool {
    let tl = corners.get(Corner::TopLeft);
    let tr = corners.get(Corner::TopRight);
    let bl = corners.get(Corner::BottomLeft);
    let br = corners.get(Corner::BottomRight);

    let det1 = determinant(tl, tr, br);
    let det2 = determinant(br, bl, tl);
    if det1 * det2 <= 0.0 {
        return true;
    }

    let det1 = determinant(tr, br, bl);
    let det2 = determinant(bl, tl, tr);
    det1 * det2 <= 0.0
}

/// Every corner must lie inside `[0, width] × [0, height]`, boundaries
/// inclusive.
pub fn is_within_bounds(corners: &CornerSet, width: f64, height: f64) -> bool {
    Corner::ALL.iter().all(|&corner| {
        let p = corners.get(corner);
        p.x >= 0.0 && p.x <= width && p.y >= 0.0 && p.y <= height
    })
}

/// Compute the rotation and midpoint-anchored placement of the visual guide
/// line between two corners.
pub fn guide_line(from: Point, to: Point) -> GuideLine {
    let adjacent = (to.y - from.y).abs();
    let opposite = (to.x - from.x).abs();
    let length = adjacent.hypot(opposite);
    if length == 0.0 {
        return GuideLine {
            angle_deg: 0.0,
            top: from.y,
            left: from.x,
            length: 0.0,
        };
    }

    let mut angle_deg = (adjacent / length).acos().to_degrees();
    // Sign correction: edges sloping the same way in both axes rotate the
    // other direction.
    let same_direction = (from.y < to.y && from.x < to.x) || (to.y < from.y && to.x < from.x);
    if same_direction {
        angle_deg = -angle_deg;
    }

    let mid_y = from.y.min(to.y) + adjacent / 2.0;
    let mid_x = from.x.min(to.x) + opposite / 2.0;

    GuideLine {
        angle_deg,
        top: mid_y - length / 2.0,
        left: mid_x,
        length,
    }
}

/// Guide lines for the four quad edges: top, right, bottom, left.
pub fn edge_guides(corners: &CornerSet) -> [GuideLine; 4] {
    let tl = corners.get(Corner::TopLeft);
    let tr = corners.get(Corner::TopRight);
    let bl = corners.get(Corner::BottomLeft);
    let br = corners.get(Corner::BottomRight);
    [
        guide_line(tl, tr),
        guide_line(tr, br),
        guide_line(br, bl),
        guide_line(tl, bl),
    ]
}
