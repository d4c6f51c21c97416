// ── Geometry simplification ──
//
// Radial-distance pre-pass followed by Douglas–Peucker, applied to each
// line or ring independently. All comparisons use squared distances.
// Pure and deterministic.

use geolayer_api::{Geometry, Position};

/// Simplify `geometry` with the given tolerance (coordinate units).
///
/// Points and multipoints pass through unchanged; every line and ring is
/// reduced on its own. A tolerance of zero (or less) returns the input.
pub fn simplify(geometry: &Geometry, tolerance: f64) -> Geometry {
    if tolerance <= 0.0 || tolerance.is_nan() {
        return geometry.clone();
    }
    let sq = tolerance * tolerance;

    match geometry {
        Geometry::Point { .. } | Geometry::MultiPoint { .. } => geometry.clone(),
        Geometry::LineString { coordinates } => Geometry::LineString {
            coordinates: simplify_line(coordinates, sq),
        },
        Geometry::MultiLineString { coordinates } => Geometry::MultiLineString {
            coordinates: coordinates.iter().map(|l| simplify_line(l, sq)).collect(),
        },
        Geometry::Polygon { coordinates } => Geometry::Polygon {
            coordinates: simplify_rings(coordinates, sq),
        },
        Geometry::MultiPolygon { coordinates } => Geometry::MultiPolygon {
            coordinates: coordinates.iter().map(|p| simplify_rings(p, sq)).collect(),
        },
        Geometry::GeometryCollection { geometries } => Geometry::GeometryCollection {
            geometries: geometries.iter().map(|g| simplify(g, tolerance)).collect(),
        },
    }
}

/// Fewest positions of a valid closed ring.
const MIN_RING_POSITIONS: usize = 4;

fn simplify_rings(rings: &[Vec<Position>], sq_tolerance: f64) -> Vec<Vec<Position>> {
    rings.iter().map(|r| simplify_ring(r, sq_tolerance)).collect()
}

/// Simplify a closed ring without collapsing it below
/// [`MIN_RING_POSITIONS`].
///
/// A ring that simplifies too far keeps its start, the vertex farthest
/// from the start, and the vertex farthest from that chord, in ring order.
fn simplify_ring(ring: &[Position], sq_tolerance: f64) -> Vec<Position> {
    let simplified = simplify_line(ring, sq_tolerance);
    if simplified.len() >= MIN_RING_POSITIONS {
        return simplified;
    }
    if ring.len() <= MIN_RING_POSITIONS {
        return ring.to_vec();
    }

    let first = &ring[0];
    let last = ring.len() - 1;
    let apex = (1..last)
        .max_by(|&a, &b| sq_dist(&ring[a], first).total_cmp(&sq_dist(&ring[b], first)))
        .unwrap_or(1);
    let side = (1..last)
        .filter(|&i| i != apex)
        .max_by(|&a, &b| {
            sq_seg_dist(&ring[a], first, &ring[apex]).total_cmp(&sq_seg_dist(&ring[b], first, &ring[apex]))
        })
        .unwrap_or(if apex == 1 { 2 } else { 1 });

    let (a, b) = (apex.min(side), apex.max(side));
    vec![first.clone(), ring[a].clone(), ring[b].clone(), ring[last].clone()]
}

/// Simplify one coordinate sequence. Sequences shorter than 3 points are
/// returned unchanged. First and last points are always kept, so closed
/// rings stay closed.
pub fn simplify_line(points: &[Position], sq_tolerance: f64) -> Vec<Position> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let radial = radial_distance(points, sq_tolerance);
    douglas_peucker(&radial, sq_tolerance)
}

// ── Passes ───────────────────────────────────────────────────────────

fn radial_distance(points: &[Position], sq_tolerance: f64) -> Vec<Position> {
    let Some((first, rest)) = points.split_first() else {
        return Vec::new();
    };
    let mut kept = vec![first.clone()];
    let mut prev = first;
    let mut last_kept_is_tail = rest.is_empty();

    for point in rest {
        if sq_dist(point, prev) > sq_tolerance {
            kept.push(point.clone());
            prev = point;
            last_kept_is_tail = true;
        } else {
            last_kept_is_tail = false;
        }
    }

    if !last_kept_is_tail {
        if let Some(tail) = points.last() {
            kept.push(tail.clone());
        }
    }
    kept
}

fn douglas_peucker(points: &[Position], sq_tolerance: f64) -> Vec<Position> {
    let last = points.len() - 1;
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[last] = true;

    // Explicit stack instead of recursion: large rings would otherwise
    // recurse thousands of frames deep.
    let mut stack = vec![(0, last)];
    while let Some((first, last)) = stack.pop() {
        let mut max_sq = sq_tolerance;
        let mut index = None;
        for i in first + 1..last {
            let d = sq_seg_dist(&points[i], &points[first], &points[last]);
            if d > max_sq {
                index = Some(i);
                max_sq = d;
            }
        }
        if let Some(i) = index {
            keep[i] = true;
            if i - first > 1 {
                stack.push((first, i));
            }
            if last - i > 1 {
                stack.push((i, last));
            }
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then(|| p.clone()))
        .collect()
}

// ── Distance helpers ─────────────────────────────────────────────────

fn sq_dist(a: &Position, b: &Position) -> f64 {
    let dx = a.x() - b.x();
    let dy = a.y() - b.y();
    dx * dx + dy * dy
}

/// Squared distance from `p` to the segment `a`–`b`.
fn sq_seg_dist(p: &Position, a: &Position, b: &Position) -> f64 {
    let (mut x, mut y) = (a.x(), a.y());
    let mut dx = b.x() - x;
    let mut dy = b.y() - y;

    if dx != 0.0 || dy != 0.0 {
        let t = ((p.x() - x) * dx + (p.y() - y) * dy) / (dx * dx + dy * dy);
        if t > 1.0 {
            x = b.x();
            y = b.y();
        } else if t > 0.0 {
            x += dx * t;
            y += dy * t;
        }
    }

    dx = p.x() - x;
    dy = p.y() - y;
    dx * dx + dy * dy
}
