//! Circle and swept-segment tests used by the pitch physics

use glam::Vec2;

/// Check whether two circles strictly overlap
pub fn circles_overlap(a: Vec2, radius_a: f32, b: Vec2, radius_b: f32) -> bool {
    let combined = radius_a + radius_b;
    a.distance_squared(b) < combined * combined
}

/// Closest point to `point` on the segment `start -> end`.
/// Returns the point and its parameter `t` in `[0, 1]`.
pub fn closest_point_on_segment(start: Vec2, end: Vec2, point: Vec2) -> (Vec2, f32) {
    let seg = end - start;
    let len_sq = seg.length_squared();
    if len_sq == 0.0 {
        return (start, 0.0);
    }
    let t = ((point - start).dot(seg) / len_sq).clamp(0.0, 1.0);
    (start + seg * t, t)
}

/// Swept test of a moving circle centre against a static circle.
/// Returns the closest approach point when the path comes within `radius` of `center`.
pub fn segment_hits_circle(start: Vec2, end: Vec2, center: Vec2, radius: f32) -> Option<Vec2> {
    let (closest, _) = closest_point_on_segment(start, end, center);
    (closest.distance_squared(center) < radius * radius).then_some(closest)
}
