//! The "PROJECTION" Engine - Pixel ↔ World Geometry
//!
//! Turns one camera's bounding box into a world-frame position with a
//! pinhole model, and turns a world point back into the box that camera
//! would draw around a person standing there.
//!
//! Range comes from apparent height against an assumed standing height;
//! bearing comes from the horizontal offset of the box centre. Both
//! directions share the focal derivations below, which is what keeps the
//! round trip exact.

use crate::schemas::{BoundingBox, CameraPose, WorldEstimate};
use nalgebra::{Point2, Vector2};
use std::f64::consts::PI;

/// Standing height assumed when nothing better is known.
pub const DEFAULT_PERSON_HEIGHT_M: f64 = 1.7;

/// Boxes shorter than this are treated as this tall.
const MIN_BBOX_HEIGHT_PX: f64 = 1.0;

/// Range floor used when synthesizing a box.
const MIN_SYNTH_RANGE_M: f64 = 0.1;

/// Width of a synthesized box relative to its height.
const PERSON_ASPECT: f64 = 0.4;

/// Range uncertainty grows 15% per metre on top of a fixed floor.
const UNCERTAINTY_PER_M: f64 = 0.15;
const UNCERTAINTY_FLOOR_M: f64 = 0.3;

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProjectionError {
    #[error("Non-finite input: {0}")]
    NonFinite(&'static str),

    #[error("Person height must be positive, got {0}")]
    InvalidPersonHeight(f64),

    #[error("Camera {camera_id} has unusable intrinsics")]
    InvalidIntrinsics { camera_id: String },
}

// ============================================================================
// FOCAL LENGTHS
// ============================================================================

/// Horizontal focal length in pixels.
pub fn horizontal_focal_px(image_width: u32, horizontal_fov_deg: f64) -> f64 {
    image_width as f64 / (2.0 * (horizontal_fov_deg.to_radians() / 2.0).tan())
}

/// Vertical focal length in pixels, assuming square pixels.
pub fn vertical_focal_px(image_width: u32, image_height: u32, horizontal_fov_deg: f64) -> f64 {
    let tan_half_h = (horizontal_fov_deg.to_radians() / 2.0).tan();
    let tan_half_v = tan_half_h * image_height as f64 / image_width as f64;
    image_height as f64 / (2.0 * tan_half_v)
}

// ============================================================================
// ANGLES
// ============================================================================

/// Wrap radians into [-π, π).
pub fn wrap_angle(radians: f64) -> f64 {
    (radians + PI).rem_euclid(2.0 * PI) - PI
}

/// Wrap degrees into [0, 360).
pub fn normalize_degrees(degrees: f64) -> f64 {
    degrees.rem_euclid(360.0)
}

// ============================================================================
// FORWARD: PIXELS → WORLD
// ============================================================================

fn check_camera(camera: &CameraPose) -> Result<(), ProjectionError> {
    if !(camera.position.x.is_finite()
        && camera.position.y.is_finite()
        && camera.heading_deg.is_finite()
        && camera.horizontal_fov_deg.is_finite())
    {
        return Err(ProjectionError::NonFinite("camera pose"));
    }
    let fov = camera.horizontal_fov_deg;
    if fov <= 0.0 || fov >= 180.0 || camera.image_width == 0 || camera.image_height == 0 {
        return Err(ProjectionError::InvalidIntrinsics {
            camera_id: camera.id.clone(),
        });
    }
    Ok(())
}

/// Range and its uncertainty from the apparent height of a box.
pub fn distance_from_bbox(camera: &CameraPose, bbox: &BoundingBox, person_height_m: f64) -> (f64, f64) {
    let focal_v = vertical_focal_px(camera.image_width, camera.image_height, camera.horizontal_fov_deg);
    let height_px = bbox.height().max(MIN_BBOX_HEIGHT_PX);
    let distance = person_height_m * focal_v / height_px;
    (distance, distance * UNCERTAINTY_PER_M + UNCERTAINTY_FLOOR_M)
}

/// Project a bounding box seen by `camera` into the world frame.
pub fn estimate(
    camera: &CameraPose,
    bbox: &BoundingBox,
    person_height_m: f64,
) -> Result<WorldEstimate, ProjectionError> {
    check_camera(camera)?;
    if !bbox.is_finite() {
        return Err(ProjectionError::NonFinite("bounding box"));
    }
    if !person_height_m.is_finite() {
        return Err(ProjectionError::NonFinite("person height"));
    }
    if person_height_m <= 0.0 {
        return Err(ProjectionError::InvalidPersonHeight(person_height_m));
    }

    let (distance, uncertainty) = distance_from_bbox(camera, bbox, person_height_m);

    // Positive pixel offset rotates counter-clockwise from the optical axis
    let focal_h = horizontal_focal_px(camera.image_width, camera.horizontal_fov_deg);
    let offset_px = bbox.center_x() - camera.image_width as f64 / 2.0;
    let angle_in_fov = offset_px.atan2(focal_h);
    let bearing = camera.heading_deg.to_radians() + angle_in_fov;

    let position = camera.position + Vector2::new(bearing.cos(), bearing.sin()) * distance;
    if !(position.x.is_finite() && position.y.is_finite()) {
        return Err(ProjectionError::NonFinite("projected position"));
    }

    Ok(WorldEstimate {
        x: position.x,
        y: position.y,
        distance_m: distance,
        uncertainty_m: uncertainty,
        bearing_deg: normalize_degrees(bearing.to_degrees()),
        angle_in_fov_deg: angle_in_fov.to_degrees(),
    })
}

/// Euclidean error between an estimate and a known position.
pub fn estimation_error(estimate: &WorldEstimate, true_x: f64, true_y: f64) -> f64 {
    (estimate.position() - Point2::new(true_x, true_y)).norm()
}

// ============================================================================
// INVERSE: WORLD → PIXELS
// ============================================================================

/// The box `camera` would see around a person standing at `(x, y)`.
///
/// `None` when the point is outside the horizontal field of view or sits on
/// the camera itself.
pub fn bbox_for(camera: &CameraPose, x: f64, y: f64, person_height_m: f64) -> Option<BoundingBox> {
    if check_camera(camera).is_err() || !(person_height_m.is_finite() && person_height_m > 0.0) {
        return None;
    }
    let delta = Point2::new(x, y) - camera.position;
    let range = delta.norm();
    if !range.is_finite() || range <= EPSILON {
        return None;
    }

    let angle_offset = wrap_angle(delta.y.atan2(delta.x) - camera.heading_deg.to_radians());
    let half_fov = camera.horizontal_fov_deg.to_radians() / 2.0;
    if angle_offset.abs() > half_fov {
        return None;
    }

    let distance = range.max(MIN_SYNTH_RANGE_M);
    let focal_h = horizontal_focal_px(camera.image_width, camera.horizontal_fov_deg);
    let focal_v = vertical_focal_px(camera.image_width, camera.image_height, camera.horizontal_fov_deg);

    let center_x = camera.image_width as f64 / 2.0 + focal_h * angle_offset.tan();
    let center_y = camera.image_height as f64 / 2.0;
    let height = person_height_m * focal_v / distance;
    let width = PERSON_ASPECT * height;

    Some(BoundingBox::new(
        center_x - width / 2.0,
        center_y - height / 2.0,
        center_x + width / 2.0,
        center_y + height / 2.0,
    ))
}

// ============================================================================
// FIELD OF VIEW
// ============================================================================

/// Range gate then angle gate. A point on the camera counts as visible.
pub fn is_in_view(camera: &CameraPose, x: f64, y: f64, max_range_m: f64) -> bool {
    let delta = Point2::new(x, y) - camera.position;
    let range = delta.norm();
    if range > max_range_m {
        return false;
    }
    if range <= EPSILON {
        return true;
    }
    let angle = wrap_angle(delta.y.atan2(delta.x) - camera.heading_deg.to_radians());
    angle.abs() <= camera.horizontal_fov_deg.to_radians() / 2.0
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn camera() -> CameraPose {
        CameraPose::new("cam_1", 0.0, 0.0, 0.0)
    }

    #[test]
    fn test_focal_lengths() {
        let fh = horizontal_focal_px(640, 60.0);
        assert_relative_eq!(fh, 554.256, epsilon = 1e-3);

        // Square pixels give the same focal length both ways
        let fv = vertical_focal_px(640, 480, 60.0);
        assert_relative_eq!(fv, fh, epsilon = 1e-9);
    }

    #[test]
    fn test_centered_box_lies_on_optical_axis() {
        let cam = CameraPose::new("cam_1", 2.0, 3.0, 90.0);
        let bbox = BoundingBox::new(300.0, 100.0, 340.0, 300.0);

        let est = estimate(&cam, &bbox, 1.7).unwrap();
        let expected = 1.7 * vertical_focal_px(640, 480, 60.0) / 200.0;

        assert_relative_eq!(est.distance_m, expected, epsilon = 1e-9);
        assert_relative_eq!(est.x, 2.0, epsilon = 1e-9);
        assert_relative_eq!(est.y, 3.0 + expected, epsilon = 1e-9);
        assert_relative_eq!(est.bearing_deg, 90.0, epsilon = 1e-9);
        assert_relative_eq!(est.uncertainty_m, expected * 0.15 + 0.3, epsilon = 1e-9);
    }

    #[test]
    fn test_right_offset_turns_counter_clockwise() {
        let bbox = BoundingBox::new(500.0, 100.0, 540.0, 300.0);
        let est = estimate(&camera(), &bbox, 1.7).unwrap();

        assert!(est.angle_in_fov_deg > 0.0);
        assert!(est.y > 0.0);
    }

    #[test]
    fn test_bearing_wraps_into_range() {
        let cam = CameraPose::new("cam_1", 0.0, 0.0, 355.0);
        let bbox = BoundingBox::new(500.0, 100.0, 540.0, 300.0);
        let est = estimate(&cam, &bbox, 1.7).unwrap();
        assert!((0.0..360.0).contains(&est.bearing_deg));
        assert!(est.bearing_deg < 30.0);
    }

    #[test]
    fn test_flat_box_is_floored_to_one_pixel() {
        let bbox = BoundingBox::new(300.0, 200.0, 340.0, 200.0);
        let est = estimate(&camera(), &bbox, 1.7).unwrap();

        assert!(est.distance_m.is_finite());
        assert_relative_eq!(est.distance_m, 1.7 * vertical_focal_px(640, 480, 60.0), epsilon = 1e-6);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let bbox = BoundingBox::new(300.0, 100.0, 340.0, 300.0);
        let nan_box = BoundingBox::new(f64::NAN, 100.0, 340.0, 300.0);

        assert!(matches!(estimate(&camera(), &nan_box, 1.7), Err(ProjectionError::NonFinite(_))));
        assert!(matches!(estimate(&camera(), &bbox, f64::INFINITY), Err(ProjectionError::NonFinite(_))));
        assert_eq!(estimate(&camera(), &bbox, 0.0), Err(ProjectionError::InvalidPersonHeight(0.0)));

        let broken = camera().with_intrinsics(60.0, 0, 480);
        assert!(matches!(estimate(&broken, &bbox, 1.7), Err(ProjectionError::InvalidIntrinsics { .. })));
    }

    #[test]
    fn test_bbox_for_outside_view() {
        // Behind the camera
        assert!(bbox_for(&camera(), -5.0, 0.0, 1.7).is_none());
        // 45° off axis with a 60° lens
        assert!(bbox_for(&camera(), 5.0, 5.0, 1.7).is_none());
        // On the camera
        assert!(bbox_for(&camera(), 0.0, 0.0, 1.7).is_none());
    }

    #[test]
    fn test_bbox_for_shape() {
        let bbox = bbox_for(&camera(), 5.0, 0.0, 1.7).unwrap();
        assert_relative_eq!(bbox.center_x(), 320.0, epsilon = 1e-9);
        assert_relative_eq!(bbox.center_y(), 240.0, epsilon = 1e-9);
        assert_relative_eq!(bbox.width(), 0.4 * bbox.height(), epsilon = 1e-9);
    }

    #[test]
    fn test_is_in_view_wraps_across_north() {
        let cam = CameraPose::new("cam_1", 0.0, 0.0, 350.0);
        let ten_deg = 10f64.to_radians();

        assert!(is_in_view(&cam, 5.0 * ten_deg.cos(), 5.0 * ten_deg.sin(), 8.0));
        assert!(!is_in_view(&cam, 0.0, 5.0, 8.0));
        assert!(!is_in_view(&cam, 9.0, 0.0, 8.0));
        assert!(is_in_view(&cam, 0.0, 0.0, 8.0));
    }

    #[test]
    fn test_estimation_error() {
        let est = estimate(&camera(), &bbox_for(&camera(), 6.0, 1.0, 1.7).unwrap(), 1.7).unwrap();
        assert!(estimation_error(&est, 6.0, 1.0) < 1e-6);
        assert_relative_eq!(estimation_error(&est, 6.0, 4.0), 3.0, epsilon = 1e-6);
    }

    proptest! {
        #[test]
        fn prop_round_trip_within_a_millimetre(
            cam_x in -50.0..50.0f64,
            cam_y in -50.0..50.0f64,
            heading in 0.0..360.0f64,
            fov in 30.0..120.0f64,
            width in 320u32..1920,
            height in 240u32..1080,
            range in 0.5..30.0f64,
            offset_frac in -0.9..0.9f64,
        ) {
            let cam = CameraPose::new("cam", cam_x, cam_y, heading).with_intrinsics(fov, width, height);
            let bearing = heading.to_radians() + offset_frac * fov.to_radians() / 2.0;
            let x = cam_x + range * bearing.cos();
            let y = cam_y + range * bearing.sin();

            let bbox = bbox_for(&cam, x, y, DEFAULT_PERSON_HEIGHT_M).unwrap();
            let est = estimate(&cam, &bbox, DEFAULT_PERSON_HEIGHT_M).unwrap();

            prop_assert!(estimation_error(&est, x, y) < 1e-3);
        }
    }
}
