//! Per-sample geometry features.
//!
//! Racing-line deviation uses an R-tree over the reference line built once
//! per call. Angles are computed in the track plane only and reported in
//! degrees.

use rstar::{PointDistance, RTree};

use crate::types::{
    ApexConfig, GeometryFeatures, PipelineError, Point, Rect, ReferencePoint, Sample,
    TelemetryTable, by_frame, windowed,
};

/// The reference racing line, indexed for nearest-point queries.
#[derive(Debug, Clone)]
pub struct RacingLine {
    points: Vec<ReferencePoint>,
    tree: RTree<[f64; 2]>,
}

impl RacingLine {
    /// Index the line points inside `window`, ordered by frame.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DegenerateGeometry`] if no point of the
    /// line lies inside `window`.
    pub fn new(line: &[ReferencePoint], window: &Rect) -> Result<Self, PipelineError> {
        let points = by_frame(&windowed(line, window));
        if points.is_empty() {
            return Err(PipelineError::DegenerateGeometry(
                "racing line has no points inside the reference window".to_string(),
            ));
        }
        let tree = RTree::bulk_load(points.iter().map(|p| [p.x, p.y]).collect());
        Ok(Self { points, tree })
    }

    /// The indexed line points in frame order.
    #[must_use]
    pub fn points(&self) -> &[ReferencePoint] {
        &self.points
    }

    /// Distance from `p` to the nearest line point.
    #[must_use]
    pub fn deviation(&self, p: Point) -> f64 {
        let query = [p.x, p.y];
        self.tree
            .nearest_neighbor(&query)
            .map_or(f64::INFINITY, |nearest| nearest.distance_2(&query).sqrt())
    }
}

/// Rotate `v` counter-clockwise by `degrees`.
#[must_use]
pub fn rotate(v: Point, degrees: f64) -> Point {
    let (sin, cos) = degrees.to_radians().sin_cos();
    Point::new(v.x.mul_add(cos, -v.y * sin), v.x.mul_add(sin, v.y * cos))
}

/// Unsigned angle between two vectors in degrees.
///
/// The cosine is clamped to `[-1, 1]` before the inverse cosine. The result
/// is NaN when either vector has zero length.
#[must_use]
pub fn angle_between(a: Point, b: Point) -> f64 {
    let dot = a.x.mul_add(b.x, a.y * b.y);
    (dot / (a.norm() * b.norm())).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Angle between the steered wheel direction and the velocity.
///
/// Reported as `180 - angle`. `None` when either vector has zero length.
#[must_use]
pub fn wheel_vs_velocity(forward: Point, wheel_angle: f64, velocity: Point) -> Option<f64> {
    let wheel = rotate(forward, wheel_angle);
    (wheel.norm() > 0.0 && velocity.norm() > 0.0).then(|| 180.0 - angle_between(wheel, velocity))
}

/// Angle between the car heading and the velocity.
///
/// Reported as `180 - angle`. `None` when either vector has zero length.
#[must_use]
pub fn car_vs_velocity(forward: Point, velocity: Point) -> Option<f64> {
    (forward.norm() > 0.0 && velocity.norm() > 0.0).then(|| 180.0 - angle_between(forward, velocity))
}

/// Angle between the steered wheel direction and the car heading, folded
/// into `[0, 90]`.
///
/// `None` only when the result is not a number, which happens for a
/// zero-length heading.
#[must_use]
pub fn wheel_vs_car(forward: Point, wheel_angle: f64) -> Option<f64> {
    let angle = angle_between(rotate(forward, wheel_angle), forward);
    let folded = if angle > 90.0 { 180.0 - angle } else { angle };
    folded.is_finite().then_some(folded)
}

/// Features of a single sample.
#[must_use]
pub fn sample_features(sample: &Sample, line: &RacingLine, apexes: &ApexConfig) -> GeometryFeatures {
    let p = sample.point();
    let frame = &sample.frame;
    let forward = frame.forward.planar();
    let wheel = frame.front_wheel_angle;
    let velocity = sample.kinematics.map(|k| k.velocity.planar());

    let dist_to_t1_apex = p.distance(apexes.turn1);
    let dist_to_t2_apex = p.distance(apexes.turn2);

    GeometryFeatures {
        line_distance: line.deviation(p),
        dist_to_t1_apex,
        dist_to_t2_apex,
        in_t1_window: dist_to_t1_apex <= apexes.window_radius,
        in_t2_window: dist_to_t2_apex <= apexes.window_radius,
        wheel_vs_velocity: wheel
            .zip(velocity)
            .and_then(|(w, v)| wheel_vs_velocity(forward, w, v)),
        car_vs_velocity: velocity.and_then(|v| car_vs_velocity(forward, v)),
        wheel_vs_car: wheel.and_then(|w| wheel_vs_car(forward, w)),
        brake_throttle: frame.throttle - frame.brake,
    }
}

/// Attach geometry features to every sample.
#[must_use]
pub fn extract_geometry_features(
    table: TelemetryTable,
    line: &RacingLine,
    apexes: &ApexConfig,
) -> TelemetryTable {
    let mut samples = table.into_samples();
    for sample in &mut samples {
        sample.features = Some(sample_features(sample, line, apexes));
    }
    TelemetryTable::new(samples)
}
