//! Shared types for the lapwise telemetry pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// A 2D point in track-plane world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// World X position.
    pub x: f64,
    /// World Y position.
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Length of the vector from the origin to this point.
    #[must_use]
    pub fn norm(self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// One value per spatial axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Axes<T> {
    /// X component.
    pub x: T,
    /// Y component.
    pub y: T,
    /// Z component.
    pub z: T,
}

/// A 3D vector of `f64` components.
pub type Vec3 = Axes<f64>;

impl<T> Axes<T> {
    /// Create a new triple.
    #[must_use]
    pub const fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }

    /// Borrow each component.
    #[must_use]
    pub const fn as_ref(&self) -> Axes<&T> {
        Axes {
            x: &self.x,
            y: &self.y,
            z: &self.z,
        }
    }

    /// Apply `f` to each component.
    #[must_use]
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Axes<U> {
        Axes {
            x: f(self.x),
            y: f(self.y),
            z: f(self.z),
        }
    }
}

impl Vec3 {
    /// The track-plane (x, y) projection.
    #[must_use]
    pub const fn planar(self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Dense, session-ordered lap identifier.
///
/// Assigned once by [`segment_laps`](crate::segment::segment_laps) and never
/// renumbered by later filters, so gaps appear when laps are dropped.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LapIndex(pub u32);

impl fmt::Display for LapIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One raw telemetry frame as delivered by the reader.
///
/// Upstream velocity and G-force channels are deliberately absent: they are
/// always recomputed from positions by the kinematics stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    /// Session identifier.
    pub session_uid: u64,
    /// Raw lap number within the session.
    pub lap_number: u32,
    /// Circuit identifier.
    pub track_id: i32,
    /// In-session lap clock in milliseconds.
    pub lap_time_ms: f64,
    /// Lap clock rendered as `minutes:seconds.millis`.
    pub lap_time: String,
    /// Cumulative distance travelled along the lap.
    pub lap_distance: f64,
    /// World position.
    pub position: Vec3,
    /// World forward-direction unit vector.
    pub forward: Vec3,
    /// Front wheel angle in degrees, if recorded.
    pub front_wheel_angle: Option<f64>,
    /// Throttle pedal, `0..=1`.
    pub throttle: f64,
    /// Brake pedal, `0..=1`.
    pub brake: f64,
    /// Steering input, `-1..=1`.
    pub steer: f64,
    /// Whether the game flagged the current lap invalid.
    pub lap_invalid: bool,
}

/// Recomputed per-sample kinematics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kinematics {
    /// Velocity in units per second, clipped to the configured limit.
    pub velocity: Vec3,
    /// G-force per axis. `None` only when no sample of the lap had a
    /// plausible value to fill from.
    pub g_force: Axes<Option<f64>>,
}

/// Per-sample geometry features.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometryFeatures {
    /// Distance to the nearest racing-line point.
    pub line_distance: f64,
    /// Distance to the Turn 1 apex.
    pub dist_to_t1_apex: f64,
    /// Distance to the Turn 2 apex.
    pub dist_to_t2_apex: f64,
    /// Inside the Turn 1 window.
    pub in_t1_window: bool,
    /// Inside the Turn 2 window.
    pub in_t2_window: bool,
    /// Slip angle between the steered wheel direction and velocity, degrees.
    pub wheel_vs_velocity: Option<f64>,
    /// Drift angle between the car heading and velocity, degrees.
    pub car_vs_velocity: Option<f64>,
    /// Steering magnitude between the wheel direction and heading, `0..=90`.
    pub wheel_vs_car: Option<f64>,
    /// Combined pedal channel: throttle minus brake.
    pub brake_throttle: f64,
}

/// One row of the telemetry table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Lap this sample belongs to.
    pub lap_index: LapIndex,
    /// Raw frame data.
    pub frame: TelemetryFrame,
    /// Set by the kinematics stage.
    pub kinematics: Option<Kinematics>,
    /// Set by the geometry stage.
    pub features: Option<GeometryFeatures>,
}

impl Sample {
    /// Track-plane position of this sample.
    #[must_use]
    pub const fn point(&self) -> Point {
        self.frame.position.planar()
    }
}

/// The table handed from stage to stage.
///
/// Rows produced by segmentation are ordered by lap, then lap clock, then
/// arrival order. Stages never reorder rows; they drop rows or fill in the
/// derived columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryTable(Vec<Sample>);

impl TelemetryTable {
    /// Wrap a vector of samples.
    #[must_use]
    pub const fn new(samples: Vec<Sample>) -> Self {
        Self(samples)
    }

    /// Returns `true` if the table has no rows.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of rows.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// All rows in table order.
    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.0
    }

    /// Consumes the table and returns the rows.
    #[must_use]
    pub fn into_samples(self) -> Vec<Sample> {
        self.0
    }

    /// Row positions of every lap, keyed by lap index.
    ///
    /// Within a lap the positions keep table order. This is the
    /// partition every per-lap computation maps over.
    #[must_use]
    pub fn partition(&self) -> BTreeMap<LapIndex, Vec<usize>> {
        let mut laps: BTreeMap<LapIndex, Vec<usize>> = BTreeMap::new();
        for (row, sample) in self.0.iter().enumerate() {
            laps.entry(sample.lap_index).or_default().push(row);
        }
        laps
    }

    /// Distinct lap indices present in the table.
    #[must_use]
    pub fn lap_indices(&self) -> BTreeSet<LapIndex> {
        self.0.iter().map(|s| s.lap_index).collect()
    }

    /// Rows of a single lap, in table order.
    pub fn lap(&self, lap_index: LapIndex) -> impl Iterator<Item = &Sample> {
        self.0.iter().filter(move |s| s.lap_index == lap_index)
    }

    /// Keep only rows whose lap is not in `dropped`.
    #[must_use]
    pub fn without_laps(self, dropped: &BTreeSet<LapIndex>) -> Self {
        if dropped.is_empty() {
            return self;
        }
        Self(
            self.0
                .into_iter()
                .filter(|s| !dropped.contains(&s.lap_index))
                .collect(),
        )
    }
}

/// One point of a reference edge or racing line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    /// Acquisition order.
    pub frame: u64,
    /// World X position.
    pub x: f64,
    /// World Y position.
    pub y: f64,
}

impl ReferencePoint {
    /// Create a new reference point.
    #[must_use]
    pub const fn new(frame: u64, x: f64, y: f64) -> Self {
        Self { frame, x, y }
    }

    /// Position as a [`Point`].
    #[must_use]
    pub const fn point(self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Points of `reference` inside `window`, in input order.
#[must_use]
pub fn windowed(reference: &[ReferencePoint], window: &Rect) -> Vec<ReferencePoint> {
    reference
        .iter()
        .copied()
        .filter(|p| window.contains(p.point()))
        .collect()
}

/// A copy of `reference` ordered by acquisition frame.
#[must_use]
pub fn by_frame(reference: &[ReferencePoint]) -> Vec<ReferencePoint> {
    let mut sorted = reference.to_vec();
    sorted.sort_by_key(|p| p.frame);
    sorted
}

/// Axis-aligned coordinate window, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Smallest X kept.
    pub min_x: f64,
    /// Largest X kept.
    pub max_x: f64,
    /// Smallest Y kept.
    pub min_y: f64,
    /// Largest Y kept.
    pub max_y: f64,
}

impl Rect {
    /// Create a new window.
    #[must_use]
    pub const fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    /// Whether `p` lies inside or on the window.
    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        (self.min_x..=self.max_x).contains(&p.x) && (self.min_y..=self.max_y).contains(&p.y)
    }
}

/// Why a lap was removed from the table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DiscardReason {
    /// The game flagged the lap invalid.
    InvalidLap {
        /// Frames of the lap carrying the flag.
        invalid_samples: usize,
    },
    /// A sample lay further outside the track limits than allowed.
    TrackLimits {
        /// Largest exterior distance seen in the lap.
        max_distance: f64,
    },
    /// Fewer raw samples than the configured floor.
    TooFewSamples {
        /// Samples in the lap.
        samples: usize,
        /// Configured minimum.
        min: usize,
    },
    /// Fewer distinct (x, y) positions than required.
    TooFewDistinctPoints {
        /// Distinct positions in the lap.
        distinct: usize,
        /// Configured minimum.
        min: usize,
    },
    /// One (x, y) position repeated more often than allowed.
    RepeatedPoints {
        /// Highest repeat count of any single position.
        repeats: usize,
        /// Configured maximum.
        max: usize,
    },
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLap { invalid_samples } => {
                write!(f, "flagged invalid in {invalid_samples} samples")
            }
            Self::TrackLimits { max_distance } => {
                write!(f, "off track by {max_distance:.2}")
            }
            Self::TooFewSamples { samples, min } => {
                write!(f, "{samples} samples (< {min})")
            }
            Self::TooFewDistinctPoints { distinct, min } => {
                write!(f, "{distinct} distinct points (< {min})")
            }
            Self::RepeatedPoints { repeats, max } => {
                write!(f, "position repeated {repeats} times (> {max})")
            }
        }
    }
}

/// A lap removed by a filter stage, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscardedLap {
    /// Lap that was removed; `None` when it was dropped before segmentation.
    pub lap_index: Option<LapIndex>,
    /// Session the lap came from.
    pub session_uid: u64,
    /// Raw lap number within the session.
    pub lap_number: u32,
    /// Why it was removed.
    pub reason: DiscardReason,
}

/// Thresholds for the lap-quality filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityThresholds {
    /// Minimum distinct (x, y) positions per lap.
    pub min_distinct_points: usize,
    /// Maximum times any single (x, y) position may appear in a lap.
    pub max_repeats: usize,
    /// Optional floor on raw samples per lap.
    pub min_samples_per_lap: Option<usize>,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_distinct_points: PipelineConfig::DEFAULT_MIN_DISTINCT_POINTS,
            max_repeats: PipelineConfig::DEFAULT_MAX_REPEATS,
            min_samples_per_lap: None,
        }
    }
}

/// Physical plausibility bounds for recomputed kinematics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KinematicLimits {
    /// Velocity components are clipped to `±velocity_limit`.
    pub velocity_limit: f64,
    /// G-force components beyond `±g_force_limit` are masked and refilled.
    pub g_force_limit: f64,
    /// Standard gravity used to convert acceleration into G.
    pub gravity: f64,
}

impl Default for KinematicLimits {
    fn default() -> Self {
        Self {
            velocity_limit: PipelineConfig::DEFAULT_VELOCITY_LIMIT,
            g_force_limit: PipelineConfig::DEFAULT_G_FORCE_LIMIT,
            gravity: PipelineConfig::DEFAULT_GRAVITY,
        }
    }
}

/// The two named apexes and the radius of their turn windows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApexConfig {
    /// Turn 1 apex.
    pub turn1: Point,
    /// Turn 2 apex.
    pub turn2: Point,
    /// Radius of each turn window (inclusive).
    pub window_radius: f64,
}

impl Default for ApexConfig {
    fn default() -> Self {
        Self {
            turn1: PipelineConfig::DEFAULT_TURN1_APEX,
            turn2: PipelineConfig::DEFAULT_TURN2_APEX,
            window_radius: PipelineConfig::DEFAULT_WINDOW_RADIUS,
        }
    }
}

/// Thresholds for the first braking and turning points of a lap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryThresholds {
    /// Brake pressure strictly above this marks the braking point.
    pub brake_threshold: f64,
    /// `|steer|` strictly above this marks the turning point.
    pub steer_threshold: f64,
}

impl Default for SummaryThresholds {
    fn default() -> Self {
        Self {
            brake_threshold: PipelineConfig::DEFAULT_BRAKE_THRESHOLD,
            steer_threshold: PipelineConfig::DEFAULT_STEER_THRESHOLD,
        }
    }
}

/// Configuration for the telemetry pipeline.
///
/// One structure for every deployment; the defaults reproduce the
/// analysed Melbourne Turn 1/Turn 2 segment. Call
/// [`validate`](Self::validate) before use when the values come from
/// outside the program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Keep only frames from this circuit. `None` keeps every circuit.
    pub track_id: Option<i32>,

    /// Drop laps the game flagged invalid, and frames with a negative lap
    /// distance, before segmentation.
    pub drop_invalid_laps: bool,

    /// Rectangular pre-filter applied before the corridor polygon.
    pub corridor_window: Rect,

    /// Polygon bounding the analysed segment, boundary inclusive.
    pub corridor_polygon: Vec<Point>,

    /// Window the left/right edges and racing line are restricted to.
    pub reference_window: Rect,

    /// Laps with any sample further than this outside the track-limit
    /// polygon are dropped whole.
    pub track_limit_threshold: f64,

    /// Lap-quality thresholds.
    pub quality: QualityThresholds,

    /// Velocity / G-force plausibility bounds.
    pub kinematics: KinematicLimits,

    /// Apex coordinates and turn-window radius.
    pub apexes: ApexConfig,

    /// Braking / turning point thresholds.
    pub summary: SummaryThresholds,

    /// Approximate track width used when projecting cut lines.
    pub cut_line_track_width: f64,
}

impl PipelineConfig {
    /// Default circuit (Melbourne).
    pub const DEFAULT_TRACK_ID: i32 = 0;
    /// Invalid laps are dropped by default.
    pub const DEFAULT_DROP_INVALID_LAPS: bool = true;
    /// Default corridor pre-filter window.
    pub const DEFAULT_CORRIDOR_WINDOW: Rect = Rect::new(0.0, 600.0, -200.0, 600.0);
    /// Default corridor polygon vertices.
    pub const DEFAULT_CORRIDOR_POLYGON: [Point; 6] = [
        Point::new(152.531_017_901_292_7, 413.554_485_930_618_6),
        Point::new(161.763_984_818_643_88, 423.115_387_189_652_84),
        Point::new(572.0, 423.0),
        Point::new(572.051_098_447_852, -131.866_839_112_517_17),
        Point::new(564.818_317_316_664_2, -138.232_845_593_140_58),
        Point::new(152.0, -138.0),
    ];
    /// Default reference-data window.
    pub const DEFAULT_REFERENCE_WINDOW: Rect = Rect::new(120.0, 600.0, -200.0, 600.0);
    /// Default track-limit threshold.
    pub const DEFAULT_TRACK_LIMIT_THRESHOLD: f64 = 5.0;
    /// Default minimum distinct points per lap.
    pub const DEFAULT_MIN_DISTINCT_POINTS: usize = 500;
    /// Default maximum repeats of one position per lap.
    pub const DEFAULT_MAX_REPEATS: usize = 10;
    /// Default velocity clip bound.
    pub const DEFAULT_VELOCITY_LIMIT: f64 = 100.0;
    /// Default G-force mask bound.
    pub const DEFAULT_G_FORCE_LIMIT: f64 = 7.0;
    /// Default standard gravity.
    pub const DEFAULT_GRAVITY: f64 = 9.8;
    /// Default Turn 1 apex.
    pub const DEFAULT_TURN1_APEX: Point = Point::new(375.57, 191.519);
    /// Default Turn 2 apex.
    pub const DEFAULT_TURN2_APEX: Point = Point::new(368.93, 90.0);
    /// Default turn-window radius.
    pub const DEFAULT_WINDOW_RADIUS: f64 = 50.0;
    /// Default braking-point threshold.
    pub const DEFAULT_BRAKE_THRESHOLD: f64 = 0.2;
    /// Default turning-point threshold.
    pub const DEFAULT_STEER_THRESHOLD: f64 = 0.2;
    /// Default cut-line projection width.
    pub const DEFAULT_CUT_LINE_TRACK_WIDTH: f64 = 20.0;

    /// Check the configuration for values the pipeline cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first offending
    /// field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let positive = [
            ("track_limit_threshold", self.track_limit_threshold),
            ("kinematics.velocity_limit", self.kinematics.velocity_limit),
            ("kinematics.g_force_limit", self.kinematics.g_force_limit),
            ("kinematics.gravity", self.kinematics.gravity),
            ("apexes.window_radius", self.apexes.window_radius),
            ("cut_line_track_width", self.cut_line_track_width),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must be finite and positive, got {value}"
                )));
            }
        }

        for (name, window) in [
            ("corridor_window", &self.corridor_window),
            ("reference_window", &self.reference_window),
        ] {
            if !(window.min_x <= window.max_x && window.min_y <= window.max_y) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} has inverted bounds: {window:?}"
                )));
            }
        }

        if self.corridor_polygon.len() < 3 {
            return Err(PipelineError::InvalidConfig(format!(
                "corridor_polygon needs at least 3 vertices, got {}",
                self.corridor_polygon.len()
            )));
        }

        if self.summary.brake_threshold.is_nan() || self.summary.steer_threshold.is_nan() {
            return Err(PipelineError::InvalidConfig(
                "summary thresholds must not be NaN".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            track_id: Some(Self::DEFAULT_TRACK_ID),
            drop_invalid_laps: Self::DEFAULT_DROP_INVALID_LAPS,
            corridor_window: Self::DEFAULT_CORRIDOR_WINDOW,
            corridor_polygon: Self::DEFAULT_CORRIDOR_POLYGON.to_vec(),
            reference_window: Self::DEFAULT_REFERENCE_WINDOW,
            track_limit_threshold: Self::DEFAULT_TRACK_LIMIT_THRESHOLD,
            quality: QualityThresholds::default(),
            kinematics: KinematicLimits::default(),
            apexes: ApexConfig::default(),
            summary: SummaryThresholds::default(),
            cut_line_track_width: Self::DEFAULT_CUT_LINE_TRACK_WIDTH,
        }
    }
}

/// Errors that can occur during pipeline processing.
///
/// Laps or samples removed by a filter are not errors; only structural
/// problems with the input or configuration are.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A required value is missing or not in the expected format.
    #[error("malformed input in column {column}: {value:?} ({reason})")]
    MalformedInput {
        /// Column holding the offending value.
        column: String,
        /// The offending value as read.
        value: String,
        /// What was expected.
        reason: String,
    },

    /// Reference geometry too degenerate for the requested computation.
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// No telemetry frames were supplied.
    #[error("no telemetry frames to process")]
    EmptyInput,
}


#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::test_support::{lap_of, table};
    use super::*;

    // --- Point tests ---

    #[test]
    fn point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance_squared(b) - 25.0).abs() < f64::EPSILON);
        assert!((a.distance(b) - 5.0).abs() < f64::EPSILON);
        assert!((b.norm() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn axes_map_applies_to_every_component() {
        let v = Vec3::new(1.0, -2.0, 3.0).map(f64::abs);
        assert_eq!(v, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(Vec3::new(1.0, 2.0, 3.0).planar(), Point::new(1.0, 2.0));

        let names = Axes::new("x".to_string(), "yy".to_string(), String::new());
        assert_eq!(names.as_ref().map(String::len), Axes::new(1, 2, 0));
    }

    // --- Rect tests ---

    #[test]
    fn rect_bounds_are_inclusive() {
        let r = Rect::new(0.0, 10.0, -5.0, 5.0);
        assert!(r.contains(Point::new(0.0, -5.0)));
        assert!(r.contains(Point::new(10.0, 5.0)));
        assert!(!r.contains(Point::new(10.000_1, 0.0)));
        assert!(!r.contains(Point::new(f64::NAN, 0.0)));
    }

    #[test]
    fn windowed_filters_in_input_order() {
        let reference = vec![
            ReferencePoint::new(3, 1.0, 1.0),
            ReferencePoint::new(1, 2.0, 2.0),
            ReferencePoint::new(2, 50.0, 50.0),
        ];
        let kept = windowed(&reference, &Rect::new(0.0, 10.0, 0.0, 10.0));
        assert_eq!(kept.iter().map(|p| p.frame).collect::<Vec<_>>(), vec![3, 1]);
        let sorted = by_frame(&kept);
        assert_eq!(sorted.iter().map(|p| p.frame).collect::<Vec<_>>(), vec![1, 3]);
    }

    // --- TelemetryTable tests ---

    #[test]
    fn partition_groups_rows_by_lap_in_table_order() {
        let t = table(vec![
            lap_of(0, &[(0.0, 0.0), (1.0, 0.0)]),
            lap_of(2, &[(5.0, 5.0)]),
        ]);
        let parts = t.partition();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[&LapIndex(0)], vec![0, 1]);
        assert_eq!(parts[&LapIndex(2)], vec![2]);
    }

    #[test]
    fn without_laps_drops_whole_laps() {
        let t = table(vec![
            lap_of(0, &[(0.0, 0.0), (1.0, 0.0)]),
            lap_of(1, &[(5.0, 5.0)]),
        ]);
        let kept = t.without_laps(&BTreeSet::from([LapIndex(0)]));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept.lap_indices(), BTreeSet::from([LapIndex(1)]));
    }

    // --- PipelineConfig tests ---

    #[test]
    fn pipeline_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.track_id, Some(0));
        assert_eq!(config.corridor_polygon.len(), 6);
        assert!((config.track_limit_threshold - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.quality.min_distinct_points, 500);
        assert_eq!(config.quality.max_repeats, 10);
        assert_eq!(config.quality.min_samples_per_lap, None);
        assert!((config.kinematics.velocity_limit - 100.0).abs() < f64::EPSILON);
        assert!((config.kinematics.g_force_limit - 7.0).abs() < f64::EPSILON);
        assert!((config.apexes.window_radius - 50.0).abs() < f64::EPSILON);
        assert!((config.summary.brake_threshold - 0.2).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_positive_limits() {
        let config = PipelineConfig {
            track_limit_threshold: 0.0,
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("track_limit_threshold"));
    }

    #[test]
    fn validate_rejects_inverted_window() {
        let config = PipelineConfig {
            reference_window: Rect::new(10.0, 0.0, 0.0, 1.0),
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(msg)) if msg.contains("reference_window")
        ));
    }

    #[test]
    fn validate_rejects_small_corridor() {
        let config = PipelineConfig {
            corridor_polygon: vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)],
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn pipeline_config_serde_round_trip() {
        let config = PipelineConfig {
            track_id: None,
            drop_invalid_laps: false,
            track_limit_threshold: 10.0,
            quality: QualityThresholds {
                min_distinct_points: 900,
                max_repeats: 4,
                min_samples_per_lap: Some(700),
            },
            ..PipelineConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn default_corridor_survives_json_exactly() {
        let json = serde_json::to_string(&PipelineConfig::default()).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.corridor_polygon,
            PipelineConfig::DEFAULT_CORRIDOR_POLYGON.to_vec()
        );
        assert_eq!(
            back.corridor_polygon[1].y.to_bits(),
            423.115_387_189_652_84_f64.to_bits()
        );
    }

    #[test]
    fn partial_config_json_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"track_limit_threshold": 10.0}"#).unwrap();
        assert!((config.track_limit_threshold - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.quality, QualityThresholds::default());
        assert!(config.drop_invalid_laps);
    }

    // --- PipelineError tests ---

    #[test]
    fn error_display() {
        let err = PipelineError::MalformedInput {
            column: "CURRENTLAPTIME".to_string(),
            value: "abc".to_string(),
            reason: "expected minutes:seconds".to_string(),
        };
        assert_eq!(
            err.to_string(),
            r#"malformed input in column CURRENTLAPTIME: "abc" (expected minutes:seconds)"#,
        );
        assert_eq!(
            PipelineError::EmptyInput.to_string(),
            "no telemetry frames to process"
        );
    }

    #[test]
    fn discard_reason_display() {
        let reason = DiscardReason::TooFewDistinctPoints {
            distinct: 400,
            min: 500,
        };
        assert_eq!(reason.to_string(), "400 distinct points (< 500)");
        let invalid = DiscardReason::InvalidLap { invalid_samples: 12 };
        assert_eq!(invalid.to_string(), "flagged invalid in 12 samples");
    }
}
