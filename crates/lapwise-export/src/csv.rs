//! CSV table serializers.
//!
//! Every table is written with a fixed header row, even when empty, and
//! missing values become empty cells. Column names follow the raw export
//! (`M_*_1`) for carried channels and the derived names (`VEL_X`,
//! `GFORCE_X`, `line_distance`, ...) for recomputed ones.
//!
//! These are pure functions with no I/O -- they return a `String`.

use serde::Serialize;

use lapwise_pipeline::{
    DiscardReason, DiscardedLap, LapSummary, ReferencePoint, Sample, TelemetryTable,
};

/// Errors from serializing a table.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// A record could not be serialized.
    #[error("failed to serialize CSV record: {0}")]
    Csv(#[from] csv::Error),

    /// The buffered writer could not be flushed.
    #[error("failed to flush CSV output: {0}")]
    Flush(#[from] std::io::Error),

    /// The output was not valid UTF-8.
    #[error("CSV output is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

const TELEMETRY_HEADER: [&str; 35] = [
    "lap_index",
    "M_SESSIONUID",
    "M_CURRENTLAPNUM",
    "M_TRACKID",
    "M_CURRENTLAPTIMEINMS_1",
    "CURRENTLAPTIME",
    "M_LAPDISTANCE_1",
    "M_WORLDPOSITIONX_1",
    "M_WORLDPOSITIONY_1",
    "M_WORLDPOSITIONZ_1",
    "M_WORLDFORWARDDIRX_1",
    "M_WORLDFORWARDDIRY_1",
    "M_WORLDFORWARDDIRZ_1",
    "M_FRONTWHEELSANGLE",
    "M_THROTTLE_1",
    "M_BRAKE_1",
    "M_STEER_1",
    "M_CURRENTLAPINVALID_1",
    "VEL_X",
    "VEL_Y",
    "VEL_Z",
    "GFORCE_X",
    "GFORCE_Y",
    "GFORCE_Z",
    "line_distance",
    "dist_to_t1_apex",
    "dist_to_t2_apex",
    "is_t1_window",
    "is_t2_window",
    "angle_fw_vs_vel",
    "angle_car_vs_vel",
    "angle_fw_vs_car",
    "M_BRAKE_THROTTLE_1",
    "has_kinematics",
    "has_features",
];

/// One flattened row of the telemetry table.
///
/// Field order must match [`TELEMETRY_HEADER`].
#[derive(Serialize)]
struct TelemetryRow<'a> {
    lap_index: u32,
    session_uid: u64,
    lap_number: u32,
    track_id: i32,
    lap_time_ms: f64,
    lap_time: &'a str,
    lap_distance: f64,
    x: f64,
    y: f64,
    z: f64,
    forward_x: f64,
    forward_y: f64,
    forward_z: f64,
    front_wheel_angle: Option<f64>,
    throttle: f64,
    brake: f64,
    steer: f64,
    lap_invalid: u8,
    vel_x: Option<f64>,
    vel_y: Option<f64>,
    vel_z: Option<f64>,
    g_force_x: Option<f64>,
    g_force_y: Option<f64>,
    g_force_z: Option<f64>,
    line_distance: Option<f64>,
    dist_to_t1_apex: Option<f64>,
    dist_to_t2_apex: Option<f64>,
    in_t1_window: Option<bool>,
    in_t2_window: Option<bool>,
    wheel_vs_velocity: Option<f64>,
    car_vs_velocity: Option<f64>,
    wheel_vs_car: Option<f64>,
    brake_throttle: Option<f64>,
    has_kinematics: bool,
    has_features: bool,
}

impl<'a> From<&'a Sample> for TelemetryRow<'a> {
    fn from(sample: &'a Sample) -> Self {
        let frame = &sample.frame;
        let kin = sample.kinematics.as_ref();
        let feat = sample.features.as_ref();
        Self {
            lap_index: sample.lap_index.0,
            session_uid: frame.session_uid,
            lap_number: frame.lap_number,
            track_id: frame.track_id,
            lap_time_ms: frame.lap_time_ms,
            lap_time: &frame.lap_time,
            lap_distance: frame.lap_distance,
            x: frame.position.x,
            y: frame.position.y,
            z: frame.position.z,
            forward_x: frame.forward.x,
            forward_y: frame.forward.y,
            forward_z: frame.forward.z,
            front_wheel_angle: frame.front_wheel_angle,
            throttle: frame.throttle,
            brake: frame.brake,
            steer: frame.steer,
            lap_invalid: u8::from(frame.lap_invalid),
            vel_x: kin.map(|k| k.velocity.x),
            vel_y: kin.map(|k| k.velocity.y),
            vel_z: kin.map(|k| k.velocity.z),
            g_force_x: kin.and_then(|k| k.g_force.x),
            g_force_y: kin.and_then(|k| k.g_force.y),
            g_force_z: kin.and_then(|k| k.g_force.z),
            line_distance: feat.map(|f| f.line_distance),
            dist_to_t1_apex: feat.map(|f| f.dist_to_t1_apex),
            dist_to_t2_apex: feat.map(|f| f.dist_to_t2_apex),
            in_t1_window: feat.map(|f| f.in_t1_window),
            in_t2_window: feat.map(|f| f.in_t2_window),
            wheel_vs_velocity: feat.and_then(|f| f.wheel_vs_velocity),
            car_vs_velocity: feat.and_then(|f| f.car_vs_velocity),
            wheel_vs_car: feat.and_then(|f| f.wheel_vs_car),
            brake_throttle: feat.map(|f| f.brake_throttle),
            has_kinematics: kin.is_some(),
            has_features: feat.is_some(),
        }
    }
}

const SUMMARY_HEADER: [&str; 18] = [
    "lap_index",
    "M_SESSIONUID",
    "M_CURRENTLAPNUM",
    "samples",
    "sector_time",
    "avg_line_distance",
    "dist_to_apex1",
    "dist_to_apex2",
    "avg_brake_pressure",
    "avg_throttle_pressure",
    "peak_brake_pressure",
    "peak_throttle_pressure",
    "brake_x",
    "brake_y",
    "brake_pressure",
    "turn_x",
    "turn_y",
    "steering_angle",
];

#[derive(Serialize)]
struct SummaryRow {
    lap_index: u32,
    session_uid: u64,
    lap_number: u32,
    samples: usize,
    sector_time: f64,
    avg_line_distance: Option<f64>,
    dist_to_apex1: f64,
    dist_to_apex2: f64,
    avg_brake_pressure: f64,
    avg_throttle_pressure: f64,
    peak_brake_pressure: f64,
    peak_throttle_pressure: f64,
    brake_x: Option<f64>,
    brake_y: Option<f64>,
    brake_pressure: f64,
    turn_x: Option<f64>,
    turn_y: Option<f64>,
    steering_angle: f64,
}

impl From<&LapSummary> for SummaryRow {
    fn from(s: &LapSummary) -> Self {
        Self {
            lap_index: s.lap_index.0,
            session_uid: s.session_uid,
            lap_number: s.lap_number,
            samples: s.samples,
            sector_time: s.sector_time,
            avg_line_distance: s.avg_line_distance,
            dist_to_apex1: s.dist_to_apex1,
            dist_to_apex2: s.dist_to_apex2,
            avg_brake_pressure: s.avg_brake_pressure,
            avg_throttle_pressure: s.avg_throttle_pressure,
            peak_brake_pressure: s.peak_brake_pressure,
            peak_throttle_pressure: s.peak_throttle_pressure,
            brake_x: s.brake_point.map(|p| p.x),
            brake_y: s.brake_point.map(|p| p.y),
            brake_pressure: s.brake_pressure,
            turn_x: s.turn_point.map(|p| p.x),
            turn_y: s.turn_point.map(|p| p.y),
            steering_angle: s.steering_angle,
        }
    }
}

const REFERENCE_HEADER: [&str; 3] = ["FRAME", "WORLDPOSX", "WORLDPOSY"];

const DISCARDED_HEADER: [&str; 6] = [
    "lap_index",
    "M_SESSIONUID",
    "M_CURRENTLAPNUM",
    "stage",
    "reason",
    "value",
];

#[derive(Serialize)]
struct DiscardedRow {
    lap_index: Option<u32>,
    session_uid: u64,
    lap_number: u32,
    stage: &'static str,
    reason: String,
    value: f64,
}

impl From<&DiscardedLap> for DiscardedRow {
    #[allow(clippy::cast_precision_loss)]
    fn from(lap: &DiscardedLap) -> Self {
        let (stage, value) = match lap.reason {
            DiscardReason::InvalidLap { invalid_samples } => ("validity", invalid_samples as f64),
            DiscardReason::TrackLimits { max_distance } => ("track_limits", max_distance),
            DiscardReason::TooFewSamples { samples, .. } => ("quality", samples as f64),
            DiscardReason::TooFewDistinctPoints { distinct, .. } => ("quality", distinct as f64),
            DiscardReason::RepeatedPoints { repeats, .. } => ("quality", repeats as f64),
        };
        Self {
            lap_index: lap.lap_index.map(|index| index.0),
            session_uid: lap.session_uid,
            lap_number: lap.lap_number,
            stage,
            reason: lap.reason.to_string(),
            value,
        }
    }
}

/// Write `header` then one serialized record per row.
fn write_table<T: Serialize>(
    header: &[&str],
    rows: impl IntoIterator<Item = T>,
) -> Result<String, ExportError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    wtr.write_record(header)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    let bytes = wtr.into_inner().map_err(csv::IntoInnerError::into_error)?;
    Ok(String::from_utf8(bytes)?)
}

/// Serialize the sample table, one row per sample in table order.
///
/// Recomputed kinematics and geometry features are empty cells for
/// samples that have not been through those stages.
///
/// # Errors
///
/// Returns [`ExportError`] if a record cannot be written.
pub fn telemetry_csv(table: &TelemetryTable) -> Result<String, ExportError> {
    write_table(
        &TELEMETRY_HEADER,
        table.samples().iter().map(TelemetryRow::from),
    )
}

/// Serialize lap summaries, one row per lap.
///
/// # Errors
///
/// Returns [`ExportError`] if a record cannot be written.
pub fn summary_csv(summary: &[LapSummary]) -> Result<String, ExportError> {
    write_table(&SUMMARY_HEADER, summary.iter().map(SummaryRow::from))
}

/// Serialize reference points in the given order.
///
/// The output reads back with `lapwise_io::read_reference_from`.
///
/// # Errors
///
/// Returns [`ExportError`] if a record cannot be written.
pub fn reference_csv(points: &[ReferencePoint]) -> Result<String, ExportError> {
    write_table(
        &REFERENCE_HEADER,
        points.iter().map(|p| (p.frame, p.x, p.y)),
    )
}

/// Serialize dropped laps with the stage and reason that removed them.
///
/// Laps dropped before segmentation leave `lap_index` empty.
///
/// # Errors
///
/// Returns [`ExportError`] if a record cannot be written.
pub fn discarded_csv(discarded: &[DiscardedLap]) -> Result<String, ExportError> {
    write_table(&DISCARDED_HEADER, discarded.iter().map(DiscardedRow::from))
}
