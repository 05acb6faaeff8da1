//! Lap summaries: one row per surviving lap.
//!
//! Each lap is put in cumulative lap-distance order before reducing, so the
//! result never depends on row arrival order.

use rstar::{PointDistance, RTree};
use serde::{Deserialize, Serialize};

use crate::types::{
    ApexConfig, LapIndex, PipelineError, Point, Sample, SummaryThresholds, TelemetryTable,
};

/// Reduction of one lap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapSummary {
    /// Lap this row summarises.
    pub lap_index: LapIndex,
    /// Session the lap came from.
    pub session_uid: u64,
    /// Raw lap number within the session.
    pub lap_number: u32,
    /// Samples in the lap.
    pub samples: usize,
    /// Seconds between the first and last sample, by lap distance.
    pub sector_time: f64,
    /// Mean racing-line deviation; `None` if no sample has features.
    pub avg_line_distance: Option<f64>,
    /// Closest approach to the Turn 1 apex.
    pub dist_to_apex1: f64,
    /// Closest approach to the Turn 2 apex.
    pub dist_to_apex2: f64,
    /// Mean brake pressure.
    pub avg_brake_pressure: f64,
    /// Mean throttle pressure.
    pub avg_throttle_pressure: f64,
    /// Peak brake pressure.
    pub peak_brake_pressure: f64,
    /// Peak throttle pressure.
    pub peak_throttle_pressure: f64,
    /// Position of the first braking point.
    pub brake_point: Option<Point>,
    /// Brake pressure at the first braking point, 0 when there is none.
    pub brake_pressure: f64,
    /// Position of the first turning point.
    pub turn_point: Option<Point>,
    /// Signed steering input at the first turning point, 0 when there is
    /// none.
    pub steering_angle: f64,
}

/// Parse a `minutes:seconds.millis` lap clock into seconds.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedInput`] if `text` is not two numbers
/// separated by a single colon.
pub fn parse_lap_time(text: &str) -> Result<f64, PipelineError> {
    let malformed = || PipelineError::MalformedInput {
        column: "CURRENTLAPTIME".to_string(),
        value: text.to_string(),
        reason: "expected minutes:seconds".to_string(),
    };
    let (minutes, seconds) = text.trim().split_once(':').ok_or_else(malformed)?;
    let minutes: f64 = minutes.parse().map_err(|_| malformed())?;
    let seconds: f64 = seconds.parse().map_err(|_| malformed())?;
    let total = minutes.mul_add(60.0, seconds);
    if total.is_finite() {
        Ok(total)
    } else {
        Err(malformed())
    }
}

/// Mean of `values`, or `None` when empty.
fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0_usize), |(sum, count), v| (sum + v, count + 1));
    #[allow(clippy::cast_precision_loss)]
    (count > 0).then(|| sum / count as f64)
}

/// Largest of `values`, or 0 when empty.
fn peak(values: impl IntoIterator<Item = f64>) -> f64 {
    values.into_iter().reduce(f64::max).unwrap_or(0.0)
}

/// Summarise one lap given its samples in any order.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedInput`] if the first or last lap clock
/// cannot be parsed.
pub fn summarize_lap(
    lap_index: LapIndex,
    samples: &[&Sample],
    apexes: &ApexConfig,
    thresholds: &SummaryThresholds,
) -> Result<Option<LapSummary>, PipelineError> {
    let mut lap: Vec<&Sample> = samples.to_vec();
    lap.sort_by(|a, b| {
        a.frame
            .lap_distance
            .total_cmp(&b.frame.lap_distance)
            .then_with(|| a.frame.lap_time_ms.total_cmp(&b.frame.lap_time_ms))
    });
    let (Some(first), Some(last)) = (lap.first(), lap.last()) else {
        return Ok(None);
    };
    let sector_time = parse_lap_time(&last.frame.lap_time)? - parse_lap_time(&first.frame.lap_time)?;

    let tree = RTree::bulk_load(lap.iter().map(|s| [s.point().x, s.point().y]).collect());
    let closest = |apex: Point| {
        let query = [apex.x, apex.y];
        tree.nearest_neighbor(&query)
            .map_or(f64::INFINITY, |p| p.distance_2(&query).sqrt())
    };

    let braking = lap
        .iter()
        .find(|s| s.frame.brake > thresholds.brake_threshold);
    let turning = lap
        .iter()
        .find(|s| s.frame.steer.abs() > thresholds.steer_threshold);

    Ok(Some(LapSummary {
        lap_index,
        session_uid: first.frame.session_uid,
        lap_number: first.frame.lap_number,
        samples: lap.len(),
        sector_time,
        avg_line_distance: mean(lap.iter().filter_map(|s| s.features.map(|f| f.line_distance))),
        dist_to_apex1: closest(apexes.turn1),
        dist_to_apex2: closest(apexes.turn2),
        avg_brake_pressure: mean(lap.iter().map(|s| s.frame.brake)).unwrap_or(0.0),
        avg_throttle_pressure: mean(lap.iter().map(|s| s.frame.throttle)).unwrap_or(0.0),
        peak_brake_pressure: peak(lap.iter().map(|s| s.frame.brake)),
        peak_throttle_pressure: peak(lap.iter().map(|s| s.frame.throttle)),
        brake_point: braking.map(|s| s.point()),
        brake_pressure: braking.map_or(0.0, |s| s.frame.brake),
        turn_point: turning.map(|s| s.point()),
        steering_angle: turning.map_or(0.0, |s| s.frame.steer),
    }))
}

/// One summary row per lap, ordered by lap index.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedInput`] if any lap's clock cannot be
/// parsed.
pub fn summarize(
    table: &TelemetryTable,
    apexes: &ApexConfig,
    thresholds: &SummaryThresholds,
) -> Result<Vec<LapSummary>, PipelineError> {
    let samples = table.samples();
    let mut rows = Vec::new();
    for (lap_index, positions) in table.partition() {
        let lap: Vec<&Sample> = positions.iter().map(|&row| &samples[row]).collect();
        if let Some(row) = summarize_lap(lap_index, &lap, apexes, thresholds)? {
            rows.push(row);
        }
    }
    Ok(rows)
}
