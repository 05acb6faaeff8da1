//! lapwise-pipeline: Racing telemetry cleaning and featurization (sans-IO).
//!
//! Turns raw per-frame telemetry of one circuit segment into a lap-indexed
//! sample table and a per-lap summary through:
//! validity screen -> lap segmentation -> corridor filter -> track limits -> lap quality ->
//! kinematics -> geometry features -> lap summary.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! frames and reference points and returns structured data. Reading and
//! writing files lives in `lapwise-io`; serialization in `lapwise-export`.

pub mod corridor;
pub mod diagnostics;
pub mod geometry;
pub mod kinematics;
pub mod polygon;
pub mod quality;
pub mod segment;
pub mod summary;
pub mod track_limits;
pub mod types;

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::debug;

pub use diagnostics::{Clock, FrozenClock, PipelineDiagnostics, StageDiagnostics, StageMetrics};
pub use geometry::RacingLine;
pub use polygon::BoundaryPolygon;
pub use summary::LapSummary;
pub use track_limits::{CutLine, TrackLimits, cut_line};
pub use types::{
    DiscardReason, DiscardedLap, LapIndex, PipelineConfig, PipelineError, Point, Rect,
    ReferencePoint, Sample, TelemetryFrame, TelemetryTable,
};

use diagnostics::PipelineTotals;

/// Reference geometry for one circuit segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceData {
    /// Left track edge.
    pub left: Vec<ReferencePoint>,
    /// Right track edge.
    pub right: Vec<ReferencePoint>,
    /// Racing line.
    pub line: Vec<ReferencePoint>,
}

/// Output of the filtering stages: kept samples and dropped laps.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterReport {
    /// Samples of every surviving lap.
    pub table: TelemetryTable,
    /// Laps removed by the validity, track-limit and quality filters, in
    /// that order.
    pub discarded: Vec<DiscardedLap>,
}

/// Result of the full pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessResult {
    /// Featurized sample table.
    pub table: TelemetryTable,
    /// One row per surviving lap.
    pub summary: Vec<LapSummary>,
    /// Laps removed by the filters.
    pub discarded: Vec<DiscardedLap>,
}

/// Run `f` and measure it with `clock`.
fn timed<C: Clock, T>(clock: &C, f: impl FnOnce() -> T) -> (T, Duration) {
    let start = clock.now();
    let out = f();
    (out, clock.elapsed(start))
}

/// Diagnostics of the filtering stages.
struct FilterStages {
    track_filter: Option<StageDiagnostics>,
    validity: Option<StageDiagnostics>,
    segmentation: StageDiagnostics,
    corridor: StageDiagnostics,
    track_limits: StageDiagnostics,
    quality: StageDiagnostics,
    frames_in: usize,
    laps_segmented: usize,
}

fn filter_timed<C: Clock>(
    frames: Vec<TelemetryFrame>,
    left: &[ReferencePoint],
    right: &[ReferencePoint],
    config: &PipelineConfig,
    clock: &C,
) -> Result<(FilterReport, FilterStages), PipelineError> {
    config.validate()?;
    if frames.is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    let frames_in = frames.len();

    // 0. Circuit filter.
    let (frames, track_filter) = match config.track_id {
        Some(track_id) => {
            let (kept, duration) = timed(clock, || segment::retain_track(frames, track_id));
            debug!(track_id, frames_in, frames_kept = kept.len(), "filtered circuit");
            if kept.is_empty() {
                return Err(PipelineError::EmptyInput);
            }
            let stage = StageDiagnostics {
                duration,
                metrics: StageMetrics::TrackFilter {
                    track_id,
                    frames_in,
                    frames_kept: kept.len(),
                },
            };
            (kept, Some(stage))
        }
        None => (frames, None),
    };

    // 0b. Lap validity.
    let (frames, mut discarded, validity) = if config.drop_invalid_laps {
        let frames_before = frames.len();
        let (screen, duration) = timed(clock, || segment::drop_invalid(frames));
        debug!(
            frames_before,
            frames_kept = screen.frames.len(),
            laps_dropped = screen.discarded.len(),
            negative_distance = screen.negative_distance,
            "screened lap validity"
        );
        let stage = StageDiagnostics {
            duration,
            metrics: StageMetrics::Validity {
                frames_in: frames_before,
                frames_kept: screen.frames.len(),
                negative_distance: screen.negative_distance,
                laps_dropped: screen.discarded.len(),
            },
        };
        (screen.frames, screen.discarded, Some(stage))
    } else {
        (frames, Vec::new(), None)
    };

    // 1. Lap segmentation.
    let (table, duration) = timed(clock, || segment::segment_laps(frames));
    let laps_segmented = table.lap_indices().len();
    let sessions = table
        .samples()
        .iter()
        .map(|s| s.frame.session_uid)
        .collect::<BTreeSet<_>>()
        .len();
    debug!(samples = table.len(), sessions, laps = laps_segmented, "segmented laps");
    let segmentation = StageDiagnostics {
        duration,
        metrics: StageMetrics::Segmentation {
            samples: table.len(),
            sessions,
            laps: laps_segmented,
        },
    };

    // 2. Corridor filter.
    let samples_before = table.len();
    let (clipped, duration) = timed(clock, || {
        BoundaryPolygon::new(&config.corridor_polygon)
            .map(|polygon| corridor::clip_to_corridor(table, &config.corridor_window, &polygon))
    });
    let table = clipped?;
    debug!(samples_before, samples_after = table.len(), "clipped to corridor");
    let corridor = StageDiagnostics {
        duration,
        metrics: StageMetrics::Corridor {
            samples_before,
            samples_after: table.len(),
            laps_after: table.lap_indices().len(),
        },
    };

    // 3. Track limits.
    let laps_before = table.lap_indices().len();
    let (enforced, duration) = timed(clock, || {
        TrackLimits::from_edges(
            left,
            right,
            &config.reference_window,
            config.track_limit_threshold,
        )
        .map(|limits| {
            let vertices = limits.boundary().vertices().count();
            (limits.enforce(table), vertices)
        })
    });
    let ((table, off_track), boundary_vertices) = enforced?;
    debug!(laps_before, laps_dropped = off_track.len(), "enforced track limits");
    let track_limits = StageDiagnostics {
        duration,
        metrics: StageMetrics::TrackLimits {
            boundary_vertices,
            laps_before,
            laps_dropped: off_track.len(),
            worst_distance: diagnostics::worst_distance(&off_track),
        },
    };
    discarded.extend(off_track);

    // 4. Lap quality.
    let laps_before = table.lap_indices().len();
    let ((table, dropped), duration) =
        timed(clock, || quality::filter_lap_quality(table, &config.quality));
    let (too_few_samples, too_few_distinct_points, repeated_points) =
        diagnostics::quality_breakdown(&dropped);
    debug!(laps_before, laps_dropped = dropped.len(), "filtered lap quality");
    let quality = StageDiagnostics {
        duration,
        metrics: StageMetrics::Quality {
            laps_before,
            too_few_samples,
            too_few_distinct_points,
            repeated_points,
        },
    };
    discarded.extend(dropped);

    Ok((
        FilterReport { table, discarded },
        FilterStages {
            track_filter,
            validity,
            segmentation,
            corridor,
            track_limits,
            quality,
            frames_in,
            laps_segmented,
        },
    ))
}

/// Segment frames into laps and apply every filter stage.
///
/// Equivalent to [`segment_and_filter_with_report`] without the list of
/// discarded laps.
///
/// # Errors
///
/// See [`segment_and_filter_with_report`].
pub fn segment_and_filter(
    frames: Vec<TelemetryFrame>,
    left: &[ReferencePoint],
    right: &[ReferencePoint],
    config: &PipelineConfig,
) -> Result<TelemetryTable, PipelineError> {
    segment_and_filter_with_report(frames, left, right, config).map(|report| report.table)
}

/// Segment frames into laps and apply every filter stage.
///
/// # Pipeline steps
///
/// 1. Keep frames of the configured circuit
/// 2. Drop invalid laps and negative lap distances (when configured)
/// 3. Lap segmentation
/// 4. Corridor filter (per sample)
/// 5. Track-limit enforcement (per lap)
/// 6. Lap-quality filter (per lap)
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `config` fails validation.
/// Returns [`PipelineError::EmptyInput`] if there are no frames, or none on
/// the configured circuit.
/// Returns [`PipelineError::DegenerateGeometry`] if the corridor or the
/// windowed track edges do not form a polygon.
pub fn segment_and_filter_with_report(
    frames: Vec<TelemetryFrame>,
    left: &[ReferencePoint],
    right: &[ReferencePoint],
    config: &PipelineConfig,
) -> Result<FilterReport, PipelineError> {
    filter_timed(frames, left, right, config, &FrozenClock).map(|(report, _)| report)
}

/// Recompute velocity, G-force and wheel angle for every lap.
#[must_use]
pub fn recompute_kinematics(table: TelemetryTable, config: &PipelineConfig) -> TelemetryTable {
    kinematics::recompute_kinematics(table, &config.kinematics)
}

/// Attach racing-line, apex-window and angle features to every sample.
///
/// # Errors
///
/// Returns [`PipelineError::DegenerateGeometry`] if no racing-line point
/// lies inside the reference window.
pub fn extract_geometry_features(
    table: TelemetryTable,
    line: &[ReferencePoint],
    config: &PipelineConfig,
) -> Result<TelemetryTable, PipelineError> {
    let line = RacingLine::new(line, &config.reference_window)?;
    Ok(geometry::extract_geometry_features(
        table,
        &line,
        &config.apexes,
    ))
}

/// Reduce the sample table to one summary row per lap.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedInput`] if a lap clock string cannot
/// be parsed.
pub fn summarize(
    table: &TelemetryTable,
    config: &PipelineConfig,
) -> Result<Vec<LapSummary>, PipelineError> {
    summary::summarize(table, &config.apexes, &config.summary)
}

/// Run the full pipeline.
///
/// # Errors
///
/// See [`process_with_diagnostics`].
pub fn process(
    frames: Vec<TelemetryFrame>,
    reference: &ReferenceData,
    config: &PipelineConfig,
) -> Result<ProcessResult, PipelineError> {
    process_with_diagnostics(frames, reference, config, &FrozenClock).map(|(result, _)| result)
}

/// Run the full pipeline, collecting per-stage diagnostics.
///
/// # Errors
///
/// Returns every error of [`segment_and_filter_with_report`], plus
/// [`PipelineError::DegenerateGeometry`] for an empty racing line and
/// [`PipelineError::MalformedInput`] for an unparseable lap clock.
pub fn process_with_diagnostics<C: Clock>(
    frames: Vec<TelemetryFrame>,
    reference: &ReferenceData,
    config: &PipelineConfig,
    clock: &C,
) -> Result<(ProcessResult, PipelineDiagnostics), PipelineError> {
    let start = clock.now();

    let (FilterReport { table, discarded }, stages) =
        filter_timed(frames, &reference.left, &reference.right, config, clock)?;

    // 5. Kinematics.
    let ((table, stats), duration) = timed(clock, || {
        kinematics::recompute_kinematics_with_stats(table, &config.kinematics)
    });
    debug!(
        g_force_masked = stats.g_force_masked,
        wheel_angle_filled = stats.wheel_angle_filled,
        "recomputed kinematics"
    );
    let kinematics = StageDiagnostics {
        duration,
        metrics: StageMetrics::Kinematics {
            samples: table.len(),
            g_force_masked: stats.g_force_masked,
            g_force_unresolved: stats.g_force_unresolved,
            wheel_angle_filled: stats.wheel_angle_filled,
            wheel_angle_unresolved: stats.wheel_angle_unresolved,
        },
    };

    // 6. Geometry features.
    let (featured, duration) = timed(clock, || {
        RacingLine::new(&reference.line, &config.reference_window).map(|line| {
            let points = line.points().len();
            (
                geometry::extract_geometry_features(table, &line, &config.apexes),
                points,
            )
        })
    });
    let (table, line_points) = featured?;
    let features: Vec<_> = table.samples().iter().filter_map(|s| s.features).collect();
    let geometry = StageDiagnostics {
        duration,
        metrics: StageMetrics::Geometry {
            line_points,
            in_t1_window: features.iter().filter(|f| f.in_t1_window).count(),
            in_t2_window: features.iter().filter(|f| f.in_t2_window).count(),
            undefined_velocity_angles: features
                .iter()
                .filter(|f| f.car_vs_velocity.is_none() || f.wheel_vs_velocity.is_none())
                .count(),
            undefined_wheel_vs_car: features.iter().filter(|f| f.wheel_vs_car.is_none()).count(),
        },
    };
    debug!(line_points, "extracted geometry features");

    // 7. Lap summary.
    let (rows, duration) = timed(clock, || {
        summary::summarize(&table, &config.apexes, &config.summary)
    });
    let rows = rows?;
    debug!(rows = rows.len(), "summarized laps");
    let summary = StageDiagnostics {
        duration,
        metrics: StageMetrics::Summary { rows: rows.len() },
    };

    let diagnostics = PipelineDiagnostics {
        track_filter: stages.track_filter,
        validity: stages.validity,
        segmentation: stages.segmentation,
        corridor: stages.corridor,
        track_limits: stages.track_limits,
        quality: stages.quality,
        kinematics,
        geometry,
        summary,
        total_duration: clock.elapsed(start),
        totals: PipelineTotals {
            frames_in: stages.frames_in,
            laps_segmented: stages.laps_segmented,
            laps_kept: rows.len(),
            samples_kept: table.len(),
        },
    };

    Ok((
        ProcessResult {
            table,
            summary: rows,
            discarded,
        },
        diagnostics,
    ))
}
