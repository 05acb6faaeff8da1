//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! Every call to [`process_with_diagnostics`](crate::process_with_diagnostics)
//! collects these alongside the pipeline results. They are meant for
//! threshold tuning: how many laps each filter removed and why, how much
//! of the G-force trace was implausible.
//!
//! Time is read through a caller-supplied [`Clock`] so this crate stays
//! free of platform time sources. Durations are serialized as fractional
//! seconds (`f64`) for JSON compatibility.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{DiscardReason, DiscardedLap};

/// A monotonic time source.
pub trait Clock {
    /// A point in time.
    type Instant: Copy;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `earlier`.
    fn elapsed(&self, earlier: Self::Instant) -> Duration;
}

/// A clock that never advances; every duration is zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrozenClock;

impl Clock for FrozenClock {
    type Instant = ();

    fn now(&self) -> Self::Instant {}

    fn elapsed(&self, (): Self::Instant) -> Duration {
        Duration::ZERO
    }
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 0: circuit filter (only when a track id is configured).
    pub track_filter: Option<StageDiagnostics>,
    /// Stage 0b: lap validity screen (only when invalid laps are dropped).
    pub validity: Option<StageDiagnostics>,
    /// Stage 1: lap segmentation.
    pub segmentation: StageDiagnostics,
    /// Stage 2: corridor filter.
    pub corridor: StageDiagnostics,
    /// Stage 3: track-limit enforcement.
    pub track_limits: StageDiagnostics,
    /// Stage 4: lap-quality filter.
    pub quality: StageDiagnostics,
    /// Stage 5: kinematics recomputation.
    pub kinematics: StageDiagnostics,
    /// Stage 6: geometry features.
    pub geometry: StageDiagnostics,
    /// Stage 7: lap summaries.
    pub summary: StageDiagnostics,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub totals: PipelineTotals,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Circuit filter metrics.
    TrackFilter {
        /// Circuit kept.
        track_id: i32,
        /// Frames supplied.
        frames_in: usize,
        /// Frames on the circuit.
        frames_kept: usize,
    },
    /// Lap validity metrics.
    Validity {
        /// Frames supplied.
        frames_in: usize,
        /// Frames kept.
        frames_kept: usize,
        /// Frames dropped for a negative lap distance.
        negative_distance: usize,
        /// Laps dropped for an invalid flag.
        laps_dropped: usize,
    },
    /// Lap segmentation metrics.
    Segmentation {
        /// Samples in the table.
        samples: usize,
        /// Distinct sessions.
        sessions: usize,
        /// Laps identified.
        laps: usize,
    },
    /// Corridor filter metrics.
    Corridor {
        /// Samples before clipping.
        samples_before: usize,
        /// Samples inside the corridor.
        samples_after: usize,
        /// Laps with at least one sample left.
        laps_after: usize,
    },
    /// Track-limit metrics.
    TrackLimits {
        /// Vertices in the boundary ring.
        boundary_vertices: usize,
        /// Laps checked.
        laps_before: usize,
        /// Laps dropped.
        laps_dropped: usize,
        /// Largest exterior distance among dropped laps.
        worst_distance: Option<f64>,
    },
    /// Lap-quality metrics.
    Quality {
        /// Laps checked.
        laps_before: usize,
        /// Laps dropped for too few raw samples.
        too_few_samples: usize,
        /// Laps dropped for too few distinct positions.
        too_few_distinct_points: usize,
        /// Laps dropped for a frozen position.
        repeated_points: usize,
    },
    /// Kinematics metrics.
    Kinematics {
        /// Samples processed.
        samples: usize,
        /// G-force values masked as implausible.
        g_force_masked: usize,
        /// G-force values left missing.
        g_force_unresolved: usize,
        /// Wheel angles filled from neighbours.
        wheel_angle_filled: usize,
        /// Wheel angles left missing.
        wheel_angle_unresolved: usize,
    },
    /// Geometry feature metrics.
    Geometry {
        /// Racing-line points indexed.
        line_points: usize,
        /// Samples inside the Turn 1 window.
        in_t1_window: usize,
        /// Samples inside the Turn 2 window.
        in_t2_window: usize,
        /// Samples with an undefined velocity angle.
        undefined_velocity_angles: usize,
        /// Samples with an undefined wheel-vs-car angle.
        undefined_wheel_vs_car: usize,
    },
    /// Summary metrics.
    Summary {
        /// Rows produced.
        rows: usize,
    },
}

/// High-level counts for the entire pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTotals {
    /// Frames supplied.
    pub frames_in: usize,
    /// Laps identified by segmentation.
    pub laps_segmented: usize,
    /// Laps surviving every filter.
    pub laps_kept: usize,
    /// Samples surviving every filter.
    pub samples_kept: usize,
}

/// Laps dropped for each quality reason: samples, distinct, repeats.
pub(crate) fn quality_breakdown(discarded: &[DiscardedLap]) -> (usize, usize, usize) {
    discarded
        .iter()
        .fold((0, 0, 0), |(samples, distinct, repeats), d| match d.reason {
            DiscardReason::TooFewSamples { .. } => (samples + 1, distinct, repeats),
            DiscardReason::TooFewDistinctPoints { .. } => (samples, distinct + 1, repeats),
            DiscardReason::RepeatedPoints { .. } => (samples, distinct, repeats + 1),
            DiscardReason::InvalidLap { .. } | DiscardReason::TrackLimits { .. } => {
                (samples, distinct, repeats)
            }
        })
}

/// Largest track-limit distance among `discarded`.
pub(crate) fn worst_distance(discarded: &[DiscardedLap]) -> Option<f64> {
    discarded
        .iter()
        .filter_map(|d| match d.reason {
            DiscardReason::TrackLimits { max_distance } => Some(max_distance),
            _ => None,
        })
        .reduce(f64::max)
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Frames: {}  |  Laps segmented: {}",
            self.totals.frames_in, self.totals.laps_segmented,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);

        let stages: Vec<(&str, &StageDiagnostics)> = {
            let mut s = Vec::new();
            if let Some(ref track) = self.track_filter {
                s.push(("Track Filter", track));
            }
            if let Some(ref validity) = self.validity {
                s.push(("Lap Validity", validity));
            }
            s.push(("Lap Segmentation", &self.segmentation));
            s.push(("Corridor", &self.corridor));
            s.push(("Track Limits", &self.track_limits));
            s.push(("Lap Quality", &self.quality));
            s.push(("Kinematics", &self.kinematics));
            s.push(("Geometry", &self.geometry));
            s.push(("Summary", &self.summary));
            s
        };

        for (name, diag) in &stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Laps kept: {}  |  Samples kept: {}",
            self.totals.laps_kept, self.totals.samples_kept,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::TrackFilter {
            track_id,
            frames_in,
            frames_kept,
        } => format!("track={track_id} {frames_in}->{frames_kept} frames"),
        StageMetrics::Validity {
            frames_in,
            frames_kept,
            negative_distance,
            laps_dropped,
        } => format!(
            "{frames_in}->{frames_kept} frames, {laps_dropped} invalid laps, {negative_distance} negative distance",
        ),
        StageMetrics::Segmentation {
            samples,
            sessions,
            laps,
        } => format!("{samples} samples, {sessions} sessions, {laps} laps"),
        StageMetrics::Corridor {
            samples_before,
            samples_after,
            laps_after,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let kept = if *samples_before > 0 {
                *samples_after as f64 / *samples_before as f64 * 100.0
            } else {
                0.0
            };
            format!("{samples_before}->{samples_after} samples ({kept:.1}% kept), {laps_after} laps")
        }
        StageMetrics::TrackLimits {
            boundary_vertices,
            laps_before,
            laps_dropped,
            worst_distance,
        } => {
            let worst = worst_distance.map_or_else(|| "-".to_string(), |d| format!("{d:.2}"));
            format!(
                "ring={boundary_vertices} pts, {laps_dropped}/{laps_before} laps dropped (worst {worst})",
            )
        }
        StageMetrics::Quality {
            laps_before,
            too_few_samples,
            too_few_distinct_points,
            repeated_points,
        } => format!(
            "{laps_before} laps, dropped short={too_few_samples} sparse={too_few_distinct_points} frozen={repeated_points}",
        ),
        StageMetrics::Kinematics {
            samples,
            g_force_masked,
            g_force_unresolved,
            wheel_angle_filled,
            wheel_angle_unresolved,
        } => format!(
            "{samples} samples, g masked={g_force_masked} null={g_force_unresolved}, wheel filled={wheel_angle_filled} null={wheel_angle_unresolved}",
        ),
        StageMetrics::Geometry {
            line_points,
            in_t1_window,
            in_t2_window,
            undefined_velocity_angles,
            undefined_wheel_vs_car,
        } => format!(
            "line={line_points} pts, t1={in_t1_window} t2={in_t2_window}, undefined vel={undefined_velocity_angles} car={undefined_wheel_vs_car}",
        ),
        StageMetrics::Summary { rows } => format!("{rows} rows"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::LapIndex;

    fn stage(ms: u64, metrics: StageMetrics) -> StageDiagnostics {
        StageDiagnostics {
            duration: Duration::from_millis(ms),
            metrics,
        }
    }

    fn sample_diagnostics() -> PipelineDiagnostics {
        PipelineDiagnostics {
            track_filter: None,
            validity: Some(stage(
                1,
                StageMetrics::Validity {
                    frames_in: 110,
                    frames_kept: 100,
                    negative_distance: 2,
                    laps_dropped: 1,
                },
            )),
            segmentation: stage(
                1,
                StageMetrics::Segmentation {
                    samples: 100,
                    sessions: 1,
                    laps: 4,
                },
            ),
            corridor: stage(
                2,
                StageMetrics::Corridor {
                    samples_before: 100,
                    samples_after: 80,
                    laps_after: 4,
                },
            ),
            track_limits: stage(
                3,
                StageMetrics::TrackLimits {
                    boundary_vertices: 40,
                    laps_before: 4,
                    laps_dropped: 1,
                    worst_distance: Some(12.5),
                },
            ),
            quality: stage(
                1,
                StageMetrics::Quality {
                    laps_before: 3,
                    too_few_samples: 0,
                    too_few_distinct_points: 1,
                    repeated_points: 0,
                },
            ),
            kinematics: stage(
                1,
                StageMetrics::Kinematics {
                    samples: 40,
                    g_force_masked: 3,
                    g_force_unresolved: 0,
                    wheel_angle_filled: 2,
                    wheel_angle_unresolved: 0,
                },
            ),
            geometry: stage(
                1,
                StageMetrics::Geometry {
                    line_points: 10,
                    in_t1_window: 5,
                    in_t2_window: 6,
                    undefined_velocity_angles: 2,
                    undefined_wheel_vs_car: 0,
                },
            ),
            summary: stage(1, StageMetrics::Summary { rows: 2 }),
            total_duration: Duration::from_millis(10),
            totals: PipelineTotals {
                frames_in: 100,
                laps_segmented: 4,
                laps_kept: 2,
                samples_kept: 40,
            },
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let d = Duration::from_millis(1234);
        let ms = duration_ms(d);
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn frozen_clock_reports_zero() {
        let clock = FrozenClock;
        let start = clock.now();
        assert_eq!(clock.elapsed(start), Duration::ZERO);
    }

    #[test]
    fn report_lists_every_stage() {
        let report = sample_diagnostics().report();
        for name in [
            "Lap Validity",
            "Lap Segmentation",
            "Corridor",
            "Track Limits",
            "Lap Quality",
            "Kinematics",
            "Geometry",
            "Summary",
        ] {
            assert!(report.contains(name), "missing {name}");
        }
        assert!(!report.contains("Track Filter"));
        assert!(report.contains("110->100 frames, 1 invalid laps, 2 negative distance"));
        assert!(report.contains("1/4 laps dropped (worst 12.50)"));
        assert!(report.contains("100->80 samples (80.0% kept)"));
        assert!(report.contains("Laps kept: 2  |  Samples kept: 40"));
    }

    #[test]
    fn diagnostics_serde_round_trip() {
        let diagnostics = sample_diagnostics();
        let json = serde_json::to_string(&diagnostics).unwrap();
        assert!(json.contains("\"total_duration\":0.01"));
        let back: PipelineDiagnostics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, diagnostics);
    }

    #[test]
    fn negative_duration_is_rejected() {
        let json = serde_json::to_string(&sample_diagnostics())
            .unwrap()
            .replace("\"total_duration\":0.01", "\"total_duration\":-1.0");
        assert!(serde_json::from_str::<PipelineDiagnostics>(&json).is_err());
    }

    #[test]
    fn discard_breakdowns() {
        let lap = |reason| DiscardedLap {
            lap_index: Some(LapIndex(0)),
            session_uid: 1,
            lap_number: 1,
            reason,
        };
        let discarded = vec![
            lap(DiscardReason::TooFewDistinctPoints { distinct: 1, min: 2 }),
            lap(DiscardReason::RepeatedPoints { repeats: 20, max: 10 }),
            lap(DiscardReason::TooFewDistinctPoints { distinct: 0, min: 2 }),
            lap(DiscardReason::TrackLimits { max_distance: 6.0 }),
            lap(DiscardReason::TrackLimits { max_distance: 9.0 }),
            lap(DiscardReason::InvalidLap { invalid_samples: 3 }),
        ];
        assert_eq!(quality_breakdown(&discarded), (0, 2, 1));
        assert_eq!(worst_distance(&discarded), Some(9.0));
        assert_eq!(worst_distance(&[]), None);
    }
}
