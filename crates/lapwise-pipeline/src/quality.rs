//! Lap-quality filter: drop laps with stuttering or frozen telemetry.
//!
//! Each check looks at the (x, y) positions of one lap. A lap failing any
//! check is dropped in full; the first failing check is reported.

use std::collections::{BTreeSet, HashMap};

use crate::types::{
    DiscardReason, DiscardedLap, LapIndex, Point, QualityThresholds, Sample, TelemetryTable,
};

/// Exact identity of a position; `-0.0` and `0.0` are the same position.
fn position_key(p: Point) -> (u64, u64) {
    ((p.x + 0.0).to_bits(), (p.y + 0.0).to_bits())
}

/// Counts describing how repetitive one lap's positions are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionStats {
    /// Raw samples in the lap.
    pub samples: usize,
    /// Distinct (x, y) positions.
    pub distinct: usize,
    /// Highest occurrence count of any one position.
    pub max_repeats: usize,
}

/// Position statistics over a lap's samples.
pub fn position_stats<'a>(lap: impl IntoIterator<Item = &'a Sample>) -> PositionStats {
    let mut counts: HashMap<(u64, u64), usize> = HashMap::new();
    let mut samples = 0;
    for sample in lap {
        samples += 1;
        *counts.entry(position_key(sample.point())).or_default() += 1;
    }
    PositionStats {
        samples,
        distinct: counts.len(),
        max_repeats: counts.values().copied().max().unwrap_or(0),
    }
}

/// The first check `stats` fails, if any.
///
/// Checks run in order: raw sample floor, distinct-position floor, repeat
/// ceiling.
#[must_use]
pub fn assess(stats: PositionStats, thresholds: &QualityThresholds) -> Option<DiscardReason> {
    if let Some(min) = thresholds.min_samples_per_lap
        && stats.samples < min
    {
        return Some(DiscardReason::TooFewSamples {
            samples: stats.samples,
            min,
        });
    }
    if stats.distinct < thresholds.min_distinct_points {
        return Some(DiscardReason::TooFewDistinctPoints {
            distinct: stats.distinct,
            min: thresholds.min_distinct_points,
        });
    }
    if stats.max_repeats > thresholds.max_repeats {
        return Some(DiscardReason::RepeatedPoints {
            repeats: stats.max_repeats,
            max: thresholds.max_repeats,
        });
    }
    None
}

/// Drop every lap that fails a quality check.
#[must_use]
pub fn filter_lap_quality(
    table: TelemetryTable,
    thresholds: &QualityThresholds,
) -> (TelemetryTable, Vec<DiscardedLap>) {
    let samples = table.samples();
    let discarded: Vec<DiscardedLap> = table
        .partition()
        .into_iter()
        .filter_map(|(lap_index, rows)| {
            let stats = position_stats(rows.iter().map(|&row| &samples[row]));
            let reason = assess(stats, thresholds)?;
            let first = &samples[*rows.first()?].frame;
            Some(DiscardedLap {
                lap_index: Some(lap_index),
                session_uid: first.session_uid,
                lap_number: first.lap_number,
                reason,
            })
        })
        .collect();

    let dropped: BTreeSet<LapIndex> = discarded.iter().filter_map(|d| d.lap_index).collect();
    (table.without_laps(&dropped), discarded)
}
