//! Lap segmentation: assign every frame a dense lap index.
//!
//! Raw lap numbers restart in every session, so a lap is identified by the
//! `(session_uid, lap_number)` pair. Pairs are ranked in sorted order and the
//! rank becomes the [`LapIndex`]. Laps the game flagged invalid are screened
//! out first, so indices stay dense over the laps that are kept.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{
    DiscardReason, DiscardedLap, LapIndex, Sample, TelemetryFrame, TelemetryTable,
};

/// Keep only frames recorded on `track_id`.
#[must_use]
pub fn retain_track(frames: Vec<TelemetryFrame>, track_id: i32) -> Vec<TelemetryFrame> {
    frames
        .into_iter()
        .filter(|frame| frame.track_id == track_id)
        .collect()
}

/// Frames left after [`drop_invalid`], and what it removed.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidityScreen {
    /// Frames of valid laps with a non-negative lap distance.
    pub frames: Vec<TelemetryFrame>,
    /// Laps carrying the invalid flag, in `(session_uid, lap_number)` order.
    pub discarded: Vec<DiscardedLap>,
    /// Frames of valid laps dropped for a negative (or NaN) lap distance.
    pub negative_distance: usize,
}

/// Drop every frame of a lap flagged invalid, then frames with a negative
/// lap distance.
///
/// One flagged frame condemns its whole `(session_uid, lap_number)` lap.
/// Dropped laps carry no [`LapIndex`] since they never reach segmentation.
#[must_use]
pub fn drop_invalid(frames: Vec<TelemetryFrame>) -> ValidityScreen {
    let mut flagged: BTreeMap<(u64, u32), usize> = BTreeMap::new();
    for f in frames.iter().filter(|f| f.lap_invalid) {
        *flagged.entry((f.session_uid, f.lap_number)).or_default() += 1;
    }

    let mut negative_distance = 0;
    let kept: Vec<TelemetryFrame> = frames
        .into_iter()
        .filter(|f| !flagged.contains_key(&(f.session_uid, f.lap_number)))
        .filter(|f| {
            let ahead = f.lap_distance >= 0.0;
            if !ahead {
                negative_distance += 1;
            }
            ahead
        })
        .collect();

    let discarded = flagged
        .into_iter()
        .map(|((session_uid, lap_number), invalid_samples)| DiscardedLap {
            lap_index: None,
            session_uid,
            lap_number,
            reason: DiscardReason::InvalidLap { invalid_samples },
        })
        .collect();

    ValidityScreen {
        frames: kept,
        discarded,
        negative_distance,
    }
}

/// Assign lap indices and order rows by lap, then lap clock.
///
/// Every input frame appears exactly once in the output. Lap indices are
/// `0..K` for `K` distinct `(session_uid, lap_number)` pairs, ranked by
/// session then lap number. Rows with equal lap clocks keep arrival order.
#[must_use]
pub fn segment_laps(frames: Vec<TelemetryFrame>) -> TelemetryTable {
    let pairs: BTreeSet<(u64, u32)> = frames
        .iter()
        .map(|f| (f.session_uid, f.lap_number))
        .collect();
    let ranks: BTreeMap<(u64, u32), LapIndex> = pairs
        .into_iter()
        .zip(0_u32..)
        .map(|(pair, rank)| (pair, LapIndex(rank)))
        .collect();

    let mut samples: Vec<Sample> = frames
        .into_iter()
        .map(|frame| {
            let lap_index = ranks
                .get(&(frame.session_uid, frame.lap_number))
                .copied()
                .unwrap_or_default();
            Sample {
                lap_index,
                frame,
                kinematics: None,
                features: None,
            }
        })
        .collect();

    // Stable, so ties on the lap clock keep arrival order.
    samples.sort_by(|a, b| {
        a.lap_index
            .cmp(&b.lap_index)
            .then_with(|| a.frame.lap_time_ms.total_cmp(&b.frame.lap_time_ms))
    });

    TelemetryTable::new(samples)
}
