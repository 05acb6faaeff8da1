//! Track-limit enforcement and cut lines across the track.
//!
//! The left and right reference edges, restricted to the reference window
//! and concatenated left-then-right, form one boundary ring. A lap with any
//! sample further outside that ring than the threshold is dropped whole.

use std::collections::{BTreeMap, BTreeSet};

use crate::polygon::BoundaryPolygon;
use crate::types::{
    DiscardReason, DiscardedLap, LapIndex, PipelineError, Point, Rect, ReferencePoint,
    TelemetryTable, by_frame, windowed,
};

/// The track-limit boundary and the distance a lap may stray outside it.
#[derive(Debug, Clone)]
pub struct TrackLimits {
    boundary: BoundaryPolygon,
    threshold: f64,
}

impl TrackLimits {
    /// Build the boundary from the left and right reference edges.
    ///
    /// Both edges are restricted to `window`; the ring is the left edge
    /// followed by the right edge, each in the order given.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DegenerateGeometry`] if fewer than three
    /// distinct edge points fall inside `window`.
    pub fn from_edges(
        left: &[ReferencePoint],
        right: &[ReferencePoint],
        window: &Rect,
        threshold: f64,
    ) -> Result<Self, PipelineError> {
        let ring: Vec<Point> = windowed(left, window)
            .into_iter()
            .chain(windowed(right, window))
            .map(ReferencePoint::point)
            .collect();
        Ok(Self {
            boundary: BoundaryPolygon::new(&ring)?,
            threshold,
        })
    }

    /// The boundary ring.
    #[must_use]
    pub const fn boundary(&self) -> &BoundaryPolygon {
        &self.boundary
    }

    /// How far `p` lies outside the boundary; zero when inside.
    #[must_use]
    pub fn distance_outside(&self, p: Point) -> f64 {
        self.boundary.distance_outside(p)
    }

    /// Drop every lap with a sample more than the threshold outside.
    ///
    /// Laps entirely within the threshold pass through untouched. The
    /// returned discards carry each dropped lap's worst distance.
    #[must_use]
    pub fn enforce(&self, table: TelemetryTable) -> (TelemetryTable, Vec<DiscardedLap>) {
        let mut worst: BTreeMap<LapIndex, (f64, u64, u32)> = BTreeMap::new();
        for sample in table.samples() {
            let distance = self.distance_outside(sample.point());
            if distance > self.threshold {
                let entry = worst.entry(sample.lap_index).or_insert((
                    distance,
                    sample.frame.session_uid,
                    sample.frame.lap_number,
                ));
                entry.0 = entry.0.max(distance);
            }
        }

        let discarded: Vec<DiscardedLap> = worst
            .into_iter()
            .map(|(lap_index, (max_distance, session_uid, lap_number))| DiscardedLap {
                lap_index: Some(lap_index),
                session_uid,
                lap_number,
                reason: DiscardReason::TrackLimits { max_distance },
            })
            .collect();
        let dropped: BTreeSet<LapIndex> = discarded.iter().filter_map(|d| d.lap_index).collect();
        (table.without_laps(&dropped), discarded)
    }
}

/// A segment across the track from the right edge to the left edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CutLine {
    /// Start of the line on the right-hand side.
    pub start: Point,
    /// Nearest left-edge point to the projected crossing.
    pub end: Point,
}

/// Closest point of `edge` to `target`, as an index into `edge`.
fn nearest_index(edge: &[ReferencePoint], target: Point) -> Option<usize> {
    edge.iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            a.point()
                .distance_squared(target)
                .total_cmp(&b.point().distance_squared(target))
        })
        .map(|(i, _)| i)
}

/// Project a line across the track at `anchor`.
///
/// The local direction of the right edge at its point nearest `anchor` is
/// rotated a quarter turn, projected `track_width` from `anchor`, and the
/// left-edge point nearest that projection closes the line.
///
/// # Errors
///
/// Returns [`PipelineError::DegenerateGeometry`] if either edge is empty,
/// the nearest right-edge point is the last one, or the local direction
/// has near-zero length.
pub fn cut_line(
    right: &[ReferencePoint],
    left: &[ReferencePoint],
    anchor: Point,
    track_width: f64,
) -> Result<CutLine, PipelineError> {
    let right = by_frame(right);
    let left = by_frame(left);

    let right_idx = nearest_index(&right, anchor)
        .ok_or_else(|| PipelineError::DegenerateGeometry("right edge is empty".to_string()))?;
    let next = right.get(right_idx + 1).ok_or_else(|| {
        PipelineError::DegenerateGeometry(format!(
            "nearest right-edge point (frame {}) has no successor",
            right[right_idx].frame
        ))
    })?;

    let current = right[right_idx].point();
    let direction = Point::new(next.x - current.x, next.y - current.y);
    let length = direction.norm();
    if length < 1e-9 {
        return Err(PipelineError::DegenerateGeometry(format!(
            "right edge segment at frame {} has zero length",
            right[right_idx].frame
        )));
    }

    let normal = Point::new(-direction.y / length, direction.x / length);
    let projected = Point::new(
        normal.x.mul_add(track_width, anchor.x),
        normal.y.mul_add(track_width, anchor.y),
    );

    let left_idx = nearest_index(&left, projected)
        .ok_or_else(|| PipelineError::DegenerateGeometry("left edge is empty".to_string()))?;

    Ok(CutLine {
        start: anchor,
        end: left[left_idx].point(),
    })
}
