//! Corridor filter: keep samples inside the analysed track segment.
//!
//! A cheap rectangular window rejects most of the lap first; survivors are
//! then tested against the corridor polygon. Both tests are inclusive.

use crate::polygon::BoundaryPolygon;
use crate::types::{Rect, TelemetryTable};

/// Drop every sample outside `window` or outside `corridor`.
///
/// Filtering is per sample; laps are never dropped as a whole here and
/// surviving rows keep their relative order.
#[must_use]
pub fn clip_to_corridor(
    table: TelemetryTable,
    window: &Rect,
    corridor: &BoundaryPolygon,
) -> TelemetryTable {
    TelemetryTable::new(
        table
            .into_samples()
            .into_iter()
            .filter(|sample| {
                let p = sample.point();
                window.contains(p) && corridor.contains(p)
            })
            .collect(),
    )
}
