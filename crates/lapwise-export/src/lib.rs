//! lapwise-export: Pure format serializers (sans-IO)
//!
//! Converts pipeline output into files: CSV tables for the sample table,
//! lap summaries, reference edges and dropped laps, and an SVG track map.

pub mod csv;
pub mod svg;

pub use crate::csv::{
    ExportError, discarded_csv, reference_csv, summary_csv, telemetry_csv,
};
pub use crate::svg::{SvgMetadata, TrackMap, track_map_svg};
