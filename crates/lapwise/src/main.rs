//! lapwise: clean racing telemetry and write lap feature tables.
//!
//! Reads a raw telemetry export plus the left edge, right edge and racing
//! line of the analysed circuit segment, runs the full pipeline, and writes
//! into the output directory:
//!
//! - `telemetry.csv`: surviving samples with recomputed kinematics and
//!   geometry features
//! - `summary.csv`: one row per surviving lap
//! - `left.csv`, `right.csv`: the track edges inside the reference window
//! - `discarded.csv`: dropped laps with the reason
//!
//! Per-stage diagnostics are printed to stdout, as a report or as JSON.
//!
//! # Usage
//!
//! ```text
//! lapwise [OPTIONS] --left <CSV> --right <CSV> --line <CSV> <TELEMETRY>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use lapwise_pipeline::diagnostics::Clock;
use lapwise_pipeline::types::{by_frame, windowed};
use lapwise_pipeline::{
    CutLine, PipelineConfig, ProcessResult, ReferenceData, ReferencePoint, cut_line,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Clean racing telemetry and write lap feature tables.
///
/// Segments the export into laps, drops samples outside the corridor and
/// laps that leave the track or are too sparse, recomputes velocity and
/// G-force, and summarises every surviving lap.
#[derive(Parser)]
#[command(name = "lapwise", version)]
struct Cli {
    /// Raw telemetry export (CSV).
    telemetry: PathBuf,

    /// Left track edge (CSV with FRAME, WORLDPOSX, WORLDPOSY).
    #[arg(long)]
    left: PathBuf,

    /// Right track edge (CSV with FRAME, WORLDPOSX, WORLDPOSY).
    #[arg(long)]
    right: PathBuf,

    /// Racing line (CSV with FRAME, WORLDPOSX, WORLDPOSY).
    #[arg(long)]
    line: PathBuf,

    /// Directory the output tables are written into.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Circuit to keep.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_TRACK_ID)]
    track_id: i32,

    /// Keep frames from every circuit.
    #[arg(long, conflicts_with = "track_id")]
    all_tracks: bool,

    /// Keep laps the game flagged invalid and frames with a negative lap
    /// distance.
    #[arg(long)]
    keep_invalid_laps: bool,

    /// Largest distance a sample may lie outside the track limits.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_TRACK_LIMIT_THRESHOLD)]
    track_limit_threshold: f64,

    /// Fewest distinct positions a lap must have.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MIN_DISTINCT_POINTS)]
    min_distinct_points: usize,

    /// Most times a single position may repeat within a lap.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MAX_REPEATS)]
    max_repeats: usize,

    /// Fewest raw samples a lap must have (unset: no floor).
    #[arg(long)]
    min_samples_per_lap: Option<usize>,

    /// Velocity clip, units per second.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_VELOCITY_LIMIT)]
    velocity_limit: f64,

    /// G-force magnitude above which values are treated as implausible.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_G_FORCE_LIMIT)]
    g_force_limit: f64,

    /// Radius of the turn windows around each apex.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_WINDOW_RADIUS)]
    window_radius: f64,

    /// Brake pressure that marks the first braking point.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_BRAKE_THRESHOLD)]
    brake_threshold: f64,

    /// Steering magnitude that marks the first turning point.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_STEER_THRESHOLD)]
    steer_threshold: f64,

    /// Distance projected across the track when drawing cut lines.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_CUT_LINE_TRACK_WIDTH)]
    cut_line_track_width: f64,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// The JSON must be a valid `PipelineConfig` serialization; missing
    /// fields take their defaults.
    #[arg(long, conflicts_with = "config")]
    config_json: Option<String>,

    /// Full pipeline config read from a JSON file.
    ///
    /// Same rules as `--config-json`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output diagnostics as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,

    /// Write an SVG track map to this file.
    #[arg(long)]
    svg: Option<PathBuf>,

    /// Log per-stage counts (overridden by `RUST_LOG`).
    #[arg(short, long)]
    verbose: bool,
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` or `--config` is provided, the JSON is parsed
/// directly and all individual parameter flags are ignored. Otherwise, a
/// config is assembled from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }
    if let Some(ref path) = cli.config {
        let json = std::fs::read_to_string(path)
            .map_err(|e| format!("Error reading {}: {e}", path.display()))?;
        return serde_json::from_str(&json)
            .map_err(|e| format!("Error parsing {}: {e}", path.display()));
    }

    let defaults = PipelineConfig::default();
    Ok(PipelineConfig {
        track_id: (!cli.all_tracks).then_some(cli.track_id),
        drop_invalid_laps: !cli.keep_invalid_laps,
        track_limit_threshold: cli.track_limit_threshold,
        quality: lapwise_pipeline::types::QualityThresholds {
            min_distinct_points: cli.min_distinct_points,
            max_repeats: cli.max_repeats,
            min_samples_per_lap: cli.min_samples_per_lap,
        },
        kinematics: lapwise_pipeline::types::KinematicLimits {
            velocity_limit: cli.velocity_limit,
            g_force_limit: cli.g_force_limit,
            ..defaults.kinematics
        },
        apexes: lapwise_pipeline::types::ApexConfig {
            window_radius: cli.window_radius,
            ..defaults.apexes
        },
        summary: lapwise_pipeline::types::SummaryThresholds {
            brake_threshold: cli.brake_threshold,
            steer_threshold: cli.steer_threshold,
        },
        cut_line_track_width: cli.cut_line_track_width,
        ..defaults
    })
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "lapwise=debug,lapwise_pipeline=debug,lapwise_io=debug"
    } else {
        "lapwise=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let config = config_from_cli(cli)?;
    debug!(?config, "pipeline config");

    let frames = lapwise_io::read_telemetry(&cli.telemetry).map_err(|e| e.to_string())?;
    info!(frames = frames.len(), path = %cli.telemetry.display(), "read telemetry");
    let reference = ReferenceData {
        left: lapwise_io::read_reference(&cli.left).map_err(|e| e.to_string())?,
        right: lapwise_io::read_reference(&cli.right).map_err(|e| e.to_string())?,
        line: lapwise_io::read_reference(&cli.line).map_err(|e| e.to_string())?,
    };

    let (result, diagnostics) =
        lapwise_pipeline::process_with_diagnostics(frames, &reference, &config, &StdClock)
            .map_err(|e| format!("Pipeline error: {e}"))?;
    info!(
        laps = result.summary.len(),
        samples = result.table.len(),
        discarded = result.discarded.len(),
        "pipeline finished"
    );

    write_tables(&cli.out_dir, &result, &reference, &config)?;

    if let Some(ref svg_path) = cli.svg {
        write_track_map(svg_path, cli, &result, &reference, &config)?;
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&diagnostics)
            .map_err(|e| format!("Error serializing diagnostics: {e}"))?;
        println!("{json}");
    } else {
        println!("{}", diagnostics.report());
    }
    Ok(())
}

/// Left and right edges restricted to the reference window.
fn windowed_edges(
    reference: &ReferenceData,
    config: &PipelineConfig,
) -> (Vec<ReferencePoint>, Vec<ReferencePoint>) {
    (
        windowed(&reference.left, &config.reference_window),
        windowed(&reference.right, &config.reference_window),
    )
}

/// Write every output table into `out_dir`, creating it if needed.
fn write_tables(
    out_dir: &Path,
    result: &ProcessResult,
    reference: &ReferenceData,
    config: &PipelineConfig,
) -> Result<(), String> {
    std::fs::create_dir_all(out_dir)
        .map_err(|e| format!("Error creating {}: {e}", out_dir.display()))?;
    let (left, right) = windowed_edges(reference, config);

    let export = |e: lapwise_export::ExportError| format!("Error serializing output: {e}");
    let tables = [
        (
            "telemetry.csv",
            lapwise_export::telemetry_csv(&result.table).map_err(export)?,
        ),
        (
            "summary.csv",
            lapwise_export::summary_csv(&result.summary).map_err(export)?,
        ),
        (
            "left.csv",
            lapwise_export::reference_csv(&left).map_err(export)?,
        ),
        (
            "right.csv",
            lapwise_export::reference_csv(&right).map_err(export)?,
        ),
        (
            "discarded.csv",
            lapwise_export::discarded_csv(&result.discarded).map_err(export)?,
        ),
    ];

    for (name, contents) in &tables {
        let path = out_dir.join(name);
        lapwise_io::write_atomic(&path, contents).map_err(|e| e.to_string())?;
        info!(path = %path.display(), bytes = contents.len(), "wrote table");
    }
    Ok(())
}

/// Segment gates at the first and fifth corridor vertices, across the
/// windowed `left` and `right` edges.
///
/// A gate that cannot be constructed is logged and skipped.
fn segment_gates(
    left: &[ReferencePoint],
    right: &[ReferencePoint],
    config: &PipelineConfig,
) -> Vec<CutLine> {
    [0, 4]
        .into_iter()
        .filter_map(|i| config.corridor_polygon.get(i).copied())
        .filter_map(|anchor| {
            match cut_line(right, left, anchor, config.cut_line_track_width) {
                Ok(line) => Some(line),
                Err(e) => {
                    warn!(x = anchor.x, y = anchor.y, error = %e, "skipping cut line");
                    None
                }
            }
        })
        .collect()
}

fn write_track_map(
    svg_path: &Path,
    cli: &Cli,
    result: &ProcessResult,
    reference: &ReferenceData,
    config: &PipelineConfig,
) -> Result<(), String> {
    let (left, right) = windowed_edges(reference, config);
    let line = by_frame(&windowed(&reference.line, &config.reference_window));
    let cut_lines = segment_gates(&left, &right, config);
    let title = cli
        .telemetry
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("lapwise");
    let description = format!(
        "{} laps kept, {} dropped",
        result.summary.len(),
        result.discarded.len()
    );
    let config_json = serde_json::to_string(config).ok();
    let metadata = lapwise_export::SvgMetadata {
        title: Some(title),
        description: Some(&description),
        config_json: config_json.as_deref(),
    };
    let svg = lapwise_export::track_map_svg(
        &lapwise_export::TrackMap {
            left: &left,
            right: &right,
            racing_line: &line,
            laps: &result.table,
            apexes: Some(&config.apexes),
            cut_lines: &cut_lines,
        },
        &metadata,
    );
    lapwise_io::write_atomic(svg_path, &svg).map_err(|e| e.to_string())?;
    info!(path = %svg_path.display(), bytes = svg.len(), "wrote track map");
    Ok(())
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, earlier: Instant) -> Duration {
        earlier.elapsed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["lapwise", "t.csv", "--left", "l.csv", "--right", "r.csv", "--line", "x.csv"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flag_defaults_match_pipeline_defaults() {
        let config = config_from_cli(&parse(&[])).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn flags_override_defaults() {
        let config = config_from_cli(&parse(&[
            "--all-tracks",
            "--keep-invalid-laps",
            "--track-limit-threshold",
            "7.5",
            "--min-distinct-points",
            "700",
            "--min-samples-per-lap",
            "700",
        ]))
        .unwrap();
        assert_eq!(config.track_id, None);
        assert!(!config.drop_invalid_laps);
        assert!((config.track_limit_threshold - 7.5).abs() < f64::EPSILON);
        assert_eq!(config.quality.min_distinct_points, 700);
        assert_eq!(config.quality.min_samples_per_lap, Some(700));
    }

    #[test]
    fn config_json_replaces_flags() {
        let config = config_from_cli(&parse(&[
            "--config-json",
            r#"{"track_id": 3, "track_limit_threshold": 2.5}"#,
            "--track-limit-threshold",
            "9",
        ]))
        .unwrap();
        assert_eq!(config.track_id, Some(3));
        assert!((config.track_limit_threshold - 2.5).abs() < f64::EPSILON);
        assert_eq!(config.quality, PipelineConfig::default().quality);
    }

    #[test]
    fn gates_use_windowed_edges() {
        let config = PipelineConfig {
            reference_window: lapwise_pipeline::Rect::new(0.0, 100.0, 0.0, 100.0),
            corridor_polygon: vec![
                lapwise_pipeline::Point::new(50.0, -0.5),
                lapwise_pipeline::Point::new(100.0, 0.0),
                lapwise_pipeline::Point::new(100.0, 20.0),
            ],
            ..PipelineConfig::default()
        };
        let edge = |y: f64| -> Vec<ReferencePoint> {
            (0..=10_u32)
                .map(|i| ReferencePoint::new(u64::from(i), f64::from(i * 10), y))
                .collect()
        };
        let mut right = edge(0.0);
        // Closest to the anchor, but outside the window and last by frame.
        right.push(ReferencePoint::new(11, 50.0, -0.8));
        let reference = ReferenceData {
            left: edge(20.0),
            right,
            line: Vec::new(),
        };

        assert!(segment_gates(&reference.left, &reference.right, &config).is_empty());

        let (left, right) = windowed_edges(&reference, &config);
        assert_eq!(right.len(), 11);
        assert_eq!(
            segment_gates(&left, &right, &config),
            vec![CutLine {
                start: lapwise_pipeline::Point::new(50.0, -0.5),
                end: lapwise_pipeline::Point::new(50.0, 20.0),
            }]
        );
    }

    #[test]
    fn malformed_config_json_is_reported() {
        let err = config_from_cli(&parse(&["--config-json", "{not json"])).unwrap_err();
        assert!(err.starts_with("Error parsing --config-json"));
    }
}
