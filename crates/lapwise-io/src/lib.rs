//! lapwise-io: Filesystem collaborators for the lapwise pipeline.
//!
//! Reads raw telemetry exports and reference edge/line files into
//! `lapwise-pipeline` types, and replaces output files atomically. All
//! parsing is done by `csv` + `serde`; columns not named here are ignored.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use lapwise_pipeline::types::Vec3;
use lapwise_pipeline::{ReferencePoint, TelemetryFrame};
use serde::Deserialize;
use tracing::debug;

/// Errors from reading or writing lapwise files.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// The file could not be opened or read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A row could not be parsed; the message names the row and field.
    #[error("malformed CSV in {}: {source}", path.display())]
    Csv {
        /// File being parsed.
        path: PathBuf,
        /// Underlying error, including the record position.
        source: csv::Error,
    },

    /// The file could not be written or moved into place.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// Destination file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

/// One row of the raw telemetry export.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "M_SESSIONUID")]
    session_uid: u64,
    #[serde(rename = "M_CURRENTLAPNUM")]
    lap_number: u32,
    #[serde(rename = "M_TRACKID")]
    track_id: i32,
    #[serde(rename = "M_CURRENTLAPTIMEINMS_1")]
    lap_time_ms: f64,
    #[serde(rename = "CURRENTLAPTIME")]
    lap_time: String,
    #[serde(rename = "M_LAPDISTANCE_1")]
    lap_distance: f64,
    #[serde(rename = "M_WORLDPOSITIONX_1")]
    x: Option<f64>,
    #[serde(rename = "M_WORLDPOSITIONY_1")]
    y: Option<f64>,
    #[serde(rename = "M_WORLDPOSITIONZ_1", default)]
    z: Option<f64>,
    #[serde(rename = "M_WORLDFORWARDDIRX_1")]
    forward_x: f64,
    #[serde(rename = "M_WORLDFORWARDDIRY_1")]
    forward_y: f64,
    #[serde(rename = "M_WORLDFORWARDDIRZ_1")]
    forward_z: f64,
    #[serde(rename = "M_FRONTWHEELSANGLE")]
    front_wheel_angle: Option<f64>,
    #[serde(rename = "M_THROTTLE_1")]
    throttle: f64,
    #[serde(rename = "M_BRAKE_1")]
    brake: f64,
    #[serde(rename = "M_STEER_1")]
    steer: f64,
    #[serde(rename = "M_CURRENTLAPINVALID_1", default)]
    current_lap_invalid: Option<f64>,
    #[serde(rename = "M_LAPINVALID", default)]
    lap_invalid: Option<f64>,
}

impl RawFrame {
    /// The frame, or `None` when X or Y is missing. A missing Z reads as 0.
    fn into_frame(self) -> Option<TelemetryFrame> {
        let position = Vec3::new(self.x?, self.y?, self.z.unwrap_or(0.0));
        Some(TelemetryFrame {
            session_uid: self.session_uid,
            lap_number: self.lap_number,
            track_id: self.track_id,
            lap_time_ms: self.lap_time_ms,
            lap_time: self.lap_time,
            lap_distance: self.lap_distance,
            position,
            forward: Vec3::new(self.forward_x, self.forward_y, self.forward_z),
            front_wheel_angle: self.front_wheel_angle,
            throttle: self.throttle,
            brake: self.brake,
            steer: self.steer,
            lap_invalid: [self.current_lap_invalid, self.lap_invalid]
                .into_iter()
                .flatten()
                .any(|v| v != 0.0),
        })
    }
}

/// One row of a reference edge or racing-line file.
#[derive(Debug, Deserialize)]
struct RawReference {
    #[serde(rename = "FRAME")]
    frame: u64,
    #[serde(rename = "WORLDPOSX")]
    x: f64,
    #[serde(rename = "WORLDPOSY")]
    y: f64,
}

/// Parse a raw telemetry export.
///
/// Rows missing X or Y are skipped. The Z column is optional.
///
/// # Errors
///
/// Returns a [`csv::Error`] naming the record and field if a required
/// column is missing or a value is not numeric.
pub fn read_telemetry_from<R: Read>(reader: R) -> Result<Vec<TelemetryFrame>, csv::Error> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut frames = Vec::new();
    let mut skipped = 0_usize;
    for rec in rdr.deserialize() {
        let raw: RawFrame = rec?;
        match raw.into_frame() {
            Some(frame) => frames.push(frame),
            None => skipped += 1,
        }
    }
    debug!(rows = frames.len(), skipped, "parsed telemetry");
    Ok(frames)
}

/// Read a raw telemetry export from `path`.
///
/// # Errors
///
/// Returns [`IoError::Read`] if the file cannot be opened and
/// [`IoError::Csv`] if it cannot be parsed.
pub fn read_telemetry(path: &Path) -> Result<Vec<TelemetryFrame>, IoError> {
    let file = File::open(path).map_err(|source| IoError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    read_telemetry_from(file).map_err(|source| IoError::Csv {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a reference edge or racing-line file, keeping file order.
///
/// # Errors
///
/// Returns a [`csv::Error`] if a row lacks `FRAME`, `WORLDPOSX` or
/// `WORLDPOSY`, or holds a non-numeric value.
pub fn read_reference_from<R: Read>(reader: R) -> Result<Vec<ReferencePoint>, csv::Error> {
    let mut rdr = csv::Reader::from_reader(reader);
    rdr.deserialize::<RawReference>()
        .map(|rec| rec.map(|r| ReferencePoint::new(r.frame, r.x, r.y)))
        .collect()
}

/// Read a reference edge or racing-line file from `path`.
///
/// # Errors
///
/// Returns [`IoError::Read`] if the file cannot be opened and
/// [`IoError::Csv`] if it cannot be parsed.
pub fn read_reference(path: &Path) -> Result<Vec<ReferencePoint>, IoError> {
    let file = File::open(path).map_err(|source| IoError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let points = read_reference_from(file).map_err(|source| IoError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), points = points.len(), "read reference");
    Ok(points)
}

/// Sibling path used while `path` is being written.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "output".into(), |n| n.to_string_lossy().into_owned());
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

/// Replace `path` with `contents`.
///
/// The bytes go to a sibling temporary file which is then renamed over
/// `path`, so readers see either the old file or the complete new one.
///
/// # Errors
///
/// Returns [`IoError::Write`] if the temporary file cannot be written or
/// renamed. The temporary file is removed on failure.
pub fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> Result<(), IoError> {
    let temp = temp_path(path);
    let result = fs::write(&temp, contents).and_then(|()| fs::rename(&temp, path));
    if let Err(source) = result {
        let _ = fs::remove_file(&temp);
        return Err(IoError::Write {
            path: path.to_path_buf(),
            source,
        });
    }
    debug!(path = %path.display(), "wrote file");
    Ok(())
}
