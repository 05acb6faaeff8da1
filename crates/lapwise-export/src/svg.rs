//! SVG track-map serializer.
//!
//! Draws the track edges, the racing line, one path per lap and,
//! optionally, the apex windows and cut lines, using the [`svg`] crate
//! for document construction and escaping.
//!
//! World coordinates are used directly as user units. The y axis is
//! negated so the map reads the same way as a plot with y pointing up.
//! Strokes use `vector-effect="non-scaling-stroke"` so line widths stay
//! readable at any track scale.
//!
//! This is a pure function with no I/O -- it returns a `String`.

use svg::Document;
use svg::node::element::path::Data;
use svg::node::element::{Circle, Description, Element, Group, Line, Path, Title};
use svg::node::{Node, Text, Value};

use lapwise_pipeline::types::ApexConfig;
use lapwise_pipeline::{CutLine, Point, ReferencePoint, TelemetryTable};

/// Stroke colours assigned to laps in lap-index order, cycling.
pub const LAP_COLORS: &[&str] = &[
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#17becf",
];

/// Width of the rendered document in pixels; the height follows the
/// aspect ratio of the drawn area.
const DOCUMENT_WIDTH_PX: f64 = 1000.0;

/// Padding around the drawn area as a fraction of its larger side.
const MARGIN_RATIO: f64 = 0.05;

/// Metadata to embed in the SVG document.
///
/// When present, `<title>` and `<desc>` are emitted first, then a
/// `<metadata>` element carrying the pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct SvgMetadata<'a> {
    /// Document title, typically the telemetry file name.
    pub title: Option<&'a str>,
    /// Free-form description.
    pub description: Option<&'a str>,
    /// Serialized `PipelineConfig`, embedded for reproducibility.
    pub config_json: Option<&'a str>,
}

/// Everything drawn on a track map.
#[derive(Debug, Clone, Copy)]
pub struct TrackMap<'a> {
    /// Left track edge, drawn in the given order.
    pub left: &'a [ReferencePoint],
    /// Right track edge, drawn in the given order.
    pub right: &'a [ReferencePoint],
    /// Racing line, drawn in the given order.
    pub racing_line: &'a [ReferencePoint],
    /// Laps to draw, one path per lap.
    pub laps: &'a TelemetryTable,
    /// Apex markers and turn windows.
    pub apexes: Option<&'a ApexConfig>,
    /// Segment gates across the track.
    pub cut_lines: &'a [CutLine],
}

/// Axis-aligned extent of everything drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Bounds {
    min_x: f64,
    max_x: f64,
    min_y: f64,
    max_y: f64,
}

impl Bounds {
    fn around(p: Point, radius: f64) -> Self {
        Self {
            min_x: p.x - radius,
            max_x: p.x + radius,
            min_y: p.y - radius,
            max_y: p.y + radius,
        }
    }

    fn union(self, other: Self) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            max_x: self.max_x.max(other.max_x),
            min_y: self.min_y.min(other.min_y),
            max_y: self.max_y.max(other.max_y),
        }
    }

    fn padded(self) -> Self {
        let margin = ((self.max_x - self.min_x).max(self.max_y - self.min_y) * MARGIN_RATIO).max(1.0);
        Self {
            min_x: self.min_x - margin,
            max_x: self.max_x + margin,
            min_y: self.min_y - margin,
            max_y: self.max_y + margin,
        }
    }
}

/// Smallest bounds covering every finite point in `points`.
fn bounds_of(points: impl IntoIterator<Item = Point>) -> Option<Bounds> {
    points
        .into_iter()
        .filter(|p| p.x.is_finite() && p.y.is_finite())
        .map(|p| Bounds::around(p, 0.0))
        .reduce(Bounds::union)
}

/// World y to SVG y; never produces `-0`.
fn flip(y: f64) -> f64 {
    0.0 - y
}

/// Build an SVG path `d` attribute from points, negating y.
///
/// Returns an empty string for fewer than 2 points.
#[must_use]
pub fn build_path_data(points: &[Point]) -> String {
    let Some((first, rest)) = points.split_first() else {
        return String::new();
    };
    if rest.is_empty() {
        return String::new();
    }
    let mut data = Data::new().move_to((first.x, flip(first.y)));
    for p in rest {
        data = data.line_to((p.x, flip(p.y)));
    }
    String::from(Value::from(data))
}

/// A stroked, unfilled path, or `None` if it would draw nothing.
fn stroked_path(points: &[Point], color: &str, width: f64) -> Option<Path> {
    let d = build_path_data(points);
    if d.is_empty() {
        return None;
    }
    Some(
        Path::new()
            .set("d", d)
            .set("fill", "none")
            .set("stroke", color)
            .set("stroke-width", width)
            .set("vector-effect", "non-scaling-stroke"),
    )
}

fn reference_points(points: &[ReferencePoint]) -> Vec<Point> {
    points.iter().copied().map(ReferencePoint::point).collect()
}

/// Serialize a track map into an SVG document string.
///
/// The view box covers every drawn element plus a margin. An empty map
/// produces a valid document with no paths.
#[must_use]
pub fn track_map_svg(map: &TrackMap<'_>, metadata: &SvgMetadata<'_>) -> String {
    let left = reference_points(map.left);
    let right = reference_points(map.right);
    let line = reference_points(map.racing_line);
    let samples = map.laps.samples();
    let laps: Vec<(u32, Vec<Point>)> = map
        .laps
        .partition()
        .into_iter()
        .map(|(lap, rows)| (lap.0, rows.iter().map(|&i| samples[i].point()).collect()))
        .collect();

    let mut bounds = bounds_of(
        left.iter()
            .chain(&right)
            .chain(&line)
            .chain(laps.iter().flat_map(|(_, points)| points))
            .chain(map.cut_lines.iter().flat_map(|c| [&c.start, &c.end]))
            .copied(),
    );
    if let Some(apexes) = map.apexes {
        for apex in [apexes.turn1, apexes.turn2] {
            let window = Bounds::around(apex, apexes.window_radius);
            bounds = Some(bounds.map_or(window, |b| b.union(window)));
        }
    }

    let mut doc = bounds.map_or_else(
        || {
            Document::new()
                .set("width", 1)
                .set("height", 1)
                .set("viewBox", "0 0 1 1")
        },
        |b| {
            let b = b.padded();
            let width = b.max_x - b.min_x;
            let height = b.max_y - b.min_y;
            Document::new()
                .set("width", DOCUMENT_WIDTH_PX)
                .set("height", DOCUMENT_WIDTH_PX * height / width)
                .set(
                    "viewBox",
                    format!("{} {} {width} {height}", b.min_x, flip(b.max_y)),
                )
                .set("preserveAspectRatio", "xMidYMid meet")
        },
    );

    if let Some(title) = metadata.title {
        doc = doc.add(Title::new(title));
    }
    if let Some(description) = metadata.description {
        doc = doc.add(Description::new().add(Text::new(description)));
    }
    if let Some(config_json) = metadata.config_json {
        let mut pipeline_el = Element::new("lapwise:config");
        pipeline_el.assign("xmlns:lapwise", "https://lapwise.dev/ns/1");
        pipeline_el.append(Text::new(config_json));
        let mut metadata_el = Element::new("metadata");
        metadata_el.append(pipeline_el);
        doc = doc.add(metadata_el);
    }

    let mut edges = Group::new().set("id", "edges");
    for (id, points) in [("left-edge", &left), ("right-edge", &right)] {
        if let Some(path) = stroked_path(points, "#555555", 2.0) {
            edges = edges.add(path.set("id", id));
        }
    }
    doc = doc.add(edges);

    if let Some(path) = stroked_path(&line, "#000000", 1.0) {
        doc = doc.add(
            path.set("id", "racing-line")
                .set("stroke-dasharray", "6 4"),
        );
    }

    let mut lap_group = Group::new().set("id", "laps").set("opacity", 0.8);
    for (lap, points) in &laps {
        let color = LAP_COLORS[*lap as usize % LAP_COLORS.len()];
        if let Some(path) = stroked_path(points, color, 1.0) {
            lap_group = lap_group.add(path.set("data-lap", *lap));
        }
    }
    doc = doc.add(lap_group);

    if let Some(apexes) = map.apexes {
        let mut group = Group::new().set("id", "apexes");
        for (name, apex) in [("turn1", apexes.turn1), ("turn2", apexes.turn2)] {
            group = group.add(
                Circle::new()
                    .set("data-turn", name)
                    .set("cx", apex.x)
                    .set("cy", flip(apex.y))
                    .set("r", apexes.window_radius)
                    .set("fill", "#ffcc00")
                    .set("fill-opacity", 0.15)
                    .set("stroke", "#cc9900")
                    .set("vector-effect", "non-scaling-stroke"),
            );
        }
        doc = doc.add(group);
    }

    if !map.cut_lines.is_empty() {
        let mut group = Group::new().set("id", "cut-lines");
        for cut in map.cut_lines {
            group = group.add(
                Line::new()
                    .set("x1", cut.start.x)
                    .set("y1", flip(cut.start.y))
                    .set("x2", cut.end.x)
                    .set("y2", flip(cut.end.y))
                    .set("stroke", "#d62728")
                    .set("stroke-width", 2)
                    .set("vector-effect", "non-scaling-stroke"),
            );
        }
        doc = doc.add(group);
    }

    // The svg crate omits the XML declaration, so we prepend it.
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{doc}\n")
}
