//! Ramp sampling for the displacement compositor.
//!
//! A ramp is an unordered set of [`ControlPoint`]s describing a piecewise
//! linear curve over `[0, 1]`. [`sample_ramp`] turns it into a fixed
//! 256-entry [`Lut`] that the renderer uploads into a 1-D texture per axis.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of texels in every lookup table.
pub const LUT_SIZE: usize = 256;

/// Value used for every entry when a ramp has no control points.
pub const FLAT_MID: u8 = 127;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RampError {
    #[error("control point '{0}' must look like X:Y")]
    MalformedPoint(String),
    #[error("control point '{input}' has a non-numeric {field} coordinate")]
    InvalidCoordinate { input: String, field: &'static str },
}

/// Which displacement axis a ramp drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Horizontal,
    Vertical,
}

impl Axis {
    pub const ALL: [Axis; 2] = [Axis::Horizontal, Axis::Vertical];

    pub fn index(self) -> usize {
        match self {
            Axis::Horizontal => 0,
            Axis::Vertical => 1,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Horizontal => f.write_str("horizontal"),
            Axis::Vertical => f.write_str("vertical"),
        }
    }
}

/// A user-placed anchor on a ramp.
///
/// `locked` marks pinned endpoints for the editor; the sampler ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    #[serde(default)]
    pub id: u32,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub locked: bool,
}

impl ControlPoint {
    pub fn new(id: u32, x: f32, y: f32) -> Self {
        Self {
            id,
            x,
            y,
            locked: false,
        }
    }

    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }
}

/// Immutable 256-entry lookup table of normalized ramp heights.
#[derive(Clone, PartialEq, Eq)]
pub struct Lut([u8; LUT_SIZE]);

impl Lut {
    /// A table holding the same value in every entry.
    pub fn flat(value: u8) -> Self {
        Self([value; LUT_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        self.0.get(index).copied()
    }

    pub fn len(&self) -> usize {
        LUT_SIZE
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().copied()
    }
}

impl Default for Lut {
    fn default() -> Self {
        Self::flat(FLAT_MID)
    }
}

impl fmt::Debug for Lut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lut")
            .field("first", &self.0[0])
            .field("mid", &self.0[LUT_SIZE / 2])
            .field("last", &self.0[LUT_SIZE - 1])
            .finish()
    }
}

#[derive(Clone, Copy)]
struct Knot {
    x: f32,
    y: f32,
}

fn unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Samples a ramp into a 256-entry lookup table.
///
/// Points are clamped into the unit square and sorted by `x`; the curve is
/// extended flat to `x = 0` and `x = 1` from its outermost points. An empty
/// ramp samples to [`FLAT_MID`] everywhere.
pub fn sample_ramp(points: &[ControlPoint]) -> Lut {
    if points.is_empty() {
        return Lut::default();
    }

    let mut knots: Vec<Knot> = points
        .iter()
        .map(|point| Knot {
            x: unit(point.x),
            y: unit(point.y),
        })
        .collect();
    knots.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));

    let first = knots[0];
    if first.x > 0.0 {
        knots.insert(0, Knot { x: 0.0, y: first.y });
    }
    let last = knots[knots.len() - 1];
    if last.x < 1.0 {
        knots.push(Knot { x: 1.0, y: last.y });
    }

    let mut table = [0u8; LUT_SIZE];
    let mut cursor = 0usize;
    let last_segment = knots.len().saturating_sub(2);
    for (index, entry) in table.iter_mut().enumerate() {
        let t = index as f32 / (LUT_SIZE - 1) as f32;
        while cursor < last_segment && t > knots[cursor + 1].x {
            cursor += 1;
        }

        let start = knots[cursor];
        let end = knots[(cursor + 1).min(knots.len() - 1)];
        let width = end.x - start.x;
        let ratio = if width > 0.0 {
            ((t - start.x) / width).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let height = start.y + (end.y - start.y) * ratio;
        *entry = (height * 255.0).round().clamp(0.0, 255.0) as u8;
    }

    Lut(table)
}

/// Parses a comma separated list of `X:Y` pairs into control points.
///
/// Ids follow input order. Points sitting exactly on `x = 0` or `x = 1` are
/// marked locked, mirroring how the editor pins its endpoints.
pub fn parse_control_points(input: &str) -> Result<Vec<ControlPoint>, RampError> {
    let mut points = Vec::new();
    for (index, raw) in input
        .split([',', ';'])
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .enumerate()
    {
        let (x, y) = raw
            .split_once([':', '='])
            .ok_or_else(|| RampError::MalformedPoint(raw.to_string()))?;
        let x = parse_coordinate(raw, x, "x")?;
        let y = parse_coordinate(raw, y, "y")?;
        let mut point = ControlPoint::new(index as u32, x, y);
        if x <= 0.0 || x >= 1.0 {
            point = point.locked();
        }
        points.push(point);
    }
    Ok(points)
}

fn parse_coordinate(input: &str, value: &str, field: &'static str) -> Result<f32, RampError> {
    value
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|parsed| parsed.is_finite())
        .ok_or_else(|| RampError::InvalidCoordinate {
            input: input.to_string(),
            field,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: f32, y: f32) -> ControlPoint {
        ControlPoint::new(0, x, y)
    }

    #[test]
    fn empty_ramp_is_flat_mid_gray() {
        let lut = sample_ramp(&[]);
        assert_eq!(lut.len(), LUT_SIZE);
        assert!(lut.iter().all(|value| value == FLAT_MID));
    }

    #[test]
    fn descending_diagonal_spans_full_range() {
        let lut = sample_ramp(&[point(0.0, 1.0), point(1.0, 0.0)]);
        assert_eq!(lut.get(0), Some(255));
        assert_eq!(lut.get(255), Some(0));
        let bytes = lut.as_bytes();
        assert!(bytes.windows(2).all(|pair| pair[0] >= pair[1]));
    }

    #[test]
    fn single_point_extends_flat_in_both_directions() {
        let lut = sample_ramp(&[point(0.5, 1.0)]);
        assert_eq!(lut.get(0), Some(255));
        assert_eq!(lut.get(127), Some(255));
        assert_eq!(lut.get(255), Some(255));
        assert!(lut.iter().all(|value| value == 255));
    }

    #[test]
    fn sampling_is_deterministic_for_unsorted_duplicates() {
        let points = [
            point(0.8, 0.1),
            point(0.2, 0.9),
            point(0.5, 0.4),
            point(0.5, 0.6),
            point(0.2, 0.9),
        ];
        let first = sample_ramp(&points);
        let second = sample_ramp(&points);
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn input_order_does_not_change_output() {
        let forward = [point(0.0, 0.0), point(0.3, 0.8), point(1.0, 0.2)];
        let reversed = [point(1.0, 0.2), point(0.3, 0.8), point(0.0, 0.0)];
        assert_eq!(sample_ramp(&forward), sample_ramp(&reversed));
    }

    #[test]
    fn shared_x_order_does_not_change_output() {
        let lower_first = [
            point(0.0, 0.0),
            point(0.5, 0.0),
            point(0.5, 1.0),
            point(1.0, 1.0),
        ];
        let upper_first = [
            point(0.0, 0.0),
            point(0.5, 1.0),
            point(0.5, 0.0),
            point(1.0, 1.0),
        ];
        assert_eq!(
            sample_ramp(&lower_first).as_bytes(),
            sample_ramp(&upper_first).as_bytes()
        );
    }

    #[test]
    fn out_of_range_points_are_clamped() {
        let lut = sample_ramp(&[point(-2.0, 3.0), point(4.0, -1.0)]);
        assert_eq!(lut.get(0), Some(255));
        assert_eq!(lut.get(255), Some(0));
    }

    #[test]
    fn midpoint_interpolates_linearly() {
        let lut = sample_ramp(&[point(0.0, 0.0), point(1.0, 1.0)]);
        for (index, value) in lut.iter().enumerate() {
            assert_eq!(value as usize, index);
        }
    }

    #[test]
    fn vertical_step_takes_lower_segment_first() {
        let lut = sample_ramp(&[
            point(0.0, 0.0),
            point(0.5, 0.0),
            point(0.5, 1.0),
            point(1.0, 1.0),
        ]);
        assert_eq!(lut.get(127), Some(0));
        assert_eq!(lut.get(128), Some(255));
    }

    #[test]
    fn non_finite_coordinates_fall_back_to_zero() {
        let lut = sample_ramp(&[point(f32::NAN, f32::INFINITY)]);
        assert!(lut.iter().all(|value| value == 0));
    }

    #[test]
    fn parses_control_point_lists() {
        let points = parse_control_points("0:1, 0.5:0.25;1=0").unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[1], ControlPoint::new(1, 0.5, 0.25));
        assert!(points[0].locked);
        assert!(points[2].locked);
        assert!(!points[1].locked);
    }

    #[test]
    fn rejects_malformed_control_points() {
        assert_eq!(
            parse_control_points("0.5"),
            Err(RampError::MalformedPoint("0.5".to_string()))
        );
        assert!(matches!(
            parse_control_points("0.5:abc"),
            Err(RampError::InvalidCoordinate { field: "y", .. })
        ));
        assert!(parse_control_points("   ").unwrap().is_empty());
    }

    #[test]
    fn control_points_deserialize_with_defaults() {
        #[derive(Deserialize)]
        struct Wrapper {
            points: Vec<ControlPoint>,
        }
        let parsed: Wrapper = toml::from_str(
            r#"
            points = [{ x = 0.0, y = 1.0, locked = true }, { id = 7, x = 0.4, y = 0.2 }]
            "#,
        )
        .unwrap();
        assert_eq!(parsed.points[0].id, 0);
        assert!(parsed.points[0].locked);
        assert_eq!(parsed.points[1].id, 7);
        assert!(!parsed.points[1].locked);
    }
}
