use glam::Quat;

use crate::types::{ButtonState, ButtonStates};
use crate::{Result, TrackerError};

// -- Field counts per channel --
pub const XY_FIELD_COUNT: usize = 2;
pub const Z_FIELD_COUNT: usize = 1;
pub const ORIENTATION_FIELD_COUNT: usize = 7;

pub const FIELD_SEPARATOR: char = ',';

// -- Quaternion component positions on the orientation wire --
// The sensor sends x, z, y, w: Y and Z are swapped relative to the rendering frame.
pub const QUAT_X: usize = 0;
pub const QUAT_Z: usize = 1;
pub const QUAT_Y: usize = 2;
pub const QUAT_W: usize = 3;

/// First field after the quaternion; button digits live in `BUTTON_FIELDS_START..ORIENTATION_FIELD_COUNT`.
pub const BUTTON_FIELDS_START: usize = 4;

/// Positions of the three button digits on the orientation line.
///
/// Pen firmware revisions disagree on the order, so the mapping is explicit
/// instead of being baked into the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonLayout {
    pub draw: usize,
    pub menu: usize,
    pub calibrate: usize,
}

impl ButtonLayout {
    /// `qx,qz,qy,qw,calibrate,menu,draw`, as sent by the production pen.
    pub const CALIBRATE_FIRST: ButtonLayout = ButtonLayout {
        calibrate: 4,
        menu: 5,
        draw: 6,
    };

    /// `qx,qz,qy,qw,draw,menu,calibrate`, as sent by the bench prototype.
    pub const DRAW_FIRST: ButtonLayout = ButtonLayout {
        draw: 4,
        menu: 5,
        calibrate: 6,
    };

    /// Indices must be distinct and lie after the quaternion fields.
    pub fn validate(&self) -> Result<()> {
        let fields = BUTTON_FIELDS_START..ORIENTATION_FIELD_COUNT;
        for (name, idx) in [("draw", self.draw), ("menu", self.menu), ("calibrate", self.calibrate)] {
            if !fields.contains(&idx) {
                return Err(TrackerError::InvalidConfig(format!(
                    "{} button index {} outside {}..{}",
                    name, idx, fields.start, fields.end
                )));
            }
        }
        if self.draw == self.menu || self.draw == self.calibrate || self.menu == self.calibrate {
            return Err(TrackerError::InvalidConfig(format!(
                "button indices must be distinct: {:?}",
                self
            )));
        }
        Ok(())
    }
}

impl Default for ButtonLayout {
    fn default() -> Self {
        Self::CALIBRATE_FIRST
    }
}

/// Planar position from the XY channel, in device units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XyRecord {
    pub x: f32,
    pub y: f32,
}

/// One decoded orientation line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationRecord {
    /// Quaternion components in wire order (`x, z, y, w`), before remapping.
    pub wire: [f32; 4],
    pub buttons: ButtonStates,
}

impl OrientationRecord {
    /// Quaternion in the rendering frame. See [`remap_axes`].
    pub fn orientation(&self) -> Quat {
        remap_axes(self.wire)
    }
}

/// Parse one numeric field. Always uses `.` as the decimal point.
///
/// Surrounding whitespace is ignored. Unparsable and non-finite input yields `0.0`
/// so one bad field cannot hold back the rest of the line.
pub fn parse_field(field: &str) -> f32 {
    match field.trim().parse::<f32>() {
        Ok(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

/// Split a raw line into its comma separated fields.
pub fn split_fields(line: &str) -> Vec<&str> {
    line.trim().split(FIELD_SEPARATOR).map(str::trim).collect()
}

/// Parse an XY line. `None` unless it carries exactly two fields.
pub fn parse_xy(line: &str) -> Option<XyRecord> {
    let fields = split_fields(line);
    if fields.len() != XY_FIELD_COUNT {
        return None;
    }
    Some(XyRecord {
        x: parse_field(fields[0]),
        y: parse_field(fields[1]),
    })
}

/// Parse a Z line. `None` unless it carries exactly one field.
pub fn parse_z(line: &str) -> Option<f32> {
    let fields = split_fields(line);
    if fields.len() != Z_FIELD_COUNT {
        return None;
    }
    Some(parse_field(fields[0]))
}

/// Parse an orientation line. `None` unless it carries exactly seven fields.
pub fn parse_orientation(line: &str, layout: &ButtonLayout) -> Option<OrientationRecord> {
    let fields = split_fields(line);
    if fields.len() != ORIENTATION_FIELD_COUNT {
        return None;
    }

    let mut wire = [0.0f32; 4];
    for (slot, field) in wire.iter_mut().zip(&fields[..BUTTON_FIELDS_START]) {
        *slot = parse_field(field);
    }

    // An index outside the line reads as released.
    let button = |idx: usize| {
        fields
            .get(idx)
            .map_or(ButtonState::Released, |f| ButtonState::from_digit(f))
    };

    Some(OrientationRecord {
        wire,
        buttons: ButtonStates {
            draw: button(layout.draw),
            menu: button(layout.menu),
            calibrate: button(layout.calibrate),
        },
    })
}

/// Convert a wire quaternion from the sensor's right-handed frame into the
/// left-handed rendering frame: swap Y and Z, then negate Y.
///
/// The result is not normalized.
pub fn remap_axes(wire: [f32; 4]) -> Quat {
    Quat::from_xyzw(wire[QUAT_X], -wire[QUAT_Y], wire[QUAT_Z], wire[QUAT_W])
}
