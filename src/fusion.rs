//! Per-tick fusion of the three channels into one calibrated pose.
//!
//! The engine runs on the host's tick thread. Each tick it takes at most one
//! fresh line per channel, keeps the last good value for anything missing or
//! malformed, and derives button events from the latest orientation line.

use glam::{Quat, Vec3};

use crate::calibration::{normalize_or, Calibration, CALIBRATION_REFERENCE};
use crate::mailbox::MailboxReceiver;
use crate::protocol::{self, ButtonLayout};
use crate::types::{ButtonEvents, ButtonStates, ChannelSet, PoseRecord, TickOutput};

// -- Device space to world space (pen rig) --
// Device axes report roughly [0, 1]. The rig is centred on the world origin in
// X/Z, and the device's Y grows downward from 1.5 m above the floor.
pub const WORLD_X_OFFSET: f32 = -0.5;
pub const WORLD_X_SCALE: f32 = 1.0;
pub const WORLD_Y_OFFSET: f32 = 1.5;
pub const WORLD_Y_SCALE: f32 = -1.0;
pub const WORLD_Z_OFFSET: f32 = -0.5;
pub const WORLD_Z_SCALE: f32 = 1.0;

/// Raw text each channel is assumed to hold before its first line arrives.
pub const INITIAL_XY_TEXT: &str = "0.0,0.0";
pub const INITIAL_Z_TEXT: &str = "0.0";
pub const INITIAL_ORIENTATION_TEXT: &str = "";

/// Affine map `world = offset + scale * device`, per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldMapping {
    pub offset: Vec3,
    pub scale: Vec3,
}

impl WorldMapping {
    /// Mapping the rendering side expects from the pen rig.
    pub const PEN: WorldMapping = WorldMapping {
        offset: Vec3::new(WORLD_X_OFFSET, WORLD_Y_OFFSET, WORLD_Z_OFFSET),
        scale: Vec3::new(WORLD_X_SCALE, WORLD_Y_SCALE, WORLD_Z_SCALE),
    };

    /// Ten-metre cube used by the bench test scene: `-5 + 10x`, `5 - 10y`, `-5 + 10z`.
    pub const BENCH: WorldMapping = WorldMapping {
        offset: Vec3::new(-5.0, 5.0, -5.0),
        scale: Vec3::new(10.0, -10.0, 10.0),
    };

    pub fn apply(&self, device: Vec3) -> Vec3 {
        self.offset + self.scale * device
    }
}

impl Default for WorldMapping {
    fn default() -> Self {
        Self::PEN
    }
}

/// When a held calibrate button re-applies calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalibrateTrigger {
    /// Every tick the button is held. Harmless while the pen is still, since
    /// the resulting offset does not change.
    #[default]
    Level,
    /// Once per press, like the menu button.
    Edge,
}

/// Tunables for [`PoseFusion`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionSettings {
    pub layout: ButtonLayout,
    pub calibrate_trigger: CalibrateTrigger,
    pub mapping: WorldMapping,
    /// Orientation the pen is re-zeroed to when calibrating.
    pub reference: Quat,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            layout: ButtonLayout::default(),
            calibrate_trigger: CalibrateTrigger::default(),
            mapping: WorldMapping::default(),
            reference: CALIBRATION_REFERENCE,
        }
    }
}

/// Fusion state carried from tick to tick.
#[derive(Debug, Clone)]
pub struct PoseFusion {
    settings: FusionSettings,
    raw: ChannelSet<String>,
    pose: PoseRecord,
    menu_held: bool,
    calibrate_held: bool,
    calibration: Calibration,
}

impl PoseFusion {
    pub fn new(settings: FusionSettings) -> Self {
        Self {
            settings,
            raw: ChannelSet::new(
                INITIAL_XY_TEXT.to_string(),
                INITIAL_Z_TEXT.to_string(),
                INITIAL_ORIENTATION_TEXT.to_string(),
            ),
            pose: PoseRecord::default(),
            menu_held: false,
            calibrate_held: false,
            calibration: Calibration::new(),
        }
    }

    pub fn settings(&self) -> &FusionSettings {
        &self.settings
    }

    /// Latest device-space pose, before mapping and calibration.
    pub fn pose(&self) -> &PoseRecord {
        &self.pose
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Last line seen per channel.
    pub fn raw(&self) -> &ChannelSet<String> {
        &self.raw
    }

    /// Pop at most one line from each mailbox and fuse. Never blocks.
    pub fn tick(&mut self, mailboxes: &ChannelSet<MailboxReceiver<String>>) -> TickOutput {
        let lines = ChannelSet::from_fn(|kind| mailboxes.get(kind).pop());
        self.apply(lines)
    }

    /// Fuse one tick's worth of input. `None` means no new data on that channel.
    pub fn apply(&mut self, mut lines: ChannelSet<Option<String>>) -> TickOutput {
        for (kind, line) in lines.iter_mut() {
            if let Some(line) = line.take() {
                *self.raw.get_mut(kind) = line;
            }
        }
        self.update_position();
        self.update_orientation();

        let events = self.button_events();
        if events.contains(ButtonEvents::CALIBRATE) {
            self.calibration
                .calibrate(self.pose.orientation, self.settings.reference);
        }

        self.output(events)
    }

    /// Last fused pose with no events, for ticks while the readers are stopped.
    pub fn idle(&self) -> TickOutput {
        self.output(ButtonEvents::empty())
    }

    fn output(&self, events: ButtonEvents) -> TickOutput {
        TickOutput {
            world_position: self.settings.mapping.apply(self.pose.position),
            world_orientation: self.calibration.apply(self.pose.orientation),
            events,
            raw: self.raw.clone(),
        }
    }

    fn update_position(&mut self) {
        match protocol::parse_xy(&self.raw.xy) {
            Some(xy) => {
                self.pose.position.x = xy.x;
                self.pose.position.y = xy.y;
            }
            None => log::trace!("xy: malformed line {:?}, keeping x/y", self.raw.xy),
        }
        match protocol::parse_z(&self.raw.z) {
            Some(z) => self.pose.position.z = z,
            None => log::trace!("z: malformed line {:?}, keeping z", self.raw.z),
        }
    }

    fn update_orientation(&mut self) {
        let Some(record) = protocol::parse_orientation(&self.raw.orientation, &self.settings.layout)
        else {
            if !self.raw.orientation.is_empty() {
                log::trace!(
                    "orientation: malformed line {:?}, keeping orientation",
                    self.raw.orientation
                );
            }
            self.pose.buttons = None;
            return;
        };

        // An all-zero quaternion is a dead sensor, not a rotation.
        self.pose.orientation = normalize_or(record.orientation(), self.pose.orientation);
        self.pose.buttons = Some(record.buttons);
    }

    fn button_events(&mut self) -> ButtonEvents {
        let mut events = ButtonEvents::empty();
        let Some(ButtonStates {
            draw,
            menu,
            calibrate,
        }) = self.pose.buttons
        else {
            return events;
        };

        if draw.is_pressed() {
            events |= ButtonEvents::DRAW;
        }

        if menu.is_pressed() {
            if !self.menu_held {
                events |= ButtonEvents::MENU_TOGGLE;
            }
            self.menu_held = true;
        } else {
            self.menu_held = false;
        }

        if calibrate.is_pressed() {
            let fire = match self.settings.calibrate_trigger {
                CalibrateTrigger::Level => true,
                CalibrateTrigger::Edge => !self.calibrate_held,
            };
            if fire {
                events |= ButtonEvents::CALIBRATE;
            }
            self.calibrate_held = true;
        } else {
            self.calibrate_held = false;
        }

        events
    }
}

impl Default for PoseFusion {
    fn default() -> Self {
        Self::new(FusionSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::mailbox;

    const IDLE: &str = "0,0,0,1,1,1,1";
    // calibrate-first layout: calibrate, menu, draw
    const MENU_DOWN: &str = "0,0,0,1,1,0,1";
    const DRAW_DOWN: &str = "0,0,0,1,1,1,0";

    fn lines(xy: Option<&str>, z: Option<&str>, orientation: Option<&str>) -> ChannelSet<Option<String>> {
        ChannelSet::new(
            xy.map(str::to_string),
            z.map(str::to_string),
            orientation.map(str::to_string),
        )
    }

    fn orientation_only(line: &str) -> ChannelSet<Option<String>> {
        lines(None, None, Some(line))
    }

    /// Orientation line carrying a yaw of `angle` about the rendering frame's Y.
    fn yawed_line(angle: f32, calibrate_pressed: bool) -> String {
        let q = Quat::from_rotation_y(angle);
        // rendering y = -wire[QUAT_Y], rendering z = wire[QUAT_Z]
        format!(
            "{},{},{},{},{},1,1",
            q.x,
            q.z,
            -q.y,
            q.w,
            if calibrate_pressed { 0 } else { 1 }
        )
    }

    fn assert_vec_eq(a: Vec3, b: Vec3) {
        assert!((a - b).length() < 1e-5, "{:?} != {:?}", a, b);
    }

    fn assert_quat_eq(a: Quat, b: Quat) {
        assert!(a.dot(b).abs() > 1.0 - 1e-5, "{:?} != {:?}", a, b);
    }

    #[test]
    fn test_end_to_end_idle_pose() {
        let mut fusion = PoseFusion::default();
        let out = fusion.apply(lines(Some("0.25,0.75"), Some("0.10"), Some(IDLE)));
        assert_vec_eq(out.world_position, Vec3::new(-0.25, 0.75, -0.40));
        assert_quat_eq(out.world_orientation, Quat::IDENTITY);
        assert!(!out.draw());
        assert!(!out.menu_toggle());
        assert!(!out.calibrate());
        assert_eq!(out.raw.xy, "0.25,0.75");
        assert_eq!(out.raw.orientation, IDLE);
    }

    #[test]
    fn test_initial_state_before_any_data() {
        let mut fusion = PoseFusion::default();
        let out = fusion.apply(lines(None, None, None));
        assert_vec_eq(out.world_position, Vec3::new(-0.5, 1.5, -0.5));
        assert_eq!(out.world_orientation, Quat::IDENTITY);
        assert!(out.events.is_empty());
        assert_eq!(out.raw.z, INITIAL_Z_TEXT);
    }

    #[test]
    fn test_no_new_data_keeps_last_values() {
        let mut fusion = PoseFusion::default();
        let first = fusion.apply(lines(Some("0.3,0.4"), Some("0.2"), Some(IDLE)));
        let second = fusion.apply(lines(None, None, None));
        assert_eq!(first.world_position, second.world_position);
        assert_eq!(first.world_orientation, second.world_orientation);
    }

    #[test]
    fn test_malformed_orientation_keeps_orientation() {
        let mut fusion = PoseFusion::default();
        let good = yawed_line(0.6, false);
        let before = fusion.apply(orientation_only(&good)).world_orientation;
        let after = fusion.apply(orientation_only("0.1,0.2,0.3")).world_orientation;
        assert_eq!(before, after);
        assert!(fusion.pose().buttons.is_none());
    }

    #[test]
    fn test_zero_quaternion_keeps_orientation() {
        let mut fusion = PoseFusion::default();
        let before = fusion.apply(orientation_only(&yawed_line(0.3, false))).world_orientation;
        let after = fusion.apply(orientation_only("0,0,0,0,1,1,1")).world_orientation;
        assert_eq!(before, after);
    }

    #[test]
    fn test_malformed_xy_freezes_only_xy() {
        let mut fusion = PoseFusion::default();
        fusion.apply(lines(Some("0.25,0.75"), Some("0.1"), None));
        let out = fusion.apply(lines(Some("0.9"), Some("0.6"), None));
        assert_vec_eq(out.world_position, Vec3::new(-0.25, 0.75, 0.1));
    }

    #[test]
    fn test_bad_field_zeroes_only_that_field() {
        let mut fusion = PoseFusion::default();
        let out = fusion.apply(lines(Some("oops,0.75"), None, None));
        assert_vec_eq(out.world_position, Vec3::new(-0.5, 0.75, -0.5));
    }

    #[test]
    fn test_orientation_is_remapped_and_normalized() {
        let mut fusion = PoseFusion::default();
        // 2x a quarter turn about wire z, which lands on rendering z
        let s = std::f32::consts::FRAC_1_SQRT_2 * 2.0;
        let out = fusion.apply(orientation_only(&format!("0,{},0,{},1,1,1", s, s)));
        let expected = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        assert_quat_eq(out.world_orientation, expected);
        assert!((out.world_orientation.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_draw_fires_every_tick_held() {
        let mut fusion = PoseFusion::default();
        assert!(fusion.apply(orientation_only(DRAW_DOWN)).draw());
        assert!(fusion.apply(orientation_only(DRAW_DOWN)).draw());
        // retained line keeps drawing without new data
        assert!(fusion.apply(lines(None, None, None)).draw());
        assert!(!fusion.apply(orientation_only(IDLE)).draw());
    }

    #[test]
    fn test_menu_toggle_fires_once_per_press() {
        let mut fusion = PoseFusion::default();
        let fired: Vec<bool> = (0..5)
            .map(|_| fusion.apply(orientation_only(MENU_DOWN)).menu_toggle())
            .collect();
        assert_eq!(fired, vec![true, false, false, false, false]);

        assert!(!fusion.apply(lines(None, None, None)).menu_toggle());
        assert!(!fusion.apply(orientation_only(IDLE)).menu_toggle());
        assert!(fusion.apply(orientation_only(MENU_DOWN)).menu_toggle());
    }

    #[test]
    fn test_malformed_line_does_not_release_menu() {
        let mut fusion = PoseFusion::default();
        assert!(fusion.apply(orientation_only(MENU_DOWN)).menu_toggle());
        fusion.apply(orientation_only("garbage"));
        assert!(!fusion.apply(orientation_only(MENU_DOWN)).menu_toggle());
    }

    #[test]
    fn test_buttons_ignored_without_seven_fields() {
        let mut fusion = PoseFusion::default();
        let out = fusion.apply(orientation_only("0,0,0,1,0,0"));
        assert!(out.events.is_empty());
    }

    #[test]
    fn test_level_calibrate_fires_every_tick_and_rezeroes_yaw() {
        let mut fusion = PoseFusion::default();
        let held = yawed_line(0.8, true);
        let first = fusion.apply(orientation_only(&held));
        assert!(first.calibrate());
        assert_quat_eq(first.world_orientation, Quat::IDENTITY);

        let second = fusion.apply(orientation_only(&held));
        assert!(second.calibrate());
        assert_quat_eq(second.world_orientation, Quat::IDENTITY);

        let offset = fusion.calibration().offset();
        assert_eq!(offset.x, 0.0);
        assert_eq!(offset.z, 0.0);

        // released: offset persists
        let released = fusion.apply(orientation_only(&yawed_line(0.8, false)));
        assert!(!released.calibrate());
        assert_quat_eq(released.world_orientation, Quat::IDENTITY);
    }

    #[test]
    fn test_edge_calibrate_fires_once_per_press() {
        let mut fusion = PoseFusion::new(FusionSettings {
            calibrate_trigger: CalibrateTrigger::Edge,
            ..FusionSettings::default()
        });
        let held = yawed_line(0.5, true);
        assert!(fusion.apply(orientation_only(&held)).calibrate());
        let offset = fusion.calibration().offset();

        // pen turns while still held: no re-zero
        let turned = fusion.apply(orientation_only(&yawed_line(1.0, true)));
        assert!(!turned.calibrate());
        assert_eq!(fusion.calibration().offset(), offset);
        assert_quat_eq(turned.world_orientation, Quat::from_rotation_y(0.5));

        fusion.apply(orientation_only(&yawed_line(1.0, false)));
        assert!(fusion.apply(orientation_only(&yawed_line(1.0, true))).calibrate());
    }

    #[test]
    fn test_draw_first_layout() {
        let mut fusion = PoseFusion::new(FusionSettings {
            layout: ButtonLayout::DRAW_FIRST,
            ..FusionSettings::default()
        });
        // index 4 is draw in this layout
        let out = fusion.apply(orientation_only("0,0,0,1,0,1,1"));
        assert!(out.draw());
        assert!(!out.calibrate());
    }

    #[test]
    fn test_idle_reports_pose_without_events() {
        let mut fusion = PoseFusion::default();
        let held = fusion.apply(lines(Some("0.25,0.75"), None, Some(DRAW_DOWN)));
        assert!(held.draw());
        let idle = fusion.idle();
        assert!(idle.events.is_empty());
        assert_eq!(idle.world_position, held.world_position);
        assert_eq!(idle.world_orientation, held.world_orientation);
    }

    #[test]
    fn test_unvalidated_layout_does_not_panic() {
        let mut fusion = PoseFusion::new(FusionSettings {
            layout: ButtonLayout { draw: 7, menu: 5, calibrate: 4 },
            ..FusionSettings::default()
        });
        let out = fusion.apply(orientation_only("0,0,0,1,1,1,1"));
        assert!(!out.draw());
    }

    #[test]
    fn test_bench_mapping() {
        let mut fusion = PoseFusion::new(FusionSettings {
            mapping: WorldMapping::BENCH,
            ..FusionSettings::default()
        });
        let out = fusion.apply(lines(Some("0.5,0.5"), Some("0.5"), None));
        assert_vec_eq(out.world_position, Vec3::ZERO);
    }

    #[test]
    fn test_tick_pops_each_mailbox_once() {
        let (xy_tx, xy_rx) = mailbox(1);
        let (z_tx, z_rx) = mailbox(1);
        let (_o_tx, o_rx) = mailbox(1);
        let mailboxes = ChannelSet::new(xy_rx, z_rx, o_rx);

        xy_tx.push("0.1,0.2".to_string());
        xy_tx.push("0.25,0.75".to_string());
        z_tx.push("0.10".to_string());

        let mut fusion = PoseFusion::default();
        let out = fusion.tick(&mailboxes);
        assert_vec_eq(out.world_position, Vec3::new(-0.25, 0.75, -0.40));
        assert!(mailboxes.xy.is_empty());
        assert!(mailboxes.z.is_empty());
    }
}
