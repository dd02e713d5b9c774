use std::fmt;
use std::time::Duration;

use glam::{Quat, Vec3};

/// One of the pen's three independent serial streams.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Planar position, two fields per line: `x,y`.
    Xy = 0,
    /// Height, one field per line.
    Z = 1,
    /// Quaternion plus three button digits, seven fields per line.
    Orientation = 2,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [ChannelKind::Xy, ChannelKind::Z, ChannelKind::Orientation];

    pub fn name(self) -> &'static str {
        match self {
            ChannelKind::Xy => "xy",
            ChannelKind::Z => "z",
            ChannelKind::Orientation => "orientation",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One value per channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSet<T> {
    pub xy: T,
    pub z: T,
    pub orientation: T,
}

impl<T> ChannelSet<T> {
    pub fn new(xy: T, z: T, orientation: T) -> Self {
        Self { xy, z, orientation }
    }

    /// Build a set by calling `f` once per channel, in wire order.
    pub fn from_fn(mut f: impl FnMut(ChannelKind) -> T) -> Self {
        Self {
            xy: f(ChannelKind::Xy),
            z: f(ChannelKind::Z),
            orientation: f(ChannelKind::Orientation),
        }
    }

    pub fn get(&self, kind: ChannelKind) -> &T {
        match kind {
            ChannelKind::Xy => &self.xy,
            ChannelKind::Z => &self.z,
            ChannelKind::Orientation => &self.orientation,
        }
    }

    pub fn get_mut(&mut self, kind: ChannelKind) -> &mut T {
        match kind {
            ChannelKind::Xy => &mut self.xy,
            ChannelKind::Z => &mut self.z,
            ChannelKind::Orientation => &mut self.orientation,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(ChannelKind, T) -> U) -> ChannelSet<U> {
        ChannelSet {
            xy: f(ChannelKind::Xy, self.xy),
            z: f(ChannelKind::Z, self.z),
            orientation: f(ChannelKind::Orientation, self.orientation),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChannelKind, &T)> {
        [
            (ChannelKind::Xy, &self.xy),
            (ChannelKind::Z, &self.z),
            (ChannelKind::Orientation, &self.orientation),
        ]
        .into_iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ChannelKind, &mut T)> {
        [
            (ChannelKind::Xy, &mut self.xy),
            (ChannelKind::Z, &mut self.z),
            (ChannelKind::Orientation, &mut self.orientation),
        ]
        .into_iter()
    }
}

impl<A, B> ChannelSet<(A, B)> {
    pub fn unzip(self) -> (ChannelSet<A>, ChannelSet<B>) {
        (
            ChannelSet::new(self.xy.0, self.z.0, self.orientation.0),
            ChannelSet::new(self.xy.1, self.z.1, self.orientation.1),
        )
    }
}

/// Serial link settings for one channel. Fixed once a reader is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// OS port name, e.g. `COM3` or `/dev/rfcomm0`.
    pub port: String,
    pub baud_rate: u32,
    /// Wait after a failed open or a dropped connection before retrying.
    pub reconnect_delay: Duration,
    /// Unread lines kept per channel; the oldest is dropped when full.
    pub max_queue_depth: usize,
    /// Upper bound on a single blocking read, i.e. how often the stop flag is polled.
    pub read_timeout: Duration,
}

impl ChannelConfig {
    pub const DEFAULT_PORT: &'static str = "COM3";
    pub const DEFAULT_BAUD_RATE: u32 = 9600;
    pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);
    pub const DEFAULT_QUEUE_DEPTH: usize = 1;
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);

    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: Self::DEFAULT_BAUD_RATE,
            reconnect_delay: Self::DEFAULT_RECONNECT_DELAY,
            max_queue_depth: Self::DEFAULT_QUEUE_DEPTH,
            read_timeout: Self::DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PORT)
    }
}

/// Decoded state of a single active-low button digit.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ButtonState {
    Pressed,
    #[default]
    Released,
}

impl ButtonState {
    /// `0` means pressed. Any other value, parsable or not, means released.
    pub fn from_digit(field: &str) -> Self {
        match field.trim().parse::<i64>() {
            Ok(0) => ButtonState::Pressed,
            _ => ButtonState::Released,
        }
    }

    pub fn is_pressed(self) -> bool {
        self == ButtonState::Pressed
    }
}

/// The three pen buttons as reported by one orientation line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ButtonStates {
    pub draw: ButtonState,
    pub menu: ButtonState,
    pub calibrate: ButtonState,
}

bitflags::bitflags! {
    /// Events emitted by a single tick.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[repr(C)]
    pub struct ButtonEvents: u32 {
        /// Spawn one ink mark at the current tip pose. Fires every tick held.
        const DRAW        = 1 << 0;
        /// Open/close the menu. Fires once per press.
        const MENU_TOGGLE = 1 << 1;
        /// Yaw re-zero was applied this tick.
        const CALIBRATE   = 1 << 2;
    }
}

/// Pose reconstructed from the latest line of every channel.
///
/// `position` is in device space (each axis roughly `[0, 1]`), `orientation`
/// is already remapped into the rendering frame but not yet calibrated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseRecord {
    pub position: Vec3,
    pub orientation: Quat,
    /// `None` when the latest orientation line did not carry seven fields.
    pub buttons: Option<ButtonStates>,
}

impl Default for PoseRecord {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            buttons: None,
        }
    }
}

/// Everything the external sink gets per tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutput {
    pub world_position: Vec3,
    /// Calibrated and normalized.
    pub world_orientation: Quat,
    pub events: ButtonEvents,
    /// Last line seen on each channel, for diagnostic display.
    pub raw: ChannelSet<String>,
}

impl TickOutput {
    pub fn draw(&self) -> bool {
        self.events.contains(ButtonEvents::DRAW)
    }

    pub fn menu_toggle(&self) -> bool {
        self.events.contains(ButtonEvents::MENU_TOGGLE)
    }

    pub fn calibrate(&self) -> bool {
        self.events.contains(ButtonEvents::CALIBRATE)
    }
}

/// Connection state of a channel reader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Created, thread not started.
    Idle = 0,
    /// Opening the port.
    Connecting = 1,
    Connected = 2,
    /// Last open or read failed; waiting out the reconnect delay.
    Disconnected = 3,
    /// Thread has exited.
    Stopped = 4,
}

impl ChannelStatus {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => ChannelStatus::Connecting,
            2 => ChannelStatus::Connected,
            3 => ChannelStatus::Disconnected,
            4 => ChannelStatus::Stopped,
            _ => ChannelStatus::Idle,
        }
    }
}

/// Counters kept by a channel reader since it was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReaderStats {
    /// Complete lines pushed into the mailbox.
    pub lines: u64,
    /// Unread lines evicted by a newer one.
    pub superseded: u64,
    /// Failed opens plus dropped connections.
    pub faults: u64,
    /// Outbound lines discarded because the channel was down at stop.
    pub unsent: u64,
}
