//! # pentrack - 6DOF pen tracking over three serial links
//!
//! The pen streams newline-terminated ASCII on three independent serial ports
//! (XY position, Z position, orientation + buttons). This crate provides:
//! - One background reader thread per port, reconnecting on faults
//! - Drop-oldest mailboxes between the readers and the host's tick loop
//! - A forgiving line parser and a per-tick fusion engine with yaw calibration
//! - C FFI for game-engine hosts
//!
//! ## Quick Start
//! ```no_run
//! use pentrack::{Tracker, TrackerConfig};
//! use std::time::Duration;
//!
//! let config = TrackerConfig::from_env().unwrap();
//! let mut tracker = Tracker::open(&config).unwrap();
//! for _ in 0..100 {
//!     let out = tracker.tick();
//!     println!("pos: {:?} draw: {}", out.world_position, out.draw());
//!     std::thread::sleep(Duration::from_millis(16));
//! }
//! tracker.deactivate();
//! ```

pub mod error;
pub mod types;
pub mod protocol;
pub mod mailbox;
pub mod transport;
pub mod reader;
pub mod calibration;
pub mod fusion;
pub mod config;
pub mod tracker;
pub mod ffi;

pub use error::TrackerError;
pub use types::*;
pub use config::TrackerConfig;
pub use fusion::{CalibrateTrigger, FusionSettings, PoseFusion, WorldMapping};
pub use protocol::ButtonLayout;
pub use reader::ChannelReader;
pub use tracker::{TeardownContext, Tracker};

/// Result type alias for pentrack operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
