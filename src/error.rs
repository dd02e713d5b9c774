use std::fmt;

use crate::types::ChannelKind;

/// Errors surfaced by the tracker's host-facing API.
///
/// Read timeouts, connection faults and malformed lines never show up here:
/// the reader threads absorb them and the fusion engine keeps the last good pose.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tracker is already active")]
    AlreadyActive,

    #[error("{0} reader already started")]
    AlreadyStarted(ChannelKind),

    #[error("Failed to spawn reader thread: {0}")]
    ThreadSpawn(String),

    #[error("{0} reader is not running")]
    ReaderStopped(ChannelKind),
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &TrackerError) {
        self.set_message(err);
    }

    pub fn set_message(&self, message: impl fmt::Display) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", message));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut msg) = self.message.lock() {
            msg.clear();
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}
