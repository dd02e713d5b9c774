//! C FFI layer for pentrack.
//!
//! Provides an opaque handle-based API for game-engine hosts that drive
//! `pt_tracker_tick` from their frame loop.
//! The generated C header is written to `include/pentrack.h` by cbindgen.

use crate::config::TrackerConfig;
use crate::error::LastError;
use crate::fusion::{CalibrateTrigger, FusionSettings};
use crate::protocol::ButtonLayout;
use crate::tracker::{TeardownContext, Tracker};
use crate::types::{ChannelConfig, ChannelKind, ChannelSet};
use std::ffi::{c_char, c_int, c_void, CStr};
use std::time::Duration;

/// Last error message for C consumers.
static LAST_ERROR: LastError = LastError::new();

/// Opaque tracker handle for C consumers.
pub struct PtTracker(Tracker);

/// Opaque handle passed to a teardown hook. Valid only during the call.
pub struct PtTeardown {
    _private: [u8; 0],
}

/// Teardown callback: `(context, user_data)`.
pub type PtTeardownFn = extern "C" fn(ctx: *const PtTeardown, user_data: *mut c_void);

/// Serial settings for one channel. Zero fields take the library default.
#[repr(C)]
pub struct PtChannelConfig {
    /// Null-terminated port name, e.g. "COM3".
    pub port: *const c_char,
    pub baud_rate: u32,
    pub reconnect_delay_ms: u32,
    pub max_queue_depth: u32,
    pub read_timeout_ms: u32,
}

/// One tick of output in C-compatible layout.
#[repr(C)]
pub struct PtTickOutput {
    /// World position [x, y, z].
    pub position: [f32; 3],
    /// World orientation [x, y, z, w], normalized.
    pub orientation: [f32; 4],
    /// `ButtonEvents` bits: 1 = draw, 2 = menu toggle, 4 = calibrate.
    pub events: u32,
}

struct HookUserData(*mut c_void);

// The host owns the pointee and promises it may be used from the thread calling deactivate.
unsafe impl Send for HookUserData {}

impl HookUserData {
    fn get(&self) -> *mut c_void {
        self.0
    }
}

fn channel_kind(channel: c_int) -> Option<ChannelKind> {
    match channel {
        0 => Some(ChannelKind::Xy),
        1 => Some(ChannelKind::Z),
        2 => Some(ChannelKind::Orientation),
        _ => None,
    }
}

unsafe fn c_str_to_string(s: *const c_char) -> Option<String> {
    if s.is_null() {
        return None;
    }
    Some(CStr::from_ptr(s).to_string_lossy().into_owned())
}

unsafe fn channel_config(raw: *const PtChannelConfig) -> Option<ChannelConfig> {
    if raw.is_null() {
        return None;
    }
    let raw = &*raw;
    let mut config = ChannelConfig::new(c_str_to_string(raw.port)?);
    if raw.baud_rate != 0 {
        config.baud_rate = raw.baud_rate;
    }
    if raw.reconnect_delay_ms != 0 {
        config.reconnect_delay = Duration::from_millis(raw.reconnect_delay_ms as u64);
    }
    if raw.max_queue_depth != 0 {
        config.max_queue_depth = raw.max_queue_depth as usize;
    }
    if raw.read_timeout_ms != 0 {
        config.read_timeout = Duration::from_millis(raw.read_timeout_ms as u64);
    }
    Some(config)
}

/// Create an inactive tracker.
/// `calibrate_trigger`: 0 = level (every tick held), 1 = edge (once per press).
/// `button_layout`: 0 = calibrate-first, 1 = draw-first.
#[no_mangle]
pub extern "C" fn pt_tracker_new(calibrate_trigger: c_int, button_layout: c_int) -> *mut PtTracker {
    let settings = FusionSettings {
        calibrate_trigger: match calibrate_trigger {
            1 => CalibrateTrigger::Edge,
            _ => CalibrateTrigger::Level,
        },
        layout: match button_layout {
            1 => ButtonLayout::DRAW_FIRST,
            _ => ButtonLayout::CALIBRATE_FIRST,
        },
        ..FusionSettings::default()
    };
    Box::into_raw(Box::new(PtTracker(Tracker::new(settings))))
}

/// Create and activate a tracker configured from `PENTRACK_*` environment variables.
/// Returns NULL on error (check pt_last_error()).
#[no_mangle]
pub extern "C" fn pt_tracker_open_from_env() -> *mut PtTracker {
    match TrackerConfig::from_env().and_then(|config| Tracker::open(&config)) {
        Ok(tracker) => Box::into_raw(Box::new(PtTracker(tracker))),
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Start the three channel readers. Returns 0 on success, -1 on error.
///
/// # Safety
/// `tracker` must be a valid tracker pointer, or null. The config pointers must
/// point to valid `PtChannelConfig` values with null-terminated port names.
#[no_mangle]
pub unsafe extern "C" fn pt_tracker_activate(
    tracker: *mut PtTracker,
    xy: *const PtChannelConfig,
    z: *const PtChannelConfig,
    orientation: *const PtChannelConfig,
) -> c_int {
    if tracker.is_null() {
        return -1;
    }
    let tracker = &mut *tracker;

    let (Some(xy), Some(z), Some(orientation)) =
        (channel_config(xy), channel_config(z), channel_config(orientation))
    else {
        LAST_ERROR.set_message("channel config or port name is null");
        return -1;
    };

    match tracker.0.activate(ChannelSet::new(xy, z, orientation)) {
        Ok(()) => {
            LAST_ERROR.clear();
            0
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Run the teardown hook, then stop and join all readers.
///
/// # Safety
/// `tracker` must be a valid tracker pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn pt_tracker_deactivate(tracker: *mut PtTracker) {
    if !tracker.is_null() {
        (*tracker).0.deactivate();
    }
}

/// Fuse the latest channel data. Never blocks.
/// Returns 0 on success, -1 on null arguments.
///
/// # Safety
/// `tracker` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn pt_tracker_tick(tracker: *mut PtTracker, out: *mut PtTickOutput) -> c_int {
    if tracker.is_null() || out.is_null() {
        return -1;
    }
    let tracker = &mut *tracker;
    let tick = tracker.0.tick();
    out.write(PtTickOutput {
        position: tick.world_position.to_array(),
        orientation: tick.world_orientation.to_array(),
        events: tick.events.bits(),
    });
    0
}

/// Copy the last line seen on `channel` (0 = xy, 1 = z, 2 = orientation) into `buf`,
/// null-terminated and truncated to `len - 1` bytes.
/// Returns the untruncated length, or -1 on error.
///
/// # Safety
/// `tracker` must be a valid tracker pointer, `buf` must point to `len` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn pt_tracker_raw_text(
    tracker: *const PtTracker,
    channel: c_int,
    buf: *mut c_char,
    len: usize,
) -> c_int {
    let Some(kind) = channel_kind(channel) else {
        return -1;
    };
    if tracker.is_null() || buf.is_null() || len == 0 {
        return -1;
    }
    let text = (*tracker).0.fusion().raw().get(kind).as_bytes();
    let n = text.len().min(len - 1);
    std::ptr::copy_nonoverlapping(text.as_ptr() as *const c_char, buf, n);
    buf.add(n).write(0);
    text.len() as c_int
}

/// Install a callback run at the start of every deactivation, while all
/// connections are still open. Pass a null `hook` to remove it.
///
/// # Safety
/// `tracker` must be a valid tracker pointer, or null. `user_data` must stay
/// valid until the hook is replaced or the tracker is freed.
#[no_mangle]
pub unsafe extern "C" fn pt_tracker_set_teardown_hook(
    tracker: *mut PtTracker,
    hook: Option<PtTeardownFn>,
    user_data: *mut c_void,
) {
    if tracker.is_null() {
        return;
    }
    let tracker = &mut *tracker;
    match hook {
        Some(hook) => {
            let user_data = HookUserData(user_data);
            tracker.0.register_teardown_hook(move |ctx: &TeardownContext<'_>| {
                let ctx = ctx as *const TeardownContext<'_> as *const PtTeardown;
                hook(ctx, user_data.get());
            });
        }
        None => tracker.0.register_teardown_hook(|_: &TeardownContext<'_>| {}),
    }
}

/// Send a final line to the device from inside a teardown hook.
/// Returns 0 on success, -1 on error.
///
/// # Safety
/// `ctx` must be the pointer passed to the running teardown hook; `line` must be
/// a null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn pt_teardown_send_line(
    ctx: *const PtTeardown,
    channel: c_int,
    line: *const c_char,
) -> c_int {
    let Some(kind) = channel_kind(channel) else {
        return -1;
    };
    if ctx.is_null() {
        return -1;
    }
    let Some(line) = c_str_to_string(line) else {
        return -1;
    };
    let ctx = &*(ctx as *const TeardownContext<'_>);
    match ctx.send_line(kind, &line) {
        Ok(()) => 0,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Deactivate and free a tracker.
///
/// # Safety
/// `tracker` must be a pointer returned by `pt_tracker_new` or
/// `pt_tracker_open_from_env`, or null.
#[no_mangle]
pub unsafe extern "C" fn pt_tracker_free(tracker: *mut PtTracker) {
    if !tracker.is_null() {
        drop(Box::from_raw(tracker));
    }
}

/// Get the last error message. Returns NULL if no error.
/// The returned pointer is valid until the next pentrack API call.
#[no_mangle]
pub extern "C" fn pt_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}
