use glam::Quat;

/// Orientation the pen is expected to hold when the calibrate button is pressed:
/// pointing straight ahead along the rendering frame's forward axis.
pub const CALIBRATION_REFERENCE: Quat = Quat::IDENTITY;

/// Below this squared length a quaternion carries no usable rotation.
pub(crate) const DEGENERATE_LENGTH_SQUARED: f32 = 1e-8;

/// Yaw-only correction applied to every remapped orientation.
///
/// Owned by the fusion engine and only rewritten in response to a calibrate
/// button event. X and Z of the offset are always zero, so pitch and roll pass
/// through untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    offset: Quat,
}

impl Calibration {
    pub fn new() -> Self {
        Self {
            offset: Quat::IDENTITY,
        }
    }

    pub fn offset(&self) -> Quat {
        self.offset
    }

    /// Re-zero yaw so that `current` maps onto `reference`.
    ///
    /// Returns the new offset.
    pub fn calibrate(&mut self, current: Quat, reference: Quat) -> Quat {
        self.offset = yaw_offset(current, reference);
        log::debug!("Calibration offset set to {:?}", self.offset);
        self.offset
    }

    /// Apply the offset: `offset * orientation`, normalized.
    pub fn apply(&self, orientation: Quat) -> Quat {
        normalize_or(self.offset * orientation, orientation)
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new()
    }
}

/// `inverse(current) * reference` with X and Z dropped.
pub fn yaw_offset(current: Quat, reference: Quat) -> Quat {
    let full = current.conjugate() * reference;
    normalize_or(Quat::from_xyzw(0.0, full.y, 0.0, full.w), Quat::IDENTITY)
}

/// Normalize `q`, or return `fallback` when `q` is (close to) zero.
pub(crate) fn normalize_or(q: Quat, fallback: Quat) -> Quat {
    let len_sq = q.length_squared();
    if len_sq < DEGENERATE_LENGTH_SQUARED || !len_sq.is_finite() {
        fallback
    } else {
        q * len_sq.sqrt().recip()
    }
}
