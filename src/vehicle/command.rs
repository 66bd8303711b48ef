// Drive commands and the controller's line protocol
//
// Outbound lines (ASCII, newline-terminated):
//   c<left>,<right>   wheel actuation in raw units (normalized * multiplier)
//   i<indicator>      indicator state, sent on change

/// Dither correction for a single transmission
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DitherOffset {
    /// -1 = left wheel, 1 = right wheel, 0 = none
    pub direction: i8,
    pub magnitude: f32,
}

/// Normalized per-wheel actuation plus the multiplier in effect when issued
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveCommand {
    left: f32,
    right: f32,
    multiplier_at_issue: i32,
}

impl DriveCommand {
    pub fn new(left: f32, right: f32, multiplier: i32) -> Self {
        Self {
            left,
            right,
            multiplier_at_issue: multiplier,
        }
    }

    /// Both wheels stopped
    pub fn neutral(multiplier: i32) -> Self {
        Self::new(0.0, 0.0, multiplier)
    }

    pub fn left(&self) -> f32 {
        self.left
    }

    pub fn right(&self) -> f32 {
        self.right
    }

    pub fn multiplier_at_issue(&self) -> i32 {
        self.multiplier_at_issue
    }

    /// Average of both wheels (sign gives the direction of travel)
    pub fn throttle(&self) -> f32 {
        (self.left + self.right) / 2.0
    }

    /// Raw magnitudes at the issuing multiplier, before dither
    pub fn encoded_magnitudes(&self) -> (i32, i32) {
        (
            to_raw(self.left, self.multiplier_at_issue),
            to_raw(self.right, self.multiplier_at_issue),
        )
    }

    /// Raw magnitudes at `multiplier`, with the dither magnitude taken off
    /// the wheel the offset points at
    pub fn raw_with(&self, multiplier: i32, dither: Option<DitherOffset>) -> (i32, i32) {
        let mut left = self.left;
        let mut right = self.right;
        if let Some(offset) = dither {
            if offset.direction < 0 {
                left -= offset.magnitude;
            } else if offset.direction > 0 {
                right -= offset.magnitude;
            }
        }
        (to_raw(left, multiplier), to_raw(right, multiplier))
    }

    /// Control line for this command at `multiplier`
    pub fn encode(&self, multiplier: i32, dither: Option<DitherOffset>) -> String {
        let (left, right) = self.raw_with(multiplier, dither);
        encode_control(left, right)
    }
}

/// Truncates toward zero; `as` saturates on overflow and maps NaN to 0
fn to_raw(value: f32, multiplier: i32) -> i32 {
    (value * multiplier as f32) as i32
}

pub fn encode_control(left: i32, right: i32) -> String {
    format!("c{},{}\n", left, right)
}

pub fn encode_indicator(indicator: i32) -> String {
    format!("i{}\n", indicator)
}
