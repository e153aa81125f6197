//! Sync-driven LED animation scheduler.
//!
//! Every node on the bus watches the same sync line and advances its
//! animation frame once per `sync_divisor` transitions, so animations stay in
//! step across nodes even though each MCU runs from its own clock.

use rgb::RGB8;

pub const COLOR_OFF: RGB8 = RGB8 { r: 0, g: 0, b: 0 };
pub const COLOR_NEGOTIATING: RGB8 = RGB8 { r: 0, g: 0, b: 255 };
pub const COLOR_READY: RGB8 = RGB8 { r: 0, g: 255, b: 0 };
pub const COLOR_FAULT: RGB8 = RGB8 { r: 255, g: 0, b: 0 };
pub const COLOR_LOOPBACK: RGB8 = RGB8 { r: 0, g: 255, b: 255 };
/// Boot splash alternates between these two colours.
pub const BOOT_SPLASH: [RGB8; 2] = [
    RGB8 { r: 255, g: 0, b: 255 },
    RGB8 { r: 255, g: 255, b: 0 },
];

/// Animation installed on the status LED.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedPattern {
    /// LED dark, no animation.
    #[default]
    Off,
    /// Slow hue wheel shown while waiting for orders.
    Idle,
    /// Fast amber pulse while pouring.
    Dispense,
    /// Green flash once a drink is finished.
    DrinkDone,
    /// Red/green/blue cycle during cleaning.
    Clean,
    /// Red blink indicating a latched current-sense fault.
    CurrentSense,
}

impl LedPattern {
    /// Sync divisor the bus protocol pairs with this pattern.
    #[must_use]
    pub const fn default_divisor(self) -> u8 {
        match self {
            LedPattern::Off => 255,
            LedPattern::Idle | LedPattern::CurrentSense => 20,
            LedPattern::Dispense => 5,
            LedPattern::DrinkDone | LedPattern::Clean => 10,
        }
    }

    /// Colour for animation frame `frame`.
    #[must_use]
    pub fn color_at(self, frame: u32) -> RGB8 {
        match self {
            LedPattern::Off => COLOR_OFF,
            LedPattern::Idle => wheel(frame.to_le_bytes()[0]),
            LedPattern::Dispense => {
                let level = triangle(frame, 16);
                RGB8::new(level, level / 4, 0)
            }
            LedPattern::DrinkDone => {
                if frame % 2 == 0 {
                    COLOR_READY
                } else {
                    COLOR_OFF
                }
            }
            LedPattern::Clean => match frame % 3 {
                0 => RGB8::new(255, 0, 0),
                1 => RGB8::new(0, 255, 0),
                _ => RGB8::new(0, 0, 255),
            },
            LedPattern::CurrentSense => {
                if frame % 2 == 0 {
                    COLOR_FAULT
                } else {
                    COLOR_OFF
                }
            }
        }
    }
}

/// Classic 0..=255 colour wheel.
fn wheel(position: u8) -> RGB8 {
    let position = 255 - position;
    match position {
        0..=84 => RGB8::new(255 - position * 3, 0, position * 3),
        85..=169 => {
            let p = position - 85;
            RGB8::new(0, p * 3, 255 - p * 3)
        }
        _ => {
            let p = position - 170;
            RGB8::new(p * 3, 255 - p * 3, 0)
        }
    }
}

/// Triangle wave over `steps` frames up and `steps` frames down.
fn triangle(frame: u32, steps: u32) -> u8 {
    let phase = frame % (steps * 2);
    let rise = if phase < steps { phase } else { steps * 2 - phase };
    let scaled = rise * 255 / steps;
    u8::try_from(scaled).unwrap_or(u8::MAX)
}

/// Animation clock state shared with the sync-line handler.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LedAnimation {
    pattern: LedPattern,
    sync_divisor: u8,
    frame_counter: u32,
    sync_edge_count: u32,
    sync_level: bool,
}

impl LedAnimation {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pattern: LedPattern::Off,
            sync_divisor: 255,
            frame_counter: 0,
            sync_edge_count: 0,
            sync_level: false,
        }
    }

    /// Installs a pattern and restarts the animation clock.
    pub fn set_pattern(&mut self, pattern: LedPattern, sync_divisor: u8) {
        self.pattern = pattern;
        self.sync_divisor = sync_divisor;
        self.frame_counter = 0;
        self.sync_edge_count = 0;
    }

    /// Records the sync line level; returns `true` when it was a transition.
    pub fn on_sync_edge(&mut self, level: bool) -> bool {
        if level == self.sync_level {
            return false;
        }
        self.sync_level = level;
        self.sync_edge_count = self.sync_edge_count.saturating_add(1);
        true
    }

    /// Advances the clock when enough sync transitions have accumulated.
    ///
    /// Returns the pattern and frame index to render, or `None` when no frame
    /// is due (or the LED is off).
    pub fn advance(&mut self) -> Option<(LedPattern, u32)> {
        if self.sync_edge_count < u32::from(self.sync_divisor) {
            return None;
        }
        self.sync_edge_count = 0;

        let frame = self.frame_counter;
        self.frame_counter = self.frame_counter.wrapping_add(1);
        match self.pattern {
            LedPattern::Off => None,
            pattern => Some((pattern, frame)),
        }
    }

    #[must_use]
    pub const fn pattern(&self) -> LedPattern {
        self.pattern
    }

    #[must_use]
    pub const fn sync_divisor(&self) -> u8 {
        self.sync_divisor
    }

    #[must_use]
    pub const fn frame_counter(&self) -> u32 {
        self.frame_counter
    }

    #[must_use]
    pub const fn sync_edge_count(&self) -> u32 {
        self.sync_edge_count
    }
}

impl Default for LedAnimation {
    fn default() -> Self {
        Self::new()
    }
}
