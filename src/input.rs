//! Local input translation.
//!
//! Translates local keyboard, pointer, and touch events into protocol
//! input instructions. Pointer and touch coordinates arrive in viewport
//! pixels; the remote side expects display pixels, so every coordinate is
//! divided by the current display scale and clamped to the remote
//! display bounds.

// ============================================================================
// Imports
// ============================================================================

use crate::protocol::opcode::{KEY, MOUSE, TOUCH};
use crate::protocol::Instruction;

// ============================================================================
// PointerButton
// ============================================================================

/// Pointer buttons carried in the wire protocol's button mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerButton {
    /// Primary button.
    Left,
    /// Middle button.
    Middle,
    /// Secondary button.
    Right,
    /// Scroll wheel up tick.
    ScrollUp,
    /// Scroll wheel down tick.
    ScrollDown,
}

impl PointerButton {
    /// Returns this button's bit in the mask.
    #[inline]
    #[must_use]
    pub const fn mask(self) -> u32 {
        match self {
            Self::Left => 0x01,
            Self::Middle => 0x02,
            Self::Right => 0x04,
            Self::ScrollUp => 0x08,
            Self::ScrollDown => 0x10,
        }
    }
}

// ============================================================================
// InputTranslator
// ============================================================================

/// Translates local input events into protocol instructions.
///
/// Owns the pressed-button mask so press/release pairs compose into the
/// cumulative mask the wire protocol expects.
#[derive(Debug)]
pub struct InputTranslator {
    scale: f64,
    display_width: u32,
    display_height: u32,
    button_mask: u32,
}

impl Default for InputTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl InputTranslator {
    /// Creates a translator with unit scale and no known display size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scale: 1.0,
            display_width: 0,
            display_height: 0,
            button_mask: 0,
        }
    }

    /// Updates the display scale used for coordinate correction.
    ///
    /// Non-positive scales are ignored; the previous scale stays active.
    pub fn set_scale(&mut self, scale: f64) {
        if scale > 0.0 {
            self.scale = scale;
        }
    }

    /// Updates the remote display dimensions used for clamping.
    pub fn set_display_size(&mut self, width: u32, height: u32) {
        self.display_width = width;
        self.display_height = height;
    }

    /// Translates a keyboard event.
    #[must_use]
    pub fn key(&self, keysym: u32, pressed: bool) -> Instruction {
        Instruction::new(
            KEY,
            vec![keysym.to_string(), u32::from(pressed).to_string()],
        )
    }

    /// Translates a pointer move, keeping the current button mask.
    #[must_use]
    pub fn pointer_move(&mut self, x: f64, y: f64) -> Instruction {
        let (rx, ry) = self.scale_point(x, y);
        self.mouse_instruction(rx, ry)
    }

    /// Translates a button press or release at a position.
    ///
    /// The mask accumulates across events: chording two buttons yields a
    /// mask with both bits set until each is released.
    #[must_use]
    pub fn pointer_button(
        &mut self,
        x: f64,
        y: f64,
        button: PointerButton,
        pressed: bool,
    ) -> Instruction {
        if pressed {
            self.button_mask |= button.mask();
        } else {
            self.button_mask &= !button.mask();
        }
        let (rx, ry) = self.scale_point(x, y);
        self.mouse_instruction(rx, ry)
    }

    /// Translates a touch contact update.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn touch(
        &mut self,
        id: u32,
        x: f64,
        y: f64,
        x_radius: f64,
        y_radius: f64,
        angle: f64,
        force: f64,
    ) -> Instruction {
        let (rx, ry) = self.scale_point(x, y);
        Instruction::new(
            TOUCH,
            vec![
                id.to_string(),
                rx.to_string(),
                ry.to_string(),
                (x_radius / self.scale).round().to_string(),
                (y_radius / self.scale).round().to_string(),
                angle.to_string(),
                force.to_string(),
            ],
        )
    }

    /// Returns the current pressed-button mask.
    #[inline]
    #[must_use]
    pub fn button_mask(&self) -> u32 {
        self.button_mask
    }

    fn mouse_instruction(&self, x: u32, y: u32) -> Instruction {
        Instruction::new(
            MOUSE,
            vec![x.to_string(), y.to_string(), self.button_mask.to_string()],
        )
    }

    /// Applies scale correction and clamps to the remote display.
    fn scale_point(&self, x: f64, y: f64) -> (u32, u32) {
        let rx = (x / self.scale).round().max(0.0);
        let ry = (y / self.scale).round().max(0.0);
        let clamp = |v: f64, bound: u32| -> u32 {
            if bound == 0 {
                return v as u32;
            }
            (v as u32).min(bound.saturating_sub(1))
        };
        (clamp(rx, self.display_width), clamp(ry, self.display_height))
    }
}

// ============================================================================
// Tests
// ============================================================================
