//! Dropdown placement relative to the trigger and the viewport.
//!
//! Pure geometry: the host reports the trigger rectangle and the viewport on
//! open, scroll and resize, and draws the dropdown where this says.

/// Gap between trigger and dropdown.
pub const DROPDOWN_GAP: f64 = 4.0;

/// Height the dropdown asks for before it is clamped.
pub const PREFERRED_HEIGHT: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.bottom()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Below,
    Above,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropdownPlacement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub max_height: f64,
    pub side: Side,
}

impl DropdownPlacement {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.max_height)
    }
}

/// Place the dropdown below the trigger, or above it when there is not
/// enough room below and more room above.
pub fn place(trigger: Rect, viewport: Viewport, preferred_height: f64) -> DropdownPlacement {
    let below = (viewport.height - trigger.bottom() - DROPDOWN_GAP).max(0.0);
    let above = (trigger.y - DROPDOWN_GAP).max(0.0);

    let width = trigger.width.min(viewport.width).max(0.0);
    let x = trigger.x.min(viewport.width - width).max(0.0);

    if below >= preferred_height || below >= above {
        DropdownPlacement {
            x,
            y: trigger.bottom() + DROPDOWN_GAP,
            width,
            max_height: preferred_height.min(below),
            side: Side::Below,
        }
    } else {
        let max_height = preferred_height.min(above);
        DropdownPlacement {
            x,
            y: trigger.y - DROPDOWN_GAP - max_height,
            width,
            max_height,
            side: Side::Above,
        }
    }
}
