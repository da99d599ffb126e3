//! Input event types - decoded keyboard, mouse, scroll and focus events.
//!
//! These are the payloads the native side hands back after decoding terminal
//! input, and the payloads handlers receive.

use bitflags::bitflags;

// =============================================================================
// MODIFIERS & KEY STATE
// =============================================================================

bitflags! {
    /// Keyboard modifier bitmask (wire values)
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct Modifiers: u8 {
        const CTRL = 1;
        const ALT = 2;
        const SHIFT = 4;
        const META = 8;
    }
}

/// Key event state (press, repeat, release)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyState {
    #[default]
    Press = 0,
    Repeat = 1,
    Release = 2,
}

impl From<u8> for KeyState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Repeat,
            2 => Self::Release,
            _ => Self::Press,
        }
    }
}

// =============================================================================
// EVENT PAYLOADS
// =============================================================================

/// Keyboard event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// Target node; `None` routes to the focused node
    pub target: Option<usize>,
    pub keycode: u32,
    pub modifiers: Modifiers,
    pub state: KeyState,
}

impl KeyEvent {
    /// Create a key press with no modifiers and no explicit target
    pub fn press(keycode: u32) -> Self {
        Self {
            target: None,
            keycode,
            modifiers: Modifiers::empty(),
            state: KeyState::Press,
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn with_state(mut self, state: KeyState) -> Self {
        self.state = state;
        self
    }

    pub fn at(mut self, target: usize) -> Self {
        self.target = Some(target);
        self
    }

    pub fn is_press(&self) -> bool {
        self.state == KeyState::Press
    }
}

/// Mouse action type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseEventKind {
    Down,
    Up,
    Click,
    Move,
    Enter,
    Leave,
}

/// Mouse event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseEvent {
    pub kind: MouseEventKind,
    /// Column (0-indexed)
    pub x: u16,
    /// Row (0-indexed)
    pub y: u16,
    pub button: u8,
    /// Target node; `None` means the dispatcher hit-tests `(x, y)`
    pub target: Option<usize>,
}

impl MouseEvent {
    pub fn new(kind: MouseEventKind, x: u16, y: u16, button: u8) -> Self {
        Self { kind, x, y, button, target: None }
    }

    pub fn at(mut self, target: usize) -> Self {
        self.target = Some(target);
        self
    }
}

/// Scroll event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollEvent {
    /// Target node; `None` routes to the focused node
    pub target: Option<usize>,
    pub delta_x: i32,
    pub delta_y: i32,
}

/// Focus change for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusEvent {
    pub index: usize,
    pub gained: bool,
}

// =============================================================================
// TAGGED EVENT
// =============================================================================

/// Handler category; each category has its own handler tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Key,
    Mouse,
    Scroll,
    Focus,
}

impl EventCategory {
    /// Whether unconsumed events walk up the parent chain.
    ///
    /// Keys bubble from the focused node; scroll chains to scrollable
    /// ancestors. Pointer and focus events stay on their target.
    pub const fn bubbles(self) -> bool {
        matches!(self, Self::Key | Self::Scroll)
    }
}

/// A decoded input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Key(KeyEvent),
    Mouse(MouseEvent),
    Scroll(ScrollEvent),
    Focus(FocusEvent),
}

impl InputEvent {
    pub const fn category(&self) -> EventCategory {
        match self {
            Self::Key(_) => EventCategory::Key,
            Self::Mouse(_) => EventCategory::Mouse,
            Self::Scroll(_) => EventCategory::Scroll,
            Self::Focus(_) => EventCategory::Focus,
        }
    }

    /// Explicit target carried by the event, if any.
    pub const fn target(&self) -> Option<usize> {
        match self {
            Self::Key(e) => e.target,
            Self::Mouse(e) => e.target,
            Self::Scroll(e) => e.target,
            Self::Focus(e) => Some(e.index),
        }
    }
}

impl From<KeyEvent> for InputEvent {
    fn from(event: KeyEvent) -> Self {
        Self::Key(event)
    }
}

impl From<MouseEvent> for InputEvent {
    fn from(event: MouseEvent) -> Self {
        Self::Mouse(event)
    }
}

impl From<ScrollEvent> for InputEvent {
    fn from(event: ScrollEvent) -> Self {
        Self::Scroll(event)
    }
}

impl From<FocusEvent> for InputEvent {
    fn from(event: FocusEvent) -> Self {
        Self::Focus(event)
    }
}
