//! Event ring buffer for native → reactive communication.
//!
//! The native side decodes terminal input and appends fixed-size slots; the
//! reactive side drains them in order when the wait channel reports that
//! events are available. Single producer, single consumer, lock-free: the
//! write and read indices are the only shared words and are accessed
//! atomically.
//!
//! Slot layout (20 bytes):
//!
//! ```text
//! [0]      event type (u8)
//! [1..4]   padding
//! [4..8]   target index (i32, -1 = none)
//! [8..20]  payload
//!            key:    keycode u32, modifiers u8, state u8
//!            mouse:  x u16, y u16, button u8
//!            scroll: dx i32, dy i32
//! ```

use std::sync::atomic::Ordering;

use tracing::{trace, warn};

use crate::shared_buffer::{
    index_from_raw, raw_from_index, SharedBuffer, EVENT_RING_HEADER_SIZE, EVENT_SLOT_SIZE,
    MAX_EVENTS, R_READ_IDX, R_WRITE_IDX,
};
use crate::state::events::{
    FocusEvent, InputEvent, KeyEvent, KeyState, Modifiers, MouseEvent, MouseEventKind,
    ScrollEvent,
};

const SLOT_TARGET: usize = 4;
const SLOT_DATA: usize = 8;

// =============================================================================
// Event Types
// =============================================================================

/// Event type tags written to the ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
    None = 0,
    Key = 1,
    MouseDown = 2,
    MouseUp = 3,
    Click = 4,
    MouseEnter = 5,
    MouseLeave = 6,
    MouseMove = 7,
    Scroll = 8,
    Focus = 9,
    Blur = 10,
}

impl From<u8> for EventType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Key,
            2 => Self::MouseDown,
            3 => Self::MouseUp,
            4 => Self::Click,
            5 => Self::MouseEnter,
            6 => Self::MouseLeave,
            7 => Self::MouseMove,
            8 => Self::Scroll,
            9 => Self::Focus,
            10 => Self::Blur,
            _ => Self::None,
        }
    }
}

impl EventType {
    fn of(event: &InputEvent) -> Self {
        match event {
            InputEvent::Key(_) => Self::Key,
            InputEvent::Mouse(m) => match m.kind {
                MouseEventKind::Down => Self::MouseDown,
                MouseEventKind::Up => Self::MouseUp,
                MouseEventKind::Click => Self::Click,
                MouseEventKind::Enter => Self::MouseEnter,
                MouseEventKind::Leave => Self::MouseLeave,
                MouseEventKind::Move => Self::MouseMove,
            },
            InputEvent::Scroll(_) => Self::Scroll,
            InputEvent::Focus(f) if f.gained => Self::Focus,
            InputEvent::Focus(_) => Self::Blur,
        }
    }

    fn mouse_kind(self) -> Option<MouseEventKind> {
        match self {
            Self::MouseDown => Some(MouseEventKind::Down),
            Self::MouseUp => Some(MouseEventKind::Up),
            Self::Click => Some(MouseEventKind::Click),
            Self::MouseEnter => Some(MouseEventKind::Enter),
            Self::MouseLeave => Some(MouseEventKind::Leave),
            Self::MouseMove => Some(MouseEventKind::Move),
            _ => None,
        }
    }
}

// =============================================================================
// Ring Buffer
// =============================================================================

/// View over the event ring section of a [`SharedBuffer`].
pub struct EventRing<'a> {
    buf: &'a SharedBuffer,
    base: usize,
}

impl<'a> EventRing<'a> {
    pub fn new(buf: &'a SharedBuffer) -> Self {
        Self { base: buf.event_ring_offset(), buf }
    }

    fn write_idx(&self) -> u32 {
        u32::from_le(self.buf.atomic_u32(self.base + R_WRITE_IDX).load(Ordering::Acquire))
    }

    fn read_idx(&self) -> u32 {
        u32::from_le(self.buf.atomic_u32(self.base + R_READ_IDX).load(Ordering::Acquire))
    }

    fn slot_offset(&self, idx: u32) -> usize {
        self.base + EVENT_RING_HEADER_SIZE + (idx as usize % MAX_EVENTS) * EVENT_SLOT_SIZE
    }

    /// Number of events written but not yet drained (capped at ring size).
    pub fn pending(&self) -> usize {
        (self.write_idx().wrapping_sub(self.read_idx()) as usize).min(MAX_EVENTS)
    }

    /// Append an event. This is the producer half, used by native engines
    /// written in Rust and by tests standing in for one.
    pub fn push(&self, event: &InputEvent) {
        let write_idx = self.write_idx();
        let at = self.slot_offset(write_idx);
        let data = at + SLOT_DATA;

        self.buf.write::<u8>(at, EventType::of(event) as u8);
        self.buf.write::<i32>(at + SLOT_TARGET, raw_from_index(event.target()));
        match event {
            InputEvent::Key(k) => {
                self.buf.write::<u32>(data, k.keycode);
                self.buf.write::<u8>(data + 4, k.modifiers.bits());
                self.buf.write::<u8>(data + 5, k.state as u8);
            }
            InputEvent::Mouse(m) => {
                self.buf.write::<u16>(data, m.x);
                self.buf.write::<u16>(data + 2, m.y);
                self.buf.write::<u8>(data + 4, m.button);
            }
            InputEvent::Scroll(s) => {
                self.buf.write::<i32>(data, s.delta_x);
                self.buf.write::<i32>(data + 4, s.delta_y);
            }
            InputEvent::Focus(_) => {}
        }

        self.buf
            .atomic_u32(self.base + R_WRITE_IDX)
            .store(write_idx.wrapping_add(1).to_le(), Ordering::Release);
    }

    /// Decode every pending event in write order and advance the read index.
    pub fn drain(&self) -> Vec<InputEvent> {
        let write_idx = self.write_idx();
        let mut read_idx = self.read_idx();

        let backlog = write_idx.wrapping_sub(read_idx) as usize;
        if backlog > MAX_EVENTS {
            let dropped = backlog - MAX_EVENTS;
            warn!(dropped, "event ring overrun, oldest events lost");
            read_idx = write_idx.wrapping_sub(MAX_EVENTS as u32);
        }

        let mut events = Vec::with_capacity(backlog.min(MAX_EVENTS));
        while read_idx != write_idx {
            if let Some(event) = self.decode(read_idx) {
                events.push(event);
            }
            read_idx = read_idx.wrapping_add(1);
        }

        self.buf
            .atomic_u32(self.base + R_READ_IDX)
            .store(write_idx.to_le(), Ordering::Release);
        events
    }

    fn decode(&self, idx: u32) -> Option<InputEvent> {
        let at = self.slot_offset(idx);
        let data = at + SLOT_DATA;
        let tag = self.buf.read::<u8>(at);
        let target = index_from_raw(self.buf.read::<i32>(at + SLOT_TARGET));

        let event = match EventType::from(tag) {
            EventType::Key => InputEvent::Key(KeyEvent {
                target,
                keycode: self.buf.read::<u32>(data),
                modifiers: Modifiers::from_bits_truncate(self.buf.read::<u8>(data + 4)),
                state: KeyState::from(self.buf.read::<u8>(data + 5)),
            }),
            EventType::Scroll => InputEvent::Scroll(ScrollEvent {
                target,
                delta_x: self.buf.read::<i32>(data),
                delta_y: self.buf.read::<i32>(data + 4),
            }),
            ty @ (EventType::Focus | EventType::Blur) => InputEvent::Focus(FocusEvent {
                index: target?,
                gained: ty == EventType::Focus,
            }),
            EventType::None => {
                trace!(tag, "skipping unknown event slot");
                return None;
            }
            ty => InputEvent::Mouse(MouseEvent {
                kind: ty.mouse_kind()?,
                x: self.buf.read::<u16>(data),
                y: self.buf.read::<u16>(data + 2),
                button: self.buf.read::<u8>(data + 4),
                target,
            }),
        };
        Some(event)
    }
}
