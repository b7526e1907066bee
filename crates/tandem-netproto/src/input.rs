//! Controller state for one player at one tick.
//!
//! A [`PlayerState`] is a fixed-width bit-set: bit *i* set means button *i*
//! is held. The wire format stores it as a little-endian `u32`.

use bitflags::bitflags;

use crate::error::ProtoError;

/// Button ordering follows the retro pad bit layout (B first).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::FromRepr, strum::EnumIter)]
pub enum Button {
    B = 0,
    Y = 1,
    Select = 2,
    Start = 3,
    Up = 4,
    Down = 5,
    Left = 6,
    Right = 7,
    A = 8,
    X = 9,
    L = 10,
    R = 11,
    L2 = 12,
    R2 = 13,
    L3 = 14,
    R3 = 15,
}

impl Button {
    /// Single-button state with only this button held.
    pub const fn flag(self) -> PlayerState {
        PlayerState::from_bits_retain(1 << self as u8)
    }
}

/// Number of buttons a [`PlayerState`] can describe.
pub const BUTTON_COUNT: u32 = 16;

bitflags! {
    /// Held buttons for one controller at one tick.
    ///
    /// Bit layout matches [`Button`] discriminants.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct PlayerState: u32 {
        const B      = 1 << 0;
        const Y      = 1 << 1;
        const SELECT = 1 << 2;
        const START  = 1 << 3;
        const UP     = 1 << 4;
        const DOWN   = 1 << 5;
        const LEFT   = 1 << 6;
        const RIGHT  = 1 << 7;
        const A      = 1 << 8;
        const X      = 1 << 9;
        const L      = 1 << 10;
        const R      = 1 << 11;
        const L2     = 1 << 12;
        const R2     = 1 << 13;
        const L3     = 1 << 14;
        const R3     = 1 << 15;
    }
}

const _: () = assert!(
    BUTTON_COUNT <= u32::BITS && PlayerState::all().bits().count_ones() == BUTTON_COUNT,
    "button set no longer fits the encoded integer width"
);

impl PlayerState {
    /// No buttons held. This is also the prediction for a tick with no known input.
    pub const NEUTRAL: Self = Self::empty();

    /// Build a state from its encoded form, rejecting bits outside the button set.
    pub fn from_wire(bits: u32) -> Result<Self, ProtoError> {
        Self::from_bits(bits).ok_or(ProtoError::ButtonOutOfRange(bits))
    }

    pub fn is_pressed(self, button: Button) -> bool {
        self.contains(button.flag())
    }

    /// Update a button's pressed state.
    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.set(button.flag(), pressed);
    }

    pub fn with(self, button: Button) -> Self {
        self | button.flag()
    }

    /// Iterate over the held buttons in bit order.
    pub fn pressed(self) -> impl Iterator<Item = Button> {
        self.iter()
            .filter_map(|flag| Button::from_repr(flag.bits().trailing_zeros() as u8))
    }
}

impl TryFrom<u32> for PlayerState {
    type Error = ProtoError;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        Self::from_wire(bits)
    }
}

impl From<PlayerState> for u32 {
    fn from(state: PlayerState) -> Self {
        state.bits()
    }
}
