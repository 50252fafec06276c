//! Parameter id space
//!
//! Per-channel settings carry the channel index in bits 8..12 of the id:
//!
//! ```text
//! ┌──────────┬───────┬──────────┐
//! │ GROUP    │ INDEX │ SETTING  │
//! │ 15..12   │ 11..8 │ 7..0     │
//! └──────────┴───────┴──────────┘
//! ```
//!
//! Group 0x1 belongs to the bootloader, 0x2 to faders and 0x4 to buttons.

/// Address of the user program's vector table, zero when none is installed
pub const BOOTLOADER_USER_VTOR: u16 = 0x1001;

/// Set to the skip magic to boot straight into the user program once
pub const BOOTLOADER_MAGIC: u16 = 0x1002;

const INDEX_SHIFT: u16 = 8;
const INDEX_MASK: u16 = 0x0F00;

fn with_index(base: u16, index: u8) -> u16 {
    base | (((index & 0xF) as u16) << INDEX_SHIFT)
}

fn split_index(id: u16) -> (u16, u8) {
    (id & !INDEX_MASK, ((id & INDEX_MASK) >> INDEX_SHIFT) as u8)
}

/// Fader settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum FaderParameter {
    MidiChannel = 0x2001,
    Mode = 0x2002,
    Control = 0x2003,
    ControlMin = 0x2004,
    ControlMax = 0x2005,
    PitchMin = 0x2006,
    PitchMax = 0x2007,
}

impl FaderParameter {
    /// Storage id of this setting for fader `index`
    pub fn id(self, index: u8) -> u16 {
        with_index(self as u16, index)
    }

    /// Decode a storage id into the setting and fader index
    pub fn from_id(id: u16) -> Option<(Self, u8)> {
        let (base, index) = split_index(id);
        let parameter = match base {
            0x2001 => FaderParameter::MidiChannel,
            0x2002 => FaderParameter::Mode,
            0x2003 => FaderParameter::Control,
            0x2004 => FaderParameter::ControlMin,
            0x2005 => FaderParameter::ControlMax,
            0x2006 => FaderParameter::PitchMin,
            0x2007 => FaderParameter::PitchMax,
            _ => return None,
        };
        Some((parameter, index))
    }
}

/// Button settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum ButtonParameter {
    MidiChannel = 0x4001,
    On = 0x4002,
    Off = 0x4003,
    Mode = 0x4004,
    Control = 0x4005,
    Note = 0x4006,
    NoteVelocity = 0x4007,
    Style = 0x4008,
}

impl ButtonParameter {
    /// Storage id of this setting for button `index`
    pub fn id(self, index: u8) -> u16 {
        with_index(self as u16, index)
    }

    /// Decode a storage id into the setting and button index
    pub fn from_id(id: u16) -> Option<(Self, u8)> {
        let (base, index) = split_index(id);
        let parameter = match base {
            0x4001 => ButtonParameter::MidiChannel,
            0x4002 => ButtonParameter::On,
            0x4003 => ButtonParameter::Off,
            0x4004 => ButtonParameter::Mode,
            0x4005 => ButtonParameter::Control,
            0x4006 => ButtonParameter::Note,
            0x4007 => ButtonParameter::NoteVelocity,
            0x4008 => ButtonParameter::Style,
            _ => return None,
        };
        Some((parameter, index))
    }
}

/// What a fader sends when moved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaderMode {
    Control = 0,
    Pitch = 2,
}

impl FaderMode {
    /// Decode a stored mode value
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(FaderMode::Control),
            2 => Some(FaderMode::Pitch),
            _ => None,
        }
    }
}

/// What a button sends when pressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ButtonMode {
    Control = 0,
    Note = 1,
}

impl ButtonMode {
    /// Decode a stored mode value
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ButtonMode::Control),
            1 => Some(ButtonMode::Note),
            _ => None,
        }
    }
}

/// Whether a button holds its state between presses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ButtonStyle {
    Momentary = 0,
    Toggle = 1,
}

impl ButtonStyle {
    /// Decode a stored style value
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ButtonStyle::Momentary),
            1 => Some(ButtonStyle::Toggle),
            _ => None,
        }
    }
}
