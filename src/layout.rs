use crate::channel::ChannelId;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::channel::ChannelId::{
    BackCenter as BC, BackLeft as BL, BackRight as BR, FrontCenter as FC, FrontLeft as FL,
    FrontLeftCenter as FLC, FrontRight as FR, FrontRightCenter as FRC, Lfe as LFE,
    SideLeft as SL, SideRight as SR,
};

/// Builtin layout presets, in catalog order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelLayoutId {
    Mono,
    Stereo,
    TwoPointOne,
    ThreePointZero,
    ThreePointZeroBack,
    ThreePointOne,
    FourPointZero,
    Quad,
    QuadSide,
    FourPointOne,
    FivePointZeroBack,
    FivePointZeroSide,
    FivePointOne,
    FivePointOneBack,
    SixPointZeroSide,
    SixPointZeroFront,
    Hexagonal,
    SixPointOne,
    SixPointOneBack,
    SixPointOneFront,
    SevenPointZero,
    SevenPointZeroFront,
    SevenPointOne,
    SevenPointOneWide,
    SevenPointOneWideBack,
    Octagonal,
}

struct Builtin {
    name: &'static str,
    channels: &'static [ChannelId],
}

const BUILTINS: [Builtin; 26] = [
    Builtin { name: "Mono", channels: &[FC] },
    Builtin { name: "Stereo", channels: &[FL, FR] },
    Builtin { name: "2.1", channels: &[FL, FR, LFE] },
    Builtin { name: "3.0", channels: &[FL, FR, FC] },
    Builtin { name: "3.0 (back)", channels: &[FL, FR, BC] },
    Builtin { name: "3.1", channels: &[FL, FR, FC, LFE] },
    Builtin { name: "4.0", channels: &[FL, FR, FC, BC] },
    Builtin { name: "Quad", channels: &[FL, FR, BL, BR] },
    Builtin { name: "Quad (side)", channels: &[FL, FR, SL, SR] },
    Builtin { name: "4.1", channels: &[FL, FR, FC, BC, LFE] },
    Builtin { name: "5.0 (back)", channels: &[FL, FR, FC, BL, BR] },
    Builtin { name: "5.0 (side)", channels: &[FL, FR, FC, SL, SR] },
    Builtin { name: "5.1", channels: &[FL, FR, FC, SL, SR, LFE] },
    Builtin { name: "5.1 (back)", channels: &[FL, FR, FC, BL, BR, LFE] },
    Builtin { name: "6.0 (side)", channels: &[FL, FR, FC, BC, SL, SR] },
    Builtin { name: "6.0 (front)", channels: &[FL, FR, FLC, FRC, SL, SR] },
    Builtin { name: "Hexagonal", channels: &[FL, FR, FC, BL, BR, BC] },
    Builtin { name: "6.1", channels: &[FL, FR, FC, BC, SL, SR, LFE] },
    Builtin { name: "6.1 (back)", channels: &[FL, FR, FC, BL, BR, BC, LFE] },
    Builtin { name: "6.1 (front)", channels: &[FL, FR, FLC, FRC, SL, SR, LFE] },
    Builtin { name: "7.0", channels: &[FL, FR, FC, BL, BR, SL, SR] },
    Builtin { name: "7.0 (front)", channels: &[FL, FR, FC, FLC, FRC, SL, SR] },
    Builtin { name: "7.1", channels: &[FL, FR, FC, BL, BR, SL, SR, LFE] },
    Builtin { name: "7.1 (wide)", channels: &[FL, FR, FC, FLC, FRC, SL, SR, LFE] },
    Builtin { name: "7.1 (wide) (back)", channels: &[FL, FR, FC, FLC, FRC, BL, BR, LFE] },
    Builtin { name: "Octagonal", channels: &[FL, FR, FC, BL, BR, BC, SL, SR] },
];

const ALL_IDS: [ChannelLayoutId; 26] = {
    use ChannelLayoutId::*;
    [
        Mono,
        Stereo,
        TwoPointOne,
        ThreePointZero,
        ThreePointZeroBack,
        ThreePointOne,
        FourPointZero,
        Quad,
        QuadSide,
        FourPointOne,
        FivePointZeroBack,
        FivePointZeroSide,
        FivePointOne,
        FivePointOneBack,
        SixPointZeroSide,
        SixPointZeroFront,
        Hexagonal,
        SixPointOne,
        SixPointOneBack,
        SixPointOneFront,
        SevenPointZero,
        SevenPointZeroFront,
        SevenPointOne,
        SevenPointOneWide,
        SevenPointOneWideBack,
        Octagonal,
    ]
};

impl ChannelLayoutId {
    pub fn all() -> impl Iterator<Item = ChannelLayoutId> {
        ALL_IDS.into_iter()
    }

    pub fn name(self) -> &'static str {
        BUILTINS[self as usize].name
    }
}

/// An ordered list of channel roles with an optional display name.
///
/// Two layouts are equal when they carry the same channels in the same
/// order. The name does not take part in the comparison.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelLayout {
    name: Option<String>,
    channels: Vec<ChannelId>,
}

impl PartialEq for ChannelLayout {
    fn eq(&self, other: &Self) -> bool {
        self.channels == other.channels
    }
}

impl Eq for ChannelLayout {}

impl ChannelLayout {
    pub fn new(name: Option<String>, channels: Vec<ChannelId>) -> Self {
        Self { name, channels }
    }

    /// Unnamed layout with the given channels
    pub fn from_channels(channels: &[ChannelId]) -> Self {
        Self::new(None, channels.to_vec())
    }

    pub fn from_id(id: ChannelLayoutId) -> Self {
        let builtin = &BUILTINS[id as usize];
        Self::new(Some(builtin.name.to_string()), builtin.channels.to_vec())
    }

    /// Number of builtin presets
    pub fn builtin_count() -> usize {
        BUILTINS.len()
    }

    /// Builtin preset by catalog index.
    ///
    /// # Panics
    ///
    /// Panics if `index >= builtin_count()`.
    pub fn builtin(index: usize) -> Self {
        assert!(
            index < BUILTINS.len(),
            "builtin layout index {} out of range (count {})",
            index,
            BUILTINS.len()
        );
        Self::from_id(ALL_IDS[index])
    }

    pub fn builtins() -> impl Iterator<Item = ChannelLayout> {
        ChannelLayoutId::all().map(Self::from_id)
    }

    /// Conventional layout for a channel count, if there is one
    pub fn default_for(channel_count: usize) -> Option<Self> {
        let id = match channel_count {
            1 => ChannelLayoutId::Mono,
            2 => ChannelLayoutId::Stereo,
            3 => ChannelLayoutId::ThreePointZero,
            4 => ChannelLayoutId::FourPointZero,
            5 => ChannelLayoutId::FivePointZeroBack,
            6 => ChannelLayoutId::FivePointOneBack,
            7 => ChannelLayoutId::SixPointOne,
            8 => ChannelLayoutId::SevenPointOne,
            _ => return None,
        };
        Some(Self::from_id(id))
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }

    pub fn channel(&self, index: usize) -> Option<ChannelId> {
        self.channels.get(index).copied()
    }

    /// Index of the first occurrence of `channel`
    pub fn find_channel(&self, channel: ChannelId) -> Option<usize> {
        self.channels.iter().position(|c| *c == channel)
    }

    /// Names the layout after the builtin preset it matches and returns
    /// `true`, or clears the name and returns `false` when none matches.
    pub fn detect_builtin(&mut self) -> bool {
        match BUILTINS.iter().find(|b| b.channels == self.channels.as_slice()) {
            Some(builtin) => {
                self.name = Some(builtin.name.to_string());
                true
            }
            None => {
                self.name = None;
                false
            }
        }
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            return f.write_str(name);
        }
        for (i, channel) in self.channels.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", channel)?;
        }
        Ok(())
    }
}

/// First layout in `preferred` that also appears in `available`.
///
/// Preference order decides: a later preferred entry never wins over an
/// earlier one, even if both are available.
pub fn best_matching_channel_layout<'a>(
    preferred: &'a [ChannelLayout],
    available: &[ChannelLayout],
) -> Option<&'a ChannelLayout> {
    preferred
        .iter()
        .find(|candidate| available.contains(candidate))
}

/// Sorts by channel count, most channels first. Layouts with equal counts
/// keep their relative order.
pub fn sort_channel_layouts(layouts: &mut [ChannelLayout]) {
    layouts.sort_by(|a, b| b.channel_count().cmp(&a.channel_count()));
}
