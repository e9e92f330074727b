use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum number of channels a layout or stream may carry
pub const MAX_CHANNELS: usize = 24;

macro_rules! channel_ids {
    ($($variant:ident => [$($name:literal),+],)+) => {
        /// Speaker or signal role of one channel within a layout
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum ChannelId {
            $($variant,)+
        }

        impl ChannelId {
            const ALL: &'static [ChannelId] = &[$(ChannelId::$variant,)+];

            /// Canonical name first, followed by the accepted aliases
            pub fn names(self) -> &'static [&'static str] {
                match self {
                    $(ChannelId::$variant => &[$($name),+],)+
                }
            }
        }
    };
}

channel_ids! {
    Invalid => ["(Invalid Channel)"],
    FrontLeft => ["Front Left", "FL", "front-left"],
    FrontRight => ["Front Right", "FR", "front-right"],
    FrontCenter => ["Front Center", "FC", "front-center"],
    Lfe => ["LFE", "lfe"],
    BackLeft => ["Back Left", "BL", "rear-left"],
    BackRight => ["Back Right", "BR", "rear-right"],
    FrontLeftCenter => ["Front Left Center", "FLC", "front-left-of-center"],
    FrontRightCenter => ["Front Right Center", "FRC", "front-right-of-center"],
    BackCenter => ["Back Center", "BC", "rear-center"],
    SideLeft => ["Side Left", "SL", "side-left"],
    SideRight => ["Side Right", "SR", "side-right"],
    TopCenter => ["Top Center", "TC", "top-center"],
    TopFrontLeft => ["Top Front Left", "TFL", "top-front-left"],
    TopFrontCenter => ["Top Front Center", "TFC", "top-front-center"],
    TopFrontRight => ["Top Front Right", "TFR", "top-front-right"],
    TopBackLeft => ["Top Back Left", "TBL", "top-rear-left"],
    TopBackCenter => ["Top Back Center", "TBC", "top-rear-center"],
    TopBackRight => ["Top Back Right", "TBR", "top-rear-right"],
    BackLeftCenter => ["Back Left Center"],
    BackRightCenter => ["Back Right Center"],
    FrontLeftWide => ["Front Left Wide"],
    FrontRightWide => ["Front Right Wide"],
    FrontLeftHigh => ["Front Left High"],
    FrontCenterHigh => ["Front Center High"],
    FrontRightHigh => ["Front Right High"],
    TopFrontLeftCenter => ["Top Front Left Center"],
    TopFrontRightCenter => ["Top Front Right Center"],
    TopSideLeft => ["Top Side Left"],
    TopSideRight => ["Top Side Right"],
    LeftLfe => ["Left LFE"],
    RightLfe => ["Right LFE"],
    Lfe2 => ["LFE 2"],
    BottomCenter => ["Bottom Center"],
    BottomLeftCenter => ["Bottom Left Center"],
    BottomRightCenter => ["Bottom Right Center"],
    MsMid => ["Mid/Side Mid"],
    MsSide => ["Mid/Side Side"],
    AmbisonicW => ["Ambisonic W"],
    AmbisonicX => ["Ambisonic X"],
    AmbisonicY => ["Ambisonic Y"],
    AmbisonicZ => ["Ambisonic Z"],
    XyX => ["X-Y X"],
    XyY => ["X-Y Y"],
    HeadphonesLeft => ["Headphones Left"],
    HeadphonesRight => ["Headphones Right"],
    ClickTrack => ["Click Track"],
    ForeignLanguage => ["Foreign Language"],
    HearingImpaired => ["Hearing Impaired"],
    Narration => ["Narration"],
    Haptic => ["Haptic"],
    DialogCentricMix => ["Dialog Centric Mix"],
    Aux => ["Aux"],
    Aux0 => ["Aux 0"],
    Aux1 => ["Aux 1"],
    Aux2 => ["Aux 2"],
    Aux3 => ["Aux 3"],
    Aux4 => ["Aux 4"],
    Aux5 => ["Aux 5"],
    Aux6 => ["Aux 6"],
    Aux7 => ["Aux 7"],
    Aux8 => ["Aux 8"],
    Aux9 => ["Aux 9"],
    Aux10 => ["Aux 10"],
    Aux11 => ["Aux 11"],
    Aux12 => ["Aux 12"],
    Aux13 => ["Aux 13"],
    Aux14 => ["Aux 14"],
    Aux15 => ["Aux 15"],
}

impl ChannelId {
    pub fn name(self) -> &'static str {
        self.names()[0]
    }

    /// Look up a channel by its canonical name or any alias. Matching is
    /// exact; unknown names give `ChannelId::Invalid`.
    pub fn parse(s: &str) -> ChannelId {
        Self::ALL
            .iter()
            .copied()
            .find(|id| *id != ChannelId::Invalid && id.names().contains(&s))
            .unwrap_or(ChannelId::Invalid)
    }

    /// `Aux0`..`Aux15` by index, for devices that expose unnamed channels
    pub fn aux(index: usize) -> Option<ChannelId> {
        let base = Self::ALL.iter().position(|id| *id == ChannelId::Aux0)?;
        Self::ALL.get(base + index).copied().filter(|_| index < 16)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChannelId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ChannelId::parse(s))
    }
}
