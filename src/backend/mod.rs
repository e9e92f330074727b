pub mod dummy;
pub mod registry;
pub mod traits;

#[cfg(feature = "cpal")]
pub mod cpal;

pub use registry::{registered_backends, registered_drivers, DriverRegistration};
pub use traits::{
    BackendDriver, BackendSession, InputBuffer, OutStreamDriver, OutputBuffer, StreamDriver,
};

use crate::error::{Result, SoundIoError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sound server families, declared in connection priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Jack,
    PulseAudio,
    Alsa,
    CoreAudio,
    Wasapi,
    Dummy,
}

impl Backend {
    pub const ALL: [Backend; 6] = [
        Backend::Jack,
        Backend::PulseAudio,
        Backend::Alsa,
        Backend::CoreAudio,
        Backend::Wasapi,
        Backend::Dummy,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Backend::Jack => "JACK",
            Backend::PulseAudio => "PulseAudio",
            Backend::Alsa => "ALSA",
            Backend::CoreAudio => "CoreAudio",
            Backend::Wasapi => "WASAPI",
            Backend::Dummy => "Dummy",
        }
    }

    /// Whether a driver for this backend is compiled in
    pub fn have(self) -> bool {
        registered_backends().contains(&self)
    }

    /// Parse a selection string where empty or "auto" means no preference
    pub fn parse_selection(s: &str) -> Result<Option<Backend>> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
            return Ok(None);
        }
        trimmed.parse().map(Some)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = SoundIoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jack" => Ok(Backend::Jack),
            "pulseaudio" | "pulse" => Ok(Backend::PulseAudio),
            "alsa" => Ok(Backend::Alsa),
            "coreaudio" => Ok(Backend::CoreAudio),
            "wasapi" => Ok(Backend::Wasapi),
            "dummy" => Ok(Backend::Dummy),
            other => Err(SoundIoError::Config(format!("unknown backend: {}", other))),
        }
    }
}
