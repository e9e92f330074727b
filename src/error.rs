use thiserror::Error;

/// Every failure the library reports.
///
/// The set is closed: backends map their native failures onto one of these
/// kinds so callers can branch on the kind without knowing which sound
/// server is underneath.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SoundIoError {
    #[error("out of memory")]
    NoMem,

    /// The backend does not appear to be active or running.
    #[error("unable to initialize audio backend")]
    InitAudioBackend,

    /// A system resource other than memory was not available.
    #[error("system resource not available")]
    SystemResources,

    /// Attempted to open a device and failed.
    #[error("unable to open device")]
    OpeningDevice,

    #[error("no such device")]
    NoSuchDevice,

    /// Programmer error: a bad argument or a call made in the wrong state.
    #[error("invalid value")]
    Invalid,

    /// The library was built without support for that backend.
    #[error("backend unavailable")]
    BackendUnavailable,

    /// An open stream had an error that can only be recovered from by
    /// destroying the stream and creating it again.
    #[error("unrecoverable streaming failure")]
    Streaming,

    /// Attempted to use a device with parameters it cannot support.
    #[error("incompatible device")]
    IncompatibleDevice,

    /// When JACK returns `JackNoSuchClient`.
    #[error("no such client")]
    NoSuchClient,

    /// Attempted to use parameters that the backend cannot support.
    #[error("incompatible backend")]
    IncompatibleBackend,

    /// The backend server shut down or became inactive.
    #[error("backend disconnected")]
    BackendDisconnected,

    #[error("interrupted; try again")]
    Interrupted,

    /// Buffer underrun occurred.
    #[error("buffer underflow")]
    Underflow,

    /// Unable to convert to or from UTF-8 to the native string format.
    #[error("failed to encode string")]
    EncodingString,

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T, E = SoundIoError> = std::result::Result<T, E>;
