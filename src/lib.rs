pub mod area;
pub mod backend;
pub mod channel;
pub mod config;
pub mod context;
pub mod convert;
pub mod device;
pub mod error;
pub mod events;
pub mod format;
pub mod layout;
pub mod ring_buffer;
pub mod stream;

pub use area::{ChannelArea, ChannelAreas, ChannelAreasMut};
pub use backend::Backend;
pub use channel::{ChannelId, MAX_CHANNELS};
pub use config::SoundIoConfig;
pub use context::{
    version_major, version_minor, version_patch, version_string, SoundIo, SoundIoBuilder,
};
pub use device::{Device, DeviceAim, DeviceInfo, DeviceList, SampleRateRange};
pub use error::{Result, SoundIoError};
pub use events::{Event, EventLoop, EventSender, Waker};
pub use format::{Endian, Format};
pub use layout::{best_matching_channel_layout, sort_channel_layouts, ChannelLayout, ChannelLayoutId};
pub use ring_buffer::RingBuffer;
pub use stream::{
    InStream, InStreamReader, OutStream, OutStreamWriter, StreamParams, StreamState,
};
