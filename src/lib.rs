pub mod error;
pub mod midi;
pub mod opl;
pub mod player;
pub mod render;
pub mod transport;
pub mod vgm;

pub use error::Error;
pub use midi::MidiFile;
pub use player::{PlaybackSession, SessionConfig};
pub use render::{dump_events, render_vgm, render_wav, RenderOptions, WavOptions};
