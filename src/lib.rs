pub mod audio;
pub mod codec;
pub mod config;
pub mod hotkey;
pub mod live;
pub mod playback;
