pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod separator;

pub use error::{Result, VoiceError};
