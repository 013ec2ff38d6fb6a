pub mod encoder;
pub mod ffmpeg;
pub mod transcoder;
