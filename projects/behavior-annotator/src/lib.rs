pub mod annotation;
pub mod cli;
pub mod config;
pub mod error;
pub mod input;
pub mod playback;
pub mod replay;
pub mod session;
pub mod undo;
pub mod video;
pub mod workspace;
