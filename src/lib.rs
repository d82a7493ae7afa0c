pub mod audio;
pub mod config;
pub mod history;
pub mod playback;
pub mod services;
pub mod session;

// Re-export the main entry points for convenient access
pub use playback::PlaybackController;
pub use session::SessionRunner;
