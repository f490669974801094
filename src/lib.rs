// Discovery player core
// Queueing, autoplay, listening memory and dual-backend playback for a
// multi-source music player. The console binary in main.rs drives it.

pub mod assistant;
pub mod autoplay;
pub mod catalog;
pub mod config;
pub mod error;
pub mod firestore;
pub mod genre;
pub mod memory;
pub mod player;
pub mod profile;
pub mod session;
pub mod store;
pub mod track;
