//! Apple TV bridge library.
//!
//! Mirrors a media player's power, playback and app state onto smart-home
//! accessory services, and forwards power switch writes back to the player.

pub mod accessory;
pub mod bridge;
pub mod config;
pub mod device;
pub mod error;
pub mod platform;
