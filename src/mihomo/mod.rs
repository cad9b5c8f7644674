//! Mihomo core integration
//!
//! The core itself is an external binary; we manage its lifecycle and
//! talk to its external controller API over a Unix socket.

mod client;
mod process;

pub use client::ControlClient;
pub use process::{MihomoCore, MIHOMO_VERSION};
