//! Command handlers.
//!
//! Each handler takes the loaded [`CliContext`](crate::context::CliContext),
//! does one thing and formats the result for the terminal. Rendering lives
//! in plain `render_*` functions so it can be tested without a daemon or a
//! sound card.

pub mod backends;
pub mod daemon;
pub mod devices;
pub mod locks;
pub mod paths;
pub mod speak;
pub mod status;
pub mod transcribe;
