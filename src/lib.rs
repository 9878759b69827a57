//! Session and stage state machine for an SM/ITG-style rhythm game.
//!
//! The crate tracks who is playing, what they're paying, which song or
//! course is selected under which modifiers, and how a stage moves through
//! its begin/commit/finish lifecycle. It owns no rendering, input, or audio;
//! hosts plug those in around [`game::session::Session`] and its
//! collaborator traits.

pub mod config;
pub mod game;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{CoinMode, LaunchOverrides, Preferences, Premium, ThemeMetrics};
pub use game::PlayerId;
pub use game::session::{Session, SessionDeps};
