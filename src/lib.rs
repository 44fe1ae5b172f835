//! Pill dispenser controller.
//!
//! Scheduled and manually triggered container releases: a servo is driven
//! through a fixed motion profile until a drop sensor confirms that a pill
//! fell. Hardware sits behind the traits in [`hardware`]; the simulated board
//! lets the whole controller run on a host.

pub mod config;
pub mod dispenser;
pub mod hardware;
pub mod network;
pub mod schedule;
pub mod trigger;
pub mod utils;
