#![forbid(unsafe_code)]

//! Shared models and logic for the sitewatch watcher and updater processes.

pub mod cycle;
pub mod detect;
pub mod diff;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod hashing;
pub mod mailbox;
pub mod memory;
pub mod model;
pub mod render;
pub mod restart;
pub mod store;
pub mod time;
pub mod updater;
pub mod window;

pub use diff::diff;
pub use error::*;
pub use model::*;
pub use time::*;
