//! Change detection for the watched sheet.
//!
//! Watches the parent directory of the data file and calls a [`ChangeHandler`]
//! whenever the file itself is modified.

mod watcher;

pub use watcher::{ChangeHandler, ChangeWatcher, WatchState};
