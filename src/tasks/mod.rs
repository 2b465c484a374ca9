//! Background Tasks Module
//!
//! Tasks that run alongside a cache and share its per-entry locks.
//!
//! # Tasks
//! - Expiration sweep: evicts expired entries at the configured interval
//! - Refresh-ahead: reloads an entry with the default loader after each write

mod refresh;
mod sweeper;

pub(crate) use refresh::spawn_refresh_task;
pub(crate) use sweeper::{spawn_sweeper_task, sweep_expired};
