//! Supervision of long-running apps: an external process or a thread, with a uniform run
//! status, a shared key/value store and attachable watchdogs.

pub mod app;
pub mod command;
pub mod config;
pub mod context;
pub mod logging;
pub mod utils;
