#![deny(unsafe_code)]

/// Session wiring from settings.
pub mod app;
/// Session state handle, queue dispatcher and startup.
pub mod chat;
/// Settings persistence.
pub mod settings;
/// Line-mode front end.
pub mod shell;
