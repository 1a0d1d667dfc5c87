pub mod state;

pub use state::{Settings, SettingsError, SettingsStore, load_settings};
