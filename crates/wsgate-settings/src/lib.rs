//! # wsgate-settings
//!
//! Configuration for the wsgate gateway, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`GatewaySettings::default()`]
//! 2. **Settings file**: `~/.wsgate/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `WSGATE_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{DispatchSettings, GatewaySettings, LoggingSettings, ServerSettings};
