//! Location of `settings.toml`: `<platform config dir>/sobjanta/settings.toml`.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub settings_file: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "sobjanta";
    const SETTINGS_FILE: &'static str = "settings.toml";

    /// Uses the platform config dir, or the working directory when there is none.
    pub fn new() -> Self {
        Self::under(dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    /// Lays the app's files out below `base` instead of the platform dir.
    pub fn under(base: impl Into<PathBuf>) -> Self {
        let config_dir = base.into().join(Self::APP_NAME);
        let settings_file = config_dir.join(Self::SETTINGS_FILE);
        Self {
            config_dir,
            settings_file,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
