use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_WEB_PORT: u16 = 28010;
pub const DEFAULT_MAX_PROFILE_PICTURE_BYTES: u64 = 2 * 1024 * 1024;
pub const DEFAULT_PIXEL_RATIO: u32 = 2;
pub const DEFAULT_DATE_FORMAT: &str = "%-m/%-d/%Y";
pub const DEFAULT_CONTACT_EMAIL: &str = "tea-gathering@stamford.edu";

/// Json struct for deployment settings. Every field is optional.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Settings {
    /// SQLite file holding the attendee slot
    pub database_file: Option<PathBuf>,
    pub web_port: Option<u16>,
    /// Directory receiving generated tickets and exports
    pub output_dir: Option<PathBuf>,
    pub max_profile_picture_bytes: Option<u64>,
    pub require_profile_picture: Option<bool>,
    /// Raster density of the ticket image relative to its layout size
    pub ticket_pixel_ratio: Option<u32>,
    /// chrono format string for registration dates in exports
    pub date_format: Option<String>,
    pub contact_email: Option<String>,
}

impl Settings {
    /// Load settings from a json file. A missing file means defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                log::debug!("Loading settings from {}", path.display());
                Ok(serde_json::from_str(&text)?)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!(
                    "Settings file {} does not exist, using defaults",
                    path.display()
                );
                Ok(Settings::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn database_file(&self) -> PathBuf {
        self.database_file
            .clone()
            .unwrap_or_else(|| PathBuf::from("tea-gathering.db"))
    }

    pub fn web_port(&self) -> u16 {
        self.web_port.unwrap_or(DEFAULT_WEB_PORT)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn max_profile_picture_bytes(&self) -> u64 {
        self.max_profile_picture_bytes
            .unwrap_or(DEFAULT_MAX_PROFILE_PICTURE_BYTES)
    }

    pub fn require_profile_picture(&self) -> bool {
        self.require_profile_picture.unwrap_or(true)
    }

    pub fn ticket_pixel_ratio(&self) -> u32 {
        self.ticket_pixel_ratio.unwrap_or(DEFAULT_PIXEL_RATIO).max(1)
    }

    pub fn date_format(&self) -> &str {
        self.date_format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT)
    }

    pub fn contact_email(&self) -> &str {
        self.contact_email.as_deref().unwrap_or(DEFAULT_CONTACT_EMAIL)
    }
}
