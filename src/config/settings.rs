//! Pipeline settings and configuration types.
//!
//! Settings are loaded from a JSON file at startup and handed to the
//! pipeline by value. The pipeline never mutates them; one `Settings`
//! value describes one monitored account.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::SensorKey;

/// Errors raised while loading or saving settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file could not be read or written.
    #[error("settings file error: {0}")]
    Io(#[from] std::io::Error),

    /// The settings file is not valid JSON or fails validation.
    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level pipeline settings for one monitored account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Mailbox connection settings.
    pub imap: ImapSettings,
    /// Enabled sensor keys. An empty list enables every sensor.
    #[serde(default)]
    pub sensors: Vec<SensorKey>,
    /// Amazon-specific extraction settings.
    #[serde(default)]
    pub amazon: AmazonSettings,
    /// Image artifact settings.
    pub image: ImageSettings,
}

impl Settings {
    /// Loads settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Saves settings to a JSON file, pretty-printed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// IMAP connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapSettings {
    /// IMAP server hostname.
    pub host: String,
    /// IMAP server port (typically 993 for TLS).
    #[serde(default = "default_imap_port")]
    pub port: u16,
    /// Login username, usually the mailbox address.
    pub username: String,
    /// Login password or app-specific password.
    pub password: String,
    /// Folder to watch for carrier notifications.
    #[serde(default = "default_folder")]
    pub folder: String,
}

impl Default for ImapSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_imap_port(),
            username: String::new(),
            password: String::new(),
            folder: default_folder(),
        }
    }
}

fn default_imap_port() -> u16 {
    993
}

fn default_folder() -> String {
    "INBOX".to_string()
}

/// Amazon-specific extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmazonSettings {
    /// Forwarding addresses to search in addition to the regional senders.
    #[serde(default)]
    pub forward_addresses: Vec<String>,
    /// Lookback window in days for shipped/exception order searches.
    #[serde(default = "default_amazon_days")]
    pub days: u32,
}

impl Default for AmazonSettings {
    fn default() -> Self {
        Self {
            forward_addresses: Vec::new(),
            days: default_amazon_days(),
        }
    }
}

fn default_amazon_days() -> u32 {
    3
}

/// Image artifact settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSettings {
    /// Directory that receives the day's artifacts. The Amazon delivery
    /// photo lands in an `amazon/` subdirectory of this path.
    pub output_dir: PathBuf,
    /// Custom "no mail" placeholder image. When unset a neutral frame is
    /// synthesized at the canonical artifact size.
    #[serde(default)]
    pub custom_placeholder: Option<PathBuf>,
    /// Seconds each frame of the animated digest is displayed.
    #[serde(default = "default_frame_duration")]
    pub frame_duration_secs: u64,
    /// Also transcode the animated digest to an mp4 via ffmpeg.
    #[serde(default)]
    pub generate_video: bool,
    /// Mirror generated artifacts into a web-servable directory.
    #[serde(default)]
    pub public_dir: Option<PathBuf>,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            custom_placeholder: None,
            frame_duration_secs: default_frame_duration(),
            generate_video: false,
            public_dir: None,
        }
    }
}

fn default_frame_duration() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let imap = ImapSettings::default();
        assert_eq!(imap.port, 993);
        assert_eq!(imap.folder, "INBOX");

        let amazon = AmazonSettings::default();
        assert_eq!(amazon.days, 3);
        assert!(amazon.forward_addresses.is_empty());

        let image = ImageSettings::default();
        assert_eq!(image.frame_duration_secs, 5);
        assert!(!image.generate_video);
        assert!(image.public_dir.is_none());
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let json = r#"{
            "imap": {
                "host": "imap.example.com",
                "username": "user@example.com",
                "password": "secret"
            },
            "image": { "output_dir": "/var/lib/postwatch" }
        }"#;

        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.imap.host, "imap.example.com");
        assert_eq!(settings.imap.port, 993);
        assert_eq!(settings.imap.folder, "INBOX");
        assert!(settings.sensors.is_empty());
        assert_eq!(settings.amazon.days, 3);
        assert_eq!(settings.image.frame_duration_secs, 5);
    }

    #[test]
    fn sensor_keys_parse_from_snake_case() {
        let json = r#"{
            "imap": { "host": "h", "username": "u", "password": "p" },
            "sensors": ["ups_delivering", "amazon_hub_code", "zpackages_transit"],
            "image": { "output_dir": "." }
        }"#;

        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(
            settings.sensors,
            vec![
                SensorKey::UpsDelivering,
                SensorKey::AmazonHubCode,
                SensorKey::ZpackagesTransit,
            ]
        );
    }

    #[test]
    fn settings_roundtrip() {
        let mut settings = Settings {
            imap: ImapSettings {
                host: "imap.example.com".to_string(),
                port: 993,
                username: "user@example.com".to_string(),
                password: "secret".to_string(),
                folder: "INBOX".to_string(),
            },
            sensors: vec![SensorKey::UspsMail, SensorKey::UpsPackages],
            amazon: AmazonSettings::default(),
            image: ImageSettings {
                output_dir: PathBuf::from("/tmp/postwatch"),
                ..ImageSettings::default()
            },
        };
        settings.amazon.forward_addresses = vec!["fwd@example.com".to_string()];

        let json = serde_json::to_string_pretty(&settings).unwrap();
        let deserialized: Settings = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.imap.host, "imap.example.com");
        assert_eq!(deserialized.sensors.len(), 2);
        assert_eq!(
            deserialized.amazon.forward_addresses,
            vec!["fwd@example.com".to_string()]
        );
        assert_eq!(deserialized.image.output_dir, PathBuf::from("/tmp/postwatch"));
    }

    #[test]
    fn load_and_save_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = Settings {
            imap: ImapSettings {
                host: "mail.example.com".to_string(),
                ..ImapSettings::default()
            },
            sensors: Vec::new(),
            amazon: AmazonSettings::default(),
            image: ImageSettings::default(),
        };

        settings.save(&path).unwrap();
        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.imap.host, "mail.example.com");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = Settings::load("/nonexistent/settings.json");
        assert!(matches!(result, Err(SettingsError::Io(_))));
    }
}
