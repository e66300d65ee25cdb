use std::env;
use std::path::PathBuf;

use serde::Deserialize;

pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/calendar",
    "https://www.googleapis.com/auth/admin.directory.resource.calendar.readonly",
];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub slack: SlackConfig,
    pub google: GoogleConfig,
    pub storage: StorageConfig,
    pub booking: BookingConfig,
    pub rate_limit: RateLimitConfig,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    /// Shared secret used to sign every slash command request.
    pub signing_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    /// Path to the OAuth client file downloaded from the Google console.
    pub credentials_path: PathBuf,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub tokens_path: PathBuf,
    pub rooms_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    pub time_zone: String,
    pub calendar_id: String,
    pub reservation_minutes: i64,
    /// Who users are told to contact when a booking fails downstream.
    pub support_contact: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for the slash command webhook
    pub webhook_per_second: u32,
    /// Burst size for the slash command webhook
    pub webhook_burst: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum LogFormat {
    Text,
    Json,
}

/// OAuth client settings as stored in Google's `credentials.json`.
///
/// Desktop clients put them under `installed`, web clients under `web`.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthClientFile {
    pub installed: Option<OAuthClientSecret>,
    pub web: Option<OAuthClientSecret>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
            },
            slack: SlackConfig {
                signing_secret: non_empty(
                    "SLACK_SIGNING_SECRET",
                    env::var("SLACK_SIGNING_SECRET").ok(),
                )?,
            },
            google: GoogleConfig {
                credentials_path: env::var("GOOGLE_CREDENTIALS_PATH")
                    .unwrap_or_else(|_| "credentials.json".to_string())
                    .into(),
                scopes: match env::var("OAUTH_SCOPES") {
                    Ok(v) if !v.trim().is_empty() => {
                        v.split_whitespace().map(str::to_string).collect()
                    }
                    _ => DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
                },
            },
            storage: StorageConfig {
                tokens_path: env::var("TOKENS_PATH")
                    .unwrap_or_else(|_| "tokens.json".to_string())
                    .into(),
                rooms_path: env::var("ROOMS_PATH")
                    .unwrap_or_else(|_| "rooms.json".to_string())
                    .into(),
            },
            booking: BookingConfig {
                time_zone: env::var("CALENDAR_TIME_ZONE")
                    .unwrap_or_else(|_| "America/Buenos_Aires".to_string()),
                calendar_id: env::var("CALENDAR_ID").unwrap_or_else(|_| "primary".to_string()),
                reservation_minutes: match env::var("RESERVATION_MINUTES") {
                    Ok(v) => match v.parse::<i64>() {
                        Ok(m) if m > 0 => m,
                        _ => return Err(ConfigError::InvalidValue("RESERVATION_MINUTES".to_string())),
                    },
                    Err(_) => 30,
                },
                support_contact: env::var("SUPPORT_CONTACT")
                    .unwrap_or_else(|_| "the office admins".to_string()),
            },
            rate_limit: RateLimitConfig {
                webhook_per_second: env::var("RATE_LIMIT_WEBHOOKS_PER_SECOND")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                webhook_burst: env::var("RATE_LIMIT_WEBHOOKS_BURST")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .unwrap_or(50),
            },
            log_format: match env::var("LOG_FORMAT") {
                Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
        })
    }

    /// Read the OAuth client settings from `GOOGLE_CREDENTIALS_PATH`.
    pub fn load_oauth_client(&self) -> Result<OAuthClientConfig, ConfigError> {
        let path = &self.google.credentials_path;
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::File(path.display().to_string(), e.to_string()))?;
        OAuthClientConfig::from_json(&content)
            .map_err(|e| ConfigError::File(path.display().to_string(), e))
    }
}

/// A required variable that is unset or blank counts as missing.
fn non_empty(name: &str, value: Option<String>) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingEnv(name.to_string())),
    }
}

impl OAuthClientConfig {
    pub fn from_json(content: &str) -> Result<Self, String> {
        let file: OAuthClientFile =
            serde_json::from_str(content).map_err(|e| format!("malformed JSON: {}", e))?;

        let secret = file
            .installed
            .or(file.web)
            .ok_or_else(|| "expected an `installed` or `web` client block".to_string())?;

        let redirect_uri = secret
            .redirect_uris
            .into_iter()
            .next()
            .ok_or_else(|| "client block has no redirect_uris".to_string())?;

        Ok(OAuthClientConfig {
            client_id: secret.client_id,
            client_secret: secret.client_secret,
            redirect_uri,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),

    #[error("Unusable configuration file {0}: {1}")]
    File(String, String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            slack: SlackConfig {
                signing_secret: String::new(),
            },
            google: GoogleConfig {
                credentials_path: "credentials.json".into(),
                scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            },
            storage: StorageConfig {
                tokens_path: "tokens.json".into(),
                rooms_path: "rooms.json".into(),
            },
            booking: BookingConfig {
                time_zone: "America/Buenos_Aires".to_string(),
                calendar_id: "primary".to_string(),
                reservation_minutes: 30,
                support_contact: "the office admins".to_string(),
            },
            rate_limit: RateLimitConfig {
                webhook_per_second: 10,
                webhook_burst: 50,
            },
            log_format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_installed_client_block() {
        let json = r#"{"installed":{"client_id":"id-1","client_secret":"s3cret","redirect_uris":["urn:ietf:wg:oauth:2.0:oob","http://localhost"]}}"#;
        let client = OAuthClientConfig::from_json(json).unwrap();
        assert_eq!(client.client_id, "id-1");
        assert_eq!(client.client_secret, "s3cret");
        assert_eq!(client.redirect_uri, "urn:ietf:wg:oauth:2.0:oob");
    }

    #[test]
    fn falls_back_to_web_client_block() {
        let json = r#"{"web":{"client_id":"w","client_secret":"x","redirect_uris":["https://ncal.example/cb"]}}"#;
        let client = OAuthClientConfig::from_json(json).unwrap();
        assert_eq!(client.redirect_uri, "https://ncal.example/cb");
    }

    #[test]
    fn rejects_client_file_without_redirect_uri() {
        let json = r#"{"installed":{"client_id":"id","client_secret":"s"}}"#;
        assert!(OAuthClientConfig::from_json(json).is_err());
        assert!(OAuthClientConfig::from_json("not json").is_err());
        assert!(OAuthClientConfig::from_json("{}").is_err());
    }

    #[test]
    fn blank_signing_secret_is_missing() {
        for value in [None, Some(""), Some("   ")] {
            assert!(matches!(
                non_empty("SLACK_SIGNING_SECRET", value.map(str::to_string)),
                Err(ConfigError::MissingEnv(name)) if name == "SLACK_SIGNING_SECRET"
            ));
        }
        assert_eq!(
            non_empty("SLACK_SIGNING_SECRET", Some("8f74".to_string())).unwrap(),
            "8f74"
        );
    }

    #[test]
    fn default_config_books_half_an_hour() {
        let config = Config::default();
        assert_eq!(config.booking.reservation_minutes, 30);
        assert_eq!(config.booking.calendar_id, "primary");
        assert_eq!(config.google.scopes.len(), 2);
    }
}
