//! Configuration management for the upload server
//!
//! Everything is read from the environment exactly once at startup. The
//! resulting [`Config`] is immutable and handed to the components that need
//! it.

use std::env;
use std::path::PathBuf;

use crate::error::ConfigError;

/// Default request body limit: 100MB
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 100 * 1024 * 1024;

/// Default cap on parts per upload, same as the S3 multipart limit
pub const DEFAULT_MAX_TOTAL_PARTS: u32 = 10_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub signing: SigningConfig,
    pub challenge: ChallengeConfig,
    pub object_store: Option<ObjectStoreConfig>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Root of the final artifacts (`<root>/<uuid>/<filename>`)
    pub upload_dir: PathBuf,
    /// Root of the chunk working areas (`<root>/<uuid>/<filename>/<index>`)
    pub chunks_dir: PathBuf,
    pub max_request_bytes: usize,
    /// Larger `total_parts` values are rejected before touching the disk
    pub max_total_parts: u32,
    /// Reject a finalize whose assembled size differs from the declared one
    pub verify_total_size: bool,
}

#[derive(Clone)]
pub struct SigningConfig {
    pub client_secret_key: String,
}

// Keep the secret out of logs.
impl std::fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningConfig")
            .field("client_secret_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChallengeConfig {
    /// `bucket/dataset/filename` identifiers allowed through the challenge
    pub allowed_transfers: Vec<String>,
    pub expected_bucket: Option<String>,
    pub content_length_range: Option<(u64, u64)>,
}

impl ChallengeConfig {
    pub fn is_empty(&self) -> bool {
        self.allowed_transfers.is_empty()
            && self.expected_bucket.is_none()
            && self.content_length_range.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            upload_dir: PathBuf::from("media/upload"),
            chunks_dir: PathBuf::from("media/chunks"),
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            max_total_parts: DEFAULT_MAX_TOTAL_PARTS,
            verify_total_size: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = UploadConfig::default();

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT")?.unwrap_or(8000),
            },
            upload: UploadConfig {
                upload_dir: env::var("UPLOAD_DIRECTORY")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.upload_dir),
                chunks_dir: env::var("CHUNKS_DIRECTORY")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.chunks_dir),
                max_request_bytes: parse_var("MAX_REQUEST_BYTES")?
                    .unwrap_or(defaults.max_request_bytes),
                max_total_parts: parse_var("MAX_TOTAL_PARTS")?
                    .unwrap_or(defaults.max_total_parts),
                verify_total_size: parse_var("VERIFY_TOTAL_SIZE")?.unwrap_or(false),
            },
            signing: SigningConfig {
                client_secret_key: env::var("AWS_CLIENT_SECRET_KEY")
                    .map_err(|_| ConfigError::Missing("AWS_CLIENT_SECRET_KEY"))?,
            },
            challenge: ChallengeConfig {
                allowed_transfers: env::var("CHALLENGE_ALLOWED_TRANSFERS")
                    .map(|v| parse_list(&v))
                    .unwrap_or_default(),
                expected_bucket: env::var("CHALLENGE_EXPECTED_BUCKET").ok(),
                content_length_range: env::var("CHALLENGE_CONTENT_LENGTH_RANGE")
                    .ok()
                    .map(|v| parse_range("CHALLENGE_CONTENT_LENGTH_RANGE", &v))
                    .transpose()?,
            },
            object_store: match (env::var("S3_ACCESS_KEY"), env::var("S3_SECRET_KEY")) {
                (Ok(access_key), Ok(secret_key)) => Some(ObjectStoreConfig {
                    endpoint: env::var("S3_ENDPOINT").ok(),
                    access_key,
                    secret_key,
                    region: env::var("S3_REGION").ok(),
                }),
                _ => None,
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        Err(_) => Ok(None),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_range(name: &'static str, raw: &str) -> Result<(u64, u64), ConfigError> {
    let invalid = || ConfigError::Invalid {
        name,
        value: raw.to_string(),
    };
    let (min, max) = raw.split_once(',').ok_or_else(invalid)?;
    let min: u64 = min.trim().parse().map_err(|_| invalid())?;
    let max: u64 = max.trim().parse().map_err(|_| invalid())?;
    if min > max {
        return Err(invalid());
    }
    Ok((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_skips_blanks() {
        assert_eq!(
            parse_list(" a/b/c.txt, ,d/e/f.bin "),
            vec!["a/b/c.txt".to_string(), "d/e/f.bin".to_string()]
        );
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("R", "0, 15000000").unwrap(), (0, 15_000_000));
        assert!(parse_range("R", "10").is_err());
        assert!(parse_range("R", "10,1").is_err());
        assert!(parse_range("R", "a,b").is_err());
    }

    #[test]
    fn test_challenge_config_is_empty() {
        assert!(ChallengeConfig::default().is_empty());
        let config = ChallengeConfig {
            expected_bucket: Some("uploads".into()),
            ..Default::default()
        };
        assert!(!config.is_empty());
    }
}
