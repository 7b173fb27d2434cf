use reunite_core::{DetectorBackend, MatchThresholds, ThresholdError};
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the embedding encryption key file.
    pub key_path: PathBuf,
    /// Directory holding uploaded case photos.
    pub upload_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum cosine distance for a candidate to appear in scan results.
    pub include_threshold: f32,
    /// Maximum cosine distance for a confident match.
    pub match_threshold: f32,
    /// Maximum cosine distance for a candidate to trigger an alert.
    pub alert_threshold: f32,
    /// How many top-ranked results are considered for alerting.
    pub alert_top_k: usize,
    /// Outbound notification queue depth.
    pub alert_queue_depth: usize,
    /// Location tag included in match alerts.
    pub scan_location: String,
    /// Fallback officer callback number for alerts.
    pub officer_contact: String,
    /// Officer session lifetime in seconds.
    pub session_ttl_secs: i64,
    /// Detector fallback order for embedding extraction.
    pub detector_chain: Vec<DetectorBackend>,
    /// Optional officer login provisioned at startup:
    /// (username, password, contact phone).
    pub bootstrap_officer: Option<(String, String, Option<String>)>,
}

impl Config {
    /// Load configuration from `REUNITE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("reunite");

        let db_path = env_path("REUNITE_DB_PATH", data_dir.join("cases.db"));
        let key_path = env_path("REUNITE_KEY_PATH", data_dir.join("embedding.key"));
        let upload_dir = env_path("REUNITE_UPLOAD_DIR", data_dir.join("uploads"));
        let model_dir = env_path("REUNITE_MODEL_DIR", data_dir.join("models"));

        let bootstrap_officer = match (
            std::env::var("REUNITE_OFFICER_USER").ok(),
            std::env::var("REUNITE_OFFICER_PASSWORD").ok(),
        ) {
            (Some(user), Some(password)) => Some((
                user,
                password,
                std::env::var("REUNITE_OFFICER_PHONE").ok(),
            )),
            _ => None,
        };

        Self {
            db_path,
            key_path,
            upload_dir,
            model_dir,
            include_threshold: env_f32("REUNITE_INCLUDE_THRESHOLD", 0.70),
            match_threshold: env_f32("REUNITE_MATCH_THRESHOLD", 0.55),
            alert_threshold: env_f32("REUNITE_ALERT_THRESHOLD", 0.60),
            alert_top_k: env_usize("REUNITE_ALERT_TOP_K", 2),
            alert_queue_depth: env_usize("REUNITE_ALERT_QUEUE_DEPTH", 64),
            scan_location: std::env::var("REUNITE_SCAN_LOCATION")
                .unwrap_or_else(|_| "Unknown Location".to_string()),
            officer_contact: std::env::var("REUNITE_OFFICER_CONTACT")
                .unwrap_or_else(|_| "+91 0000000000".to_string()),
            session_ttl_secs: env_i64("REUNITE_SESSION_TTL_SECS", 3600),
            detector_chain: parse_detector_chain(
                &std::env::var("REUNITE_DETECTOR_CHAIN").unwrap_or_default(),
            ),
            bootstrap_officer,
        }
    }

    /// Matcher thresholds; fails when match > include.
    pub fn thresholds(&self) -> Result<MatchThresholds, ThresholdError> {
        MatchThresholds::new(self.include_threshold, self.match_threshold)
    }
}

/// Parse a comma-separated detector order ("fast,balanced,accurate").
/// Unknown entries are skipped with a warning; an empty result falls
/// back to the default chain inside the extraction pipeline.
fn parse_detector_chain(raw: &str) -> Vec<DetectorBackend> {
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .filter_map(|part| match part.parse::<DetectorBackend>() {
            Ok(backend) => Some(backend),
            Err(err) => {
                tracing::warn!(%err, "ignoring detector chain entry");
                None
            }
        })
        .collect()
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detector_chain() {
        assert_eq!(
            parse_detector_chain("accurate, fast"),
            vec![DetectorBackend::Accurate, DetectorBackend::Fast]
        );
        assert_eq!(
            parse_detector_chain("fast,bogus,balanced"),
            vec![DetectorBackend::Fast, DetectorBackend::Balanced]
        );
        assert!(parse_detector_chain("").is_empty());
    }
}
