use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use scraper::Selector;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::Target;

pub const DEFAULT_INTERVAL_MINUTES: f64 = 5.0;
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
const DEFAULT_PUBLIC_DIR: &str = "public";

/// On-disk shape of `config.json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    interval_minutes: Option<f64>,
    user_agent: Option<String>,
    #[serde(default)]
    urls: Vec<RawTarget>,
    public_dir: Option<PathBuf>,
    summary_model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTarget {
    Url(String),
    #[serde(rename_all = "camelCase")]
    Detailed {
        url: String,
        title: Option<String>,
        selector: Option<String>,
        regex: Option<String>,
        regex_flags: Option<String>,
        #[serde(default)]
        dynamic_data: bool,
    },
}

/// Validated monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// File the configuration was read from; re-read every cycle.
    pub source: PathBuf,
    pub interval: Duration,
    pub user_agent: String,
    pub targets: Vec<Target>,
    /// Root of the tree shared with the browsing interface.
    pub public_dir: PathBuf,
    pub summary_model: Option<String>,
}

impl MonitorConfig {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&text, path)
    }

    /// Validate configuration text; relative paths resolve against the
    /// directory of `source`.
    pub fn parse(text: &str, source: &Path) -> Result<Self, AppError> {
        let raw: RawConfig = serde_json::from_str(text).map_err(|e| {
            AppError::Configuration(format!("invalid JSON in {}: {e}", source.display()))
        })?;

        if raw.urls.is_empty() {
            return Err(AppError::Configuration(
                "config must include a non-empty urls array".into(),
            ));
        }

        let minutes = raw.interval_minutes.unwrap_or(DEFAULT_INTERVAL_MINUTES);
        if !minutes.is_finite() || minutes < 1.0 {
            return Err(AppError::Configuration(
                "intervalMinutes must be a number >= 1".into(),
            ));
        }

        let targets = raw
            .urls
            .into_iter()
            .map(validate_target)
            .collect::<Result<Vec<_>, _>>()?;

        let base = source.parent().unwrap_or_else(|| Path::new("."));
        let public_dir = base.join(
            raw.public_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PUBLIC_DIR)),
        );

        let interval = Duration::try_from_secs_f64(minutes * 60.0).map_err(|_| {
            AppError::Configuration(format!("intervalMinutes {minutes} is out of range"))
        })?;

        Ok(Self {
            source: source.to_path_buf(),
            interval,
            user_agent: raw
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            targets,
            public_dir,
            summary_model: raw.summary_model,
        })
    }

    /// Snapshot root: `{publicDir}/data`.
    pub fn data_dir(&self) -> PathBuf {
        self.public_dir.join("data")
    }

    /// Diff and event root: `{publicDir}/logs`.
    pub fn log_dir(&self) -> PathBuf {
        self.public_dir.join("logs")
    }

    /// Keys claimed by more than one distinct title.
    pub fn key_collisions(&self) -> Vec<(String, Vec<String>)> {
        let mut by_key: HashMap<String, Vec<String>> = HashMap::new();
        for target in &self.targets {
            let titles = by_key.entry(target.key()).or_default();
            if !titles.contains(&target.title) {
                titles.push(target.title.clone());
            }
        }
        let mut collisions: Vec<_> = by_key
            .into_iter()
            .filter(|(_, titles)| titles.len() > 1)
            .collect();
        collisions.sort();
        collisions
    }

    /// Log every storage key claimed by more than one title.
    pub fn warn_key_collisions(&self) {
        for (key, titles) in self.key_collisions() {
            tracing::warn!(%key, ?titles, "Titles share a storage key; their snapshots will mix");
        }
    }
}

fn validate_target(raw: RawTarget) -> Result<Target, AppError> {
    match raw {
        RawTarget::Url(url) => {
            validate_url(&url)?;
            Ok(Target::new(url.clone(), url))
        }
        RawTarget::Detailed {
            url,
            title,
            selector,
            regex,
            regex_flags,
            dynamic_data,
        } => {
            validate_url(&url)?;
            let selector = selector.filter(|s| !s.trim().is_empty());
            if let Some(sel) = &selector {
                Selector::parse(sel).map_err(|e| {
                    AppError::Configuration(format!("Invalid selector for url {url}: {e}"))
                })?;
            }
            let pattern = match regex.filter(|r| !r.is_empty()) {
                Some(source) => Some(compile_pattern(&url, &source, regex_flags.as_deref())?),
                None => None,
            };
            Ok(Target {
                title: title.unwrap_or_else(|| url.clone()),
                url,
                selector,
                pattern,
                dynamic_data,
            })
        }
    }
}

fn validate_url(url: &str) -> Result<(), AppError> {
    if url.trim().is_empty() {
        return Err(AppError::Configuration(
            "Each url entry must have a 'url' field".into(),
        ));
    }
    Ok(())
}

/// Compile an extraction pattern with JavaScript-style flags.
///
/// `i`, `m`, `s` map to the regex builder options; `g`, `u`, `y` are
/// accepted and ignored since only the first match is kept.
fn compile_pattern(url: &str, source: &str, flags: Option<&str>) -> Result<Regex, AppError> {
    let mut builder = RegexBuilder::new(source);
    for flag in flags.unwrap_or("g").chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'g' | 'u' | 'y' | 'd' => {}
            other => {
                return Err(AppError::Configuration(format!(
                    "Invalid regex flag '{other}' for url {url}"
                )));
            }
        }
    }
    builder
        .build()
        .map_err(|e| AppError::Configuration(format!("Invalid regex for url {url}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<MonitorConfig, AppError> {
        MonitorConfig::parse(text, Path::new("/srv/pagewatch/config.json"))
    }

    #[test]
    fn test_defaults() {
        let config = parse(r#"{"urls": ["http://example.test/a"]}"#).unwrap();
        assert_eq!(config.interval, Duration::from_secs(300));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.targets.len(), 1);
        assert_eq!(config.targets[0].title, "http://example.test/a");
        assert_eq!(config.public_dir, PathBuf::from("/srv/pagewatch/public"));
        assert_eq!(config.data_dir(), PathBuf::from("/srv/pagewatch/public/data"));
        assert_eq!(config.log_dir(), PathBuf::from("/srv/pagewatch/public/logs"));
    }

    #[test]
    fn test_detailed_target() {
        let config = parse(
            r##"{
                "intervalMinutes": 2,
                "userAgent": "pagewatch-test",
                "urls": [{
                    "url": "http://example.test/a",
                    "title": "A",
                    "selector": "#price",
                    "regex": "\\d+ EUR",
                    "regexFlags": "gi",
                    "dynamicData": true
                }]
            }"##,
        )
        .unwrap();
        let target = &config.targets[0];
        assert_eq!(config.interval, Duration::from_secs(120));
        assert_eq!(config.user_agent, "pagewatch-test");
        assert_eq!(target.title, "A");
        assert_eq!(target.selector.as_deref(), Some("#price"));
        assert!(target.dynamic_data);
        let pattern = target.pattern.as_ref().unwrap();
        assert!(pattern.is_match("12 eur"));
    }

    #[test]
    fn test_rejects_empty_urls() {
        let err = parse(r#"{"urls": []}"#).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("non-empty urls"));
    }

    #[test]
    fn test_rejects_short_interval() {
        let err = parse(r#"{"intervalMinutes": 0.5, "urls": ["http://a"]}"#).unwrap_err();
        assert!(err.to_string().contains("intervalMinutes"));
    }

    #[test]
    fn test_rejects_oversized_interval() {
        let err = parse(r#"{"intervalMinutes": 1e300, "urls": ["http://a"]}"#).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_rejects_entry_without_url() {
        assert!(parse(r#"{"urls": [{"title": "no url"}]}"#).is_err());
    }

    #[test]
    fn test_rejects_invalid_regex() {
        let err = parse(r#"{"urls": [{"url": "http://a", "regex": "("}]}"#).unwrap_err();
        assert!(err.to_string().contains("Invalid regex"));
    }

    #[test]
    fn test_rejects_unknown_regex_flag() {
        let err =
            parse(r#"{"urls": [{"url": "http://a", "regex": "a", "regexFlags": "q"}]}"#).unwrap_err();
        assert!(err.to_string().contains("flag"));
    }

    #[test]
    fn test_rejects_invalid_selector() {
        let err = parse(r#"{"urls": [{"url": "http://a", "selector": "[[["}]}"#).unwrap_err();
        assert!(err.to_string().contains("selector"));
    }

    #[test]
    fn test_key_collisions_are_reported() {
        let config = parse(
            r#"{"urls": [
                {"url": "http://a", "title": "a.b"},
                {"url": "http://b", "title": "a-b"},
                {"url": "http://c", "title": "c"}
            ]}"#,
        )
        .unwrap();
        let collisions = config.key_collisions();
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].0, "a_b");
        assert_eq!(collisions[0].1.len(), 2);
    }

    #[test]
    fn test_load_missing_file_is_configuration_error() {
        let err = MonitorConfig::load(Path::new("/definitely/not/here/config.json")).unwrap_err();
        assert!(err.is_fatal());
    }
}
