use std::path::PathBuf;
use std::time::Duration;

/// Page to monitor. Absent when the watcher only takes part in restarts.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub url: String,
    pub item_selector: String,
    pub id_attr: String,
    pub date_selector: String,
    pub snapshot_path: PathBuf,
    pub fetch_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub source: Option<SourceConfig>,
    pub label: String,
    pub signal_path: PathBuf,

    pub bridge_url: String,
    pub primary_chat: String,
    pub status_keyword: String,

    pub detect_interval: Duration,
    pub signal_poll_interval: Duration,
    pub event_poll_interval: Duration,
    pub cooldown: Duration,
    pub exit_delay: Duration,
    pub utc_offset_hours: i32,

    pub ready_attempts: u32,
    pub ready_retry_delay: Duration,
}

/// `data/<slug>.snapshot.json` for a human label.
pub fn default_snapshot_path(label: &str) -> PathBuf {
    let slug: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let slug = if slug.is_empty() { "source".to_string() } else { slug };
    PathBuf::from("data").join(format!("{slug}.snapshot.json"))
}
