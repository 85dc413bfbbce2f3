//! Activity logs: per-study click counters and chat transcripts
//!
//! Failures are logged and swallowed; activity logging never fails a request.

use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::auth::CallerIdentity;
use crate::types::StudyRecord;

const CLICKS_FILE: &str = "study_clicks.log";
const CHAT_HISTORY_FILE: &str = "chat_history.log";

/// Writer for the activity log files
#[derive(Debug)]
pub struct ActivityLog {
    clicks_path: PathBuf,
    chat_path: PathBuf,
    /// Serializes the read-modify-write of the clicks file
    clicks_lock: Mutex<()>,
}

impl ActivityLog {
    pub fn new(logs_dir: impl AsRef<Path>) -> Self {
        let logs_dir = logs_dir.as_ref();
        Self {
            clicks_path: logs_dir.join(CLICKS_FILE),
            chat_path: logs_dir.join(CHAT_HISTORY_FILE),
            clicks_lock: Mutex::new(()),
        }
    }

    pub fn clicks_path(&self) -> &Path {
        &self.clicks_path
    }

    pub fn chat_path(&self) -> &Path {
        &self.chat_path
    }

    /// Increment the click counter line of a study
    pub async fn record_click(&self, study: &StudyRecord) {
        let _guard = self.clicks_lock.lock().await;
        if let Err(e) = self.bump_click(study).await {
            tracing::warn!("Failed to log study click for {}: {}", study.id, e);
        }
    }

    async fn bump_click(&self, study: &StudyRecord) -> std::io::Result<()> {
        let existing = match tokio::fs::read_to_string(&self.clicks_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };

        let identifier = format!("Study: {} (ID: {})", study.title, study.id);
        let updated = bump_line(&existing, &identifier);

        if let Some(parent) = self.clicks_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.clicks_path, updated).await
    }

    /// Append one chat exchange to the transcript log
    pub async fn record_chat(&self, user: &CallerIdentity, study_id: &str, history: &serde_json::Value) {
        if let Err(e) = self.append_chat(user, study_id, history).await {
            tracing::warn!("Failed to log chat history for study {}: {}", study_id, e);
        }
    }

    async fn append_chat(&self, user: &CallerIdentity, study_id: &str, history: &serde_json::Value) -> std::io::Result<()> {
        let who = user.email.as_deref().unwrap_or(&user.uid);
        let body = serde_json::to_string_pretty(history).map_err(std::io::Error::other)?;
        let entry = format!(
            "--- User: {} | Study ID: {} | Timestamp: {} ---\n{}\n\n",
            who,
            study_id,
            Utc::now().to_rfc3339(),
            body
        );

        if let Some(parent) = self.chat_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.chat_path)
            .await?;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await
    }
}

/// Rewrite the counter line starting with `identifier`, or add it with one click
fn bump_line(content: &str, identifier: &str) -> String {
    let mut found = false;
    let mut lines: Vec<String> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            if !found && line.starts_with(identifier) {
                found = true;
                let count = line
                    .rsplit_once("Clicks: ")
                    .and_then(|(_, n)| n.trim().parse::<u64>().ok())
                    .unwrap_or(0);
                format!("{} - Clicks: {}", identifier, count + 1)
            } else {
                line.to_string()
            }
        })
        .collect();

    if !found {
        lines.push(format!("{} - Clicks: 1", identifier));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewStudy;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn study(title: &str) -> StudyRecord {
        StudyRecord::new(
            "r1",
            NewStudy {
                title: title.into(),
                abstract_text: "A".into(),
                brief_description: "B".into(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_bump_line() {
        let once = bump_line("", "Study: A (ID: 1)");
        assert_eq!(once, "Study: A (ID: 1) - Clicks: 1\n");
        let twice = bump_line(&once, "Study: A (ID: 1)");
        assert_eq!(twice, "Study: A (ID: 1) - Clicks: 2\n");
        let other = bump_line(&twice, "Study: B (ID: 2)");
        assert_eq!(other.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_clicks_are_counted() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(ActivityLog::new(dir.path().join("logs")));
        let s = study("Popular");

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let log = log.clone();
                let s = s.clone();
                tokio::spawn(async move { log.record_click(&s).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        let content = std::fs::read_to_string(log.clicks_path()).unwrap();
        assert_eq!(content.trim(), format!("Study: Popular (ID: {}) - Clicks: 10", s.id));
    }

    #[tokio::test]
    async fn test_chat_history_appends() {
        let dir = TempDir::new().unwrap();
        let log = ActivityLog::new(dir.path());
        let user = CallerIdentity {
            uid: "u1".into(),
            email: Some("u1@example.org".into()),
            name: None,
        };

        log.record_chat(&user, "s1", &serde_json::json!([{"role": "user", "text": "hi"}])).await;
        log.record_chat(&user, "s1", &serde_json::json!([])).await;

        let content = std::fs::read_to_string(log.chat_path()).unwrap();
        assert_eq!(content.matches("--- User: u1@example.org | Study ID: s1").count(), 2);
        assert!(content.contains("\"role\": \"user\""));
    }
}
