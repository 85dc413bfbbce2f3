//! Chat-with-paper through an external program

use std::process::Stdio;
use tokio::process::Command;

use crate::config::ChatConfig;
use crate::error::{Error, Result};

/// Runs the configured chat program for one prompt
#[derive(Debug, Clone)]
pub struct ChatRunner {
    config: ChatConfig,
}

impl ChatRunner {
    pub fn new(config: ChatConfig) -> Self {
        Self { config }
    }

    /// Ask the program about a paper.
    ///
    /// `context` is the paper text the program answers from and `history`
    /// the prior exchange as a JSON array. Returns the JSON object the
    /// program printed.
    pub async fn ask(&self, prompt: &str, context: &str, history: &serde_json::Value) -> Result<serde_json::Value> {
        let script = &self.config.script_path;
        if !tokio::fs::try_exists(script).await.unwrap_or(false) {
            tracing::error!("Chat script not found at {}", script.display());
            return Err(Error::internal("Chatbot script not found on the server."));
        }

        let history = serde_json::to_string(history)?;
        let output = Command::new(&self.config.program)
            .arg(script)
            .arg("--prompt")
            .arg(prompt)
            .arg("--thesis_text")
            .arg(context)
            .arg("--chat_history")
            .arg(history)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::Process {
                message: format!("Failed to start chat program '{}': {}", self.config.program, e),
                stderr: String::new(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            tracing::error!("Chat program exited with {}: {}", output.status, stderr);
            return Err(Error::Process {
                message: "An error occurred in the chatbot script.".to_string(),
                stderr,
            });
        }

        tracing::debug!("Raw chat program output: {}", stdout);
        extract_json_object(&stdout).ok_or_else(|| Error::Process {
            message: "Failed to parse the response from the chatbot script.".to_string(),
            stderr,
        })
    }
}

/// Parse the span from the first `{` to the last `}`, ignoring surrounding noise
pub fn extract_json_object(output: &str) -> Option<serde_json::Value> {
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&output[start..=end]).ok()
}
