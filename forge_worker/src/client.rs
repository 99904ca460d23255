use log::debug;
use reqwest::blocking::Client;

use forge_core::error::{Error, Result};
use forge_core::task::{JudgeResult, Task};

/// Blocking client for the judge endpoints of the web server. One
/// instance lives for the whole worker; reqwest pools the connection
/// underneath.
pub struct ApiClient {
    base: String,
    token: String,
    http: Client,
}

impl ApiClient {
    pub fn new(base: &str, token: &str) -> Result<Self> {
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http: Client::builder().build()?,
        })
    }

    /// Polls for a waiting task. `have_task: 0` means the queue is
    /// empty and the caller should sleep and retry.
    pub fn fetch_task(&self) -> Result<Option<Task>> {
        let url = format!(
            "{}/api/waiting_judge?session_id={}",
            self.base, self.token
        );
        let body: serde_json::Value = self.http.get(&url).send()?.json()?;
        debug!("waiting_judge: {}", body);

        if body.get("have_task").and_then(|v| v.as_u64()) != Some(1) {
            return Ok(None);
        }
        let task: Task = serde_json::from_value(body)
            .map_err(|e| Error::Config(format!("malformed task record: {}", e)))?;
        Ok(Some(task))
    }

    /// Uploads one progressive result snapshot. Called after every
    /// state transition, so the server can live-render the judgement.
    pub fn upload(&self, judge_id: u64, result: &JudgeResult) -> Result<()> {
        let url = format!(
            "{}/api/update_judge/{}?session_id={}",
            self.base, judge_id, self.token
        );
        let payload = serde_json::json!({
            "result": serde_json::to_string(result)?,
        });
        self.http.post(&url).json(&payload).send()?.error_for_status()?;
        Ok(())
    }
}
