// databasebackup/src/backup/notify.rs
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::NotifySettings;
use crate::errors::{BackupError, Result};

pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// What a finished run reports to the admins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub database: String,
    pub bucket: String,
    pub remote_key: String,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
}

impl RunSummary {
    pub fn subject(&self) -> String {
        format!("[Backup] - MongoDB backup of {} successful", self.database)
    }

    pub fn body(&self) -> String {
        format!(
            "Hello admins,\nJust finished the MongoDB backup of {}.\nArchive: {}/{}\nStarted: {}\nFinished: {}\nAll is well!\nRegards,\nmongobackup",
            self.database, self.bucket, self.remote_key, self.started_at, self.finished_at
        )
    }
}

#[async_trait]
pub trait NotificationExecutor: Send + Sync {
    async fn notify_success(&self, summary: &RunSummary) -> Result<()>;
}

/// Posts the summary as a form to an email relay.
pub struct HttpNotifier {
    client: reqwest::Client,
    settings: NotifySettings,
}

impl HttpNotifier {
    pub fn new(settings: NotifySettings) -> Self {
        let client = client_or_default(reqwest::Client::builder().timeout(NOTIFY_TIMEOUT).build());
        HttpNotifier { client, settings }
    }

    pub fn form(&self, summary: &RunSummary) -> Vec<(&'static str, String)> {
        let mut form: Vec<(&'static str, String)> =
            self.settings.recipients.iter().map(|r| ("to_emails", r.clone())).collect();
        form.push(("subject", summary.subject()));
        form.push(("email_text", summary.body()));
        form
    }
}

fn client_or_default(built: reqwest::Result<reqwest::Client>) -> reqwest::Client {
    match built {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "failed to build notification client, falling back to one without a timeout");
            reqwest::Client::default()
        }
    }
}

#[async_trait]
impl NotificationExecutor for HttpNotifier {
    async fn notify_success(&self, summary: &RunSummary) -> Result<()> {
        if self.settings.recipients.is_empty() {
            return Err(BackupError::Notification("no recipients configured".into()));
        }

        let response = self
            .client
            .post(&self.settings.endpoint)
            .form(&self.form(summary))
            .send()
            .await
            .map_err(|e| BackupError::Notification(e.to_string()))?;
        response
            .error_for_status()
            .map_err(|e| BackupError::Notification(e.to_string()))?;

        info!(recipients = self.settings.recipients.len(), "success notification sent");
        Ok(())
    }
}
