//! Terminal-state notifications.

use std::thread;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Runtime;

use crate::config::NotificationConfig;
use crate::model::Job;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to start notifier runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Notifier panicked")]
    Panicked,
}

/// Told once about every job that reaches COMPLETED or FAILED.
///
/// Errors are logged by the caller and never change the job outcome.
pub trait JobNotifier: Send + Sync {
    fn job_finished(&self, job: &Job) -> Result<(), NotifyError>;
}

pub struct NoopNotifier;

impl JobNotifier for NoopNotifier {
    fn job_finished(&self, _job: &Job) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// POSTs the finished job as JSON.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
    runtime: Runtime,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
            runtime,
        })
    }

    pub fn from_config(config: &NotificationConfig) -> Result<Self, NotifyError> {
        Self::new(
            config.webhook_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl WebhookNotifier {
    fn post(&self, job: &Job) -> Result<(), NotifyError> {
        self.runtime.block_on(async {
            self.client
                .post(&self.url)
                .json(job)
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        })
    }
}

impl JobNotifier for WebhookNotifier {
    fn job_finished(&self, job: &Job) -> Result<(), NotifyError> {
        // block_on panics on a thread that already drives a runtime
        if tokio::runtime::Handle::try_current().is_ok() {
            return thread::scope(|scope| match scope.spawn(|| self.post(job)).join() {
                Ok(result) => result,
                Err(_) => Err(NotifyError::Panicked),
            });
        }
        self.post(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobState, PluginType, SelectedObjects};
    use std::collections::BTreeMap;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn finished_job() -> Job {
        let mut job = Job::new(
            "hooked",
            "fixity-check",
            PluginType::AipToAip,
            BTreeMap::new(),
            SelectedObjects::ids(["a"]),
            "admin",
        );
        job.transition(JobState::Running).unwrap();
        job.transition(JobState::Completed).unwrap();
        job
    }

    /// Answers one request with `status` and returns the raw request.
    fn serve_once(status: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/hooks/jobs", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + length || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!("HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status);
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });
        (url, handle)
    }

    #[test]
    fn test_webhook_posts_job_json() {
        let (url, server) = serve_once("200 OK");
        let notifier = WebhookNotifier::new(url, Duration::from_secs(5)).unwrap();
        let job = finished_job();

        notifier.job_finished(&job).unwrap();

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /hooks/jobs"));
        assert!(request.contains(&job.id));
        assert!(request.contains("\"COMPLETED\""));
    }

    #[test]
    fn test_webhook_error_status() {
        let (url, server) = serve_once("500 Internal Server Error");
        let notifier = WebhookNotifier::new(url, Duration::from_secs(5)).unwrap();

        let result = notifier.job_finished(&finished_job());
        server.join().unwrap();
        assert!(matches!(result, Err(NotifyError::Http(_))));
    }

    #[test]
    fn test_webhook_from_inside_a_runtime() {
        let (url, server) = serve_once("204 No Content");
        let notifier = WebhookNotifier::new(url, Duration::from_secs(5)).unwrap();
        let job = finished_job();
        let host = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let result = host.block_on(async { notifier.job_finished(&job) });

        assert!(result.is_ok());
        assert!(server.join().unwrap().contains(&job.id));
    }

    #[test]
    fn test_from_config() {
        let notifier = WebhookNotifier::from_config(&NotificationConfig {
            webhook_url: "http://127.0.0.1:9/x".to_string(),
            timeout_secs: 1,
        })
        .unwrap();
        assert_eq!(notifier.url(), "http://127.0.0.1:9/x");
        assert!(NoopNotifier.job_finished(&finished_job()).is_ok());
    }
}
