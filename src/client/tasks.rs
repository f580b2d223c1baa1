//! Asynchronous task waiting
//!
//! Mutating calls may spawn server-side jobs, announced in the `X-Esu-Tasks`
//! response header. Each job is polled at `v1/job/{id}` until it stops being
//! in progress, fails, or the task timeout elapses.

use super::arguments::Arguments;
use super::error::{Error, Result};
use super::executor::{Body, Executed};
use super::manager::Manager;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

/// Identifier of a server-side job. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(String);

impl TaskId {
    /// Wrap a single ID. Returns `None` for a blank value.
    pub fn new(id: &str) -> Option<Self> {
        let id = id.trim();
        (!id.is_empty()).then(|| Self(id.to_string()))
    }

    /// Parse a comma-separated header value, skipping blank entries
    pub fn parse_list(header: &str) -> Vec<Self> {
        header.split(',').filter_map(Self::new).collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job record returned by `v1/job/{id}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub name: String,
}

/// Coarse job state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    InProgress,
    Error,
    Finished,
}

impl Job {
    pub fn state(&self) -> JobStatus {
        match self.status.as_str() {
            "error" => JobStatus::Error,
            "in_progress" => JobStatus::InProgress,
            _ => JobStatus::Finished,
        }
    }
}

enum TaskState {
    Polling,
    Done,
    Failed { step: String },
    TimedOut { waited: Duration },
}

impl Manager {
    /// Poll a job until it finishes
    pub async fn wait_task(&self, task_id: &TaskId) -> Result<()> {
        async {
            tracing::info!("[bcc] Start waiting task {}...", task_id);

            let path = format!("v1/job/{}", task_id);
            let started = Instant::now();
            let mut state = TaskState::Polling;

            loop {
                state = match state {
                    TaskState::Polling => {
                        let job: Job = self
                            .get(&path, &Arguments::new())
                            .await?
                            .ok_or_else(|| Error::EmptyResponse { url: path.clone() })?;

                        match job.state() {
                            JobStatus::Finished => TaskState::Done,
                            JobStatus::Error => TaskState::Failed { step: job.name },
                            JobStatus::InProgress => {
                                self.scope.sleep(self.timing.retry_interval).await?;
                                let waited = started.elapsed();
                                if waited > self.timing.task_timeout {
                                    TaskState::TimedOut { waited }
                                } else {
                                    TaskState::Polling
                                }
                            }
                        }
                    }
                    TaskState::Done => {
                        tracing::info!("[bcc] End waiting task {}", task_id);
                        return Ok(());
                    }
                    TaskState::Failed { step } => {
                        tracing::error!("[bcc] Task {} in error status, step: {}", task_id, step);
                        return Err(Error::TaskFailed {
                            task_id: task_id.to_string(),
                            step,
                        });
                    }
                    TaskState::TimedOut { waited } => {
                        tracing::warn!(
                            "[bcc] Waiting task {} took more than {}s",
                            task_id,
                            self.timing.task_timeout.as_secs()
                        );
                        return Err(Error::TaskTimeout {
                            task_id: task_id.to_string(),
                            waited,
                        });
                    }
                };
            }
        }
        .instrument(self.span().clone())
        .await
    }

    /// Wait for each task in order, stopping at the first failure
    pub async fn wait_tasks(&self, tasks: &[TaskId]) -> Result<()> {
        for task in tasks {
            self.wait_task(task).await?;
        }
        Ok(())
    }

    /// Wait for the tasks of an executed exchange, then report its outcome.
    /// A failed outcome wins over a task error.
    pub(crate) async fn settle<T>(&self, executed: Executed<T>) -> Result<Body<T>> {
        let waited = self.wait_tasks(&executed.tasks).await;
        let body = executed.outcome?;
        waited?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::manager::Timing;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_timing() -> Timing {
        Timing {
            retry_interval: Duration::from_millis(10),
            lock_timeout: Duration::from_millis(100),
            task_timeout: Duration::from_millis(60),
            lock_poll_interval: Duration::from_millis(10),
        }
    }

    fn manager(server: &MockServer) -> Manager {
        Manager::with_client(reqwest::Client::new(), "test-token")
            .with_base_url(server.uri())
            .with_timing(fast_timing())
    }

    #[test]
    fn test_parse_list_skips_blanks() {
        let ids = TaskId::parse_list(" a1 , ,b2,, c3 ");
        let ids: Vec<&str> = ids.iter().map(TaskId::as_str).collect();
        assert_eq!(ids, vec!["a1", "b2", "c3"]);
    }

    #[test]
    fn test_parse_list_empty_header() {
        assert!(TaskId::parse_list("").is_empty());
        assert!(TaskId::parse_list(" , ").is_empty());
        assert!(TaskId::new("  ").is_none());
    }

    #[test]
    fn test_job_states() {
        let job = |status: &str| Job {
            status: status.to_string(),
            name: String::new(),
        };
        assert_eq!(job("error").state(), JobStatus::Error);
        assert_eq!(job("in_progress").state(), JobStatus::InProgress);
        assert_eq!(job("done").state(), JobStatus::Finished);
        assert_eq!(job("").state(), JobStatus::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_task_times_out() {
        use crate::client::manager::TASK_TIMEOUT;

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/job/stuck"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "in_progress", "name": "provision"})),
            )
            .mount(&server)
            .await;

        // default timing, the paused clock skips the sleeps
        let manager = Manager::with_client(reqwest::Client::new(), "test-token").with_base_url(server.uri());
        let task = TaskId::new("stuck").unwrap();
        let err = manager.wait_task(&task).await.unwrap_err();

        match err {
            Error::TaskTimeout { task_id, waited } => {
                assert_eq!(task_id, "stuck");
                assert!(waited > TASK_TIMEOUT);
            }
            other => panic!("expected task timeout, got {other:?}"),
        }
        assert!(server.received_requests().await.unwrap().len() >= 2);
    }

    #[tokio::test]
    async fn test_task_finishes_after_polling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/job/t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "in_progress", "name": "boot"})))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/job/t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "done", "name": "boot"})))
            .mount(&server)
            .await;

        let task = TaskId::new("t1").unwrap();
        manager(&server).wait_task(&task).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn test_wait_tasks_stops_at_first_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/job/bad"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "error", "name": "attach"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/job/never"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "done", "name": "x"})))
            .expect(0)
            .mount(&server)
            .await;

        let tasks = TaskId::parse_list("bad, never");
        let err = manager(&server).wait_tasks(&tasks).await.unwrap_err();

        assert!(matches!(err, Error::TaskFailed { ref step, .. } if step == "attach"));
    }

    #[tokio::test]
    async fn test_job_fetch_error_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/job/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let task = TaskId::new("gone").unwrap();
        let err = manager(&server).wait_task(&task).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }
}
