//! Lock-retry executor
//!
//! Every HTTP call passes through [`Manager::execute`]. A 409 whose alias is
//! `object_locked` (or absent) means another operation holds the object:
//! the exchange is rebuilt and resent after [`RETRY_INTERVAL`] until the lock
//! ceiling. Everything else is decided on the first response.
//!
//! [`RETRY_INTERVAL`]: super::manager::RETRY_INTERVAL

use super::error::{sanitize_for_log, ApiError, ConflictBody, Error, Result};
use super::kubeconfig;
use super::manager::{Exchange, Manager};
use super::tasks::TaskId;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use tokio::time::Instant;

/// Response header listing the tasks spawned by a mutating call
pub const TASKS_HEADER: &str = "X-Esu-Tasks";

const OBJECT_LOCKED: &str = "object_locked";

/// What the caller wants done with a successful body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    Discard,
    Json,
    Kubeconfig,
}

/// Decoded successful response
#[derive(Debug)]
pub(crate) enum Body<T> {
    Empty,
    Value(T),
    Exported(PathBuf),
}

impl<T> Body<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Body::Value(value) => Some(value),
            Body::Empty | Body::Exported(_) => None,
        }
    }
}

/// Result of one executed exchange. Tasks are reported even when decoding
/// the body failed so the caller can still wait for them.
#[derive(Debug)]
pub(crate) struct Executed<T> {
    pub tasks: Vec<TaskId>,
    pub outcome: Result<Body<T>>,
}

impl<T> Executed<T> {
    fn failed(err: Error) -> Self {
        Self {
            tasks: Vec::new(),
            outcome: Err(err),
        }
    }
}

enum LockState {
    Send,
    Locked,
    Unlocked(Response),
}

impl Manager {
    pub(crate) async fn execute<T>(&self, exchange: &Exchange, target: Target) -> Executed<T>
    where
        T: DeserializeOwned,
    {
        let endpoint = exchange.endpoint();

        let response = match self.send_until_unlocked(exchange, &endpoint).await {
            Ok(response) => response,
            Err(err) => return Executed::failed(err),
        };

        let status = response.status();
        let task_header = response
            .headers()
            .get(TASKS_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match self.read_body(&endpoint, response).await {
            Ok(body) => body,
            Err(err) => return Executed::failed(err),
        };

        if !status.is_success() {
            tracing::error!(
                "[bcc] Error response {} on '{}': {}",
                status.as_u16(),
                endpoint,
                sanitize_for_log(&body)
            );
            return Executed::failed(ApiError::from_response(&endpoint, status.as_u16(), body).into());
        }
        tracing::debug!("[bcc] Success response on '{}'", endpoint);

        let tasks = task_header
            .as_deref()
            .map(TaskId::parse_list)
            .unwrap_or_default();
        if !tasks.is_empty() {
            tracing::debug!("[bcc] Tasks IDS: {}", task_header.unwrap_or_default());
        }

        Executed {
            tasks,
            outcome: self.decode(exchange, &endpoint, &body, target),
        }
    }

    async fn send_until_unlocked(&self, exchange: &Exchange, endpoint: &str) -> Result<Response> {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        let mut state = LockState::Send;

        loop {
            state = match state {
                LockState::Send => {
                    attempt += 1;
                    tracing::debug!("[bcc] Perform {} (attempt {})...", exchange.method, attempt);

                    let response = self.send(exchange, endpoint).await?;
                    if response.status() == StatusCode::CONFLICT {
                        let body = self.read_body(endpoint, response).await?;
                        check_conflict(endpoint, body)?;
                        LockState::Locked
                    } else {
                        LockState::Unlocked(response)
                    }
                }
                LockState::Locked => {
                    tracing::warn!(
                        "[bcc] Object '{}' locked. Try again in {}ms...",
                        endpoint,
                        self.timing.retry_interval.as_millis()
                    );
                    self.scope.sleep(self.timing.retry_interval).await?;

                    let waited = started.elapsed();
                    if waited > self.timing.lock_timeout {
                        tracing::warn!(
                            "[bcc] Waiting unlock for '{}' took more than {}s",
                            endpoint,
                            self.timing.lock_timeout.as_secs()
                        );
                        return Err(Error::LockTimeout {
                            url: endpoint.to_string(),
                            waited,
                        });
                    }
                    LockState::Send
                }
                LockState::Unlocked(response) => return Ok(response),
            };
        }
    }

    async fn send(&self, exchange: &Exchange, endpoint: &str) -> Result<Response> {
        self.scope
            .run(self.build(exchange).send())
            .await?
            .map_err(|source| Error::Transport {
                url: endpoint.to_string(),
                source,
            })
    }

    async fn read_body(&self, endpoint: &str, response: Response) -> Result<Vec<u8>> {
        let bytes = self
            .scope
            .run(response.bytes())
            .await?
            .map_err(|source| Error::Transport {
                url: endpoint.to_string(),
                source,
            })?;
        Ok(bytes.to_vec())
    }

    fn decode<T>(&self, exchange: &Exchange, endpoint: &str, body: &[u8], target: Target) -> Result<Body<T>>
    where
        T: DeserializeOwned,
    {
        if body.is_empty() || target == Target::Discard {
            return Ok(Body::Empty);
        }

        if target == Target::Kubeconfig || exchange.url.path().contains("config") {
            let file = kubeconfig::export(self.base_url(), &exchange.url, body)?;
            return Ok(Body::Exported(file));
        }

        serde_json::from_slice(body)
            .map(Body::Value)
            .map_err(|source| Error::Decode {
                url: endpoint.to_string(),
                payload: String::from_utf8_lossy(body).into_owned(),
                source,
            })
    }
}

/// Decide whether a 409 is a transient lock (Ok) or a real conflict (Err)
fn check_conflict(endpoint: &str, body: Vec<u8>) -> Result<()> {
    if body.is_empty() {
        return Ok(());
    }

    let conflict: ConflictBody = serde_json::from_slice(&body).map_err(|source| Error::Decode {
        url: endpoint.to_string(),
        payload: String::from_utf8_lossy(&body).into_owned(),
        source,
    })?;

    match conflict.first_alias() {
        Some(alias) if alias != OBJECT_LOCKED => {
            tracing::debug!("[bcc] Conflict '{}' on '{}', not retrying", alias, endpoint);
            Err(ApiError::conflict(endpoint, body, &conflict).into())
        }
        _ => Ok(()),
    }
}
