//! Waiting for a resource's `locked` flag to clear

use super::arguments::Arguments;
use super::error::{Error, Result};
use super::manager::Manager;
use serde::Deserialize;
use tokio::time::Instant;

#[derive(Deserialize)]
struct LockFlag {
    #[serde(default)]
    locked: bool,
}

impl Manager {
    /// Poll `path` until the resource reports `locked: false`
    pub async fn wait_lock(&self, path: &str) -> Result<()> {
        let started = Instant::now();

        loop {
            let flag: Option<LockFlag> = self.get(path, &Arguments::new()).await?;
            if !flag.is_some_and(|f| f.locked) {
                return Ok(());
            }

            self.scope.sleep(self.timing.lock_poll_interval).await?;

            let waited = started.elapsed();
            if waited > self.timing.lock_timeout {
                return Err(Error::LockTimeout {
                    url: path.to_string(),
                    waited,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::client::manager::{Manager, Timing};
    use crate::client::Error;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager(server: &MockServer) -> Manager {
        Manager::with_client(reqwest::Client::new(), "t")
            .with_base_url(server.uri())
            .with_timing(Timing {
                retry_interval: Duration::from_millis(10),
                lock_timeout: Duration::from_millis(50),
                task_timeout: Duration::from_millis(50),
                lock_poll_interval: Duration::from_millis(10),
            })
    }

    #[tokio::test]
    async fn test_wait_lock_until_unlocked() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/d1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "d1", "locked": true})))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/d1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "d1", "locked": false})))
            .mount(&server)
            .await;

        manager(&server).wait_lock("v1/disk/d1").await.unwrap();
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_wait_lock_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/network/n1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"locked": true})))
            .mount(&server)
            .await;

        let err = manager(&server).wait_lock("v1/network/n1").await.unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));
    }
}
