//! Resilient Telegram Bot API client.
//!
//! This is the sole egress path to the platform: rate limits and
//! transient errors are absorbed here, and callers only ever see a
//! failure once retries are exhausted.

use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;
use tracing::{error, warn};

use seatwatch_core::{Error, Result};

const MAX_ATTEMPTS: usize = 3;
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;
const TRANSIENT_PAUSE: Duration = Duration::from_secs(2);
const CALL_TIMEOUT: Duration = Duration::from_secs(20);

/// Server-side long-poll wait; the client-side timeout leaves headroom
/// on top of it.
const LONG_POLL_WAIT_SECS: u64 = 30;
const LONG_POLL_CLIENT_TIMEOUT: Duration = Duration::from_secs(35);

pub struct ApiClient {
    token: String,
    base_url: String,
    http: reqwest::Client,
    poll_http: reqwest::Client,
}

impl ApiClient {
    pub fn new(token: &str) -> Self {
        Self::with_base_url(token, "https://api.telegram.org")
    }

    pub fn with_base_url(token: &str, base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .expect("reqwest client build");
        let poll_http = reqwest::Client::builder()
            .timeout(LONG_POLL_CLIENT_TIMEOUT)
            .build()
            .expect("reqwest client build");
        Self {
            token: token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            poll_http,
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.base_url, self.token)
    }

    /// Make an API call with rate-limit handling.
    ///
    /// 429 responses honor the server's retry hint (plus one second) and
    /// retry; 5xx and network errors pause briefly and retry; anything
    /// still failing on the last attempt is logged and surfaced as an
    /// error.
    pub async fn call(&self, method: &str, payload: Value) -> Result<Value> {
        for attempt in 0..MAX_ATTEMPTS {
            let failure = match self.http.post(self.url(method)).json(&payload).send().await {
                Ok(resp) if resp.status().as_u16() == 429 => {
                    let body: Value = resp.json().await.unwrap_or_default();
                    let retry_after = body
                        .pointer("/parameters/retry_after")
                        .and_then(Value::as_u64)
                        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                    warn!("rate limited on {method}, waiting {retry_after}s");
                    sleep(Duration::from_secs(retry_after + 1)).await;
                    continue;
                }
                Ok(resp) if resp.status().is_server_error() => {
                    sleep(TRANSIENT_PAUSE).await;
                    continue;
                }
                Ok(resp) => match resp.error_for_status() {
                    Ok(resp) => match resp.json::<Value>().await {
                        Ok(body) => return Ok(body),
                        Err(e) => format!("bad response body: {e}"),
                    },
                    Err(e) => e.to_string(),
                },
                Err(e) => e.to_string(),
            };

            if attempt == MAX_ATTEMPTS - 1 {
                error!("telegram call {method} failed: {failure}");
                return Err(Error::External(format!(
                    "telegram call {method} failed: {failure}"
                )));
            }
            sleep(TRANSIENT_PAUSE).await;
        }

        error!("telegram call {method} failed: retries exhausted");
        Err(Error::External(format!(
            "telegram call {method} failed: retries exhausted"
        )))
    }

    /// Call a method and unwrap the platform-level `ok`/`result` envelope.
    pub async fn call_ok(&self, method: &str, payload: Value) -> Result<Value> {
        let body = self.call(method, payload).await?;
        if body.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            Ok(body.get("result").cloned().unwrap_or(Value::Null))
        } else {
            Err(Error::External(format!(
                "telegram call {method} rejected: {body}"
            )))
        }
    }

    /// Long-poll fetch of pending updates starting at `offset`.
    ///
    /// No retry here: the poll loop owns error pacing.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Value>> {
        let resp = self
            .poll_http
            .get(self.url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", LONG_POLL_WAIT_SECS.to_string()),
                (
                    "allowed_updates",
                    r#"["message","chat_member"]"#.to_string(),
                ),
            ])
            .send()
            .await
            .map_err(|e| Error::External(format!("getUpdates request error: {e}")))?;

        let body: Value = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("getUpdates json error: {e}")))?;

        if !body.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            return Err(Error::External(format!("getUpdates rejected: {body}")));
        }
        Ok(body
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        sync::Mutex,
        time::Instant,
    };

    /// Minimal HTTP responder: answers each connection with the next
    /// scripted (status, body) pair.
    async fn spawn_server(responses: Vec<(&'static str, String)>) -> (String, Arc<Mutex<usize>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let served = Arc::new(Mutex::new(0usize));
        let count = served.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut sock, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                let mut buf = [0u8; 8192];
                let _ = sock.read(&mut buf).await;
                let resp = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = sock.write_all(resp.as_bytes()).await;
                *count.lock().await += 1;
            }
        });

        (format!("http://{addr}"), served)
    }

    #[tokio::test]
    async fn rate_limit_honors_retry_hint_then_succeeds() {
        let (base, served) = spawn_server(vec![
            (
                "429 Too Many Requests",
                json!({"ok": false, "parameters": {"retry_after": 3}}).to_string(),
            ),
            ("200 OK", json!({"ok": true, "result": {"done": true}}).to_string()),
        ])
        .await;

        let client = ApiClient::with_base_url("test-token", &base);
        let start = Instant::now();
        let result = client.call_ok("sendMessage", json!({"chat_id": 1})).await;

        // Hint of 3s plus the extra second.
        assert!(start.elapsed() >= Duration::from_secs(4));
        assert_eq!(result.unwrap()["done"], json!(true));
        assert_eq!(*served.lock().await, 2);
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let (base, served) = spawn_server(vec![
            ("500 Internal Server Error", String::new()),
            ("200 OK", json!({"ok": true, "result": {}}).to_string()),
        ])
        .await;

        let client = ApiClient::with_base_url("test-token", &base);
        assert!(client.call_ok("sendMessage", json!({})).await.is_ok());
        assert_eq!(*served.lock().await, 2);
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let (base, served) = spawn_server(vec![
            ("400 Bad Request", String::new()),
            ("400 Bad Request", String::new()),
            ("400 Bad Request", String::new()),
        ])
        .await;

        let client = ApiClient::with_base_url("test-token", &base);
        assert!(client.call("sendMessage", json!({})).await.is_err());
        assert_eq!(*served.lock().await, 3);
    }

    #[tokio::test]
    async fn platform_level_rejection_is_an_error() {
        let (base, _) = spawn_server(vec![(
            "200 OK",
            json!({"ok": false, "description": "nope"}).to_string(),
        )])
        .await;

        let client = ApiClient::with_base_url("test-token", &base);
        assert!(client.call_ok("sendMessage", json!({})).await.is_err());
    }
}
