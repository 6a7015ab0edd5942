use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;
use tracing::info;

use crate::config::CoverConfig;
use crate::engine::GateCommand;

/// Default base URL for the vendor account/auth API.
pub const DEFAULT_API_URL: &str = "https://ucontrol-api.bft-automation.com";

/// Default base URL for the vendor command dispatcher.
pub const DEFAULT_DISPATCHER_URL: &str = "https://ucontrol-dispatcher.bft-automation.com/automations";

/// Errors surfaced by the cloud client, classified by how the caller should
/// react.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Credentials rejected or no usable session token
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Retryable: timeouts, connection/TLS failures, HTTP 5xx
    #[error("transient failure: {0}")]
    Transient(String),

    /// Not retryable: client-side HTTP errors, undecodable responses
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }
}

/// Trait for vendor cloud API operations
///
/// This trait allows for mocking the cloud client for testing purposes
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Exchange the configured credentials for a session token
    async fn authenticate(&mut self) -> Result<(), ClientError>;

    /// Resolve a configured device name to its vendor-issued UUID
    async fn lookup_device(&mut self, name: &str) -> Result<Option<String>, ClientError>;

    /// Fetch the raw diagnosis payload for a device
    async fn fetch_status(&mut self, device: &str) -> Result<Value, ClientError>;

    /// Issue an open/close/stop command to a device
    async fn send_command(&mut self, device: &str, command: GateCommand)
        -> Result<(), ClientError>;

    /// Revoke and forget the current session token, if any
    async fn invalidate_token(&mut self) -> Result<(), ClientError>;
}

/// Real cloud client for the BFT u-Control API using reqwest
///
/// Owns the session token for one configured gate. On a 401 response the
/// client re-authenticates once and repeats the request before surfacing an
/// error.
pub struct UControlClient {
    http: reqwest::Client,
    api_url: String,
    dispatcher_url: String,
    username: String,
    password: String,
    token: Option<String>,
}

impl UControlClient {
    /// Create a new client from a cover's configuration
    pub fn new(config: &CoverConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            http,
            api_url: DEFAULT_API_URL.to_string(),
            dispatcher_url: DEFAULT_DISPATCHER_URL.to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            token: None,
        })
    }

    /// Run an execute-endpoint request, refreshing the session token once if
    /// the vendor rejects it.
    async fn execute(&mut self, device: &str, func: &str) -> Result<Value, ClientError> {
        if self.token.is_none() {
            self.authenticate().await?;
        }

        match self.execute_raw(device, func).await {
            Err(ClientError::Auth(reason)) => {
                debug!("access token rejected ({}), re-authenticating", reason);
                self.token = None;
                self.authenticate().await?;
                self.execute_raw(device, func).await
            }
            other => other,
        }
    }

    async fn execute_raw(&self, device: &str, func: &str) -> Result<Value, ClientError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| ClientError::Auth("no access token".to_string()))?;

        let url = format!("{}/{}/execute/{}", self.dispatcher_url, device, func);
        debug!(url = %url, "executing vendor API call");

        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        resp.json()
            .await
            .map_err(|e| ClientError::Permanent(format!("invalid JSON response: {}", e)))
    }

    async fn user_automations(&self) -> Result<Value, ClientError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| ClientError::Auth("no access token".to_string()))?;

        // Token goes in the query string, per the vendor API
        let url = format!("{}/api/v1/users/", self.api_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("access_token", token)])
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        resp.json()
            .await
            .map_err(|e| ClientError::Permanent(format!("invalid JSON response: {}", e)))
    }
}

#[async_trait]
impl CloudClient for UControlClient {
    async fn authenticate(&mut self) -> Result<(), ClientError> {
        let url = format!("{}/oauth/token", self.api_url);
        let params = [
            ("grant_type", "password"),
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
        ];

        debug!(url = %url, "requesting access token");

        let resp = self
            .http
            .post(&url)
            .basic_auth("particle", Some("particle"))
            .form(&params)
            .send()
            .await
            .map_err(|e| ClientError::Auth(format!("token request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Auth(format!(
                "token request returned HTTP {}",
                status
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ClientError::Auth(format!("invalid token response: {}", e)))?;

        match body.get("access_token").and_then(Value::as_str) {
            Some(token) => {
                info!("obtained access token");
                self.token = Some(token.to_string());
                Ok(())
            }
            None => Err(ClientError::Auth(
                "no access_token in token response".to_string(),
            )),
        }
    }

    async fn lookup_device(&mut self, name: &str) -> Result<Option<String>, ClientError> {
        if self.token.is_none() {
            self.authenticate().await?;
        }

        let body = match self.user_automations().await {
            Err(ClientError::Auth(reason)) => {
                debug!("access token rejected ({}), re-authenticating", reason);
                self.token = None;
                self.authenticate().await?;
                self.user_automations().await?
            }
            other => other?,
        };

        let automations = body
            .pointer("/data/automations")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for automation in &automations {
            let matches = automation
                .pointer("/info/name")
                .and_then(Value::as_str)
                .map(|n| n == name)
                .unwrap_or(false);

            if matches {
                if let Some(uuid) = automation.get("uuid").and_then(Value::as_str) {
                    return Ok(Some(uuid.to_string()));
                }
            }
        }

        Ok(None)
    }

    async fn fetch_status(&mut self, device: &str) -> Result<Value, ClientError> {
        self.execute(device, "diagnosis").await
    }

    async fn send_command(
        &mut self,
        device: &str,
        command: GateCommand,
    ) -> Result<(), ClientError> {
        let ack = self.execute(device, &command.to_string()).await?;
        debug!(
            "command {} acknowledged with status {:?}",
            command,
            ack.get("status")
        );
        Ok(())
    }

    async fn invalidate_token(&mut self) -> Result<(), ClientError> {
        let Some(token) = self.token.take() else {
            debug!("no access token to revoke");
            return Ok(());
        };

        // Revocation authenticates with the account credentials, not the
        // token being revoked
        let url = format!("{}/v1/access_tokens/{}", self.api_url, token);
        let resp = self
            .http
            .delete(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        debug!("revoked access token");
        Ok(())
    }
}

/// Classify an HTTP error status: 401 means the token was rejected, 5xx is
/// server-side and retryable, any other 4xx is a client error and is not.
fn classify_status(status: StatusCode) -> ClientError {
    if status == StatusCode::UNAUTHORIZED {
        ClientError::Auth(format!("HTTP {}", status))
    } else if status.is_server_error() {
        ClientError::Transient(format!("HTTP {}", status))
    } else {
        ClientError::Permanent(format!("HTTP {}", status))
    }
}

/// Classify a reqwest transport error. Timeouts and connection/TLS failures
/// are retryable; a body that cannot be decoded is not.
fn classify_request_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Transient(format!("request timed out: {}", err))
    } else if err.is_connect() {
        ClientError::Transient(format!("connection failed: {}", err))
    } else if err.is_decode() {
        ClientError::Permanent(format!("undecodable response: {}", err))
    } else {
        ClientError::Transient(err.to_string())
    }
}

/// Mock cloud client for testing
#[cfg(test)]
pub struct MockCloudClient {
    /// Scripted fetch_status results, consumed front to back; when empty the
    /// default payload is returned
    pub statuses: std::collections::VecDeque<Result<Value, ClientError>>,
    pub default_status: Result<Value, ClientError>,
    pub command_results: std::collections::VecDeque<Result<(), ClientError>>,
    pub device_uuid: Option<String>,
    pub auth_calls: usize,
    pub lookup_calls: usize,
    pub fetch_calls: usize,
    pub command_calls: usize,
    pub invalidate_calls: usize,
    pub commands_sent: Vec<GateCommand>,
}

#[cfg(test)]
impl MockCloudClient {
    pub fn new() -> Self {
        Self {
            statuses: std::collections::VecDeque::new(),
            default_status: Ok(diagnosis_payload(100, 100, 0, 0)),
            command_results: std::collections::VecDeque::new(),
            device_uuid: None,
            auth_calls: 0,
            lookup_calls: 0,
            fetch_calls: 0,
            command_calls: 0,
            invalidate_calls: 0,
            commands_sent: Vec::new(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl CloudClient for MockCloudClient {
    async fn authenticate(&mut self) -> Result<(), ClientError> {
        self.auth_calls += 1;
        Ok(())
    }

    async fn lookup_device(&mut self, _name: &str) -> Result<Option<String>, ClientError> {
        self.lookup_calls += 1;
        Ok(self.device_uuid.clone())
    }

    async fn fetch_status(&mut self, _device: &str) -> Result<Value, ClientError> {
        self.fetch_calls += 1;
        self.statuses
            .pop_front()
            .unwrap_or_else(|| self.default_status.clone())
    }

    async fn send_command(
        &mut self,
        _device: &str,
        command: GateCommand,
    ) -> Result<(), ClientError> {
        self.command_calls += 1;
        self.commands_sent.push(command);
        self.command_results.pop_front().unwrap_or(Ok(()))
    }

    async fn invalidate_token(&mut self) -> Result<(), ClientError> {
        self.invalidate_calls += 1;
        Ok(())
    }
}

/// Build a diagnosis payload with the given engine positions and velocities
#[cfg(test)]
pub fn diagnosis_payload(pos1: i64, pos2: i64, vel1: i64, vel2: i64) -> Value {
    serde_json::json!({
        "first_engine_pos_int": pos1,
        "second_engine_pos_int": pos2,
        "first_engine_vel_int": vel1,
        "second_engine_vel_int": vel2,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use axum::Json;
    use axum::extract::Path;
    use axum::extract::State;
    use axum::http::HeaderMap;

    use super::*;

    /// In-process stand-in for the vendor API. Hands out numbered tokens,
    /// rejects the first execute call with a 401, and records every bearer
    /// token and revocation it sees.
    struct VendorStub {
        token_requests: AtomicUsize,
        execute_requests: AtomicUsize,
        bearer_tokens: Mutex<Vec<String>>,
        revoked: Mutex<Vec<String>>,
    }

    impl VendorStub {
        fn new() -> Self {
            Self {
                token_requests: AtomicUsize::new(0),
                execute_requests: AtomicUsize::new(0),
                bearer_tokens: Mutex::new(Vec::new()),
                revoked: Mutex::new(Vec::new()),
            }
        }
    }

    async fn issue_token(State(stub): State<Arc<VendorStub>>) -> Json<Value> {
        let n = stub.token_requests.fetch_add(1, Ordering::SeqCst) + 1;
        Json(serde_json::json!({ "access_token": format!("token-{}", n) }))
    }

    async fn execute(
        State(stub): State<Arc<VendorStub>>,
        headers: HeaderMap,
    ) -> (StatusCode, Json<Value>) {
        let bearer = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or_default()
            .to_string();
        stub.bearer_tokens.lock().unwrap().push(bearer);

        if stub.execute_requests.fetch_add(1, Ordering::SeqCst) == 0 {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "invalid_token" })),
            )
        } else {
            (StatusCode::OK, Json(diagnosis_payload(100, 100, 0, 0)))
        }
    }

    async fn revoke(
        State(stub): State<Arc<VendorStub>>,
        Path(token): Path<String>,
    ) -> StatusCode {
        stub.revoked.lock().unwrap().push(token);
        StatusCode::OK
    }

    /// Serve the stub on an ephemeral local port, returning its base URL.
    async fn spawn_vendor_stub(stub: Arc<VendorStub>) -> String {
        let app = axum::Router::new()
            .route("/oauth/token", axum::routing::post(issue_token))
            .route(
                "/automations/:device/execute/:func",
                axum::routing::get(execute),
            )
            .route("/v1/access_tokens/:token", axum::routing::delete(revoke))
            .with_state(stub);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}", addr)
    }

    fn stub_client(base: &str) -> UControlClient {
        UControlClient {
            http: reqwest::Client::new(),
            api_url: base.to_string(),
            dispatcher_url: format!("{}/automations", base),
            username: "user@example.com".to_string(),
            password: "hunter2".to_string(),
            token: None,
        }
    }

    #[tokio::test]
    async fn test_rejected_token_is_refreshed_once() {
        let stub = Arc::new(VendorStub::new());
        let base = spawn_vendor_stub(stub.clone()).await;
        let mut client = stub_client(&base);

        let payload = client.fetch_status("dev-1").await.unwrap();
        assert_eq!(payload["first_engine_pos_int"], 100);

        // Initial grant, then exactly one refresh after the 401
        assert_eq!(stub.token_requests.load(Ordering::SeqCst), 2);
        assert_eq!(stub.execute_requests.load(Ordering::SeqCst), 2);
        assert_eq!(
            *stub.bearer_tokens.lock().unwrap(),
            vec!["token-1".to_string(), "token-2".to_string()]
        );

        // An established session is reused without another grant
        client.fetch_status("dev-1").await.unwrap();
        assert_eq!(stub.token_requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_token_revokes_session() {
        let stub = Arc::new(VendorStub::new());
        let base = spawn_vendor_stub(stub.clone()).await;
        let mut client = stub_client(&base);

        // No session yet: nothing to revoke, no request made
        client.invalidate_token().await.unwrap();
        assert!(stub.revoked.lock().unwrap().is_empty());

        // The first fetch eats the stub's one 401, leaving token-2 live
        client.fetch_status("dev-1").await.unwrap();
        client.invalidate_token().await.unwrap();
        assert_eq!(*stub.revoked.lock().unwrap(), vec!["token-2".to_string()]);

        // The session is gone, so the next call needs a fresh grant
        client.fetch_status("dev-1").await.unwrap();
        assert_eq!(stub.token_requests.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED),
            ClientError::Auth(_)
        ));
        assert!(classify_status(StatusCode::INTERNAL_SERVER_ERROR).is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY).is_transient());
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND),
            ClientError::Permanent(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST),
            ClientError::Permanent(_)
        ));
    }
}
