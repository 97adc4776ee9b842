// 🔌 Remote Account Provider - the authentication protocol seam
// The steward never speaks the remote protocol itself; an implementation of
// `AccountProvider` does (the HTTP auth-bridge below, or a scripted fake in tests).

use crate::error::{Result, StewardError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Outcome of a code sign-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInResult {
    Success,
    SecondFactorRequired,
    Failure(String),
}

/// Outcome of a second-factor sign-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecondFactorResult {
    Success,
    Failure(String),
}

#[async_trait]
pub trait AccountProvider: Send + Sync {
    /// Live handle to one authentication session
    type Connection: Send + Sync;

    async fn connect(&self, api_id: u64, api_hash: &str) -> Result<Self::Connection>;

    /// Ask the service to deliver a verification code. Returns the code request token.
    async fn send_code(&self, conn: &Self::Connection, phone: &str) -> Result<String>;

    async fn sign_in(&self, conn: &Self::Connection, phone: &str, code: &str) -> SignInResult;

    async fn sign_in_second_factor(&self, conn: &Self::Connection, password: &str) -> SecondFactorResult;

    /// Serialized authentication state (string session form)
    async fn export_session(&self, conn: &Self::Connection) -> Result<String>;

    async fn close(&self, conn: Self::Connection);
}

// ============================================================================
// HTTP AUTH-BRIDGE
// ============================================================================

/// Talks JSON to an auth-bridge sidecar that owns the real protocol client
pub struct HttpAccountProvider {
    client: reqwest::Client,
    base_url: String,
}

/// Handle issued by the bridge on `/connect`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConnection {
    pub connection_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct BridgeResponse {
    ok: bool,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    connection_id: Option<String>,
    #[serde(default)]
    phone_code_hash: Option<String>,
    #[serde(default)]
    session: Option<String>,
}

impl BridgeResponse {
    fn reason(&self) -> String {
        self.reason
            .clone()
            .unwrap_or_else(|| "unknown provider error".to_string())
    }
}

impl HttpAccountProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpAccountProvider {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn call(&self, path: &str, body: serde_json::Value) -> Result<BridgeResponse> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(%url, "auth bridge call");

        let response = self.client.post(&url).json(&body).send().await?;
        let parsed: BridgeResponse = response.json().await?;
        Ok(parsed)
    }

    /// Like `call`, but folds transport errors into a provider reason
    async fn call_for_reason(&self, path: &str, body: serde_json::Value) -> std::result::Result<BridgeResponse, String> {
        self.call(path, body).await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl AccountProvider for HttpAccountProvider {
    type Connection = BridgeConnection;

    async fn connect(&self, api_id: u64, api_hash: &str) -> Result<BridgeConnection> {
        let response = self
            .call("connect", serde_json::json!({ "api_id": api_id, "api_hash": api_hash }))
            .await?;

        match (response.ok, response.connection_id.clone()) {
            (true, Some(connection_id)) => Ok(BridgeConnection { connection_id }),
            _ => Err(StewardError::Provider(response.reason())),
        }
    }

    async fn send_code(&self, conn: &BridgeConnection, phone: &str) -> Result<String> {
        let response = self
            .call(
                "send_code",
                serde_json::json!({ "connection_id": conn.connection_id, "phone": phone }),
            )
            .await?;

        if !response.ok {
            return Err(StewardError::Provider(response.reason()));
        }
        Ok(response.phone_code_hash.unwrap_or_default())
    }

    async fn sign_in(&self, conn: &BridgeConnection, phone: &str, code: &str) -> SignInResult {
        let body = serde_json::json!({
            "connection_id": conn.connection_id,
            "phone": phone,
            "code": code,
        });

        match self.call_for_reason("sign_in", body).await {
            Ok(response) if response.ok => SignInResult::Success,
            Ok(response) if response.status.as_deref() == Some("password_needed") => {
                SignInResult::SecondFactorRequired
            }
            Ok(response) => SignInResult::Failure(response.reason()),
            Err(reason) => SignInResult::Failure(reason),
        }
    }

    async fn sign_in_second_factor(&self, conn: &BridgeConnection, password: &str) -> SecondFactorResult {
        let body = serde_json::json!({
            "connection_id": conn.connection_id,
            "password": password,
        });

        match self.call_for_reason("sign_in_password", body).await {
            Ok(response) if response.ok => SecondFactorResult::Success,
            Ok(response) => SecondFactorResult::Failure(response.reason()),
            Err(reason) => SecondFactorResult::Failure(reason),
        }
    }

    async fn export_session(&self, conn: &BridgeConnection) -> Result<String> {
        let response = self
            .call("export", serde_json::json!({ "connection_id": conn.connection_id }))
            .await?;

        match (response.ok, response.session.clone()) {
            (true, Some(session)) => Ok(session),
            _ => Err(StewardError::Provider(response.reason())),
        }
    }

    async fn close(&self, conn: BridgeConnection) {
        let body = serde_json::json!({ "connection_id": conn.connection_id });
        if let Err(e) = self.call("close", body).await {
            tracing::warn!(connection_id = %conn.connection_id, error = %e, "failed to close bridge connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_response_defaults() {
        let parsed: BridgeResponse = serde_json::from_str(r#"{"ok": false}"#).unwrap();
        assert!(!parsed.ok);
        assert_eq!(parsed.reason(), "unknown provider error");

        let parsed: BridgeResponse =
            serde_json::from_str(r#"{"ok": false, "status": "password_needed"}"#).unwrap();
        assert_eq!(parsed.status.as_deref(), Some("password_needed"));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let provider = HttpAccountProvider::new("http://localhost:8081/");
        assert_eq!(provider.base_url, "http://localhost:8081");
    }
}
