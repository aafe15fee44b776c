//! HTTP transport to the gateway service.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use url::Url;

use crate::client::ceremony::{AuthOptions, MfaGateway};
use crate::error::AuthError;
use crate::mfa::types::NO_REGISTERED_DEVICES;

pub struct HttpMfaGateway {
    client: reqwest::Client,
    base_url: Url,
    token: String,
}

impl HttpMfaGateway {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: Url, token: String) -> Self {
        Self {
            client,
            base_url,
            token,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        self.base_url
            .join(path)
            .map_err(|e| AuthError::Transport(format!("invalid endpoint {path}: {e}")))
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, AuthError> {
        let response = self
            .client
            .post(self.endpoint(path)?)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| AuthError::Transport(format!("request to {path} failed: {e}")))?;

        match response.status() {
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| AuthError::Transport(format!("malformed server payload: {e}"))),
            StatusCode::UNAUTHORIZED => Err(AuthError::Authentication),
            StatusCode::FORBIDDEN => Err(AuthError::Authorization),
            StatusCode::TOO_MANY_REQUESTS => Err(AuthError::RateLimit),
            StatusCode::BAD_REQUEST => Err(AuthError::Verification),
            status => Err(AuthError::Transport(format!(
                "unexpected status {status} from {path}"
            ))),
        }
    }
}

#[async_trait]
impl MfaGateway for HttpMfaGateway {
    async fn registration_options(&self) -> Result<Value, AuthError> {
        let body = self.post("v1/mfa/register/options", &json!({})).await?;
        body.get("options")
            .cloned()
            .ok_or_else(|| AuthError::Transport("malformed server payload: missing options".to_string()))
    }

    async fn verify_registration(
        &self,
        response: Value,
        device_name: Option<String>,
    ) -> Result<(), AuthError> {
        self.post(
            "v1/mfa/register/verify",
            &json!({ "response": response, "deviceName": device_name }),
        )
        .await?;
        Ok(())
    }

    async fn authentication_options(&self) -> Result<AuthOptions, AuthError> {
        let body = self.post("v1/mfa/authenticate/options", &json!({})).await?;

        if let Some(options) = body.get("options").filter(|o| !o.is_null()) {
            return Ok(AuthOptions::Options(options.clone()));
        }
        if body.get("error").and_then(Value::as_str) == Some(NO_REGISTERED_DEVICES) {
            return Ok(AuthOptions::NoRegisteredDevices);
        }
        Err(AuthError::Transport(
            "malformed server payload: neither options nor a known outcome".to_string(),
        ))
    }

    async fn verify_authentication(&self, response: Value) -> Result<(), AuthError> {
        self.post("v1/mfa/authenticate/verify", &json!({ "response": response }))
            .await?;
        Ok(())
    }
}
