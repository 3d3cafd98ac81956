//! HTTP client for the gateway's service routes

use groupcast_core::types::Group;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Gateway answered {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Outcome of `register`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Login {
    Registered,
    /// The username was taken; treated as logging in
    Existing,
}

/// Talks to the gateway, which forwards to the leader replica
#[derive(Debug, Clone)]
pub struct GatewayClient {
    base_url: String,
    http: reqwest::Client,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, service: &str) -> String {
        format!("{}/{}", self.base_url, service)
    }

    pub async fn register(&self, username: &str) -> Result<Login, ClientError> {
        let response = self
            .http
            .post(self.url("register"))
            .body(username.to_string())
            .send()
            .await?;
        match response.status() {
            StatusCode::CONFLICT => Ok(Login::Existing),
            _ => {
                expect_success(response).await?;
                Ok(Login::Registered)
            }
        }
    }

    pub async fn groups(&self) -> Result<Vec<Group>, ClientError> {
        let response = self.http.get(self.url("groups")).send().await?;
        let body = expect_success(response).await?;
        // an empty store may answer with an empty body
        if body.trim().is_empty() || body.trim() == "null" {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn create_group(&self, username: &str, group: &str) -> Result<(), ClientError> {
        self.send_form("creategroup", &[("username", username), ("groupname", group)])
            .await
    }

    pub async fn join_group(&self, username: &str, group: &str) -> Result<(), ClientError> {
        self.send_form("joingroup", &[("username", username), ("groupname", group)])
            .await
    }

    pub async fn write_post(&self, username: &str, group: &str, post: &str) -> Result<(), ClientError> {
        self.send_form(
            "writepost",
            &[("username", username), ("groupname", group), ("post", post)],
        )
        .await
    }

    async fn send_form(&self, service: &str, fields: &[(&str, &str)]) -> Result<(), ClientError> {
        let response = self.http.post(self.url(service)).form(fields).send().await?;
        expect_success(response).await?;
        Ok(())
    }
}

async fn expect_success(response: reqwest::Response) -> Result<String, ClientError> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(ClientError::Status {
            status,
            message: body.trim().to_string(),
        })
    }
}
