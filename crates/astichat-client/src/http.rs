//! Client side of the server's HTTP surface.

use astichat::protocol::ClientIdentity;
use astichat::{Body, Error, Result, ServerTime, TimeSource, Token, MESSAGE_TOKEN};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct HttpClient {
    base: String,
    http: reqwest::Client,
}

impl HttpClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(transport)?;
        Ok(Self {
            base: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub async fn now(&self) -> Result<DateTime<Utc>> {
        let response = self
            .http
            .get(format!("{}/now", self.base))
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?;
        response.json().await.map_err(transport)
    }

    /// Obtain a fresh bearer token, re-sealed for the server so it can be
    /// handed to third parties as proof of identity.
    pub async fn token(&self, identity: &ClientIdentity, clock: &dyn TimeSource) -> Result<String> {
        let request = Body::new(
            MESSAGE_TOKEN,
            clock.now()?,
            &identity.username,
            &identity.server_public_key,
        )?;
        let response = self
            .http
            .post(format!("{}/token", self.base))
            .json(&request)
            .send()
            .await
            .map_err(transport)?;
        debug!(status = %response.status(), "token response");

        // Failures come back as error bodies, whatever the status.
        let reply: Body = response.json().await.map_err(transport)?;
        let token = Token::from(reply.process(clock.now()?, &identity.private_key)?);
        token.encode(&identity.server_public_key)
    }
}

#[async_trait]
impl ServerTime for HttpClient {
    async fn fetch_now(&self) -> Result<DateTime<Utc>> {
        self.now().await
    }
}

fn transport(err: reqwest::Error) -> Error {
    Error::Transport(err.to_string())
}
