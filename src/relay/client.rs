use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::relay::{RelayError, TrackEvent};

/// Idle connections kept per collector host
const POOL_IDLE_PER_HOST: usize = 8;

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Deserialize)]
struct Website {
    id: String,
    #[serde(default)]
    domain: String,
}

#[derive(Deserialize)]
struct WebsiteList {
    #[serde(default)]
    data: Vec<Website>,
}

#[derive(Deserialize)]
struct CreatedWebsite {
    id: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    payload: SendPayload<'a>,
}

#[derive(Serialize)]
struct SendPayload<'a> {
    website: &'a str,
    url: &'a str,
    hostname: &'a str,
    title: &'a str,
    language: &'a str,
    referrer: &'a str,
}

/// HTTP client for the collector API. Cheap to clone.
#[derive(Clone)]
pub struct CollectorClient {
    base_url: String,
    http: Client,
}

impl CollectorClient {
    pub fn new(base_url: &str) -> Result<Self, RelayError> {
        let http = Client::builder()
            .pool_max_idle_per_host(POOL_IDLE_PER_HOST)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<String, RelayError> {
        let resp = self
            .http
            .post(self.endpoint("/api/auth/login"))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await?;

        let body: LoginResponse = check_status(resp).await?.json().await?;
        Ok(body.token)
    }

    /// Id of the website registered for `domain`, if any
    pub async fn find_website(&self, token: &str, domain: &str) -> Result<Option<String>, RelayError> {
        let resp = self
            .http
            .get(self.endpoint("/api/websites"))
            .bearer_auth(token)
            .send()
            .await?;

        let list: WebsiteList = check_status(resp).await?.json().await?;
        Ok(list
            .data
            .into_iter()
            .find(|w| w.domain == domain)
            .map(|w| w.id))
    }

    pub async fn create_website(&self, token: &str, domain: &str) -> Result<String, RelayError> {
        let resp = self
            .http
            .post(self.endpoint("/api/websites"))
            .bearer_auth(token)
            .json(&serde_json::json!({ "domain": domain, "name": domain }))
            .send()
            .await?;

        let created: CreatedWebsite = check_status(resp).await?.json().await?;
        Ok(created.id)
    }

    /// Forward one event on behalf of the visitor that produced it.
    pub async fn send(
        &self,
        website_id: &str,
        event: &TrackEvent,
        timeout: Duration,
    ) -> Result<(), RelayError> {
        let body = SendRequest {
            kind: "event",
            payload: SendPayload {
                website: website_id,
                url: &event.path,
                hostname: &event.hostname,
                title: &event.title,
                language: &event.language,
                referrer: &event.referrer,
            },
        };

        let resp = self
            .http
            .post(self.endpoint("/api/send"))
            .headers(visitor_headers(event))
            .timeout(timeout)
            .json(&body)
            .send()
            .await?;

        check_status(resp).await?;
        Ok(())
    }
}

/// The collector attributes the event to these headers, not to this service.
fn visitor_headers(event: &TrackEvent) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&event.user_agent) {
        headers.insert(USER_AGENT, value);
    }
    if !event.ip.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&event.ip) {
            headers.insert("x-forwarded-for", value);
        }
    }
    headers
}

async fn check_status(resp: Response) -> Result<Response, RelayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(RelayError::Status {
        status: status.as_u16(),
        body,
    })
}
