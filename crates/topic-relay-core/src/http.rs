use crate::config::{Method, Settings};
use crate::error::{RelayError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

// ---------------------------------------------------------------------------
// HttpResponse
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

// ---------------------------------------------------------------------------
// HttpClient
// ---------------------------------------------------------------------------

/// Transport used for accumulator GETs and endpoint requests.
///
/// Implementors only provide `request`; the status policy lives in the
/// provided methods.
pub trait HttpClient: Send + Sync {
    fn request(&self, method: Method, url: &str, body: Option<&Value>) -> Result<HttpResponse>;

    /// `request` followed by the status check.
    fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<HttpResponse> {
        let response = self.request(method, url, body)?;
        check_status(method, url, response)
    }

    fn get_json(&self, url: &str) -> Result<Value> {
        self.send(Method::Get, url, None)?.json()
    }
}

/// Non-2xx responses are failures, except a DELETE answered with 404.
pub fn check_status(method: Method, url: &str, response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() || (method == Method::Delete && response.status == 404) {
        return Ok(response);
    }
    tracing::warn!(%method, url, status = response.status, "request failed");
    Err(RelayError::HttpFailure {
        method: method.to_string(),
        url: url.to_string(),
        status: response.status,
        body: response.body,
    })
}

// ---------------------------------------------------------------------------
// ReqwestClient
// ---------------------------------------------------------------------------

pub struct ReqwestClient {
    client: reqwest::blocking::Client,
    headers: BTreeMap<String, String>,
}

impl ReqwestClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            headers: settings.headers.clone(),
        })
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Patch => reqwest::Method::PATCH,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

impl HttpClient for ReqwestClient {
    fn request(&self, method: Method, url: &str, body: Option<&Value>) -> Result<HttpResponse> {
        let mut builder = self.client.request(reqwest_method(method), url);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        tracing::debug!(%method, url, "sending request");
        let response = builder.send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        Ok(HttpResponse { status, body })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
