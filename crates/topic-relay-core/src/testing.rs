//! In-memory HTTP fake shared by the unit tests.

use crate::config::Method;
use crate::error::Result;
use crate::http::{HttpClient, HttpResponse};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
}

#[derive(Default)]
pub struct FakeHttp {
    responses: HashMap<String, Value>,
    statuses: HashMap<String, u16>,
    calls: Mutex<Vec<Call>>,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer GETs for `url` with `body`.
    pub fn with_get(mut self, url: &str, body: Value) -> Self {
        self.responses.insert(url.to_string(), body);
        self
    }

    /// Answer every request to `url` with `status`.
    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.statuses.insert(url.to_string(), status);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_with(&self, method: Method) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .collect()
    }
}

impl HttpClient for FakeHttp {
    fn request(&self, method: Method, url: &str, body: Option<&Value>) -> Result<HttpResponse> {
        self.calls.lock().unwrap().push(Call {
            method,
            url: url.to_string(),
            body: body.cloned(),
        });

        if let Some(status) = self.statuses.get(url) {
            return Ok(HttpResponse {
                status: *status,
                body: format!("status {status} for {url}"),
            });
        }
        match (method, self.responses.get(url)) {
            (Method::Get, Some(body)) => Ok(HttpResponse {
                status: 200,
                body: body.to_string(),
            }),
            (Method::Get, None) => Ok(HttpResponse {
                status: 404,
                body: "not found".to_string(),
            }),
            _ => Ok(HttpResponse {
                status: 200,
                body: String::new(),
            }),
        }
    }
}

/// Three dependent levels: 2 alfa, 2 beta per alfa, and 2/1/3/1 gama per
/// beta, for 7 final entries.
pub fn accumulator_fixture() -> FakeHttp {
    let base = "https://api.example.com";
    FakeHttp::new()
        .with_get(
            &format!("{base}/v1/alfa/?company=mycompany"),
            json!({"results": [{"id": "ALFA_01"}, {"id": "ALFA_02"}]}),
        )
        .with_get(
            &format!("{base}/v1/beta/?alfa=ALFA_01"),
            json!({"results": [
                {"id": "BETA_01", "baz": "baz_01"},
                {"id": "BETA_02", "baz": "baz_02"},
            ]}),
        )
        .with_get(
            &format!("{base}/v1/beta/?alfa=ALFA_02"),
            json!({"results": [
                {"id": "BETA_01", "baz": "baz_11"},
                {"id": "BETA_02", "baz": "baz_12"},
            ]}),
        )
        .with_get(
            &format!("{base}/v1/gama/baz_01"),
            json!({"results": [{"id": "FINAL_01"}, {"id": "FINAL_02"}]}),
        )
        .with_get(&format!("{base}/v1/gama/baz_02"), json!({"id": "FINAL_03"}))
        .with_get(
            &format!("{base}/v1/gama/baz_11"),
            json!({"results": [{"id": "FINAL_11"}, {"id": "FINAL_12"}, {"id": "FINAL_13"}]}),
        )
        .with_get(&format!("{base}/v1/gama/baz_12"), json!({"id": "FINAL_14"}))
}

pub fn accumulator_steps() -> Vec<crate::config::AccumulatorStep> {
    [
        ("alfa", "v1/alfa/?company={payload[company_name]}"),
        ("beta", "v1/beta/?alfa={alfa[id]}"),
        ("gama", "v1/gama/{beta[baz]}"),
    ]
    .into_iter()
    .map(|(name, url)| (name.to_string(), url.to_string()).into())
    .collect()
}
