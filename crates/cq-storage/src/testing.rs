//! In-process transport for exercising fetch logic without a network.

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::Value;

use crate::{FetchError, HttpTransport, RawResponse};

#[derive(Debug, Clone)]
pub enum Scripted {
    Json(u16, Value),
    Body(u16, String),
    Status(u16),
    NetworkError,
}

/// Replays scripted responses per URL.
///
/// URLs are compared without `api_key` and `format`, with query pairs sorted,
/// so routes can be registered with the un-keyed URL a job would request.
/// The last scripted response for a route repeats once the queue drains;
/// unrouted URLs answer 404.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<Url>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: &str, responses: Vec<Scripted>) {
        self.routes
            .lock()
            .unwrap()
            .insert(canonical(url), responses.into_iter().collect());
    }

    pub fn route_json(&self, url: &str, body: Value) {
        self.route(url, vec![Scripted::Json(200, body)]);
    }

    /// Every URL requested, exactly as sent (credential included).
    pub fn requests(&self) -> Vec<Url> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        let key = canonical(url);
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|u| canonical(u.as_str()) == key)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

/// Stable comparison key for a URL, ignoring credential and format params.
pub fn canonical(raw: &str) -> String {
    let Ok(url) = Url::parse(raw) else {
        return raw.to_string();
    };
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .into_owned()
        .filter(|(k, _)| k != "api_key" && k != "format")
        .collect();
    pairs.sort();
    let mut base = url.clone();
    base.set_query(None);
    if pairs.is_empty() {
        return base.to_string();
    }
    let query = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{base}?{query}")
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(&self, url: &Url) -> Result<RawResponse, FetchError> {
        self.requests.lock().unwrap().push(url.clone());

        let next = {
            let mut routes = self.routes.lock().unwrap();
            routes.get_mut(&canonical(url.as_str())).and_then(|queue| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            })
        };

        match next {
            Some(Scripted::Json(status, body)) => Ok(RawResponse {
                status: StatusCode::from_u16(status).unwrap(),
                body: serde_json::to_vec(&body).unwrap(),
            }),
            Some(Scripted::Body(status, body)) => Ok(RawResponse {
                status: StatusCode::from_u16(status).unwrap(),
                body: body.into_bytes(),
            }),
            Some(Scripted::Status(status)) => Ok(RawResponse {
                status: StatusCode::from_u16(status).unwrap(),
                body: Vec::new(),
            }),
            Some(Scripted::NetworkError) => Err(FetchError::Transport {
                url: url.to_string(),
                reason: "connection reset".into(),
            }),
            None => Ok(RawResponse {
                status: StatusCode::NOT_FOUND,
                body: Vec::new(),
            }),
        }
    }
}
