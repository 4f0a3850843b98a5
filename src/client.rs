//! HTTP session against Garmin Connect.
//!
//! One cookie-carrying client is shared by every fetch in a run, so the
//! session established at sign-in applies to all subsequent requests.
//! Paced fetches acquire a slot from the shared [`RequestThrottle`]
//! before the request goes out; sign-in bypasses the throttle.

use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::Credentials;
use crate::logger::Logger;
use crate::throttle::{Cancelled, RequestThrottle};

pub const SIGNIN_URL: &str = "https://connect.garmin.com/signin";

pub const ACTIVITY_SEARCH_URL: &str =
    "https://connect.garmin.com/modern/proxy/activitylist-service/activities/search/activities";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("sign in failed, response code: {0}")]
    SignIn(reqwest::StatusCode),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Fetch primitive used by the sync engine and the detail fan-out.
/// Implementations decode the response body as JSON; `hint` is free-form
/// progress context ("(2 of 7)") for the log line.
pub trait Fetch {
    async fn fetch_json(&self, url: &str, hint: &str) -> Result<Value, ClientError>;
}

/// Session against the remote service: HTTP client with a cookie store
/// plus the request throttle pacing all data fetches.
pub struct GarminClient {
    http: reqwest::Client,
    throttle: RequestThrottle,
    logger: Logger,
}

impl GarminClient {
    pub fn new(request_delay: Duration, logger: Logger) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            http,
            throttle: RequestThrottle::new(request_delay),
            logger,
        })
    }

    pub fn throttle(&self) -> &RequestThrottle {
        &self.throttle
    }

    /// Signs in with the given credentials, establishing the session
    /// cookies. Any non-success status is fatal for the run.
    pub async fn sign_in(&self, credentials: &Credentials, remember: bool) -> Result<(), ClientError> {
        self.logger
            .info(format!("Signing in as {}...", credentials.username));

        let mut form = vec![
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
            ("embed", "false"),
        ];
        if remember {
            form.push(("rememberme", "on"));
        }

        let response = self.http.post(SIGNIN_URL).form(&form).send().await?;
        let status = response.status();
        tracing::debug!(%status, "sign-in response");
        if !status.is_success() {
            return Err(ClientError::SignIn(status));
        }

        self.logger.info("Signed in.");
        Ok(())
    }
}

impl Fetch for GarminClient {
    async fn fetch_json(&self, url: &str, hint: &str) -> Result<Value, ClientError> {
        self.throttle.pace().await?;

        let spaced = if hint.is_empty() {
            String::new()
        } else {
            format!(" {hint}")
        };
        self.logger.info(format!("Fetching {url}{spaced}..."));

        let response = self.http.get(url).send().await?.error_for_status()?;
        let json = response.json().await?;

        self.logger.info(format!("{url} fetched."));
        Ok(json)
    }
}

/// Builds a query URL from a base plus parameters. String values encode
/// raw, null encodes empty, everything else encodes its JSON form.
pub fn build_url(base: &str, params: &Map<String, Value>) -> String {
    let query: Vec<String> = params
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(&query_value(value))
            )
        })
        .collect();
    format!("{}?{}", base, query.join("&"))
}

fn query_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
