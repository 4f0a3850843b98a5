//! Scripted fetch source for sync tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::Value;

use crate::client::{ClientError, Fetch, ACTIVITY_SEARCH_URL};
use crate::throttle::Cancelled;

/// Serves search pages in sequence and detail documents by exact URL,
/// recording every requested URL. An unknown detail URL fails the fetch,
/// standing in for a network error.
#[derive(Default)]
pub struct ScriptedFetch {
    pages: Mutex<VecDeque<Value>>,
    details: Mutex<HashMap<String, Value>>,
    requested: Mutex<Vec<String>>,
}

impl ScriptedFetch {
    pub fn with_pages(pages: Vec<Value>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
            ..Self::default()
        }
    }

    pub fn add_detail(&self, url: &str, value: Value) {
        self.details.lock().unwrap().insert(url.to_owned(), value);
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl Fetch for ScriptedFetch {
    async fn fetch_json(&self, url: &str, _hint: &str) -> Result<Value, ClientError> {
        self.requested.lock().unwrap().push(url.to_owned());
        if url.starts_with(ACTIVITY_SEARCH_URL) {
            let page = self.pages.lock().unwrap().pop_front();
            return Ok(page.unwrap_or_else(|| Value::Array(Vec::new())));
        }
        match self.details.lock().unwrap().get(url) {
            Some(value) => Ok(value.clone()),
            None => Err(ClientError::Cancelled(Cancelled)),
        }
    }
}
