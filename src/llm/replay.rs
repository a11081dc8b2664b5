use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use super::{LlmClient, LlmError, Prompt};

/// Pre-recorded LLM outputs keyed by prompt key.
///
/// Each key holds a queue; calls pop responses in order and the last response is
/// repeated once the queue is down to one entry. Missing keys behave like an
/// unreachable endpoint. Used for deterministic fixtures and offline runs.
#[derive(Default)]
pub struct ReplayClient {
    responses: Mutex<HashMap<String, VecDeque<Result<String, LlmError>>>>,
    calls: Mutex<Vec<String>>,
}

impl ReplayClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a fixture file: a JSON object mapping prompt keys to a response string or a
    /// list of response strings.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let map: HashMap<String, serde_json::Value> = serde_json::from_str(&text)?;
        let client = Self::new();
        for (key, value) in map {
            match value {
                serde_json::Value::Array(items) => {
                    for item in items {
                        client.push(&key, value_text(item));
                    }
                }
                other => client.push(&key, value_text(other)),
            }
        }
        Ok(client)
    }

    pub fn push(&self, key: &str, response: impl Into<String>) {
        self.push_result(key, Ok(response.into()));
    }

    pub fn push_error(&self, key: &str, error: LlmError) {
        self.push_result(key, Err(error));
    }

    fn push_result(&self, key: &str, result: Result<String, LlmError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(result);
    }

    /// Keys of every call made so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.starts_with(prefix))
            .count()
    }
}

fn value_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

#[async_trait]
impl LlmClient for ReplayClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(prompt.key.clone());
        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(&prompt.key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| {
                Err(LlmError::Unavailable(format!("no recorded response for '{}'", prompt.key)))
            }),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| {
                Err(LlmError::Unavailable(format!("no recorded response for '{}'", prompt.key)))
            }),
            None => Err(LlmError::Unavailable(format!(
                "no recorded response for '{}'",
                prompt.key
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(key: &str) -> Prompt {
        Prompt {
            key: key.to_string(),
            system: String::new(),
            user: String::new(),
        }
    }

    #[tokio::test]
    async fn replays_in_order_then_repeats_last() {
        let client = ReplayClient::new();
        client.push("k", "one");
        client.push("k", "two");
        assert_eq!(client.complete(&prompt("k")).await.unwrap(), "one");
        assert_eq!(client.complete(&prompt("k")).await.unwrap(), "two");
        assert_eq!(client.complete(&prompt("k")).await.unwrap(), "two");
        assert_eq!(client.call_count("k"), 3);
    }

    #[tokio::test]
    async fn missing_key_is_unavailable() {
        let client = ReplayClient::new();
        let err = client.complete(&prompt("missing")).await.unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(_)));
    }

    #[tokio::test]
    async fn loads_fixture_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fixture.json");
        std::fs::write(&path, r#"{"a": "x", "b": ["{\"triples\": []}", "y"], "c": {"classes": []}}"#).unwrap();
        let client = ReplayClient::from_file(&path).unwrap();
        assert_eq!(client.complete(&prompt("a")).await.unwrap(), "x");
        assert_eq!(client.complete(&prompt("b")).await.unwrap(), "{\"triples\": []}");
        assert_eq!(client.complete(&prompt("c")).await.unwrap(), "{\"classes\":[]}");
    }
}
