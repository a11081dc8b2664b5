//! Structured LLM outputs and their strict/relaxed parsing.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::LlmError;
use crate::schema::Cardinality;

/// A class addition or revision proposed by one committee member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassProposal {
    #[serde(alias = "id")]
    pub name: String,
    #[serde(default)]
    pub superclass: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A property addition or revision. `range` is a class name or a literal tag
/// (`string`, `int`, `xsd:date`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyProposal {
    #[serde(alias = "id")]
    pub name: String,
    pub domain: String,
    pub range: String,
    #[serde(default)]
    pub cardinality: Option<Cardinality>,
    #[serde(default)]
    pub description: Option<String>,
}

/// One committee member's structured answer for a round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntologyDelta {
    #[serde(default)]
    pub classes: Vec<ClassProposal>,
    #[serde(default)]
    pub properties: Vec<PropertyProposal>,
    /// Class or property ids to drop. Applied when a majority of the round asks for it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

impl OntologyDelta {
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.properties.is_empty() && self.remove.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    #[serde(alias = "name")]
    pub label: String,
    #[serde(rename = "type", alias = "class", default)]
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTriple {
    pub subject: ExtractedEntity,
    #[serde(alias = "predicate")]
    pub relation: String,
    pub object: ExtractedEntity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// A scope document, or the merge of several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeText {
    #[serde(alias = "scope", alias = "document")]
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionList {
    #[serde(default, alias = "items", alias = "competency_questions")]
    pub questions: Vec<String>,
}

/// Raw extraction result for one chunk, exactly as the model produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutput {
    #[serde(default, alias = "triplets")]
    pub triples: Vec<ExtractedTriple>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// The whole response must be the expected JSON document.
    Strict,
    /// Look for JSON inside prose or code fences; a bare list is taken as the
    /// document's only list field.
    Relaxed,
}

pub fn parse_response<T: DeserializeOwned>(raw: &str, mode: ParseMode) -> Result<T, LlmError> {
    match mode {
        ParseMode::Strict => serde_json::from_str(raw.trim())
            .map_err(|e| LlmError::Malformed(format!("strict parse failed: {}", e))),
        ParseMode::Relaxed => {
            let value = extract_json_value(raw)
                .ok_or_else(|| LlmError::Malformed("no JSON found in output".to_string()))?;
            match serde_json::from_value::<T>(value.clone()) {
                Ok(parsed) => Ok(parsed),
                Err(first) => wrap_bare_list(value)
                    .and_then(|wrapped| serde_json::from_value::<T>(wrapped).ok())
                    .ok_or_else(|| LlmError::Malformed(format!("relaxed parse failed: {}", first))),
            }
        }
    }
}

/// `[...]` -> `{"triples": [...], "classes": [...], "questions": [...]}` so any list
/// document shape accepts it.
fn wrap_bare_list(value: Value) -> Option<Value> {
    match value {
        Value::Array(items) => {
            let mut map = serde_json::Map::new();
            map.insert("triples".to_string(), Value::Array(items.clone()));
            map.insert("classes".to_string(), Value::Array(items.clone()));
            map.insert("questions".to_string(), Value::Array(items));
            Some(Value::Object(map))
        }
        _ => None,
    }
}

fn extract_json_value(raw: &str) -> Option<Value> {
    let text = raw.trim().trim_matches('\u{feff}');

    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Some(v);
    }

    for fence in ["```json", "```"] {
        if let Some(start) = text.find(fence) {
            let body = &text[start + fence.len()..];
            if let Some(end) = body.find("```") {
                if let Ok(v) = serde_json::from_str::<Value>(body[..end].trim()) {
                    return Some(v);
                }
            }
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(i), Some(j)) = (text.find(open), text.rfind(close)) {
            if i < j {
                if let Ok(v) = serde_json::from_str::<Value>(&text[i..=j]) {
                    return Some(v);
                }
            }
        }
    }

    None
}
