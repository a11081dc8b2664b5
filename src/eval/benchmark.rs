//! SQuAD v2 shaped benchmark data.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::error::{OntoKgError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct SquadAnswer {
    pub text: String,
    #[serde(default)]
    pub answer_start: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SquadQa {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub answers: Vec<SquadAnswer>,
    #[serde(default)]
    pub is_impossible: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SquadParagraph {
    pub context: String,
    #[serde(default)]
    pub qas: Vec<SquadQa>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SquadTopic {
    pub title: String,
    pub paragraphs: Vec<SquadParagraph>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SquadDataset {
    #[serde(default)]
    pub version: Option<String>,
    pub data: Vec<SquadTopic>,
}

/// A question with its gold answers. Unanswerable questions have none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub question: String,
    pub answers: Vec<String>,
    pub is_impossible: bool,
}

/// The texts and questions of one or more topics, ready for a scenario.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Benchmark {
    /// Unique contexts in sorted order; these become the scenario's chunks.
    pub contexts: Vec<String>,
    /// Questions sorted by id.
    pub questions: Vec<Question>,
}

impl SquadDataset {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(OntoKgError::InvalidInput(format!(
                "SQuAD dataset not found at {}",
                path.display()
            )));
        }
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn find_topic(&self, title: &str) -> Option<&SquadTopic> {
        self.data.iter().find(|topic| topic.title == title)
    }

    /// Collect the contexts and questions of the named topics.
    pub fn benchmark(&self, titles: &[String]) -> Result<Benchmark> {
        let mut contexts = BTreeSet::new();
        let mut questions = Vec::new();
        for title in titles {
            let topic = self.find_topic(title).ok_or_else(|| {
                OntoKgError::InvalidInput(format!("SQuAD topic '{}' not found", title))
            })?;
            for paragraph in &topic.paragraphs {
                contexts.insert(paragraph.context.clone());
                questions.extend(paragraph.qas.iter().map(Question::from));
            }
        }
        questions.sort_by(|a, b| a.id.cmp(&b.id));
        questions.dedup_by(|a, b| a.id == b.id);
        Ok(Benchmark {
            contexts: contexts.into_iter().collect(),
            questions,
        })
    }
}

impl From<&SquadQa> for Question {
    fn from(qa: &SquadQa) -> Self {
        let answers = if qa.is_impossible {
            Vec::new()
        } else {
            let mut seen = BTreeSet::new();
            qa.answers
                .iter()
                .map(|a| a.text.clone())
                .filter(|text| seen.insert(text.clone()))
                .collect()
        };
        Question {
            id: qa.id.clone(),
            question: qa.question.clone(),
            answers,
            is_impossible: qa.is_impossible,
        }
    }
}
