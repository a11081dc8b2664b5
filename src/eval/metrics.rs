//! Answer scoring: SQuAD exact match and token-level F1.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn articles() -> &'static Regex {
    static ARTICLES: OnceLock<Regex> = OnceLock::new();
    ARTICLES.get_or_init(|| Regex::new(r"\b(a|an|the)\b").expect("Invalid regex pattern"))
}

/// Lowercase, drop punctuation, drop the articles a/an/the, collapse whitespace.
pub fn normalize_answer(text: &str) -> String {
    let lowered = text.to_lowercase();
    let no_punct: String = lowered.chars().filter(|c| !c.is_ascii_punctuation()).collect();
    let no_articles = articles().replace_all(&no_punct, " ");
    no_articles.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 1.0 if prediction and gold normalize to the same string, else 0.0.
pub fn exact_match(prediction: &str, gold: &str) -> f32 {
    if normalize_answer(prediction) == normalize_answer(gold) {
        1.0
    } else {
        0.0
    }
}

/// Harmonic mean of token precision and recall over normalized answers.
/// If either side normalizes to nothing, the score is 1.0 only when both do.
pub fn f1_score(prediction: &str, gold: &str) -> f32 {
    let prediction = normalize_answer(prediction);
    let gold = normalize_answer(gold);
    let pred_tokens: Vec<&str> = prediction.split_whitespace().collect();
    let gold_tokens: Vec<&str> = gold.split_whitespace().collect();

    if pred_tokens.is_empty() || gold_tokens.is_empty() {
        return if pred_tokens == gold_tokens { 1.0 } else { 0.0 };
    }

    let mut gold_counts: HashMap<&str, usize> = HashMap::new();
    for token in &gold_tokens {
        *gold_counts.entry(token).or_insert(0) += 1;
    }
    let mut common = 0usize;
    for token in &pred_tokens {
        if let Some(count) = gold_counts.get_mut(token) {
            if *count > 0 {
                *count -= 1;
                common += 1;
            }
        }
    }
    if common == 0 {
        return 0.0;
    }

    let precision = common as f32 / pred_tokens.len() as f32;
    let recall = common as f32 / gold_tokens.len() as f32;
    2.0 * precision * recall / (precision + recall)
}

/// Best (exact match, F1) of a prediction over all gold answers.
///
/// A question without gold answers is unanswerable: it scores 1.0 on both
/// metrics when the prediction is empty after normalization, else 0.0.
pub fn score_answer(prediction: &str, gold_answers: &[String]) -> (f32, f32) {
    if gold_answers.is_empty() {
        let abstained = normalize_answer(prediction).is_empty();
        let score = if abstained { 1.0 } else { 0.0 };
        return (score, score);
    }
    gold_answers.iter().fold((0.0f32, 0.0f32), |(em, f1), gold| {
        (
            em.max(exact_match(prediction, gold)),
            f1.max(f1_score(prediction, gold)),
        )
    })
}

/// Arithmetic mean, or 0.0 for an empty slice.
pub fn mean(scores: &[f32]) -> f32 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f32>() / scores.len() as f32
}
