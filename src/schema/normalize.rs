//! Label and identifier normalization.

use regex::Regex;
use std::sync::OnceLock;

fn word_regex() -> &'static Regex {
    static WORDS: OnceLock<Regex> = OnceLock::new();
    WORDS.get_or_init(|| Regex::new(r"[\p{L}\p{N}]+").expect("Invalid regex pattern"))
}

/// Case-insensitive, whitespace-collapsed form used for entity matching.
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize a class name to PascalCase: "research institute" -> "ResearchInstitute".
/// Existing inner capitalisation is preserved ("ResearchInstitute" is unchanged).
pub fn pascal_case(name: &str) -> String {
    word_regex()
        .find_iter(name)
        .map(|m| capitalize(m.as_str()))
        .collect()
}

/// Normalize a property/relation name to camelCase: "works at" -> "worksAt".
pub fn camel_case(name: &str) -> String {
    let mut out = String::new();
    for (i, m) in word_regex().find_iter(name).enumerate() {
        if i == 0 {
            let mut chars = m.as_str().chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_lowercase());
                out.push_str(chars.as_str());
            }
        } else {
            out.push_str(&capitalize(m.as_str()));
        }
    }
    out
}

/// Kebab-case slug used as the base of entity ids: "Marie Curie" -> "marie-curie".
pub fn slug(label: &str) -> String {
    let words: Vec<String> = word_regex()
        .find_iter(label)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    if words.is_empty() {
        "entity".to_string()
    } else {
        words.join("-")
    }
}

/// Word tokens of a normalized label.
pub fn label_tokens(label: &str) -> Vec<String> {
    word_regex()
        .find_iter(&normalize_label(label))
        .map(|m| m.as_str().to_string())
        .collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_label_collapses_whitespace_and_case() {
        assert_eq!(normalize_label("  Marie   CURIE\t"), "marie curie");
        assert_eq!(normalize_label(""), "");
    }

    #[test]
    fn pascal_case_variants() {
        assert_eq!(pascal_case("research institute"), "ResearchInstitute");
        assert_eq!(pascal_case("research_institute"), "ResearchInstitute");
        assert_eq!(pascal_case("ResearchInstitute"), "ResearchInstitute");
        assert_eq!(pascal_case("person"), "Person");
    }

    #[test]
    fn camel_case_variants() {
        assert_eq!(camel_case("works at"), "worksAt");
        assert_eq!(camel_case("worksAt"), "worksAt");
        assert_eq!(camel_case("WorksAt"), "worksAt");
        assert_eq!(camel_case("has_author"), "hasAuthor");
    }

    #[test]
    fn slug_falls_back_for_symbols() {
        assert_eq!(slug("Marie Curie"), "marie-curie");
        assert_eq!(slug("École normale"), "école-normale");
        assert_eq!(slug("!!!"), "entity");
    }

    #[test]
    fn label_tokens_split_on_punctuation() {
        assert_eq!(label_tokens("Dr. Marie  Curie"), vec!["dr", "marie", "curie"]);
    }
}
