//! Tokenization helpers shared by attention, intention, trace, and
//! procedure matching.
//!
//! All consumers want the same thing: lowercase alphanumeric word tokens
//! with stopwords and short noise removed, and set similarity over the
//! result. Minimum token length varies per consumer, so it is a parameter.

use std::collections::HashSet;

/// Common English stopwords filtered from topic/goal/concept tokens.
pub const STOPWORDS: [&str; 48] = [
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "could", "did", "do", "does",
    "for", "from", "had", "has", "have", "how", "i", "if", "in", "into", "is", "it", "its", "me",
    "my", "no", "not", "of", "on", "or", "our", "so", "that", "the", "their", "then", "this",
    "to", "was", "we", "were", "what", "with", "you",
];

/// Whether a token is a stopword.
pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Split `text` into lowercase alphanumeric tokens.
///
/// Non-alphanumeric characters are stripped from each whitespace-separated
/// word; tokens shorter than `min_len` are dropped, stopwords optionally so.
pub fn tokenize(text: &str, min_len: usize, filter_stopwords: bool) -> Vec<String> {
    text.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|token| token.len() >= min_len)
        .filter(|token| !filter_stopwords || !is_stopword(token))
        .collect()
}

/// Tokenize into a deduplicated set.
pub fn token_set(text: &str, min_len: usize, filter_stopwords: bool) -> HashSet<String> {
    tokenize(text, min_len, filter_stopwords).into_iter().collect()
}

/// Jaccard similarity of two token sets. Empty-vs-empty is 0.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_strips_punctuation_and_case() {
        let tokens = tokenize("Fix the Login-Bug, now!", 3, true);
        assert_eq!(tokens, vec!["fix", "loginbug", "now"]);
    }

    #[test]
    fn tokenize_min_len_filters() {
        let tokens = tokenize("go to the db now", 4, false);
        assert!(tokens.is_empty());
    }

    #[test]
    fn stopwords_filtered_when_requested() {
        let with = tokenize("the quick fox", 2, false);
        let without = tokenize("the quick fox", 2, true);
        assert!(with.contains(&"the".to_string()));
        assert!(!without.contains(&"the".to_string()));
    }

    #[test]
    fn jaccard_of_identical_sets_is_one() {
        let a = token_set("add jwt auth", 3, true);
        let b = token_set("add jwt auth", 3, true);
        assert!((jaccard(&a, &b) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn jaccard_partial_overlap() {
        let a = token_set("add jwt auth login", 3, true);
        let b = token_set("add jwt auth", 3, true);
        // 3 shared of 4 union
        assert!((jaccard(&a, &b) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn jaccard_empty_sets() {
        let a = HashSet::new();
        let b = HashSet::new();
        assert_eq!(jaccard(&a, &b), 0.0);
    }
}
