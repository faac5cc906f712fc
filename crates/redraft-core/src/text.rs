//! Text utilities: word counting, instruction parsing, shape detection.
//!
//! Instruction parsing recognizes "expand to 5000 words" style directives
//! (explicit targets, percentage multipliers, bare expansion verbs) so the
//! strategy selector can route them before any length heuristic applies.

use std::sync::LazyLock;

use regex::Regex;

/// Count words by whitespace separation.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// A parsed expansion directive from user instructions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpansionDirective {
    /// Explicit target, e.g. "expand to 5000 words".
    pub target_words: Option<usize>,
    /// Percentage multiplier, e.g. "increase by 150%" => 1.5.
    pub multiplier: Option<f64>,
}

static TARGET_WORDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{2,7})\s*(?:\+\s*)?words?\b").unwrap());

static PERCENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d{1,4})\s*%").unwrap());

static EXPANSION_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(expand|lengthen|extend|increase|elaborate|make (?:it |this )?longer)\b")
        .unwrap()
});

/// Parse an expansion directive out of raw instructions.
///
/// Returns `None` when the instructions carry no expansion intent at all.
/// A bare verb with no number yields a directive with both fields unset;
/// the expansion strategy resolves the concrete target.
pub fn parse_expansion_directive(instructions: &str) -> Option<ExpansionDirective> {
    let trimmed = instructions.trim();
    if trimmed.is_empty() {
        return None;
    }

    let has_verb = EXPANSION_VERB.is_match(trimmed);
    let target_words = TARGET_WORDS
        .captures(trimmed)
        .and_then(|c| c[1].parse::<usize>().ok());
    let multiplier = if has_verb {
        PERCENT
            .captures(trimmed)
            .and_then(|c| c[1].parse::<f64>().ok())
            .map(|p| p / 100.0)
    } else {
        None
    };

    // An explicit word target counts as expansion intent even without a verb.
    if has_verb || target_words.is_some() {
        Some(ExpansionDirective {
            target_words,
            multiplier,
        })
    } else {
        None
    }
}

/// Minimum lines for the position-list shape.
const MIN_POSITION_LINES: usize = 2;

/// Fraction of non-empty lines that must carry pipe-delimited fields.
const POSITION_LINE_RATIO: f64 = 0.8;

/// Detect input shaped as a pipe-delimited position list.
///
/// Requires multiple non-empty lines where most lines split into at least
/// two fields on `|`. Single-line input never matches.
pub fn looks_like_position_list(text: &str) -> bool {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() < MIN_POSITION_LINES {
        return false;
    }

    let delimited = lines
        .iter()
        .filter(|l| l.split('|').filter(|f| !f.trim().is_empty()).count() >= 2)
        .count();

    delimited >= MIN_POSITION_LINES
        && (delimited as f64) / (lines.len() as f64) >= POSITION_LINE_RATIO
}

/// Split text into sentences at terminal punctuation followed by whitespace.
///
/// Returns the original text as a single sentence when no boundary exists.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?') {
            // Consume a run of terminal punctuation (e.g. "?!", "...").
            let mut end = i + 1;
            while end < bytes.len() && matches!(bytes[end], b'.' | b'!' | b'?' | b'"' | b'\'') {
                end += 1;
            }
            if end >= bytes.len() || bytes[end].is_ascii_whitespace() {
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = end;
                i = end;
                continue;
            }
        }
        i += 1;
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Whitespace-normalized form used to compare reassembled documents.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_count() {
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("one two  three\n\nfour"), 4);
    }

    #[test]
    fn test_explicit_target() {
        let d = parse_expansion_directive("expand to 5000 words").unwrap();
        assert_eq!(d.target_words, Some(5000));
        assert_eq!(d.multiplier, None);
    }

    #[test]
    fn test_target_without_verb() {
        let d = parse_expansion_directive("I need 2000 words on this").unwrap();
        assert_eq!(d.target_words, Some(2000));
    }

    #[test]
    fn test_percentage_multiplier() {
        let d = parse_expansion_directive("increase the length by 150%").unwrap();
        assert_eq!(d.multiplier, Some(1.5));
        assert_eq!(d.target_words, None);
    }

    #[test]
    fn test_bare_verb() {
        let d = parse_expansion_directive("please make it longer").unwrap();
        assert_eq!(d.target_words, None);
        assert_eq!(d.multiplier, None);
    }

    #[test]
    fn test_no_expansion_intent() {
        assert!(parse_expansion_directive("fix the grammar").is_none());
        assert!(parse_expansion_directive("").is_none());
        // "10 pages" is not a word target.
        assert!(parse_expansion_directive("rewrite in 10 pages").is_none());
    }

    #[test]
    fn test_position_list_detection() {
        let positions = "P1 | We should adopt the plan | strong\nP2 | The plan is too costly | weak\nP3 | Costs are overstated | medium";
        assert!(looks_like_position_list(positions));

        assert!(!looks_like_position_list("Just a normal paragraph of text."));
        assert!(!looks_like_position_list("one | line | only"));

        // Mostly prose with a single stray pipe.
        let prose = "First paragraph here.\nA value | with pipe.\nMore prose.\nEven more prose.\nAnd more.";
        assert!(!looks_like_position_list(prose));
    }

    #[test]
    fn test_split_sentences() {
        let s = split_sentences("First one. Second one! Third?");
        assert_eq!(s, vec!["First one.", "Second one!", "Third?"]);
    }

    #[test]
    fn test_split_sentences_no_boundary() {
        let s = split_sentences("no terminal punctuation here");
        assert_eq!(s, vec!["no terminal punctuation here"]);
    }

    #[test]
    fn test_split_sentences_decimal_not_boundary() {
        let s = split_sentences("Growth hit 3.5 percent. It held.");
        assert_eq!(s, vec!["Growth hit 3.5 percent.", "It held."]);
    }
}
