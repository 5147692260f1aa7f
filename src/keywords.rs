//! Keyword extraction and the per-session keyword set.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::CompletionError;
use crate::llm::TextCompletion;
use crate::taxonomy::lexicon_keywords;

static RESET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)forget\s+(all|everything|keywords|preferences)").unwrap()
});

static LABEL_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(keywords?|answer|output)\s*:").unwrap());

/// Longer comma-separated pieces are prose, not keywords.
const MAX_KEYWORD_WORDS: usize = 3;

/// Ordered, de-duplicated keywords accumulated over a conversation.
///
/// Re-mentioning a keyword moves it to the end, so `latest()` is always
/// the most recently stated preference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeywordSet(Vec<String>);

impl KeywordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `keyword` (normalized). Returns false for blanks.
    pub fn push(&mut self, keyword: &str) -> bool {
        let keyword = keyword.trim().to_lowercase();
        if keyword.is_empty() {
            return false;
        }
        self.0.retain(|k| *k != keyword);
        self.0.push(keyword);
        true
    }

    pub fn extend<I, S>(&mut self, keywords: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for keyword in keywords {
            self.push(keyword.as_ref());
        }
    }

    pub fn latest(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for KeywordSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = KeywordSet::new();
        set.extend(iter);
        set
    }
}

/// What the extractor made of an utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Keywords(Vec<String>),
    /// The user asked to forget their preferences.
    Reset,
}

pub fn is_reset_request(utterance: &str) -> bool {
    RESET_PATTERN.is_match(utterance)
}

fn normalize_token(token: &str) -> String {
    token
        .trim()
        .trim_matches(|c: char| c == '.' || c == '\'' || c == '`')
        .trim()
        .to_lowercase()
}

/// Parses a completion into keywords.
///
/// A JSON array of strings is tried first (anywhere in the text), then a
/// comma-separated list with bracket and quote noise stripped. Yields an
/// error when nothing usable remains.
pub fn parse_completion(text: &str) -> Result<Vec<String>, CompletionError> {
    let text = text.trim();

    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
        if start < end {
            if let Ok(items) = serde_json::from_str::<Vec<String>>(&text[start..=end]) {
                let keywords: Vec<String> = items
                    .iter()
                    .map(|k| normalize_token(k))
                    .filter(|k| !k.is_empty())
                    .collect();
                if !keywords.is_empty() {
                    return Ok(keywords);
                }
            }
        }
    }

    // A labelled line wins, then the first list-like line
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let line = lines
        .iter()
        .find(|l| LABEL_PREFIX.is_match(l))
        .or_else(|| lines.iter().find(|l| l.contains(',')))
        .or_else(|| lines.first())
        .copied()
        .unwrap_or_default();
    let line = LABEL_PREFIX.replace(line, "");
    let cleaned: String = line.chars().filter(|c| !matches!(c, '[' | ']' | '"')).collect();
    let keywords: Vec<String> = cleaned
        .split(',')
        .map(normalize_token)
        .filter(|k| !k.is_empty() && k.split_whitespace().count() <= MAX_KEYWORD_WORDS)
        .collect();

    if keywords.is_empty() {
        Err(CompletionError::Parse(format!(
            "no keywords in completion {:?}",
            text
        )))
    } else {
        Ok(keywords)
    }
}

pub fn keyword_prompt(utterance: &str) -> String {
    format!(
        r#"
You are extracting keywords from a car rental customer query to match with our database.
Extract ONLY keywords that will help match with our database categories.

Categories in our database:
- Car types: sedan, suv, convertible, coupe, truck, van, hatchback, wagon
- Features: electric, hybrid, fast, luxury, premium, budget, affordable
- Use cases: family, business, road trip, city, off-road
- Needs: spacious, comfortable, safe, reliable
- Price range: cheap/affordable (under 30k), mid-range (30k-60k), expensive/luxury (over 60k)

Rules:
1. If a preference contradicts an earlier one (e.g. "cheap" then "expensive"), keep only the latest
2. Return ONLY simple string keywords, no objects or structured data
3. The most recently mentioned attributes are the most important ones

User query: "{utterance}"

Respond ONLY with a comma-separated list of 2-4 keywords, most important last. Example: luxury,sedan,comfortable
"#
    )
}

/// Turns utterances into keywords, via the completion service when it
/// answers and the local lexicon otherwise.
#[derive(Clone)]
pub struct KeywordExtractor {
    completion: Arc<dyn TextCompletion>,
}

impl KeywordExtractor {
    pub fn new(completion: Arc<dyn TextCompletion>) -> Self {
        Self { completion }
    }

    /// Never fails: a broken completion degrades to the lexicon, and the
    /// lexicon may legitimately find nothing.
    pub async fn extract(&self, utterance: &str) -> Extraction {
        if is_reset_request(utterance) {
            return Extraction::Reset;
        }

        let primary = match self.completion.complete(&keyword_prompt(utterance)).await {
            Ok(text) => parse_completion(&text),
            Err(e) => Err(e),
        };

        match primary {
            Ok(keywords) => {
                log::debug!("Extracted keywords {:?}", keywords);
                Extraction::Keywords(keywords)
            }
            Err(e) => {
                log::warn!("Keyword extraction fell back to lexicon: {}", e);
                Extraction::Keywords(lexicon_keywords(utterance))
            }
        }
    }
}
