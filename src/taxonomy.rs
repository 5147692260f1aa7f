//! The keyword taxonomy shared by extraction and matching.
//!
//! Membership lists are fixed. A keyword may sit in more than one bucket,
//! e.g. "luxury" is both a feature and a price keyword.

pub const TYPE_KEYWORDS: &[&str] = &[
    "sedan",
    "suv",
    "convertible",
    "coupe",
    "truck",
    "van",
    "hatchback",
    "wagon",
];

pub const FEATURE_KEYWORDS: &[&str] = &[
    "electric",
    "hybrid",
    "fast",
    "luxury",
    "premium",
    "budget",
    "affordable",
    "family",
    "business",
    "spacious",
    "comfortable",
    "safe",
    "reliable",
];

pub const PRICE_KEYWORDS: &[&str] = &[
    "cheap",
    "affordable",
    "budget",
    "expensive",
    "luxury",
    "premium",
    "mid-range",
];

/// Upper bound (exclusive) of the budget band.
pub const BUDGET_CEILING: f64 = 30_000.0;
/// Lower bound (exclusive) of the premium band.
pub const PREMIUM_FLOOR: f64 = 60_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Type,
    Feature,
    Price,
    Unknown,
}

/// Returns every bucket `keyword` belongs to, or `[Unknown]`.
pub fn classify(keyword: &str) -> Vec<Category> {
    let keyword = keyword.trim().to_lowercase();
    let mut categories = Vec::new();
    if TYPE_KEYWORDS.contains(&keyword.as_str()) {
        categories.push(Category::Type);
    }
    if FEATURE_KEYWORDS.contains(&keyword.as_str()) {
        categories.push(Category::Feature);
    }
    if PRICE_KEYWORDS.contains(&keyword.as_str()) {
        categories.push(Category::Price);
    }
    if categories.is_empty() {
        categories.push(Category::Unknown);
    }
    categories
}

pub fn is_in(keyword: &str, category: Category) -> bool {
    classify(keyword).contains(&category)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceBand {
    Budget,
    MidRange,
    Premium,
}

impl PriceBand {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "cheap" | "affordable" | "budget" => Some(Self::Budget),
            "mid-range" => Some(Self::MidRange),
            "expensive" | "luxury" | "premium" => Some(Self::Premium),
            _ => None,
        }
    }

    pub fn contains(self, price: f64) -> bool {
        match self {
            Self::Budget => price < BUDGET_CEILING,
            Self::MidRange => (BUDGET_CEILING..=PREMIUM_FLOOR).contains(&price),
            Self::Premium => price > PREMIUM_FLOOR,
        }
    }
}

/// Local lexicon used when the completion service cannot extract keywords.
/// Each entry maps an emitted keyword to the words or phrases that trigger
/// it; a trailing plural "s" also matches. Keywords are emitted in lexicon
/// order.
pub const FALLBACK_LEXICON: &[(&str, &[&str])] = &[
    ("electric", &["electric", "battery", "charging", "zero emission"]),
    ("hybrid", &["hybrid", "fuel efficient", "fuel-efficient", "mpg"]),
    ("fast", &["fast", "faster", "quick", "sporty", "performance", "speed"]),
    ("sedan", &["sedan", "saloon"]),
    ("suv", &["suv", "crossover"]),
    ("convertible", &["convertible", "open top", "cabrio"]),
    ("coupe", &["coupe", "two-door"]),
    ("truck", &["truck", "pickup", "towing"]),
    ("van", &["van", "minivan", "people carrier"]),
    ("hatchback", &["hatchback", "hatch", "compact"]),
    ("wagon", &["wagon", "estate"]),
    (
        "family",
        &["family", "kids", "spacious", "safe", "safety", "practical", "room", "roomy"],
    ),
    ("business", &["business", "work", "commute", "professional"]),
    ("luxury", &["luxury", "premium", "upscale", "high-end", "fancy"]),
    ("comfortable", &["comfortable", "comfort", "smooth", "quiet"]),
    ("reliable", &["reliable", "dependable", "durable"]),
    ("off-road", &["off-road", "offroad", "4x4", "all-terrain"]),
    (
        "affordable",
        &["cheap", "affordable", "budget", "inexpensive", "economical", "low cost"],
    ),
    ("mid-range", &["mid-range", "midrange", "mid range", "moderately priced"]),
    ("expensive", &["expensive", "money is no object"]),
];

/// Applies the fallback lexicon to an utterance.
pub fn lexicon_keywords(utterance: &str) -> Vec<String> {
    let text = utterance.to_lowercase();
    FALLBACK_LEXICON
        .iter()
        .filter(|(_, triggers)| triggers.iter().any(|t| contains_phrase(&text, t)))
        .map(|(keyword, _)| keyword.to_string())
        .collect()
}

/// True when `phrase` occurs in `text` on word boundaries, allowing a
/// plural "s" after it.
fn contains_phrase(text: &str, phrase: &str) -> bool {
    let is_word = |c: Option<char>| c.map_or(false, char::is_alphanumeric);
    text.match_indices(phrase).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let mut rest = text[start + phrase.len()..].chars();
        let after = match rest.next() {
            Some('s') => rest.next(),
            other => other,
        };
        !is_word(before) && !is_word(after)
    })
}
