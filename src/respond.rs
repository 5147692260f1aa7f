//! Assistant replies.
//!
//! Replies are delegated to the completion service. When that fails the
//! reply comes from a small table of canned templates instead, so a turn
//! always gets an answer.

use rand::seq::SliceRandom;
use std::sync::Arc;

use crate::error::CompletionError;
use crate::llm::TextCompletion;
use crate::model::CarRecord;

pub const GREETING: &str =
    "Hi there! I can help you find the perfect car. What are you looking for?";
pub const APOLOGY: &str = "I'm sorry, I couldn't process that. Can you try again?";
pub const NO_ALTERNATIVE: &str = "I'm sorry, I couldn't find a good alternative to suggest.";

const OPENING_QUESTIONS: &[&str] = &[
    "Tell me a bit about what you need. Is it for the family, for work, or just for fun?",
    "What will you mostly use the car for, and do you have a budget in mind?",
    "Are you leaning towards a particular type, like an SUV or a sedan?",
];

const FOLLOW_UP_QUESTIONS: &[&str] = &[
    "Do you have a budget in mind?",
    "How many people will you usually be carrying?",
    "Would you prefer electric, hybrid, or petrol?",
    "Is this mostly for city driving or longer trips?",
];

/// A car the user asked about that is not in store, with the best
/// in-store substitute if there is one.
#[derive(Debug, Clone, Copy)]
pub struct Unavailable<'a> {
    pub requested: &'a CarRecord,
    pub alternative: Option<&'a CarRecord>,
}

/// Everything a reply may refer to.
#[derive(Debug, Clone)]
pub struct ReplyContext<'a> {
    pub utterance: &'a str,
    pub keywords: &'a [String],
    /// In-store matches, best first.
    pub top_cars: &'a [CarRecord],
    pub unavailable: Option<Unavailable<'a>>,
    pub concise: bool,
}

pub struct ResponseGenerator {
    completion: Arc<dyn TextCompletion>,
    currency: String,
}

impl ResponseGenerator {
    pub fn new(completion: Arc<dyn TextCompletion>, currency: impl Into<String>) -> Self {
        Self {
            completion,
            currency: currency.into(),
        }
    }

    pub async fn generate(&self, ctx: &ReplyContext<'_>) -> String {
        match self.delegated(ctx).await {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("Falling back to template reply: {}", e);
                self.local(ctx)
            }
        }
    }

    async fn delegated(&self, ctx: &ReplyContext<'_>) -> Result<String, CompletionError> {
        let prompt = match ctx.unavailable {
            Some(Unavailable {
                requested,
                alternative: Some(alternative),
            }) => self.comparison_prompt(requested, alternative),
            Some(Unavailable {
                alternative: None, ..
            }) => return Ok(NO_ALTERNATIVE.to_string()),
            None => self.conversation_prompt(ctx),
        };

        let reply = self.completion.complete(&prompt).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(CompletionError::Parse("empty reply".to_string()));
        }
        Ok(reply.to_string())
    }

    fn conversation_prompt(&self, ctx: &ReplyContext<'_>) -> String {
        let summary = if ctx.top_cars.is_empty() {
            "No specific cars match yet.".to_string()
        } else {
            ctx.top_cars
                .iter()
                .take(3)
                .map(|car| self.summarize(car))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let latest = ctx.keywords.last().map(String::as_str).unwrap_or("");
        let length = if ctx.concise {
            "Keep your response very concise (1-2 sentences maximum)."
        } else {
            ""
        };

        format!(
            r#"
You are a knowledgeable car dealership assistant with DIRECT ACCESS to the dealership's inventory system.
You are helping a customer find the right vehicle for their preferences.

INVENTORY ACCESS RESULT:
Current customer preferences: {preferences}
Latest search priority: {latest}
Top matching vehicles in inventory:
{summary}

RESPONSE GUIDELINES:
1. Speak as if you can see the inventory, e.g. "I see we have" or "Looking at our inventory"
2. Prioritize vehicles that match the LATEST preference
3. Mention specific cars by name
4. If the customer has not given enough detail, ask one targeted question about their needs
5. When several preferences are given, prefer cars that satisfy all of them
6. Reply in plain conversational text, never JSON or labelled fields

{length}

Customer input: "{utterance}"
Your response:"#,
            preferences = ctx.keywords.join(", "),
            latest = latest,
            summary = summary,
            length = length,
            utterance = ctx.utterance,
        )
    }

    fn comparison_prompt(&self, requested: &CarRecord, alternative: &CarRecord) -> String {
        format!(
            r#"
Give an EXTREMELY BRIEF comparison (2-3 lines maximum):
Requested (unavailable): {} ({}) at {}
Alternative (available): {} ({}) at {}

Reply in 2-3 lines only, suggesting the alternative and one key advantage.
"#,
            requested.name,
            requested.car_type,
            self.money(requested.price),
            alternative.name,
            alternative.car_type,
            self.money(alternative.price),
        )
    }

    fn summarize(&self, car: &CarRecord) -> String {
        let features: Vec<&str> = car.features.iter().take(3).map(String::as_str).collect();
        format!(
            "{} ({}, {}, features: {})",
            car.name,
            car.car_type,
            self.money(car.price),
            features.join(", ")
        )
    }

    /// Template reply chosen from what is known about the conversation.
    pub fn local(&self, ctx: &ReplyContext<'_>) -> String {
        let mut rng = rand::thread_rng();

        if let Some(unavailable) = ctx.unavailable {
            return self.compare_with_alternative(unavailable.requested, unavailable.alternative);
        }

        match (ctx.keywords, ctx.top_cars) {
            ([], _) => OPENING_QUESTIONS
                .choose(&mut rng)
                .copied()
                .unwrap_or(GREETING)
                .to_string(),
            (keywords, []) => format!(
                "I couldn't find anything in stock matching {}. Would you like to try a different budget or car type?",
                join_words(keywords)
            ),
            ([keyword], [top, ..]) => format!(
                "Looking at our inventory, the {} looks like a good fit for {}. {}",
                top.name,
                keyword,
                FOLLOW_UP_QUESTIONS
                    .choose(&mut rng)
                    .copied()
                    .unwrap_or("What else matters to you?")
            ),
            (keywords, [top, rest @ ..]) => {
                let mut reply = format!(
                    "Based on your interest in {}, I'd recommend the {} at {}.",
                    join_words(keywords),
                    top.name,
                    self.money(top.price)
                );
                if let (false, Some(second)) = (ctx.concise, rest.first()) {
                    reply.push_str(&format!(" I also see the {} in stock.", second.name));
                }
                reply.push_str(" Would you like more details?");
                reply
            }
        }
    }

    /// Narrative comparison between an unavailable car and its in-store
    /// substitute.
    pub fn compare_with_alternative(
        &self,
        requested: &CarRecord,
        alternative: Option<&CarRecord>,
    ) -> String {
        let alternative = match alternative {
            Some(alternative) => alternative,
            None => return NO_ALTERNATIVE.to_string(),
        };

        let category = if requested.car_type == alternative.car_type {
            format!("Both vehicles are in the same {} category.", requested.car_type)
        } else {
            format!(
                "They are similar, though the {} is a {} while the {} is a {}.",
                requested.name, requested.car_type, alternative.name, alternative.car_type
            )
        };
        let pros = bullets(&alternative.pros, 3);
        let cons = bullets(&requested.cons, 2);
        let price_note = if alternative.price < requested.price {
            "more affordable"
        } else {
            "similarly priced"
        };

        format!(
            "I see you're interested in the {requested}. Unfortunately, that model isn't currently in our inventory.\n\n\
             However, I'd like to suggest the {alt}, which is similar and available right now.\n\n\
             {category}\n\n\
             The {alt} offers these advantages:\n{pros}\n\n\
             It also avoids some limitations of the {requested}:\n{cons}\n\n\
             Price-wise, the {alt} is {price_note} at {price}.\n\n\
             Would you like to learn more about the {alt} or see some of our other options?",
            requested = requested.name,
            alt = alternative.name,
            category = category,
            pros = pros,
            cons = cons,
            price_note = price_note,
            price = self.money(alternative.price),
        )
    }

    fn money(&self, price: f64) -> String {
        if self.currency.chars().all(|c| c.is_alphabetic()) {
            format!("{} {}", self.currency, format_price(price))
        } else {
            format!("{}{}", self.currency, format_price(price))
        }
    }
}

fn bullets(items: &[String], limit: usize) -> String {
    items
        .iter()
        .take(limit)
        .map(|item| format!("• {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// "a", "a and b", "a, b and c"
fn join_words(words: &[String]) -> String {
    match words {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

/// Whole units with thousands separators, e.g. `42,990`.
pub fn format_price(price: f64) -> String {
    let digits = (price.max(0.0).round() as u64).to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
