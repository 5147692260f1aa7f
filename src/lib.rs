//! Car rental advisor: turns what a customer says into keywords and ranks
//! the catalog against them.

pub mod conversation;
pub mod error;
pub mod keywords;
pub mod llm;
pub mod matching;
pub mod model;
pub mod respond;
pub mod server;
pub mod settings;
pub mod taxonomy;

pub use conversation::{ConversationManager, ConversationSession, SessionStore, TurnOutcome};
pub use keywords::{Extraction, KeywordExtractor, KeywordSet};
pub use matching::{CarFilter, MatchEngine, RankedCar};
pub use model::{CarRecord, Catalog};
