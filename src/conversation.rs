use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{SessionError, TurnError};
use crate::keywords::{Extraction, KeywordExtractor, KeywordSet};
use crate::llm::TextCompletion;
use crate::matching::MatchEngine;
use crate::model::{CarRecord, Catalog};
use crate::respond::{ReplyContext, ResponseGenerator, Unavailable, GREETING};
use crate::settings::{ConversationSettings, DEFAULT_SESSION_TTL_SECS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

/// State of one conversation. Turns take a session and hand back a new
/// one; nothing here is shared.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSession {
    keywords: KeywordSet,
    history: VecDeque<ConversationTurn>,
    concise: bool,
    #[serde(skip)]
    history_limit: usize,
}

impl ConversationSession {
    /// A fresh session, opened with the greeting.
    pub fn new(history_limit: usize, concise: bool) -> Self {
        let mut session = Self {
            keywords: KeywordSet::new(),
            history: VecDeque::new(),
            concise,
            history_limit: history_limit.max(1),
        };
        session.record(Role::Assistant, GREETING);
        session
    }

    pub fn keywords(&self) -> &KeywordSet {
        &self.keywords
    }

    pub fn history(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.history.iter()
    }

    pub fn concise(&self) -> bool {
        self.concise
    }

    pub fn set_concise(&mut self, concise: bool) {
        self.concise = concise;
    }

    /// Appends a turn, dropping the oldest ones past the history limit.
    pub fn record(&mut self, role: Role, text: impl Into<String>) {
        self.history.push_back(ConversationTurn {
            role,
            text: text.into(),
        });
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }
}

/// Result of a processed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub session: ConversationSession,
    pub reply: String,
    /// Keywords extracted from this utterance alone.
    pub extracted: Vec<String>,
    pub reset: bool,
    /// In-store matches for the updated keyword set, best first.
    pub matches: Vec<CarRecord>,
}

/// Runs utterances through extraction, matching and reply generation.
pub struct ConversationManager {
    engine: MatchEngine,
    extractor: KeywordExtractor,
    responder: ResponseGenerator,
    settings: ConversationSettings,
}

impl ConversationManager {
    pub fn new(
        catalog: Arc<Catalog>,
        completion: Arc<dyn TextCompletion>,
        settings: ConversationSettings,
    ) -> Self {
        Self {
            engine: MatchEngine::new(catalog),
            extractor: KeywordExtractor::new(completion.clone()),
            responder: ResponseGenerator::new(completion, settings.currency.clone()),
            settings,
        }
    }

    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }

    pub fn settings(&self) -> &ConversationSettings {
        &self.settings
    }

    pub fn new_session(&self) -> ConversationSession {
        ConversationSession::new(self.settings.history_limit, self.settings.concise)
    }

    /// The in-store part of the ranked matches, capped at `top_matches`.
    pub fn top_matches(&self, keywords: &KeywordSet) -> Vec<CarRecord> {
        self.engine
            .find_matching_cars(keywords.as_slice())
            .into_iter()
            .filter(|car| car.in_store)
            .take(self.settings.top_matches)
            .collect()
    }

    /// Processes one utterance against `session`.
    ///
    /// `session` itself is never touched, so a failed turn leaves the
    /// caller's state as it was. `concise` overrides the session's reply
    /// length for this and later turns.
    pub async fn process_turn(
        &self,
        session: &ConversationSession,
        utterance: &str,
        concise: Option<bool>,
    ) -> Result<TurnOutcome, TurnError> {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Err(TurnError::EmptyUtterance);
        }

        let mut session = session.clone();
        if let Some(concise) = concise {
            session.set_concise(concise);
        }
        session.record(Role::User, utterance);

        let extracted = match self.extractor.extract(utterance).await {
            Extraction::Reset => {
                log::debug!("Clearing keywords {:?}", session.keywords.as_slice());
                session.keywords.clear();
                session.record(Role::Assistant, GREETING);
                return Ok(TurnOutcome {
                    session,
                    reply: GREETING.to_string(),
                    extracted: Vec::new(),
                    reset: true,
                    matches: Vec::new(),
                });
            }
            Extraction::Keywords(keywords) => keywords,
        };
        session.keywords.extend(&extracted);
        log::debug!("Keywords now {:?}", session.keywords.as_slice());

        let matches = self.top_matches(&session.keywords);
        let requested = self
            .engine
            .catalog()
            .find_mentioned(utterance)
            .filter(|car| !car.in_store);
        let alternative = requested
            .as_ref()
            .and_then(|car| self.engine.similar_available(car, 1).into_iter().next());

        let reply = {
            let ctx = ReplyContext {
                utterance,
                keywords: session.keywords.as_slice(),
                top_cars: &matches,
                unavailable: requested.as_ref().map(|requested| Unavailable {
                    requested,
                    alternative: alternative.as_ref(),
                }),
                concise: session.concise,
            };
            self.responder.generate(&ctx).await
        };
        session.record(Role::Assistant, reply.clone());

        Ok(TurnOutcome {
            session,
            reply,
            extracted,
            reset: false,
            matches,
        })
    }
}

enum Slot {
    Idle(ConversationSession),
    /// A turn holds the session.
    Busy,
}

struct Entry {
    slot: Slot,
    last_used: Instant,
}

impl Entry {
    fn idle(session: ConversationSession) -> Self {
        Self {
            slot: Slot::Idle(session),
            last_used: Instant::now(),
        }
    }
}

/// In-memory sessions keyed by id.
///
/// A session is checked out for the length of a turn, so a second
/// utterance on the same session is refused until the first one settles.
/// Idle sessions untouched for longer than `idle_timeout` are dropped.
pub struct SessionStore {
    slots: Mutex<HashMap<Uuid, Entry>>,
    idle_timeout: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_SESSION_TTL_SECS))
    }
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    pub fn insert(&self, session: ConversationSession) -> Uuid {
        let id = Uuid::new_v4();
        let mut slots = self.slots.lock();
        self.evict_expired(&mut slots);
        slots.insert(id, Entry::idle(session));
        id
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    pub fn snapshot(&self, id: Uuid) -> Result<ConversationSession, SessionError> {
        let mut slots = self.slots.lock();
        self.evict_expired(&mut slots);
        match slots.get(&id).map(|entry| &entry.slot) {
            Some(Slot::Idle(session)) => Ok(session.clone()),
            Some(Slot::Busy) => Err(SessionError::TurnInFlight(id)),
            None => Err(SessionError::NotFound(id)),
        }
    }

    pub fn remove(&self, id: Uuid) -> Result<(), SessionError> {
        self.slots
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or(SessionError::NotFound(id))
    }

    /// Takes the session out for a turn.
    pub fn checkout(&self, id: Uuid) -> Result<SessionLease<'_>, SessionError> {
        let mut slots = self.slots.lock();
        self.evict_expired(&mut slots);
        let entry = slots.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        match std::mem::replace(&mut entry.slot, Slot::Busy) {
            Slot::Idle(session) => {
                entry.last_used = Instant::now();
                Ok(SessionLease {
                    store: self,
                    id,
                    original: session,
                    committed: false,
                })
            }
            Slot::Busy => Err(SessionError::TurnInFlight(id)),
        }
    }

    fn put_back(&self, id: Uuid, session: ConversationSession) {
        // A session deleted mid-turn stays deleted.
        if let Some(entry) = self.slots.lock().get_mut(&id) {
            *entry = Entry::idle(session);
        }
    }

    /// Busy sessions are never evicted.
    fn evict_expired(&self, slots: &mut HashMap<Uuid, Entry>) {
        let before = slots.len();
        slots.retain(|_, entry| {
            matches!(entry.slot, Slot::Busy) || entry.last_used.elapsed() < self.idle_timeout
        });
        let evicted = before - slots.len();
        if evicted > 0 {
            log::debug!("Evicted {} idle sessions", evicted);
        }
    }
}

/// A checked-out session. Dropping the lease without committing puts the
/// original session back untouched.
pub struct SessionLease<'a> {
    store: &'a SessionStore,
    id: Uuid,
    original: ConversationSession,
    committed: bool,
}

impl SessionLease<'_> {
    /// The session as it was at checkout.
    pub fn session(&self) -> &ConversationSession {
        &self.original
    }

    pub fn commit(mut self, session: ConversationSession) {
        self.committed = true;
        self.store.put_back(self.id, session);
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.store.put_back(self.id, self.original.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompletionError;
    use crate::llm::StubCompletion;
    use crate::model::fixtures::{car, catalog};

    fn manager(stub: Arc<StubCompletion>) -> ConversationManager {
        let cars = vec![
            car(1, "2024 BYD Seal Dynamic", "sedan", 28_900.0, &["electric", "affordable"], "", true),
            car(2, "2024 Kia EV9", "suv", 54_900.0, &["electric", "family"], "", true),
            car(3, "2023 Tesla Model X", "suv", 79_990.0, &["electric", "luxury", "family"], "", false),
            car(4, "2024 Toyota RAV4 Hybrid", "suv", 31_900.0, &["hybrid", "family"], "", true),
        ];
        ConversationManager::new(
            Arc::new(catalog(cars)),
            stub,
            ConversationSettings::default(),
        )
    }

    #[test]
    fn test_new_session_is_greeted() {
        let session = ConversationSession::new(10, false);
        let history: Vec<_> = session.history().collect();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::Assistant);
        assert_eq!(history[0].text, GREETING);
        assert!(session.keywords().is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut session = ConversationSession::new(10, false);
        for i in 0..15 {
            session.record(Role::User, format!("message {}", i));
        }
        let history: Vec<_> = session.history().collect();
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].text, "message 5");
        assert_eq!(history[9].text, "message 14");
    }

    #[tokio::test]
    async fn test_empty_utterance_rejected() {
        let manager = manager(Arc::new(StubCompletion::new()));
        let session = manager.new_session();
        assert_eq!(
            manager.process_turn(&session, "   ", None).await.unwrap_err(),
            TurnError::EmptyUtterance
        );
    }

    #[tokio::test]
    async fn test_turn_accumulates_keywords() {
        let stub = Arc::new(StubCompletion::with_replies([
            Ok("family, suv".to_string()),
            Ok("I see the Kia EV9 and RAV4 in stock.".to_string()),
            Ok("electric".to_string()),
            Ok("The Kia EV9 is electric and seats seven.".to_string()),
        ]));
        let manager = manager(stub);
        let session = manager.new_session();

        let first = manager
            .process_turn(&session, "Something for my family", None)
            .await
            .unwrap();
        assert_eq!(first.extracted, vec!["family", "suv"]);
        assert_eq!(first.reply, "I see the Kia EV9 and RAV4 in stock.");
        // the input session is unchanged
        assert!(session.keywords().is_empty());

        let second = manager
            .process_turn(&first.session, "make it electric", None)
            .await
            .unwrap();
        assert_eq!(second.session.keywords().as_slice(), &["family", "suv", "electric"]);
        assert_eq!(second.session.keywords().latest(), Some("electric"));
        // Model X is out of store, so only the EV9 survives
        let ids: Vec<u32> = second.matches.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(second.session.history().count(), 5);
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let manager = manager(Arc::new(StubCompletion::new()));
        let fresh = manager.new_session();

        let first = manager.process_turn(&fresh, "forget everything", None).await.unwrap();
        assert!(first.reset);
        assert!(first.session.keywords().is_empty());
        assert_eq!(first.reply, GREETING);

        let second = manager
            .process_turn(&first.session, "Forget all", None)
            .await
            .unwrap();
        assert!(second.session.keywords().is_empty());
        assert_eq!(second.reply, first.reply);
    }

    #[tokio::test]
    async fn test_reset_clears_keywords() {
        let manager = manager(Arc::new(StubCompletion::new()));
        let session = manager.new_session();
        let turn = manager
            .process_turn(&session, "an electric suv please", None)
            .await
            .unwrap();
        assert_eq!(turn.session.keywords().as_slice(), &["electric", "suv"]);

        let reset = manager
            .process_turn(&turn.session, "please forget my keywords... forget keywords", None)
            .await
            .unwrap();
        assert!(reset.reset);
        assert!(reset.session.keywords().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_car_gets_comparison() {
        let stub = Arc::new(StubCompletion::with_replies([
            Err(CompletionError::Timeout),
            Err(CompletionError::Timeout),
        ]));
        let manager = manager(stub);
        let session = manager.new_session();
        let turn = manager
            .process_turn(&session, "Do you have the Tesla Model X?", None)
            .await
            .unwrap();
        assert!(turn.reply.starts_with("I see you're interested in the 2023 Tesla Model X."));
        assert!(turn.reply.contains("suggest the 2024 Kia EV9"));
    }

    #[tokio::test]
    async fn test_concise_override_sticks() {
        let manager = manager(Arc::new(StubCompletion::new()));
        let session = manager.new_session();
        assert!(!session.concise());
        let turn = manager.process_turn(&session, "hello", Some(true)).await.unwrap();
        assert!(turn.session.concise());
    }

    #[test]
    fn test_checkout_guards_reentry() {
        let store = SessionStore::default();
        let id = store.insert(ConversationSession::new(10, false));

        let lease = store.checkout(id).unwrap();
        assert_eq!(store.checkout(id).err(), Some(SessionError::TurnInFlight(id)));
        assert_eq!(store.snapshot(id).err(), Some(SessionError::TurnInFlight(id)));

        let mut updated = lease.session().clone();
        updated.record(Role::User, "hi");
        lease.commit(updated);
        assert_eq!(store.snapshot(id).unwrap().history().count(), 2);
    }

    #[test]
    fn test_dropped_lease_restores_session() {
        let store = SessionStore::default();
        let id = store.insert(ConversationSession::new(10, false));
        {
            let _lease = store.checkout(id).unwrap();
        }
        assert_eq!(store.snapshot(id).unwrap().history().count(), 1);
        assert!(store.checkout(id).is_ok());
    }

    #[test]
    fn test_removed_session_is_not_revived() {
        let store = SessionStore::default();
        let id = store.insert(ConversationSession::new(10, false));
        let lease = store.checkout(id).unwrap();
        store.remove(id).unwrap();
        drop(lease);
        assert_eq!(store.snapshot(id).err(), Some(SessionError::NotFound(id)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_idle_session_expires() {
        let store = SessionStore::new(Duration::from_millis(20));
        let stale = store.insert(ConversationSession::new(10, false));
        std::thread::sleep(Duration::from_millis(40));

        let fresh = store.insert(ConversationSession::new(10, false));
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot(stale).err(), Some(SessionError::NotFound(stale)));
        assert_eq!(store.checkout(stale).err(), Some(SessionError::NotFound(stale)));
        assert!(store.snapshot(fresh).is_ok());
    }

    #[test]
    fn test_busy_session_outlives_timeout() {
        let store = SessionStore::new(Duration::from_millis(20));
        let id = store.insert(ConversationSession::new(10, false));
        let lease = store.checkout(id).unwrap();
        std::thread::sleep(Duration::from_millis(40));

        store.insert(ConversationSession::new(10, false));
        assert_eq!(store.snapshot(id).err(), Some(SessionError::TurnInFlight(id)));
        drop(lease);
        // putting the session back counts as a use
        assert_eq!(store.snapshot(id).unwrap().history().count(), 1);
    }
}
