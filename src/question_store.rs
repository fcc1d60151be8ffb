use crate::db::{RealtimeDatabase, Snapshot, Subscription};
use crate::error::{Error, Result};
use crate::question::{Question, QuestionDraft, QuestionEntry};
use log::{debug, error, info, warn};
use std::cell::RefCell;
use std::rc::Rc;

pub const QUESTIONS_PATH: &str = "questions";

/// One snapshot of the `questions` collection in insertion order.
#[derive(Debug, Default)]
pub struct LoadedQuestions {
    pub version: i64,
    pub entries: Vec<QuestionEntry>,
}

impl LoadedQuestions {
    fn from_snapshot(snapshot: &Snapshot) -> Self {
        let entries = snapshot
            .iter()
            .map(|(key, value)| {
                let entry = QuestionEntry::from_value(key, value);
                if let QuestionEntry::Malformed { key, reason } = &entry {
                    warn!("[Setup] Question record {} is malformed: {}", key, reason);
                }
                entry
            })
            .collect();
        LoadedQuestions {
            version: snapshot.version,
            entries,
        }
    }

    pub fn questions(&self) -> impl Iterator<Item = &Question> {
        self.entries.iter().filter_map(QuestionEntry::question)
    }

    pub fn malformed_count(&self) -> usize {
        self.entries.len() - self.questions().count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct QuestionStore<'a, D: RealtimeDatabase> {
    db: &'a D,
    last_error: Rc<RefCell<Option<String>>>,
}

impl<'a, D: RealtimeDatabase> QuestionStore<'a, D> {
    pub fn new(db: &'a D) -> Self {
        QuestionStore {
            db,
            last_error: Rc::new(RefCell::new(None)),
        }
    }

    /// One-shot read. A read error is recorded, logged and returned as
    /// `LoadFailed`; callers that only need to render can fall back to
    /// `unwrap_or_default()` and consult [`last_error`](Self::last_error).
    pub fn load_all(&self) -> Result<LoadedQuestions> {
        match self.db.get(QUESTIONS_PATH) {
            Ok(snapshot) => {
                *self.last_error.borrow_mut() = None;
                let loaded = LoadedQuestions::from_snapshot(&snapshot);
                debug!(
                    "[Setup] Loaded {} questions ({} malformed)",
                    loaded.entries.len(),
                    loaded.malformed_count()
                );
                Ok(loaded)
            }
            Err(err) => {
                error!("[Setup] Cannot load questions: {}", err);
                *self.last_error.borrow_mut() = Some(err.to_string());
                Err(err.into_load_failed())
            }
        }
    }

    /// Calls `callback` with every new snapshot of the collection. On a read
    /// error the callback receives an empty set and the failure is recorded.
    pub fn on_update<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(LoadedQuestions) + 'static,
    {
        let last_error = Rc::clone(&self.last_error);
        let mut delivered = -1;
        self.db.on_value(
            QUESTIONS_PATH,
            Box::new(move |snapshot| match snapshot {
                Ok(snapshot) => {
                    if snapshot.version < delivered {
                        return;
                    }
                    delivered = snapshot.version;
                    *last_error.borrow_mut() = None;
                    callback(LoadedQuestions::from_snapshot(&snapshot));
                }
                Err(err) => {
                    error!("[Setup] Question subscription failed: {}", err);
                    *last_error.borrow_mut() = Some(err.to_string());
                    callback(LoadedQuestions::default());
                }
            }),
        )
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    /// Validates the draft and appends it, returning the new record key.
    pub fn add(&self, draft: &QuestionDraft) -> Result<String> {
        let question = draft.validate()?;
        let value = serde_json::to_value(question.to_record())?;
        match self.db.push(QUESTIONS_PATH, &value) {
            Ok(key) => {
                info!("[Admin] Question '{}' saved as {}", question.text, key);
                Ok(key)
            }
            Err(err) => {
                error!("[Admin] Error saving question: {}", err);
                Err(Error::save_failed(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteDatabase;
    use crate::question::ChoiceKey;
    use serde_json::json;

    struct BrokenDatabase;

    impl RealtimeDatabase for BrokenDatabase {
        fn push(&self, _path: &str, _value: &serde_json::Value) -> Result<String> {
            Err(Error::save_failed("disk full"))
        }
        fn get(&self, _path: &str) -> Result<Snapshot> {
            Err(Error::load_failed("connection reset"))
        }
        fn on_value(&self, path: &str, mut callback: crate::db::SnapshotCallback) -> Subscription {
            callback(self.get(path));
            Subscription::detached()
        }
    }

    fn draft(q: &str, correct: &str) -> QuestionDraft {
        QuestionDraft {
            question: q.to_string(),
            answers: ["A".into(), "B".into(), "C".into(), "D".into()],
            correct_answer: Some(correct.to_string()),
        }
    }

    #[test]
    fn question_round_trips_through_the_collection() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.push(
            QUESTIONS_PATH,
            &json!({"question": "Q", "answers": {"a": "A", "b": "B", "c": "C", "d": "D"}, "correctAnswer": "b"}),
        )
        .unwrap();

        let loaded = QuestionStore::new(&db).load_all().unwrap();
        assert_eq!(loaded.entries.len(), 1);
        let question = loaded.questions().next().unwrap();
        assert_eq!(question.text, "Q");
        assert_eq!(question.answers, ["A", "B", "C", "D"].map(String::from));
        assert_eq!(question.correct_answer, ChoiceKey::B);
    }

    #[test]
    fn empty_collection_is_not_an_error() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let loaded = QuestionStore::new(&db).load_all().unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn malformed_records_are_reported_separately() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let store = QuestionStore::new(&db);
        store.add(&draft("good", "c")).unwrap();
        db.push(QUESTIONS_PATH, &json!({"question": "bad", "answers": {"a": "A"}, "correctAnswer": "a"}))
            .unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.entries.len(), 2);
        assert_eq!(loaded.questions().count(), 1);
        assert_eq!(loaded.malformed_count(), 1);
        assert!(matches!(loaded.entries[1], QuestionEntry::Malformed { .. }));
    }

    #[test]
    fn add_rejects_incomplete_draft() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let store = QuestionStore::new(&db);
        assert!(matches!(store.add(&draft("", "a")), Err(Error::InvalidQuestion(_))));
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn on_update_follows_the_collection_until_cancelled() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let store = QuestionStore::new(&db);
        let counts = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&counts);
        let subscription = store.on_update(move |loaded| sink.borrow_mut().push(loaded.entries.len()));

        store.add(&draft("one", "a")).unwrap();
        store.add(&draft("two", "b")).unwrap();
        subscription.cancel();
        store.add(&draft("three", "c")).unwrap();

        assert_eq!(*counts.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn read_failure_is_recorded_and_yields_empty_set() {
        let store = QuestionStore::new(&BrokenDatabase);
        assert!(matches!(store.load_all(), Err(Error::LoadFailed(_))));
        assert!(store.last_error().unwrap().contains("connection reset"));
        let message = store.load_all().unwrap_err().to_string();
        assert_eq!(message.matches("failed to load").count(), 1);

        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        let _subscription = store.on_update(move |loaded| *sink.borrow_mut() = Some(loaded.entries.len()));
        assert_eq!(*seen.borrow(), Some(0));
    }

    #[test]
    fn add_surfaces_save_failure() {
        let store = QuestionStore::new(&BrokenDatabase);
        assert!(matches!(store.add(&draft("q", "a")), Err(Error::SaveFailed(_))));
    }
}
