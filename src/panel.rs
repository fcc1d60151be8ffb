//! Admin side: authoring questions, the selfie gallery and the share link.

use crate::auth::AuthState;
use crate::db::{RealtimeDatabase, Subscription};
use crate::entry::ShareLink;
use crate::error::{Error, Result};
use crate::question::{Question, QuestionDraft};
use crate::question_store::QuestionStore;
use crate::selfie::{OwnerScope, SelfieRecord, SelfieSink};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

/// File format for bulk import and export.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct QuestionsJson {
    pub questions: Vec<QuestionDraft>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub added: Vec<String>,
    /// Position in the file and why it was refused.
    pub rejected: Vec<(usize, String)>,
}

#[derive(Debug, PartialEq)]
pub enum Gallery {
    SignedOut,
    Empty,
    Selfies(Vec<SelfieRecord>),
}

impl Gallery {
    fn from_records(records: Vec<SelfieRecord>) -> Self {
        if records.is_empty() {
            Gallery::Empty
        } else {
            Gallery::Selfies(records)
        }
    }
}

pub struct AdminPanel<'a, D: RealtimeDatabase> {
    questions: QuestionStore<'a, D>,
    selfies: SelfieSink<'a, D>,
    share: ShareLink,
    admin: Rc<RefCell<Option<String>>>,
}

impl<'a, D: RealtimeDatabase> AdminPanel<'a, D> {
    pub fn new(db: &'a D, share: ShareLink) -> Self {
        AdminPanel {
            questions: QuestionStore::new(db),
            selfies: SelfieSink::new(db),
            share,
            admin: Rc::new(RefCell::new(None)),
        }
    }

    /// Follows sign-in changes; the gallery and share link are scoped to
    /// whoever is signed in.
    pub fn attach(&self, auth: &mut AuthState) {
        let admin = Rc::clone(&self.admin);
        auth.on_change(move |uid| {
            match uid {
                Some(uid) => debug!("[Admin] Panel scoped to {}", uid),
                None => debug!("[Admin] Panel signed out"),
            }
            *admin.borrow_mut() = uid.map(str::to_string);
        });
    }

    pub fn current_admin(&self) -> Option<String> {
        self.admin.borrow().clone()
    }

    pub fn add_question(&self, draft: &QuestionDraft) -> Result<String> {
        self.questions.add(draft)
    }

    pub fn questions(&self) -> Result<Vec<Question>> {
        let loaded = self.questions.load_all()?;
        Ok(loaded.questions().cloned().collect())
    }

    /// Live question list; `callback` receives every new listing.
    pub fn watch_questions<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(Vec<Question>) + 'static,
    {
        self.questions
            .on_update(move |loaded| callback(loaded.questions().cloned().collect()))
    }

    /// Adds every valid draft in `json`; invalid ones are reported, not fatal.
    pub fn import_questions(&self, json: &str) -> Result<ImportReport> {
        let file: QuestionsJson = serde_json::from_str(json)?;
        info!("[Admin] Importing {} questions", file.questions.len());
        let mut report = ImportReport::default();
        for (position, draft) in file.questions.iter().enumerate() {
            match self.questions.add(draft) {
                Ok(key) => report.added.push(key),
                Err(err @ Error::InvalidQuestion(_)) => {
                    warn!("[Admin] Question {} rejected: {}", position + 1, err);
                    report.rejected.push((position, err.to_string()));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    pub fn export_questions(&self) -> Result<String> {
        let questions = self
            .questions()?
            .into_iter()
            .map(|q| QuestionDraft {
                correct_answer: Some(q.correct_answer.as_str().to_string()),
                question: q.text,
                answers: q.answers,
            })
            .collect();
        Ok(serde_json::to_string_pretty(&QuestionsJson { questions })?)
    }

    pub fn gallery(&self) -> Result<Gallery> {
        let Some(uid) = self.current_admin() else {
            return Ok(Gallery::SignedOut);
        };
        Ok(Gallery::from_records(self.selfies.list_for(&uid)?))
    }

    /// `None` while signed out.
    pub fn watch_gallery<F>(&self, mut callback: F) -> Option<Subscription>
    where
        F: FnMut(Result<Gallery>) + 'static,
    {
        let uid = self.current_admin()?;
        let scope = OwnerScope::Admin(uid);
        Some(
            self.selfies
                .on_update(&scope, move |records| callback(records.map(Gallery::from_records))),
        )
    }

    /// The quiz URL that attributes selfies to the signed-in admin.
    pub fn share_link(&self) -> Option<String> {
        self.current_admin().map(|uid| self.share.for_admin(&uid))
    }
}

/// Admin list rendering: numbered question with its options and answer key.
pub fn describe_question(number: usize, question: &Question) -> String {
    let mut text = format!("{}. {}\n", number, question.text);
    for (key, answer) in question.options() {
        text.push_str(&format!("   {}: {}\n", key, answer));
    }
    text.push_str(&format!("   Correct answer: {}", question.correct_answer));
    text
}
