//! The quiz session state machine.
//!
//! `Loading → Presenting(i) → Scored(i) → … → Completed`, or `Empty` when
//! there is nothing to ask. The session never renders anything itself: every
//! transition queues a [`SessionEvent`] which the caller drains and draws.

use crate::error::{Error, Result};
use crate::question::{ChoiceKey, Question, QuestionEntry};
use log::{debug, info, warn};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Loading,
    /// Terminal: started with no usable questions.
    Empty,
    Presenting(usize),
    Scored(usize),
    /// Terminal.
    Completed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Empty | SessionState::Completed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Loading => write!(f, "loading"),
            SessionState::Empty => write!(f, "showing no questions"),
            SessionState::Presenting(i) => write!(f, "presenting question {}", i + 1),
            SessionState::Scored(i) => write!(f, "showing the result of question {}", i + 1),
            SessionState::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Correct,
    Incorrect,
}

/// How one answer option is drawn once the question is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionMark {
    pub key: ChoiceKey,
    pub mark: Mark,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scoring {
    pub index: usize,
    pub chosen: ChoiceKey,
    pub correct: ChoiceKey,
    pub is_correct: bool,
    /// One entry per option in display order. Only the true answer is
    /// `Correct`, whichever option was chosen.
    pub marks: [OptionMark; 4],
}

impl Scoring {
    fn new(index: usize, question: &Question, chosen: ChoiceKey) -> Self {
        let correct = question.correct_answer;
        Scoring {
            index,
            chosen,
            correct,
            is_correct: chosen == correct,
            marks: ChoiceKey::ALL.map(|key| OptionMark {
                key,
                mark: if key == correct {
                    Mark::Correct
                } else {
                    Mark::Incorrect
                },
                disabled: true,
            }),
        }
    }

    pub fn mark_of(&self, key: ChoiceKey) -> Mark {
        self.marks[key.index()].mark
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub correct: usize,
    pub answered: usize,
    pub skipped: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent<'a> {
    Presented {
        index: usize,
        /// 1-based position among the questions that can be asked.
        number: usize,
        total: usize,
        question: &'a Question,
    },
    Skipped {
        index: usize,
        key: String,
        reason: String,
    },
    Scored(Scoring),
    Completed(Summary),
    NoQuestions,
}

pub struct QuizSession<'a> {
    entries: &'a [QuestionEntry],
    state: SessionState,
    answered: bool,
    asked: usize,
    correct: usize,
    answered_count: usize,
    skipped: Vec<usize>,
    events: Vec<SessionEvent<'a>>,
}

impl<'a> Default for QuizSession<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> QuizSession<'a> {
    pub fn new() -> Self {
        QuizSession {
            entries: &[],
            state: SessionState::Loading,
            answered: false,
            asked: 0,
            correct: 0,
            answered_count: 0,
            skipped: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn answered(&self) -> bool {
        self.answered
    }

    pub fn score(&self) -> usize {
        self.correct
    }

    /// Questions that can actually be asked.
    pub fn total(&self) -> usize {
        self.entries.iter().filter(|e| e.question().is_some()).count()
    }

    pub fn current_question(&self) -> Option<&'a Question> {
        match self.state {
            SessionState::Presenting(i) | SessionState::Scored(i) => {
                let entries = self.entries;
                entries[i].question()
            }
            _ => None,
        }
    }

    /// Events queued since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<SessionEvent<'a>> {
        std::mem::take(&mut self.events)
    }

    /// Starts on the first askable question. With nothing to ask the session
    /// becomes `Empty` and `NoQuestions` is returned.
    pub fn start(&mut self, entries: &'a [QuestionEntry]) -> Result<SessionState> {
        if self.state != SessionState::Loading {
            return Err(self.invalid("start"));
        }
        self.entries = entries;
        info!("[Quiz] Starting with {} questions", entries.len());

        match self.next_askable(0) {
            Some(index) => {
                self.present(index);
                Ok(self.state)
            }
            None => {
                warn!("[Quiz] No questions available");
                self.state = SessionState::Empty;
                self.events.push(SessionEvent::NoQuestions);
                Err(Error::NoQuestions)
            }
        }
    }

    /// Scores `choice` against the current question. A second answer to the
    /// same question is rejected with `AlreadyAnswered` and changes nothing.
    pub fn select_answer(&mut self, choice: ChoiceKey) -> Result<Scoring> {
        let index = match self.state {
            SessionState::Presenting(index) => index,
            SessionState::Scored(index) => {
                debug!("[Quiz] Ignoring repeated answer {} for question {}", choice, index);
                return Err(Error::AlreadyAnswered(index));
            }
            _ => return Err(self.invalid("select_answer")),
        };
        let entries = self.entries;
        let Some(question) = entries[index].question() else {
            return Err(self.invalid("select_answer"));
        };

        let scoring = Scoring::new(index, question, choice);
        self.answered = true;
        self.answered_count += 1;
        if scoring.is_correct {
            self.correct += 1;
        }
        debug!(
            "[Quiz] Question {}: chose {}, correct {} ({})",
            index, choice, scoring.correct, scoring.is_correct
        );
        self.state = SessionState::Scored(index);
        self.events.push(SessionEvent::Scored(scoring.clone()));
        Ok(scoring)
    }

    pub fn advance(&mut self) -> Result<SessionState> {
        let SessionState::Scored(index) = self.state else {
            return Err(self.invalid("advance"));
        };
        match self.next_askable(index + 1) {
            Some(next) => self.present(next),
            None => {
                let summary = Summary {
                    correct: self.correct,
                    answered: self.answered_count,
                    skipped: self.skipped.clone(),
                };
                info!(
                    "[Quiz] Completed: {}/{} correct",
                    summary.correct, summary.answered
                );
                self.state = SessionState::Completed;
                self.events.push(SessionEvent::Completed(summary));
            }
        }
        Ok(self.state)
    }

    /// Back to `Loading`, forgetting questions and score.
    pub fn reset(&mut self) {
        debug!("[Quiz] Session reset from {}", self.state);
        *self = Self::new();
    }

    fn present(&mut self, index: usize) {
        self.answered = false;
        self.asked += 1;
        self.state = SessionState::Presenting(index);
        let entries = self.entries;
        if let Some(question) = entries[index].question() {
            self.events.push(SessionEvent::Presented {
                index,
                number: self.asked,
                total: self.total(),
                question,
            });
        }
    }

    /// First askable index at or after `from`, reporting every malformed
    /// entry passed on the way.
    fn next_askable(&mut self, from: usize) -> Option<usize> {
        let entries = self.entries;
        for (index, entry) in entries.iter().enumerate().skip(from) {
            match entry {
                QuestionEntry::Valid(_) => return Some(index),
                QuestionEntry::Malformed { key, reason } => {
                    warn!("[Quiz] Skipping malformed question {} ({}): {}", index, key, reason);
                    self.skipped.push(index);
                    self.events.push(SessionEvent::Skipped {
                        index,
                        key: key.clone(),
                        reason: reason.clone(),
                    });
                }
            }
        }
        None
    }

    fn invalid(&self, action: &'static str) -> Error {
        Error::InvalidTransition {
            action,
            state: self.state.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(text: &str, correct: ChoiceKey) -> QuestionEntry {
        QuestionEntry::Valid(Question {
            key: text.to_lowercase(),
            text: text.to_string(),
            answers: ["A".into(), "B".into(), "C".into(), "D".into()],
            correct_answer: correct,
        })
    }

    fn malformed(key: &str) -> QuestionEntry {
        QuestionEntry::Malformed {
            key: key.to_string(),
            reason: "expected 4 answers, found 3".to_string(),
        }
    }

    #[test]
    fn marks_only_the_true_answer_correct() {
        for correct in ChoiceKey::ALL {
            for chosen in ChoiceKey::ALL {
                let entries = vec![question("Q", correct)];
                let mut session = QuizSession::new();
                session.start(&entries).unwrap();
                let scoring = session.select_answer(chosen).unwrap();

                let correct_marks: Vec<ChoiceKey> = scoring
                    .marks
                    .iter()
                    .filter(|m| m.mark == Mark::Correct)
                    .map(|m| m.key)
                    .collect();
                assert_eq!(correct_marks, vec![correct]);
                assert!(scoring.marks.iter().all(|m| m.disabled));
                assert_eq!(scoring.is_correct, chosen == correct);
                let expected = if chosen == correct { Mark::Correct } else { Mark::Incorrect };
                assert_eq!(scoring.mark_of(chosen), expected);
            }
        }
    }

    #[test]
    fn walks_every_question_then_completes() {
        let entries = vec![question("One", ChoiceKey::A), question("Two", ChoiceKey::D)];
        let mut session = QuizSession::new();
        assert_eq!(session.start(&entries).unwrap(), SessionState::Presenting(0));
        assert!(!session.answered());

        session.select_answer(ChoiceKey::A).unwrap();
        assert!(session.answered());
        assert_eq!(session.advance().unwrap(), SessionState::Presenting(1));
        assert!(!session.answered());
        assert_eq!(session.current_question().unwrap().text, "Two");

        session.select_answer(ChoiceKey::B).unwrap();
        assert_eq!(session.advance().unwrap(), SessionState::Completed);
        assert_eq!(session.score(), 1);

        let events = session.drain_events();
        assert_eq!(
            events.last(),
            Some(&SessionEvent::Completed(Summary {
                correct: 1,
                answered: 2,
                skipped: vec![],
            }))
        );
    }

    #[test]
    fn advancing_from_the_last_question_completes() {
        let entries = vec![question("Only", ChoiceKey::C)];
        let mut session = QuizSession::new();
        session.start(&entries).unwrap();
        session.select_answer(ChoiceKey::C).unwrap();
        assert_eq!(session.advance().unwrap(), SessionState::Completed);
        assert!(session.state().is_terminal());
    }

    #[test]
    fn empty_start_never_presents() {
        let mut session = QuizSession::new();
        assert!(matches!(session.start(&[]), Err(Error::NoQuestions)));
        assert_eq!(session.state(), SessionState::Empty);
        assert_eq!(session.drain_events(), vec![SessionEvent::NoQuestions]);
        assert!(session.select_answer(ChoiceKey::A).is_err());
        assert!(session.advance().is_err());
    }

    #[test]
    fn repeated_answer_is_rejected_without_rescoring() {
        let entries = vec![question("Q", ChoiceKey::B)];
        let mut session = QuizSession::new();
        session.start(&entries).unwrap();
        session.select_answer(ChoiceKey::A).unwrap();

        assert!(matches!(
            session.select_answer(ChoiceKey::B),
            Err(Error::AlreadyAnswered(0))
        ));
        assert_eq!(session.score(), 0);
        assert_eq!(session.state(), SessionState::Scored(0));
    }

    #[test]
    fn completed_session_accepts_nothing() {
        let entries = vec![question("Q", ChoiceKey::A)];
        let mut session = QuizSession::new();
        session.start(&entries).unwrap();
        session.select_answer(ChoiceKey::A).unwrap();
        session.advance().unwrap();

        assert!(matches!(
            session.select_answer(ChoiceKey::A),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(session.advance(), Err(Error::InvalidTransition { .. })));
        assert_eq!(session.score(), 1);
    }

    #[test]
    fn advance_before_answering_is_rejected() {
        let entries = vec![question("Q", ChoiceKey::A)];
        let mut session = QuizSession::new();
        session.start(&entries).unwrap();
        assert!(matches!(session.advance(), Err(Error::InvalidTransition { .. })));
        assert_eq!(session.state(), SessionState::Presenting(0));
    }

    #[test]
    fn malformed_questions_are_skipped_and_reported() {
        let entries = vec![
            malformed("bad0"),
            question("Good", ChoiceKey::A),
            malformed("bad2"),
        ];
        let mut session = QuizSession::new();
        assert_eq!(session.start(&entries).unwrap(), SessionState::Presenting(1));
        assert_eq!(session.total(), 1);
        session.select_answer(ChoiceKey::A).unwrap();
        assert_eq!(session.advance().unwrap(), SessionState::Completed);

        let skipped: Vec<usize> = session
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Skipped { index, .. } => Some(index),
                _ => None,
            })
            .collect();
        assert_eq!(skipped, vec![0, 2]);
    }

    #[test]
    fn only_malformed_questions_means_no_questions() {
        let entries = vec![malformed("bad")];
        let mut session = QuizSession::new();
        assert!(matches!(session.start(&entries), Err(Error::NoQuestions)));
        assert_eq!(session.state(), SessionState::Empty);
    }

    #[test]
    fn presented_events_number_askable_questions() {
        let entries = vec![
            question("One", ChoiceKey::A),
            malformed("bad"),
            question("Two", ChoiceKey::B),
        ];
        let mut session = QuizSession::new();
        session.start(&entries).unwrap();
        session.select_answer(ChoiceKey::A).unwrap();
        session.advance().unwrap();

        let numbers: Vec<(usize, usize, usize)> = session
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Presented { index, number, total, .. } => Some((index, number, total)),
                _ => None,
            })
            .collect();
        assert_eq!(numbers, vec![(0, 1, 2), (2, 2, 2)]);
    }

    #[test]
    fn reset_allows_a_fresh_start() {
        let entries = vec![question("Q", ChoiceKey::A)];
        let mut session = QuizSession::new();
        session.start(&entries).unwrap();
        assert!(session.start(&entries).is_err());

        session.reset();
        assert_eq!(session.state(), SessionState::Loading);
        assert_eq!(session.start(&entries).unwrap(), SessionState::Presenting(0));
    }
}
