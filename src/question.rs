use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChoiceKey {
    A,
    B,
    C,
    D,
}

impl ChoiceKey {
    /// Display order of the options.
    pub const ALL: [ChoiceKey; 4] = [ChoiceKey::A, ChoiceKey::B, ChoiceKey::C, ChoiceKey::D];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChoiceKey::A => "a",
            ChoiceKey::B => "b",
            ChoiceKey::C => "c",
            ChoiceKey::D => "d",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Exact match on the stored key; typed input goes through `FromStr`.
    pub fn from_key(key: &str) -> Option<ChoiceKey> {
        ChoiceKey::ALL.into_iter().find(|k| k.as_str() == key)
    }
}

impl fmt::Display for ChoiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

impl FromStr for ChoiceKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" => Ok(ChoiceKey::A),
            "b" => Ok(ChoiceKey::B),
            "c" => Ok(ChoiceKey::C),
            "d" => Ok(ChoiceKey::D),
            other => Err(format!("'{}' is not one of a, b, c, d", other)),
        }
    }
}

/// A validated quiz question: four answers and a correct key among them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Collection key the record was stored under, empty for unsaved drafts.
    pub key: String,
    pub text: String,
    pub answers: [String; 4],
    pub correct_answer: ChoiceKey,
}

impl Question {
    pub fn answer(&self, key: ChoiceKey) -> &str {
        &self.answers[key.index()]
    }

    pub fn options(&self) -> impl Iterator<Item = (ChoiceKey, &str)> {
        ChoiceKey::ALL.into_iter().map(move |k| (k, self.answer(k)))
    }

    pub fn is_correct(&self, key: ChoiceKey) -> bool {
        key == self.correct_answer
    }

    /// Wire shape stored in the `questions` collection.
    pub fn to_record(&self) -> QuestionRecord {
        QuestionRecord {
            question: self.text.clone(),
            answers: self
                .options()
                .map(|(k, a)| (k.as_str().to_string(), a.to_string()))
                .collect(),
            correct_answer: self.correct_answer.as_str().to_string(),
        }
    }

    pub fn from_value(key: &str, value: &Value) -> Result<Question> {
        let raw: RawQuestion = serde_json::from_value(value.clone()).map_err(|err| {
            Error::MalformedQuestion {
                key: key.to_string(),
                reason: err.to_string(),
            }
        })?;
        raw.validate(key)
    }
}

/// One record of the `questions` collection as the session sees it. Broken
/// records keep their position so they can be reported where they occur.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionEntry {
    Valid(Question),
    Malformed { key: String, reason: String },
}

impl QuestionEntry {
    pub fn from_value(key: &str, value: &Value) -> Self {
        match Question::from_value(key, value) {
            Ok(question) => QuestionEntry::Valid(question),
            Err(Error::MalformedQuestion { key, reason }) => QuestionEntry::Malformed { key, reason },
            Err(other) => QuestionEntry::Malformed {
                key: key.to_string(),
                reason: other.to_string(),
            },
        }
    }

    pub fn question(&self) -> Option<&Question> {
        match self {
            QuestionEntry::Valid(question) => Some(question),
            QuestionEntry::Malformed { .. } => None,
        }
    }
}

impl From<Question> for QuestionEntry {
    fn from(question: Question) -> Self {
        QuestionEntry::Valid(question)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRecord {
    pub question: String,
    pub answers: BTreeMap<String, String>,
    pub correct_answer: String,
}

/// What the collection actually hands back; every field may be missing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuestion {
    question: Option<String>,
    #[serde(default)]
    answers: BTreeMap<String, Value>,
    correct_answer: Option<String>,
}

impl RawQuestion {
    fn validate(self, key: &str) -> Result<Question> {
        let malformed = |reason: String| Error::MalformedQuestion {
            key: key.to_string(),
            reason,
        };

        let text = self
            .question
            .ok_or_else(|| malformed("missing `question`".to_string()))?;

        if self.answers.len() != 4 {
            return Err(malformed(format!(
                "expected 4 answers, found {}",
                self.answers.len()
            )));
        }
        let mut answers: [String; 4] = Default::default();
        for choice in ChoiceKey::ALL {
            answers[choice.index()] = match self.answers.get(choice.as_str()) {
                Some(Value::String(answer)) => answer.clone(),
                Some(_) => return Err(malformed(format!("answer `{}` is not text", choice.as_str()))),
                None => return Err(malformed(format!("missing answer `{}`", choice.as_str()))),
            };
        }

        let correct = self
            .correct_answer
            .ok_or_else(|| malformed("missing `correctAnswer`".to_string()))?;
        let correct_answer = ChoiceKey::from_key(&correct).ok_or_else(|| {
            malformed(format!("correct answer `{}` is not one of a, b, c, d", correct))
        })?;

        Ok(Question {
            key: key.to_string(),
            text,
            answers,
            correct_answer,
        })
    }
}

/// Admin form input, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    pub question: String,
    pub answers: [String; 4],
    #[serde(default)]
    pub correct_answer: Option<String>,
}

impl QuestionDraft {
    /// Every field must be non-empty after trimming; the correct answer
    /// defaults to `a`.
    pub fn validate(&self) -> Result<Question> {
        let text = self.question.trim();
        if text.is_empty() || self.answers.iter().any(|a| a.trim().is_empty()) {
            return Err(Error::InvalidQuestion(
                "please fill in the question and all four answers".to_string(),
            ));
        }
        let correct_answer = match &self.correct_answer {
            Some(key) => key.parse::<ChoiceKey>().map_err(Error::InvalidQuestion)?,
            None => ChoiceKey::A,
        };

        Ok(Question {
            key: String::new(),
            text: text.to_string(),
            answers: self.answers.clone().map(|a| a.trim().to_string()),
            correct_answer,
        })
    }
}
