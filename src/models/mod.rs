use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a live poll session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Setup,
    Active,
    Results,
    Finished,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Setup => "setup",
            PollStatus::Active => "active",
            PollStatus::Results => "results",
            PollStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PollStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "setup" => Ok(PollStatus::Setup),
            "active" => Ok(PollStatus::Active),
            "results" => Ok(PollStatus::Results),
            "finished" => Ok(PollStatus::Finished),
            _ => Err(format!("Unknown poll status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuestionType {
    #[serde(rename = "single-select")]
    SingleSelect,
    #[serde(rename = "multi-select")]
    MultiSelect,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::SingleSelect => "single-select",
            QuestionType::MultiSelect => "multi-select",
        }
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single-select" => Ok(QuestionType::SingleSelect),
            "multi-select" => Ok(QuestionType::MultiSelect),
            _ => Err(format!("Unknown question type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    pub id: i64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub options: Vec<PollOption>,
}

impl Question {
    pub fn has_option(&self, option_id: i64) -> bool {
        self.options.iter().any(|option| option.id == option_id)
    }
}

/// A poll as read from the store. Plain data: serialization of changes is
/// owned by the session layer, never by the value itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: i64,
    pub invite_id: String,
    pub title: String,
    pub questions: Vec<Question>,
    pub status: PollStatus,
    pub current_question_index: i64,
}

impl Poll {
    pub fn state(&self) -> PollState {
        PollState {
            status: self.status,
            current_question_index: self.current_question_index,
        }
    }

    // None while in setup or if the stored index is out of range
    pub fn current_question(&self) -> Option<&Question> {
        usize::try_from(self.current_question_index)
            .ok()
            .and_then(|idx| self.questions.get(idx))
    }
}

/// The two fields of a poll this core is allowed to mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollState {
    pub status: PollStatus,
    pub current_question_index: i64,
}

impl PollState {
    pub fn initial() -> Self {
        Self {
            status: PollStatus::Setup,
            current_question_index: -1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub id: i64,
    pub question_id: i64,
    pub option_id: i64,
    pub voter_id: String,
    pub created_at: DateTime<Utc>,
}

// Input for the structural editor; the session core never creates polls.
#[derive(Debug, Clone)]
pub struct NewPoll {
    pub invite_id: String,
    pub title: String,
    pub questions: Vec<NewQuestion>,
}

#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub text: String,
    pub question_type: QuestionType,
    pub options: Vec<String>,
}

impl NewPoll {
    pub fn new(invite_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            invite_id: invite_id.into(),
            title: title.into(),
            questions: Vec::new(),
        }
    }

    pub fn question(mut self, text: &str, question_type: QuestionType, options: &[&str]) -> Self {
        self.questions.push(NewQuestion {
            text: text.to_string(),
            question_type,
            options: options.iter().map(|o| o.to_string()).collect(),
        });
        self
    }
}
