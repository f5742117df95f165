//! Envelopes exchanged over a poll room's WebSocket.
//!
//! Inbound frames are routed on their `type` field before the payload is
//! decoded, so an unknown discriminant and a malformed payload produce
//! different error replies.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::SessionError;
use crate::models::{PollOption, PollStatus, QuestionType};

pub const SUBMIT_VOTE: &str = "submit_vote";
pub const ADMIN_ACTION: &str = "admin_action";

/// An identifier as clients send it: `"12"` and `12` are both accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WireId {
    Number(i64),
    Text(String),
}

impl WireId {
    pub fn parse(&self) -> Option<i64> {
        match self {
            WireId::Number(n) => Some(*n),
            WireId::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn raw(&self) -> String {
        match self {
            WireId::Number(n) => n.to_string(),
            WireId::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitVote {
    #[serde(default)]
    pub poll_id: Option<String>,
    pub question_id: WireId,
    #[serde(default)]
    pub selected_options: Vec<WireId>,
    #[serde(default)]
    pub voter_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminActionRequest {
    #[serde(default)]
    pub poll_id: Option<String>,
    pub action: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    Start,
    Next,
    ShowResults,
    Done,
}

impl AdminAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminAction::Start => "start",
            AdminAction::Next => "next",
            AdminAction::ShowResults => "show_results",
            AdminAction::Done => "done",
        }
    }
}

impl FromStr for AdminAction {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(AdminAction::Start),
            "next" => Ok(AdminAction::Next),
            "show_results" => Ok(AdminAction::ShowResults),
            "done" => Ok(AdminAction::Done),
            _ => Err(SessionError::protocol("Unknown admin action.")),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ClientMessage {
    SubmitVote(SubmitVote),
    AdminAction(AdminActionRequest),
}

/// Decode one inbound text frame.
pub fn decode(text: &str) -> Result<ClientMessage, SessionError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| SessionError::protocol(format!("Malformed message: {}", e)))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| SessionError::protocol("Unknown message type."))?
        .to_string();

    match kind.as_str() {
        SUBMIT_VOTE => serde_json::from_value(value)
            .map(ClientMessage::SubmitVote)
            .map_err(|e| SessionError::protocol(format!("Malformed submit_vote: {}", e))),
        ADMIN_ACTION => serde_json::from_value(value)
            .map(ClientMessage::AdminAction)
            .map_err(|e| SessionError::protocol(format!("Malformed admin_action: {}", e))),
        _ => Err(SessionError::protocol("Unknown message type.")),
    }
}

/// A question as shown to clients, with its live per-option counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionView {
    pub id: i64,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub options: Vec<PollOption>,
    pub votes: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    PollStateUpdate {
        poll_id: String,
        status: PollStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_question: Option<QuestionView>,
        #[serde(skip_serializing_if = "Option::is_none")]
        results: Option<BTreeMap<String, BTreeMap<String, i64>>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        all_questions: Option<Vec<QuestionView>>,
    },
    #[serde(rename_all = "camelCase")]
    AdminResultsUpdate {
        poll_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        question_id: Option<String>,
        votes: BTreeMap<String, i64>,
        total_votes: i64,
    },
    #[serde(rename_all = "camelCase")]
    VoteRecorded {
        poll_id: String,
        question_id: String,
        voter_id: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error { message: message.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::PollStateUpdate { .. } => "poll_state_update",
            ServerMessage::AdminResultsUpdate { .. } => "admin_results_update",
            ServerMessage::VoteRecorded { .. } => "vote_recorded",
            ServerMessage::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
