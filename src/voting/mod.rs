pub mod token;

use crate::error::SessionError;
use crate::models::{Question, QuestionType};
use std::collections::BTreeMap;

/// The rows one submission writes, and whether it supersedes the voter's earlier rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ballot {
    pub option_ids: Vec<i64>,
    pub replace_prior: bool,
}

/// Apply the question's selection policy to the submitted option ids.
///
/// Single-select takes exactly one option and replaces the voter's previous
/// choice. Multi-select takes one or more and adds to what the voter already
/// cast. Repeats inside one submission are collapsed, first occurrence kept.
pub fn plan_ballot(question: &Question, selected: &[i64]) -> Result<Ballot, SessionError> {
    let mut option_ids: Vec<i64> = Vec::with_capacity(selected.len());
    for id in selected {
        if !question.has_option(*id) {
            return Err(SessionError::validation(format!("Invalid option ID: {}", id)));
        }
        if !option_ids.contains(id) {
            option_ids.push(*id);
        }
    }

    if option_ids.is_empty() {
        return Err(SessionError::validation("Please select at least one option."));
    }

    match question.question_type {
        QuestionType::SingleSelect => {
            if option_ids.len() > 1 {
                return Err(SessionError::validation(
                    "Please select only one option for this question.",
                ));
            }
            Ok(Ballot { option_ids, replace_prior: true })
        }
        QuestionType::MultiSelect => Ok(Ballot { option_ids, replace_prior: false }),
    }
}

/// Per-option counts for one question, every option present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    pub counts: BTreeMap<String, i64>,
    pub total: i64,
}

/// Fold raw `(option_id, count)` rows into a tally covering all of the
/// question's options. Rows for options the question no longer has are skipped.
pub fn tally(question: &Question, rows: &[(i64, i64)]) -> Tally {
    // Initialize all options with 0 votes
    let mut counts: BTreeMap<String, i64> = question
        .options
        .iter()
        .map(|option| (option.id.to_string(), 0))
        .collect();

    let mut total = 0;
    for (option_id, count) in rows {
        if let Some(slot) = counts.get_mut(&option_id.to_string()) {
            *slot += count;
            total += count;
        }
    }

    Tally { counts, total }
}
