//! Views of a poll sent to clients. Recomputed from the store every time.

use std::collections::BTreeMap;

use crate::db::{Database, DbResult};
use crate::models::{Poll, PollStatus, Question};
use crate::protocol::{QuestionView, ServerMessage};
use crate::voting::{self, Tally};

/// Count the votes for one question straight from the ledger.
pub async fn aggregate(db: &Database, question: &Question) -> DbResult<Tally> {
    let rows = db.vote_counts(question.id).await?;
    Ok(voting::tally(question, &rows))
}

async fn question_view(db: &Database, question: &Question) -> DbResult<QuestionView> {
    let tally = aggregate(db, question).await?;
    Ok(QuestionView {
        id: question.id,
        text: question.text.clone(),
        question_type: question.question_type,
        options: question.options.clone(),
        votes: tally.counts,
    })
}

/// `poll_state_update` for the poll as it is now.
pub async fn poll_state(db: &Database, poll: &Poll) -> DbResult<ServerMessage> {
    let current_question = match poll.status {
        PollStatus::Active | PollStatus::Results => match poll.current_question() {
            Some(question) => Some(question_view(db, question).await?),
            None => None,
        },
        _ => None,
    };

    let (results, all_questions) = match poll.status {
        PollStatus::Results | PollStatus::Finished => {
            let mut results = BTreeMap::new();
            let mut views = Vec::with_capacity(poll.questions.len());
            for question in &poll.questions {
                let view = question_view(db, question).await?;
                results.insert(question.id.to_string(), view.votes.clone());
                views.push(view);
            }
            (Some(results), Some(views))
        }
        _ => (None, None),
    };

    Ok(ServerMessage::PollStateUpdate {
        poll_id: poll.id.to_string(),
        status: poll.status,
        current_question,
        results,
        all_questions,
    })
}

/// `admin_results_update` for the current question, empty when there is none.
pub async fn admin_results(db: &Database, poll: &Poll) -> DbResult<ServerMessage> {
    let (question_id, tally) = match poll.current_question() {
        Some(question) => (Some(question.id.to_string()), aggregate(db, question).await?),
        None => (None, Tally::default()),
    };

    Ok(ServerMessage::AdminResultsUpdate {
        poll_id: poll.id.to_string(),
        question_id,
        votes: tally.counts,
        total_votes: tally.total,
    })
}
