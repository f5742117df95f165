use crate::error::SessionError;
use crate::models::{PollState, PollStatus};
use crate::protocol::AdminAction;

/// Compute the state an admin action leads to, without touching anything.
///
/// `question_count` is the number of questions the poll has right now.
pub fn transition(
    current: PollState,
    action: AdminAction,
    question_count: usize,
) -> Result<PollState, SessionError> {
    let count = question_count as i64;
    match action {
        AdminAction::Start => {
            if current.status == PollStatus::Setup && count > 0 {
                Ok(PollState { status: PollStatus::Active, current_question_index: 0 })
            } else {
                Err(SessionError::conflict(
                    "Cannot start poll. Ensure questions are added and poll is in 'setup' status.",
                ))
            }
        }
        AdminAction::Next => match current.status {
            PollStatus::Active | PollStatus::Results => {
                let next_index = current.current_question_index + 1;
                if next_index < count {
                    Ok(PollState { status: PollStatus::Active, current_question_index: next_index })
                } else {
                    // Past the last question: finish, index stays where it was
                    Ok(PollState { status: PollStatus::Finished, ..current })
                }
            }
            _ => Err(SessionError::conflict(
                "Cannot move to next question. Poll is not active or in results mode.",
            )),
        },
        AdminAction::ShowResults => {
            if current.status == PollStatus::Active {
                Ok(PollState { status: PollStatus::Results, ..current })
            } else {
                Err(SessionError::conflict("Cannot show results. Poll is not active."))
            }
        }
        AdminAction::Done => Ok(PollState { status: PollStatus::Finished, ..current }),
    }
}

/// Message for a failed write of the given action's new state.
pub fn persist_failure_message(action: AdminAction, next: PollState) -> &'static str {
    match (action, next.status) {
        (AdminAction::Start, _) => "Failed to start poll.",
        (AdminAction::Next, PollStatus::Finished) => "Failed to finish poll.",
        (AdminAction::Next, _) => "Failed to move to next question.",
        (AdminAction::ShowResults, _) => "Failed to show results.",
        (AdminAction::Done, _) => "Failed to mark poll as done.",
    }
}
