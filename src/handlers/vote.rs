use log::debug;

use crate::error::SessionError;
use crate::protocol::{ServerMessage, SubmitVote};
use crate::session::PollService;
use crate::ws::connection::ClientConnection;

pub async fn handle_submit_vote(
    service: &PollService,
    conn: &ClientConnection,
    room: &str,
    request: SubmitVote,
) -> Result<(), SessionError> {
    debug!(
        "submit_vote from connection {} in poll {}: question {} options {:?}",
        conn.id,
        room,
        request.question_id.raw(),
        request.selected_options
    );

    let receipt = service.submit_vote(room, request).await?;

    conn.send_message(&ServerMessage::VoteRecorded {
        poll_id: receipt.poll_id.to_string(),
        question_id: receipt.question_id.to_string(),
        voter_id: receipt.voter_id,
    });
    Ok(())
}
