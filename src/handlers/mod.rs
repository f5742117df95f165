mod admin;
mod vote;

use log::{error, warn};

use crate::error::SessionError;
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::session::PollService;
use crate::ws::connection::ClientConnection;

/// Handle one inbound text frame from a connection in `room`.
///
/// Failures are answered with an `error` envelope to the sender only; the
/// connection stays open.
pub async fn handle_message(service: &PollService, conn: &ClientConnection, room: &str, text: &str) {
    let result = match protocol::decode(text) {
        Ok(ClientMessage::SubmitVote(request)) => vote::handle_submit_vote(service, conn, room, request).await,
        Ok(ClientMessage::AdminAction(request)) => admin::handle_admin_action(service, conn, room, request).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        report(conn, room, &e);
    }
}

fn report(conn: &ClientConnection, room: &str, err: &SessionError) {
    match err {
        SessionError::Persistence { message, source } => {
            error!("{} (poll {}, connection {}): {}", message, room, conn.id, source);
        }
        _ => warn!("Rejected {} from connection {} in poll {}: {}", err.kind(), conn.id, room, err),
    }
    conn.send_message(&ServerMessage::error(err.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{NewPoll, QuestionType};
    use crate::ws::connection::Role;
    use crate::ws::registry::ConnectionRegistry;
    use axum::extract::ws::Utf8Bytes;
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    async fn setup() -> (PollService, Arc<ClientConnection>, mpsc::Receiver<Utf8Bytes>) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        db.create_poll(&NewPoll::new("h1", "Handlers").question("Q", QuestionType::SingleSelect, &["A", "B"]))
            .await
            .unwrap();
        let service = PollService::new(db, Arc::new(ConnectionRegistry::new()));
        let (tx, rx) = mpsc::channel(16);
        let conn = Arc::new(ClientConnection::new(Role::Participant, tx));
        service.join("h1", &conn).await.unwrap();
        (service, conn, rx)
    }

    fn next_json(rx: &mut mpsc::Receiver<Utf8Bytes>) -> Value {
        serde_json::from_str(rx.try_recv().unwrap().as_str()).unwrap()
    }

    #[tokio::test]
    async fn unknown_type_gets_error_reply() {
        let (service, conn, mut rx) = setup().await;
        let _initial = next_json(&mut rx);

        handle_message(&service, &conn, "h1", r#"{"type":"dance"}"#).await;
        let reply = next_json(&mut rx);
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["message"], "Unknown message type.");
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn malformed_json_gets_error_reply() {
        let (service, conn, mut rx) = setup().await;
        let _initial = next_json(&mut rx);

        handle_message(&service, &conn, "h1", "{not json").await;
        let reply = next_json(&mut rx);
        assert_eq!(reply["type"], "error");
        assert!(reply["message"].as_str().unwrap().starts_with("Malformed message"));
    }

    #[tokio::test]
    async fn unknown_admin_action_gets_error_reply() {
        let (service, conn, mut rx) = setup().await;
        let _initial = next_json(&mut rx);

        handle_message(&service, &conn, "h1", r#"{"type":"admin_action","action":"reboot"}"#).await;
        let reply = next_json(&mut rx);
        assert_eq!(reply["message"], "Unknown admin action.");
    }

    #[tokio::test]
    async fn vote_roundtrip_through_handler() {
        let (service, conn, mut rx) = setup().await;
        let _initial = next_json(&mut rx);

        handle_message(&service, &conn, "h1", r#"{"type":"admin_action","action":"start"}"#).await;
        let state = next_json(&mut rx);
        assert_eq!(state["status"], "active");
        let _admin = next_json(&mut rx);

        let question = &state["currentQuestion"];
        let frame = serde_json::json!({
            "type": "submit_vote",
            "questionId": question["id"],
            "selectedOptions": [question["options"][0]["id"].to_string()],
            "voterId": "voter-1",
        });
        handle_message(&service, &conn, "h1", &frame.to_string()).await;

        let tally = next_json(&mut rx);
        assert_eq!(tally["type"], "admin_results_update");
        assert_eq!(tally["totalVotes"], 1);
        let receipt = next_json(&mut rx);
        assert_eq!(receipt["type"], "vote_recorded");
        assert_eq!(receipt["voterId"], "voter-1");
    }
}
