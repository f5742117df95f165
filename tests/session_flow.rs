//! End-to-end tests against a real server with WebSocket clients.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use live_polls::config::Config;
use live_polls::db::Database;
use live_polls::models::{NewPoll, Poll, QuestionType};
use live_polls::server::{self, AppState};

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    base: String,
    state: AppState,
    polls: Vec<Poll>,
}

/// Boot a server on an ephemeral port with two seeded polls.
async fn boot_server() -> TestServer {
    let db = Database::in_memory().await.unwrap();
    let p1 = db
        .create_poll(&NewPoll::new("p1", "One question").question(
            "Q1",
            QuestionType::SingleSelect,
            &["O1", "O2"],
        ))
        .await
        .unwrap();
    let p2 = db
        .create_poll(
            &NewPoll::new("p2", "Two questions")
                .question("Pick many", QuestionType::MultiSelect, &["A", "B", "C"])
                .question("Pick one", QuestionType::SingleSelect, &["Yes", "No"]),
        )
        .await
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(Config::default(), db);
    let serve_state = state.clone();
    tokio::spawn(async move {
        server::serve(listener, serve_state, std::future::pending()).await.unwrap();
    });

    TestServer {
        base: format!("ws://{addr}/ws"),
        state,
        polls: vec![p1, p2],
    }
}

async fn connect(server: &TestServer, invite: &str, admin: bool) -> WsStream {
    let url = if admin {
        format!("{}/{}?role=admin", server.base, invite)
    } else {
        format!("{}/{}", server.base, invite)
    };
    let (ws, _) = timeout(TIMEOUT, connect_async(url)).await.unwrap().unwrap();
    ws
}

async fn send(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Next JSON envelope, skipping control frames.
async fn recv(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn recv_type(ws: &mut WsStream, kind: &str) -> Value {
    let msg = recv(ws).await;
    assert_eq!(msg["type"], kind, "unexpected envelope: {msg}");
    msg
}

async fn assert_quiet(ws: &mut WsStream) {
    if let Ok(Some(Ok(Message::Text(text)))) = timeout(QUIET, ws.next()).await {
        panic!("expected no message, got {text}");
    }
}

fn admin_action(action: &str) -> Value {
    json!({ "type": "admin_action", "action": action })
}

fn vote(question_id: i64, options: &[i64], voter: &str) -> Value {
    json!({
        "type": "submit_vote",
        "questionId": question_id.to_string(),
        "selectedOptions": options.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
        "voterId": voter,
    })
}

#[tokio::test]
async fn single_question_walkthrough() {
    let server = boot_server().await;
    let poll = &server.polls[0];
    let q1 = &poll.questions[0];
    let (o1, o2) = (q1.options[0].id.to_string(), q1.options[1].id.to_string());

    let mut admin = connect(&server, "p1", true).await;
    let initial = recv_type(&mut admin, "poll_state_update").await;
    assert_eq!(initial["status"], "setup");
    recv_type(&mut admin, "admin_results_update").await;

    let mut voter = connect(&server, "p1", false).await;
    recv_type(&mut voter, "poll_state_update").await;

    // Start: everyone sees the first question with zeroed counts
    send(&mut admin, admin_action("start")).await;
    for ws in [&mut admin, &mut voter] {
        let state = recv_type(ws, "poll_state_update").await;
        assert_eq!(state["status"], "active");
        assert_eq!(state["currentQuestion"]["id"], q1.id);
        assert_eq!(state["currentQuestion"]["votes"][&o1], 0);
        assert_eq!(state["currentQuestion"]["votes"][&o2], 0);
        let tally = recv_type(ws, "admin_results_update").await;
        assert_eq!(tally["totalVotes"], 0);
    }

    // First vote
    send(&mut voter, vote(q1.id, &[q1.options[0].id], "v1")).await;
    let tally = recv_type(&mut admin, "admin_results_update").await;
    assert_eq!(tally["votes"][&o1], 1);
    assert_eq!(tally["votes"][&o2], 0);
    assert_eq!(tally["totalVotes"], 1);
    recv_type(&mut voter, "admin_results_update").await;
    let receipt = recv_type(&mut voter, "vote_recorded").await;
    assert_eq!(receipt["voterId"], "v1");

    // Re-vote supersedes
    send(&mut voter, vote(q1.id, &[q1.options[1].id], "v1")).await;
    let tally = recv_type(&mut admin, "admin_results_update").await;
    assert_eq!(tally["votes"][&o1], 0);
    assert_eq!(tally["votes"][&o2], 1);
    assert_eq!(tally["totalVotes"], 1);
    recv_type(&mut voter, "admin_results_update").await;
    recv_type(&mut voter, "vote_recorded").await;

    // Next past the only question finishes the poll
    send(&mut admin, admin_action("next")).await;
    let state = recv_type(&mut voter, "poll_state_update").await;
    assert_eq!(state["status"], "finished");
    let all = state["allQuestions"].as_array().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0]["id"], q1.id);
    assert_eq!(all[0]["votes"][&o1], 0);
    assert_eq!(all[0]["votes"][&o2], 1);
    recv_type(&mut admin, "poll_state_update").await;

    let stored = server.state.service.database().get_poll_by_invite("p1").await.unwrap().unwrap();
    assert_eq!(stored.current_question_index, 0);
}

#[tokio::test]
async fn vote_for_wrong_question_is_rejected() {
    let server = boot_server().await;
    let poll = &server.polls[1];
    let (q1, q2) = (&poll.questions[0], &poll.questions[1]);

    let mut admin = connect(&server, "p2", true).await;
    recv_type(&mut admin, "poll_state_update").await;
    recv_type(&mut admin, "admin_results_update").await;
    let mut voter = connect(&server, "p2", false).await;
    recv_type(&mut voter, "poll_state_update").await;

    send(&mut admin, admin_action("start")).await;
    recv_type(&mut admin, "poll_state_update").await;
    recv_type(&mut admin, "admin_results_update").await;
    recv_type(&mut voter, "poll_state_update").await;
    recv_type(&mut voter, "admin_results_update").await;

    send(&mut voter, vote(q2.id, &[q2.options[0].id], "v1")).await;
    let err = recv_type(&mut voter, "error").await;
    assert_eq!(err["message"], "Invalid question for voting.");

    // Only the sender hears about it
    assert_quiet(&mut admin).await;

    let db = server.state.service.database();
    assert_eq!(db.count_votes(q1.id).await.unwrap(), 0);
    assert_eq!(db.count_votes(q2.id).await.unwrap(), 0);
}

#[tokio::test]
async fn results_then_next_question() {
    let server = boot_server().await;
    let poll = &server.polls[1];
    let (q1, q2) = (&poll.questions[0], &poll.questions[1]);

    let mut admin = connect(&server, "p2", true).await;
    recv_type(&mut admin, "poll_state_update").await;
    recv_type(&mut admin, "admin_results_update").await;

    send(&mut admin, admin_action("start")).await;
    recv_type(&mut admin, "poll_state_update").await;
    recv_type(&mut admin, "admin_results_update").await;

    // Multi-select: additive across submissions
    send(&mut admin, vote(q1.id, &[q1.options[0].id, q1.options[1].id], "v1")).await;
    recv_type(&mut admin, "admin_results_update").await;
    recv_type(&mut admin, "vote_recorded").await;
    send(&mut admin, vote(q1.id, &[q1.options[0].id], "v1")).await;
    let tally = recv_type(&mut admin, "admin_results_update").await;
    assert_eq!(tally["totalVotes"], 3);
    recv_type(&mut admin, "vote_recorded").await;

    send(&mut admin, admin_action("show_results")).await;
    let state = recv_type(&mut admin, "poll_state_update").await;
    assert_eq!(state["status"], "results");
    assert_eq!(state["currentQuestion"]["id"], q1.id);
    assert_eq!(state["results"][q1.id.to_string()][q1.options[0].id.to_string()], 2);
    assert_eq!(state["allQuestions"].as_array().unwrap().len(), 2);

    // Voting is closed while results are shown
    send(&mut admin, vote(q1.id, &[q1.options[2].id], "v2")).await;
    let err = recv_type(&mut admin, "error").await;
    assert_eq!(err["message"], "Voting is not currently active.");

    send(&mut admin, admin_action("next")).await;
    let state = recv_type(&mut admin, "poll_state_update").await;
    assert_eq!(state["status"], "active");
    assert_eq!(state["currentQuestion"]["id"], q2.id);
    let tally = recv_type(&mut admin, "admin_results_update").await;
    assert_eq!(tally["questionId"], q2.id.to_string());
    assert_eq!(tally["totalVotes"], 0);
}

#[tokio::test]
async fn rooms_are_isolated() {
    let server = boot_server().await;

    let mut in_p1 = connect(&server, "p1", false).await;
    recv_type(&mut in_p1, "poll_state_update").await;
    let mut in_p2 = connect(&server, "p2", true).await;
    recv_type(&mut in_p2, "poll_state_update").await;
    recv_type(&mut in_p2, "admin_results_update").await;

    send(&mut in_p1, admin_action("start")).await;
    let state = recv_type(&mut in_p1, "poll_state_update").await;
    assert_eq!(state["pollId"], server.polls[0].id.to_string());
    recv_type(&mut in_p1, "admin_results_update").await;

    assert_quiet(&mut in_p2).await;
}

#[tokio::test]
async fn protocol_errors_keep_connection_open() {
    let server = boot_server().await;
    let mut ws = connect(&server, "p1", false).await;
    recv_type(&mut ws, "poll_state_update").await;

    send(&mut ws, json!({ "type": "teleport" })).await;
    let err = recv_type(&mut ws, "error").await;
    assert_eq!(err["message"], "Unknown message type.");

    send(&mut ws, admin_action("explode")).await;
    let err = recv_type(&mut ws, "error").await;
    assert_eq!(err["message"], "Unknown admin action.");

    ws.send(Message::text("not json at all")).await.unwrap();
    let err = recv_type(&mut ws, "error").await;
    assert!(err["message"].as_str().unwrap().starts_with("Malformed message"));

    send(&mut ws, admin_action("show_results")).await;
    let err = recv_type(&mut ws, "error").await;
    assert_eq!(err["message"], "Cannot show results. Poll is not active.");

    // Still usable
    send(&mut ws, admin_action("start")).await;
    let state = recv_type(&mut ws, "poll_state_update").await;
    assert_eq!(state["status"], "active");
}

#[tokio::test]
async fn unknown_poll_gets_error_then_close() {
    let server = boot_server().await;
    let mut ws = connect(&server, "nope", false).await;

    let err = recv_type(&mut ws, "error").await;
    assert_eq!(err["message"], "Poll does not exist.");

    let closed = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    assert_eq!(server.state.service.registry().connection_count(), 0);
}

#[tokio::test]
async fn disconnect_leaves_room() {
    let server = boot_server().await;
    let mut ws = connect(&server, "p1", false).await;
    recv_type(&mut ws, "poll_state_update").await;
    assert_eq!(server.state.service.registry().connection_count(), 1);

    ws.close(None).await.unwrap();
    drop(ws);

    let registry = server.state.service.registry().clone();
    timeout(TIMEOUT, async move {
        while registry.connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(server.state.service.registry().room_count(), 0);
}
