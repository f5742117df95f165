//! Per-poll serialization of everything that changes a live poll.
//!
//! Each room has its own async mutex. Every state-changing operation takes
//! it, re-reads the poll from the store, validates, writes, and queues the
//! resulting broadcasts before letting go. Queueing never waits on a socket,
//! so holding the lock across it only fixes the order in which a room sees
//! updates.

pub mod snapshot;
pub mod state_machine;

use std::sync::Arc;

use dashmap::DashMap;
use log::{error, info, warn};
use tokio::sync::Mutex;

use crate::db::{Database, WriteOutcome};
use crate::error::SessionError;
use crate::models::{Poll, PollState, PollStatus};
use crate::protocol::{AdminAction, SubmitVote};
use crate::voting::{self, token};
use crate::ws::broadcast::BroadcastHub;
use crate::ws::connection::{ClientConnection, ConnectionId, Role};
use crate::ws::registry::ConnectionRegistry;

const MAX_VOTER_ID_LEN: usize = 128;

fn unavailable(source: sqlx::Error) -> SessionError {
    SessionError::persistence("Internal server error: poll data unavailable.")(source)
}

/// What a successful vote tells the voter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    pub poll_id: i64,
    pub question_id: i64,
    pub voter_id: String,
}

pub struct PollService {
    db: Arc<Database>,
    hub: BroadcastHub,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PollService {
    pub fn new(db: Arc<Database>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            db,
            hub: BroadcastHub::new(registry),
            locks: DashMap::new(),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.hub.registry()
    }

    fn lock_for(&self, room: &str) -> Arc<Mutex<()>> {
        self.locks.entry(room.to_string()).or_default().clone()
    }

    // Drop the room's lock once nobody is in the room and nobody holds it.
    fn prune_lock(&self, room: &str) {
        let registry = self.hub.registry();
        let _ = self.locks.remove_if(room, |_, lock| {
            Arc::strong_count(lock) == 1 && registry.members(room).is_empty()
        });
    }

    async fn load(&self, room: &str) -> Result<Poll, SessionError> {
        self.db
            .get_poll_by_invite(room)
            .await
            .map_err(unavailable)?
            .ok_or(SessionError::PollNotFound)
    }

    /// Put a connection in the poll's room and queue its initial snapshot(s).
    ///
    /// Runs under the poll's lock, so nothing broadcast afterwards is older
    /// than what the new member was just sent.
    pub async fn join(&self, room: &str, conn: &Arc<ClientConnection>) -> Result<(), SessionError> {
        let result = {
            let lock = self.lock_for(room);
            let _guard = lock.lock().await;
            self.join_locked(room, conn).await
        };
        if result.is_err() {
            self.prune_lock(room);
        }
        result
    }

    async fn join_locked(&self, room: &str, conn: &Arc<ClientConnection>) -> Result<(), SessionError> {
        let poll = self.load(room).await?;
        let state = snapshot::poll_state(&self.db, &poll).await.map_err(unavailable)?;
        let admin = match conn.role {
            Role::Admin => Some(snapshot::admin_results(&self.db, &poll).await.map_err(unavailable)?),
            Role::Participant => None,
        };

        self.hub.registry().join(room, conn.clone());
        conn.send_message(&state);
        if let Some(admin) = admin {
            conn.send_message(&admin);
        }
        Ok(())
    }

    /// Remove a connection from its room. Safe to call more than once.
    ///
    /// The lock is pruned even when the registry had already dropped the
    /// connection, e.g. after a broadcast overflowed its queue.
    pub fn leave(&self, room: &str, conn_id: ConnectionId) {
        let _ = self.hub.registry().leave(room, conn_id);
        self.prune_lock(room);
    }

    /// Run one admin action against the poll behind `room`.
    ///
    /// Either the new state is persisted and broadcast, or nothing happens and
    /// the error goes back to the caller alone.
    pub async fn apply_admin_action(&self, room: &str, action: AdminAction) -> Result<PollState, SessionError> {
        let lock = self.lock_for(room);
        let _guard = lock.lock().await;

        let poll = self.load(room).await?;
        let current = poll.state();
        let next = state_machine::transition(current, action, poll.questions.len())
            .inspect_err(|e| {
                warn!(
                    "Admin action {} rejected for poll {} in status {}: {}",
                    action.as_str(),
                    room,
                    current.status,
                    e
                );
            })?;

        let next_poll = Poll {
            status: next.status,
            current_question_index: next.current_question_index,
            ..poll
        };

        // Snapshots are built before the write so a failed read cannot leave a
        // persisted transition that nobody was told about.
        let state_msg = snapshot::poll_state(&self.db, &next_poll).await.map_err(unavailable)?;
        let admin_msg = if next.status == PollStatus::Active {
            Some(snapshot::admin_results(&self.db, &next_poll).await.map_err(unavailable)?)
        } else {
            None
        };

        let outcome = self
            .db
            .save_poll_state(next_poll.id, current, next)
            .await
            .map_err(SessionError::persistence(state_machine::persist_failure_message(action, next)))?;
        if outcome == WriteOutcome::Conflict {
            warn!("Poll {} changed underneath admin action {}", room, action.as_str());
            return Err(SessionError::conflict("Poll state changed concurrently. Please retry."));
        }

        info!(
            "Poll {} {}: {}[{}] -> {}[{}]",
            room,
            action.as_str(),
            current.status,
            current.current_question_index,
            next.status,
            next.current_question_index
        );

        self.hub.broadcast(room, &state_msg);
        if let Some(admin_msg) = admin_msg {
            self.hub.broadcast(room, &admin_msg);
        }
        Ok(next)
    }

    /// Validate and record one vote, then broadcast the fresh admin tally.
    pub async fn submit_vote(&self, room: &str, request: SubmitVote) -> Result<VoteReceipt, SessionError> {
        let lock = self.lock_for(room);
        let _guard = lock.lock().await;

        let poll = self.load(room).await?;
        if poll.status != PollStatus::Active {
            return Err(SessionError::conflict("Voting is not currently active."));
        }
        let question = poll
            .current_question()
            .ok_or_else(|| SessionError::conflict("No active question to vote on."))?;

        if request.question_id.parse() != Some(question.id) {
            return Err(SessionError::validation("Invalid question for voting."));
        }

        let mut selected = Vec::with_capacity(request.selected_options.len());
        for wire_id in &request.selected_options {
            let id = wire_id.parse().ok_or_else(|| {
                SessionError::validation(format!("Invalid option ID format: {}", wire_id.raw()))
            })?;
            selected.push(id);
        }
        let ballot = voting::plan_ballot(question, &selected)?;

        let voter_id = match request.voter_id.filter(|v| !v.is_empty()) {
            Some(voter_id) if voter_id.len() > MAX_VOTER_ID_LEN => {
                return Err(SessionError::validation("Invalid voter ID."));
            }
            Some(voter_id) => voter_id,
            None => {
                let generated = token::generate_voter_token()?;
                info!("Generated voter ID for poll {}", room);
                generated
            }
        };

        let outcome = self
            .db
            .record_ballot(
                poll.id,
                poll.current_question_index,
                question.id,
                &voter_id,
                &ballot.option_ids,
                ballot.replace_prior,
            )
            .await
            .map_err(SessionError::persistence("Failed to save vote."))?;
        if outcome == WriteOutcome::Conflict {
            return Err(SessionError::conflict("Voting is not currently active."));
        }

        info!(
            "Vote(s) received for poll {}, question {} by voter {}",
            room, question.id, voter_id
        );

        // The vote is committed; a failed tally read only costs this one update.
        match snapshot::admin_results(&self.db, &poll).await {
            Ok(message) => {
                self.hub.broadcast(room, &message);
            }
            Err(e) => error!("Failed to aggregate votes for poll {} after vote: {}", room, e),
        }

        Ok(VoteReceipt {
            poll_id: poll.id,
            question_id: question.id,
            voter_id,
        })
    }
}
