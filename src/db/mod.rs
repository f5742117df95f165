use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{migrate::MigrateDatabase, Row, Sqlite};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use crate::models::{NewPoll, Poll, PollOption, PollState, PollStatus, Question, QuestionType, Vote};

pub type DbResult<T> = Result<T, sqlx::Error>;

/// What the store decided about a compare-and-set write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The stored poll no longer matched the expected state; nothing was written.
    Conflict,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> DbResult<Self> {
        // Create database if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            Sqlite::create_database(db_url).await?;
        }

        // WAL lets readers in other rooms proceed while one ballot commits;
        // writers queue on the busy timeout instead of failing.
        let options = SqliteConnectOptions::from_str(db_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// A private in-memory store. One connection, never recycled, so the data lives
    /// as long as the pool does.
    pub async fn in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn init_schema(pool: &SqlitePool) -> DbResult<()> {
        // Polls: status and index are the only columns the live session writes
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                invite_id TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'setup',
                current_question_index INTEGER NOT NULL DEFAULT -1,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        // Questions, ordered by position within a poll
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS questions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                poll_id INTEGER NOT NULL,
                text TEXT NOT NULL,
                question_type TEXT NOT NULL,
                position INTEGER NOT NULL,
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        // Options, ordered by position within a question
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS options (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                question_id INTEGER NOT NULL,
                text TEXT NOT NULL,
                position INTEGER NOT NULL,
                FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        // Vote ledger: one row per selected option per submission
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS votes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                question_id INTEGER NOT NULL,
                option_id INTEGER NOT NULL,
                voter_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE,
                FOREIGN KEY (option_id) REFERENCES options(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        // Ballot replacement and per-voter lookups
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_votes_question_voter ON votes (question_id, voter_id)")
            .execute(pool)
            .await?;

        Ok(())
    }

    // Insert a poll with its questions and options. Used by the structural editor
    // and by tests; new polls always start in setup.
    pub async fn create_poll(&self, poll: &NewPoll) -> DbResult<Poll> {
        let mut tx = self.pool.begin().await?;

        let poll_id = sqlx::query(
            r#"
            INSERT INTO polls (invite_id, title, status, current_question_index, created_at)
            VALUES (?, ?, 'setup', -1, ?)
            "#,
        )
        .bind(&poll.invite_id)
        .bind(&poll.title)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (q_pos, question) in poll.questions.iter().enumerate() {
            let question_id = sqlx::query(
                r#"
                INSERT INTO questions (poll_id, text, question_type, position)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(poll_id)
            .bind(&question.text)
            .bind(question.question_type.as_str())
            .bind(q_pos as i64)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            for (o_pos, text) in question.options.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO options (question_id, text, position)
                    VALUES (?, ?, ?)
                    "#,
                )
                .bind(question_id)
                .bind(text)
                .bind(o_pos as i64)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        self.get_poll_by_invite(&poll.invite_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    // Load a poll with its ordered questions and options. Always a fresh read.
    pub async fn get_poll_by_invite(&self, invite_id: &str) -> DbResult<Option<Poll>> {
        // Fetch the poll row itself
        let poll_row = sqlx::query(
            r#"
            SELECT id, invite_id, title, status, current_question_index
            FROM polls
            WHERE invite_id = ?
            "#,
        )
        .bind(invite_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(poll_row) = poll_row else {
            return Ok(None);
        };

        let poll_id = poll_row.get::<i64, _>("id");
        let status_str = poll_row.get::<String, _>("status");
        let status = PollStatus::from_str(&status_str).map_err(|e| sqlx::Error::Decode(e.into()))?;

        // Fetch questions, then every option of the poll in one query
        let question_rows = sqlx::query(
            r#"
            SELECT id, text, question_type
            FROM questions
            WHERE poll_id = ?
            ORDER BY position, id
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;

        let option_rows = sqlx::query(
            r#"
            SELECT o.id, o.question_id, o.text
            FROM options o
            JOIN questions q ON q.id = o.question_id
            WHERE q.poll_id = ?
            ORDER BY o.position, o.id
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;

        // Group options under their question
        let mut options_by_question: HashMap<i64, Vec<PollOption>> = HashMap::new();
        for row in option_rows {
            options_by_question
                .entry(row.get::<i64, _>("question_id"))
                .or_default()
                .push(PollOption {
                    id: row.get::<i64, _>("id"),
                    text: row.get::<String, _>("text"),
                });
        }

        // Assemble questions in order
        let mut questions = Vec::with_capacity(question_rows.len());
        for row in question_rows {
            let id = row.get::<i64, _>("id");
            let type_str = row.get::<String, _>("question_type");
            let question_type =
                QuestionType::from_str(&type_str).map_err(|e| sqlx::Error::Decode(e.into()))?;
            questions.push(Question {
                id,
                text: row.get::<String, _>("text"),
                question_type,
                options: options_by_question.remove(&id).unwrap_or_default(),
            });
        }

        Ok(Some(Poll {
            id: poll_id,
            invite_id: poll_row.get::<String, _>("invite_id"),
            title: poll_row.get::<String, _>("title"),
            questions,
            status,
            current_question_index: poll_row.get::<i64, _>("current_question_index"),
        }))
    }

    /// Compare-and-set of the poll's status and index.
    ///
    /// The write applies only if the stored state still equals `expected`, so a
    /// second process serving the same poll cannot interleave a stale transition.
    pub async fn save_poll_state(
        &self,
        poll_id: i64,
        expected: PollState,
        next: PollState,
    ) -> DbResult<WriteOutcome> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let result = sqlx::query(
            r#"
            UPDATE polls
            SET status = ?, current_question_index = ?
            WHERE id = ? AND status = ? AND current_question_index = ?
            "#,
        )
        .bind(next.status.as_str())
        .bind(next.current_question_index)
        .bind(poll_id)
        .bind(expected.status.as_str())
        .bind(expected.current_question_index)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(WriteOutcome::Conflict);
        }

        tx.commit().await?;
        Ok(WriteOutcome::Applied)
    }

    /// Write one ballot atomically.
    ///
    /// The transaction takes the write lock up front (`BEGIN IMMEDIATE`), so a
    /// ballot for another poll waits on the busy timeout rather than failing
    /// to upgrade a read lock. Inside it the poll is re-checked to still be
    /// active on `question_index`. With `replace_prior` the voter's earlier
    /// rows for the question are deleted first; the delete and the inserts
    /// commit together.
    pub async fn record_ballot(
        &self,
        poll_id: i64,
        question_index: i64,
        question_id: i64,
        voter_id: &str,
        option_ids: &[i64],
        replace_prior: bool,
    ) -> DbResult<WriteOutcome> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        // Step 1: the poll must still be on this question
        let still_open = sqlx::query(
            r#"
            SELECT 1 FROM polls
            WHERE id = ? AND status = 'active' AND current_question_index = ?
            "#,
        )
        .bind(poll_id)
        .bind(question_index)
        .fetch_optional(&mut *tx)
        .await?
        .is_some();

        if !still_open {
            tx.rollback().await?;
            return Ok(WriteOutcome::Conflict);
        }

        // Step 2: single-select replaces whatever the voter cast before
        if replace_prior {
            sqlx::query("DELETE FROM votes WHERE question_id = ? AND voter_id = ?")
                .bind(question_id)
                .bind(voter_id)
                .execute(&mut *tx)
                .await?;
        }

        // Step 3: one row per selected option
        let now = Utc::now().to_rfc3339();
        for option_id in option_ids {
            sqlx::query(
                r#"
                INSERT INTO votes (question_id, option_id, voter_id, created_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(question_id)
            .bind(*option_id)
            .bind(voter_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(WriteOutcome::Applied)
    }

    // Raw (option_id, count) pairs; options without votes are absent.
    pub async fn vote_counts(&self, question_id: i64) -> DbResult<Vec<(i64, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT option_id, COUNT(*) AS count
            FROM votes
            WHERE question_id = ?
            GROUP BY option_id
            "#,
        )
        .bind(question_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get::<i64, _>("option_id"), row.get::<i64, _>("count")))
            .collect())
    }

    pub async fn votes_for_voter(&self, question_id: i64, voter_id: &str) -> DbResult<Vec<Vote>> {
        let rows = sqlx::query(
            r#"
            SELECT id, question_id, option_id, voter_id, created_at
            FROM votes
            WHERE question_id = ? AND voter_id = ?
            ORDER BY id
            "#,
        )
        .bind(question_id)
        .bind(voter_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let created_at = DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
                    .map_err(|e| sqlx::Error::Decode(e.into()))?
                    .with_timezone(&Utc);
                Ok(Vote {
                    id: row.get::<i64, _>("id"),
                    question_id: row.get::<i64, _>("question_id"),
                    option_id: row.get::<i64, _>("option_id"),
                    voter_id: row.get::<String, _>("voter_id"),
                    created_at,
                })
            })
            .collect()
    }

    pub async fn count_votes(&self, question_id: i64) -> DbResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM votes WHERE question_id = ?")
            .bind(question_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("count"))
    }
}
