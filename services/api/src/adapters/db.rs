//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `AttemptStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use safety_training_core::domain::{
    AnswerChoice, AnswerRecord, Attempt, AttemptState, Question, QuestionCategory, QuestionRecord,
    TrainingVideo,
};
use safety_training_core::ports::{AttemptStore, PortError, PortResult};
use sqlx::{FromRow, PgPool};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `AttemptStore` port.
#[derive(Clone)]
pub struct DbStore {
    pool: PgPool,
}

impl DbStore {
    /// Creates a new `DbStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found(what: &str, id: i64) -> impl FnOnce(sqlx::Error) -> PortError + '_ {
    move |e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(format!("{} {} not found", what, id)),
        _ => unexpected(e),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct VideoRecord {
    id: i64,
    title: String,
    video_url: String,
    duration_seconds: i32,
    pass_percentage: f64,
    questions_per_test: i32,
    active: bool,
}

impl VideoRecord {
    fn to_domain(self) -> TrainingVideo {
        TrainingVideo {
            id: self.id,
            title: self.title,
            video_url: self.video_url,
            duration_seconds: self.duration_seconds as u32,
            pass_percentage: self.pass_percentage,
            questions_per_test: self.questions_per_test as u32,
            active: self.active,
        }
    }
}

#[derive(FromRow)]
struct QuestionRow {
    id: i64,
    question: String,
    option_a: String,
    option_b: String,
    option_c: String,
    option_d: String,
    correct_answer: String,
    explanation: Option<String>,
    category: String,
    active: bool,
}

impl QuestionRow {
    fn to_domain(self) -> PortResult<QuestionRecord> {
        let correct_answer = AnswerChoice::from_letter(&self.correct_answer).ok_or_else(|| {
            PortError::Unexpected(format!(
                "Question {} has invalid correct answer '{}'",
                self.id, self.correct_answer
            ))
        })?;
        let category =
            QuestionCategory::from_str(&self.category).unwrap_or(QuestionCategory::General);
        Ok(QuestionRecord {
            question: Question {
                id: self.id,
                text: self.question,
                option_a: self.option_a,
                option_b: self.option_b,
                option_c: self.option_c,
                option_d: self.option_d,
            },
            correct_answer,
            explanation: self.explanation,
            category,
            active: self.active,
        })
    }
}

#[derive(FromRow)]
struct AttemptRecord {
    id: i64,
    video_id: i64,
    subject: String,
    attempt_number: i32,
    access_token: String,
    state: String,
    video_started_at: Option<DateTime<Utc>>,
    video_completed_at: Option<DateTime<Utc>>,
    video_completed: bool,
    video_skip_attempts: i32,
    test_started_at: Option<DateTime<Utc>>,
    test_completed_at: Option<DateTime<Utc>>,
    score: f64,
    correct_answers: i32,
    total_questions: i32,
    passed: bool,
    created_at: DateTime<Utc>,
}

impl AttemptRecord {
    fn to_domain(self) -> PortResult<Attempt> {
        let state = AttemptState::from_str(&self.state).ok_or_else(|| {
            PortError::Unexpected(format!("Attempt {} has invalid state '{}'", self.id, self.state))
        })?;
        Ok(Attempt {
            id: self.id,
            video_id: self.video_id,
            subject: self.subject,
            attempt_number: self.attempt_number as u32,
            access_token: self.access_token,
            state,
            video_started_at: self.video_started_at,
            video_completed_at: self.video_completed_at,
            video_completed: self.video_completed,
            video_skip_attempts: self.video_skip_attempts as u32,
            test_started_at: self.test_started_at,
            test_completed_at: self.test_completed_at,
            score: self.score,
            correct_answers: self.correct_answers as u32,
            total_questions: self.total_questions as u32,
            passed: self.passed,
            created_at: self.created_at,
        })
    }
}

const ATTEMPT_COLUMNS: &str = "id, video_id, subject, attempt_number, access_token, state, \
     video_started_at, video_completed_at, video_completed, video_skip_attempts, \
     test_started_at, test_completed_at, score, correct_answers, total_questions, \
     passed, created_at";

const QUESTION_COLUMNS: &str = "id, question, option_a, option_b, option_c, option_d, \
     correct_answer, explanation, category, active";

const QUESTION_COLUMNS_QUALIFIED: &str =
    "q.id, q.question, q.option_a, q.option_b, q.option_c, q.option_d, \
     q.correct_answer, q.explanation, q.category, q.active";

//=========================================================================================
// `AttemptStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl AttemptStore for DbStore {
    async fn get_video(&self, video_id: i64) -> PortResult<TrainingVideo> {
        let sql = "SELECT id, title, video_url, duration_seconds, pass_percentage, \
             questions_per_test, active FROM training_videos WHERE id = $1";
        let record = sqlx::query_as::<_, VideoRecord>(sql)
            .bind(video_id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found("Video", video_id))?;
        Ok(record.to_domain())
    }

    async fn active_questions(&self, video_id: i64) -> PortResult<Vec<QuestionRecord>> {
        let sql = format!(
            "SELECT {} FROM training_questions WHERE video_id = $1 AND active ORDER BY id",
            QUESTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, QuestionRow>(&sql)
            .bind(video_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        rows.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn get_attempt(&self, attempt_id: i64) -> PortResult<Attempt> {
        let sql = format!(
            "SELECT {} FROM training_attempts WHERE id = $1",
            ATTEMPT_COLUMNS
        );
        let record = sqlx::query_as::<_, AttemptRecord>(&sql)
            .bind(attempt_id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found("Attempt", attempt_id))?;
        record.to_domain()
    }

    async fn create_attempt(
        &self,
        video_id: i64,
        subject: &str,
        attempt_number: u32,
        access_token: &str,
    ) -> PortResult<Attempt> {
        let sql = format!(
            "INSERT INTO training_attempts (video_id, subject, attempt_number, access_token) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            ATTEMPT_COLUMNS
        );
        let record = sqlx::query_as::<_, AttemptRecord>(&sql)
            .bind(video_id)
            .bind(subject)
            .bind(attempt_number as i32)
            .bind(access_token)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        record.to_domain()
    }

    async fn latest_unpassed_attempt(
        &self,
        video_id: i64,
        subject: &str,
    ) -> PortResult<Option<Attempt>> {
        let sql = format!(
            "SELECT {} FROM training_attempts \
             WHERE video_id = $1 AND subject = $2 AND passed = FALSE \
             ORDER BY created_at DESC LIMIT 1",
            ATTEMPT_COLUMNS
        );
        let record = sqlx::query_as::<_, AttemptRecord>(&sql)
            .bind(video_id)
            .bind(subject)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        record.map(|r| r.to_domain()).transpose()
    }

    async fn attempt_count(&self, video_id: i64, subject: &str) -> PortResult<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM training_attempts WHERE video_id = $1 AND subject = $2",
        )
        .bind(video_id)
        .bind(subject)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(count as u32)
    }

    async fn mark_video_started(&self, attempt_id: i64) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE training_attempts \
             SET video_started_at = NOW(), state = $1, video_skip_attempts = 0 \
             WHERE id = $2",
        )
        .bind(AttemptState::VideoWatching.as_str())
        .bind(attempt_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Attempt {} not found", attempt_id)));
        }
        Ok(())
    }

    async fn increment_skip_attempts(&self, attempt_id: i64) -> PortResult<u32> {
        let count: i32 = sqlx::query_scalar(
            "UPDATE training_attempts \
             SET video_skip_attempts = video_skip_attempts + 1 \
             WHERE id = $1 RETURNING video_skip_attempts",
        )
        .bind(attempt_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found("Attempt", attempt_id))?;
        Ok(count as u32)
    }

    async fn mark_video_completed(&self, attempt_id: i64) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE training_attempts \
             SET video_completed_at = NOW(), video_completed = TRUE, state = $1 \
             WHERE id = $2",
        )
        .bind(AttemptState::TestPending.as_str())
        .bind(attempt_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Attempt {} not found", attempt_id)));
        }
        Ok(())
    }

    async fn store_question_selection(
        &self,
        attempt_id: i64,
        question_ids: &[i64],
    ) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        sqlx::query("DELETE FROM attempt_questions WHERE attempt_id = $1")
            .bind(attempt_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        for (position, question_id) in question_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO attempt_questions (attempt_id, question_id, position) \
                 VALUES ($1, $2, $3)",
            )
            .bind(attempt_id)
            .bind(question_id)
            .bind(position as i32)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }
        sqlx::query("UPDATE training_attempts SET total_questions = $1 WHERE id = $2")
            .bind(question_ids.len() as i32)
            .bind(attempt_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        tx.commit().await.map_err(unexpected)
    }

    async fn selected_questions(&self, attempt_id: i64) -> PortResult<Vec<QuestionRecord>> {
        let sql = format!(
            "SELECT {} FROM training_questions q \
             JOIN attempt_questions aq ON aq.question_id = q.id \
             WHERE aq.attempt_id = $1 ORDER BY aq.position",
            QUESTION_COLUMNS_QUALIFIED
        );
        let rows = sqlx::query_as::<_, QuestionRow>(&sql)
            .bind(attempt_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        rows.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn mark_test_started(&self, attempt_id: i64) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        // Clear any previous answers for retry scenarios.
        sqlx::query("DELETE FROM attempt_answers WHERE attempt_id = $1")
            .bind(attempt_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        let result = sqlx::query(
            "UPDATE training_attempts \
             SET test_started_at = NOW(), test_completed_at = NULL, state = $1 \
             WHERE id = $2",
        )
        .bind(AttemptState::TestInProgress.as_str())
        .bind(attempt_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Attempt {} not found", attempt_id)));
        }
        tx.commit().await.map_err(unexpected)
    }

    async fn record_test_result(
        &self,
        attempt_id: i64,
        answers: &[AnswerRecord],
        score: f64,
        correct_answers: u32,
        total_questions: u32,
        passed: bool,
    ) -> PortResult<()> {
        let final_state = if passed {
            AttemptState::Completed
        } else {
            AttemptState::Failed
        };
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        sqlx::query("DELETE FROM attempt_answers WHERE attempt_id = $1")
            .bind(attempt_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        for answer in answers {
            sqlx::query(
                "INSERT INTO attempt_answers (attempt_id, question_id, selected_answer, is_correct) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(attempt_id)
            .bind(answer.question_id)
            .bind(answer.selected.as_letter())
            .bind(answer.is_correct)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }
        let result = sqlx::query(
            "UPDATE training_attempts \
             SET test_completed_at = NOW(), score = $1, correct_answers = $2, \
                 total_questions = $3, passed = $4, state = $5 \
             WHERE id = $6",
        )
        .bind(score)
        .bind(correct_answers as i32)
        .bind(total_questions as i32)
        .bind(passed)
        .bind(final_state.as_str())
        .bind(attempt_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Attempt {} not found", attempt_id)));
        }
        tx.commit().await.map_err(unexpected)
    }
}
