//! services/api/src/adapters/backend.rs
//!
//! This module contains the training backend adapter: the concrete
//! implementation of the `TrainingService` and `TelemetryReporter` ports on
//! top of an `AttemptStore`. It owns question selection, grading, and the
//! attempt's server-side state transitions. The session controller never
//! sees an answer key; everything it receives passes through here.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use safety_training_core::domain::{
    AnswerRecord, AnswerReview, AnswerSet, Attempt, AttemptState, Question, ScoreReport,
};
use safety_training_core::ports::{
    AttemptStore, PortError, PortResult, TelemetryReporter, TrainingService,
};
use std::sync::Arc;
use tracing::{debug, info};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// Implements the controller-facing ports against the persistence port.
#[derive(Clone)]
pub struct LocalBackend {
    store: Arc<dyn AttemptStore>,
}

impl LocalBackend {
    /// Creates a new `LocalBackend`.
    pub fn new(store: Arc<dyn AttemptStore>) -> Self {
        Self { store }
    }

    /// Samples the attempt's question set if it does not have one yet.
    /// The pool must hold at least `questions_per_test` active questions.
    async fn ensure_selection(&self, attempt: &Attempt) -> PortResult<()> {
        if !self.store.selected_questions(attempt.id).await?.is_empty() {
            return Ok(());
        }

        let video = self.store.get_video(attempt.video_id).await?;
        let pool = self.store.active_questions(video.id).await?;
        let per_test = video.questions_per_test as usize;
        if pool.len() < per_test {
            return Err(PortError::Unexpected(format!(
                "Not enough questions available. Need at least {} questions.",
                per_test
            )));
        }

        let selected: Vec<i64> = {
            let mut rng = rand::thread_rng();
            pool.choose_multiple(&mut rng, per_test)
                .map(|record| record.question.id)
                .collect()
        };
        self.store
            .store_question_selection(attempt.id, &selected)
            .await?;
        info!(
            attempt_id = attempt.id,
            count = selected.len(),
            "question selection generated"
        );
        Ok(())
    }

    /// Whether the attempt is in one of the states that may (re)take the test.
    fn retaking(state: AttemptState) -> bool {
        matches!(state, AttemptState::TestPending | AttemptState::Failed)
    }
}

//=========================================================================================
// `TrainingService` Trait Implementation
//=========================================================================================

#[async_trait]
impl TrainingService for LocalBackend {
    async fn complete_video(&self, attempt_id: i64) -> PortResult<()> {
        let attempt = self.store.get_attempt(attempt_id).await?;
        if attempt.video_completed {
            // Repeated completion reports are harmless.
            return Ok(());
        }
        self.store.mark_video_completed(attempt_id).await?;
        self.ensure_selection(&attempt).await?;
        info!(attempt_id, "video completed, test pending");
        Ok(())
    }

    async fn fetch_questions(&self, attempt_id: i64) -> PortResult<Vec<Question>> {
        let attempt = self.store.get_attempt(attempt_id).await?;
        if !attempt.video_completed && !Self::retaking(attempt.state) {
            return Err(PortError::InvalidState("Video not completed".to_string()));
        }

        self.ensure_selection(&attempt).await?;
        if Self::retaking(attempt.state) {
            self.store.mark_test_started(attempt_id).await?;
        }

        let selection = self.store.selected_questions(attempt_id).await?;
        Ok(selection.into_iter().map(|r| r.question).collect())
    }

    async fn submit_answers(&self, attempt_id: i64, answers: &AnswerSet) -> PortResult<ScoreReport> {
        let attempt = self.store.get_attempt(attempt_id).await?;
        if !matches!(
            attempt.state,
            AttemptState::TestInProgress | AttemptState::TestPending | AttemptState::Failed
        ) {
            return Err(PortError::InvalidState(format!(
                "Test not available for submission. Current state: {}",
                attempt.state.as_str()
            )));
        }
        if Self::retaking(attempt.state) {
            self.store.mark_test_started(attempt_id).await?;
        }

        let selection = self.store.selected_questions(attempt_id).await?;
        if selection.is_empty() {
            return Err(PortError::InvalidState(
                "No questions selected for this attempt".to_string(),
            ));
        }

        let mut records = Vec::with_capacity(selection.len());
        let mut reviews = Vec::with_capacity(selection.len());
        let mut correct_count: u32 = 0;
        for record in &selection {
            let question_id = record.question.id;
            let selected = answers.get(&question_id).copied().ok_or_else(|| {
                PortError::InvalidState(format!("Missing answer for question {}", question_id))
            })?;
            let is_correct = selected == record.correct_answer;
            if is_correct {
                correct_count += 1;
            }
            records.push(AnswerRecord {
                question_id,
                selected,
                is_correct,
            });
            reviews.push(AnswerReview {
                question: record.question.text.clone(),
                selected,
                correct: record.correct_answer,
                is_correct,
                explanation: record.explanation.clone(),
            });
        }

        let total = selection.len() as u32;
        let score = f64::from(correct_count) / f64::from(total) * 100.0;
        let video = self.store.get_video(attempt.video_id).await?;
        let passed = score >= video.pass_percentage;

        self.store
            .record_test_result(attempt_id, &records, score, correct_count, total, passed)
            .await?;
        info!(attempt_id, score, passed, "test graded");

        Ok(ScoreReport {
            passed,
            score,
            correct_answers: correct_count,
            total_questions: total,
            answers: reviews,
        })
    }
}

//=========================================================================================
// `TelemetryReporter` Trait Implementation
//=========================================================================================

#[async_trait]
impl TelemetryReporter for LocalBackend {
    async fn video_started(&self, attempt_id: i64) -> PortResult<()> {
        let attempt = self.store.get_attempt(attempt_id).await?;
        if attempt.state == AttemptState::VideoPending {
            self.store.mark_video_started(attempt_id).await?;
            info!(attempt_id, "video playback started");
        }
        Ok(())
    }

    async fn skip_attempt(&self, attempt_id: i64, count: u32) -> PortResult<()> {
        let total = self.store.increment_skip_attempts(attempt_id).await?;
        debug!(attempt_id, client_count = count, total, "skip attempt recorded");
        Ok(())
    }
}
