//! crates/safety_training_core/src/domain.rs
//!
//! Defines the pure, core data structures for the safety-training flow.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// One of the four options of a multiple-choice question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnswerChoice {
    A,
    B,
    C,
    D,
}

impl AnswerChoice {
    /// The lowercase wire letter (`a`-`d`) used by the external service.
    pub fn as_letter(self) -> &'static str {
        match self {
            AnswerChoice::A => "a",
            AnswerChoice::B => "b",
            AnswerChoice::C => "c",
            AnswerChoice::D => "d",
        }
    }

    /// Parses a wire letter, case-insensitively.
    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter.trim().to_ascii_lowercase().as_str() {
            "a" => Some(AnswerChoice::A),
            "b" => Some(AnswerChoice::B),
            "c" => Some(AnswerChoice::C),
            "d" => Some(AnswerChoice::D),
            _ => None,
        }
    }
}

impl fmt::Display for AnswerChoice {
    /// Uppercase letter, as shown in the answer review.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_letter().to_ascii_uppercase())
    }
}

/// A multiple-choice question as the learner sees it: no answer key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: i64,
    pub text: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
}

impl Question {
    pub fn option(&self, choice: AnswerChoice) -> &str {
        match choice {
            AnswerChoice::A => &self.option_a,
            AnswerChoice::B => &self.option_b,
            AnswerChoice::C => &self.option_c,
            AnswerChoice::D => &self.option_d,
        }
    }
}

/// Broad topic a question belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionCategory {
    Ppe,
    Safety,
    Emergency,
    Prohibited,
    General,
}

impl QuestionCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionCategory::Ppe => "ppe",
            QuestionCategory::Safety => "safety",
            QuestionCategory::Emergency => "emergency",
            QuestionCategory::Prohibited => "prohibited",
            QuestionCategory::General => "general",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "ppe" => Some(QuestionCategory::Ppe),
            "safety" => Some(QuestionCategory::Safety),
            "emergency" => Some(QuestionCategory::Emergency),
            "prohibited" => Some(QuestionCategory::Prohibited),
            "general" => Some(QuestionCategory::General),
            _ => None,
        }
    }
}

/// The full server-side question record, including the answer key.
/// Never handed to the session controller.
#[derive(Debug, Clone)]
pub struct QuestionRecord {
    pub question: Question,
    pub correct_answer: AnswerChoice,
    pub explanation: Option<String>,
    pub category: QuestionCategory,
    pub active: bool,
}

/// The learner's selections, keyed by question id. Complete once it holds
/// one entry per question in the quiz.
pub type AnswerSet = BTreeMap<i64, AnswerChoice>;

/// One graded answer as persisted against an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRecord {
    pub question_id: i64,
    pub selected: AnswerChoice,
    pub is_correct: bool,
}

/// One entry of the per-question review shown on the result screen.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerReview {
    pub question: String,
    pub selected: AnswerChoice,
    pub correct: AnswerChoice,
    pub is_correct: bool,
    pub explanation: Option<String>,
}

/// The graded outcome returned by the scoring service. Read-only,
/// rendered once.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreReport {
    pub passed: bool,
    pub score: f64,
    pub correct_answers: u32,
    pub total_questions: u32,
    pub answers: Vec<AnswerReview>,
}

impl ScoreReport {
    /// The score as rendered on the result screen, one decimal place.
    pub fn display_score(&self) -> String {
        format!("{:.1}%", self.score)
    }
}

/// A training video and its quiz configuration.
#[derive(Debug, Clone)]
pub struct TrainingVideo {
    pub id: i64,
    pub title: String,
    pub video_url: String,
    pub duration_seconds: u32,
    pub pass_percentage: f64,
    pub questions_per_test: u32,
    pub active: bool,
}

/// Server-side lifecycle of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    VideoPending,
    VideoWatching,
    TestPending,
    TestInProgress,
    Completed,
    Failed,
}

impl AttemptState {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptState::VideoPending => "video_pending",
            AttemptState::VideoWatching => "video_watching",
            AttemptState::TestPending => "test_pending",
            AttemptState::TestInProgress => "test_in_progress",
            AttemptState::Completed => "completed",
            AttemptState::Failed => "failed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "video_pending" => Some(AttemptState::VideoPending),
            "video_watching" => Some(AttemptState::VideoWatching),
            "test_pending" => Some(AttemptState::TestPending),
            "test_in_progress" => Some(AttemptState::TestInProgress),
            "completed" => Some(AttemptState::Completed),
            "failed" => Some(AttemptState::Failed),
            _ => None,
        }
    }
}

/// One learner's pass through the training: issued by the service before
/// the session loads, mutated only through reported events.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub id: i64,
    pub video_id: i64,
    /// External reference to whoever is taking the training (the hosting
    /// system's badge/visitor identifier).
    pub subject: String,
    pub attempt_number: u32,
    pub access_token: String,
    pub state: AttemptState,
    pub video_started_at: Option<DateTime<Utc>>,
    pub video_completed_at: Option<DateTime<Utc>>,
    pub video_completed: bool,
    pub video_skip_attempts: u32,
    pub test_started_at: Option<DateTime<Utc>>,
    pub test_completed_at: Option<DateTime<Utc>>,
    pub score: f64,
    pub correct_answers: u32,
    pub total_questions: u32,
    pub passed: bool,
    pub created_at: DateTime<Utc>,
}
