//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser shim and the API
//! server for one training session. The shim owns nothing but a media element
//! and a form: every player event is forwarded here, and every view change is
//! commanded from here.

use safety_training_core::domain::{AnswerReview, Question, ScoreReport};
use safety_training_core::session::SessionPhase;
use serde::{Deserialize, Serialize};

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Initializes a session. This must be the first message sent on the
    /// connection; the token must match the attempt's access token.
    Init { attempt_id: i64, token: String },

    /// The learner pressed the start affordance.
    StartTraining,

    /// Playback actually began.
    VideoStarted,

    /// Periodic progress report from normal playback.
    VideoProgress { position: f64 },

    /// The player began moving to a new position.
    VideoSeeking { target: f64 },

    /// The player finished moving to a new position.
    VideoSeeked { position: f64 },

    /// Playback reached its natural end.
    VideoEnded,

    /// The media element failed; `code` is the media-error code (1-4).
    VideoError { code: i32 },

    /// Explicit retry of a failed question fetch.
    RetryQuestions,

    /// The learner picked an option; `answer` is the letter `a`-`d`.
    SelectAnswer { question_id: i64, answer: String },

    /// The learner pressed the submit affordance.
    SubmitQuiz,

    /// The learner pressed retry on a failed result.
    RetryTraining,

    /// The learner pressed close on a passed result.
    CloseTraining,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms successful session initialization and carries the player
    /// configuration.
    SessionInitialized {
        attempt_id: i64,
        video_url: String,
        video_duration: u32,
    },

    /// Reports a fatal error to the client, which should display an error message.
    Error { message: String },

    /// Reveal the named phase and hide the others.
    PhaseChanged { phase: PhasePayload },

    /// Set up the media element (fired after the layout-settle delay).
    InitVideo,

    PauseVideo,

    /// Force the playback position back to zero.
    ResetPlayback,

    /// Start or restart playback.
    PlayVideo,

    /// Show the skip warning with the running count, auto-dismissing after
    /// the given delay.
    SkipWarning { count: u32, dismiss_after_ms: u64 },

    /// Mark the chosen option selected and clear its siblings.
    SelectionUpdated { question_id: i64, answer: String },

    /// Render the quiz form.
    Questions { questions: Vec<QuestionPayload> },

    /// Render the graded result.
    Result { result: ResultPayload },

    /// Show a blocking message; the phase has not advanced.
    Alert { message: String },

    /// The client should perform a full reload (failed-result retry).
    ReloadRequired,

    /// The session is over (passed-result close).
    SessionEnded,
}

//=========================================================================================
// Payload DTOs
//=========================================================================================

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhasePayload {
    Start,
    Video,
    Quiz,
    Result,
}

impl PhasePayload {
    /// The `Closed` phase has no panel of its own; `SessionEnded` covers it.
    pub fn from_phase(phase: SessionPhase) -> Option<Self> {
        match phase {
            SessionPhase::Start => Some(PhasePayload::Start),
            SessionPhase::Video => Some(PhasePayload::Video),
            SessionPhase::Quiz => Some(PhasePayload::Quiz),
            SessionPhase::Result => Some(PhasePayload::Result),
            SessionPhase::Closed => None,
        }
    }
}

/// A question as rendered to the learner: no answer key.
#[derive(Serialize, Debug, Clone)]
pub struct QuestionPayload {
    pub id: i64,
    pub question: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
}

impl From<Question> for QuestionPayload {
    fn from(question: Question) -> Self {
        Self {
            id: question.id,
            question: question.text,
            option_a: question.option_a,
            option_b: question.option_b,
            option_c: question.option_c,
            option_d: question.option_d,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct AnswerReviewPayload {
    pub question: String,
    pub selected_answer: String,
    pub correct_answer: String,
    pub is_correct: bool,
    pub explanation: Option<String>,
}

impl From<&AnswerReview> for AnswerReviewPayload {
    fn from(review: &AnswerReview) -> Self {
        Self {
            question: review.question.clone(),
            selected_answer: review.selected.as_letter().to_string(),
            correct_answer: review.correct.as_letter().to_string(),
            is_correct: review.is_correct,
            explanation: review.explanation.clone(),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct ResultPayload {
    pub passed: bool,
    pub headline: String,
    pub score: f64,
    /// The score as display text, rounded to one decimal place.
    pub score_display: String,
    pub correct_answers: u32,
    pub total_questions: u32,
    pub answers: Vec<AnswerReviewPayload>,
}

impl From<&ScoreReport> for ResultPayload {
    fn from(report: &ScoreReport) -> Self {
        let headline = if report.passed {
            "Congratulations!"
        } else {
            "Training Not Passed"
        };
        Self {
            passed: report.passed,
            headline: headline.to_string(),
            score: report.score,
            score_display: report.display_score(),
            correct_answers: report.correct_answers,
            total_questions: report.total_questions,
            answers: report.answers.iter().map(AnswerReviewPayload::from).collect(),
        }
    }
}
