pub mod domain;
pub mod ports;
pub mod session;

pub use domain::{
    AnswerChoice, AnswerRecord, AnswerReview, AnswerSet, Attempt, AttemptState, Question,
    QuestionCategory, QuestionRecord, ScoreReport, TrainingVideo,
};
pub use ports::{AttemptStore, PortError, PortResult, TelemetryReporter, TrainingService};
pub use session::{
    PlaybackErrorKind, PlaybackState, SessionConfig, SessionEffect, SessionError, SessionEvent,
    SessionPhase, TrainingSession,
};
