//! crates/safety_training_core/src/session.rs
//!
//! The training session controller: a strictly-forward state machine over
//! the four UI phases (start, video, quiz, result) with video-watch
//! integrity guarding. Input arrives as [`SessionEvent`]s, output leaves as
//! [`SessionEffect`]s; rendering and timer scheduling are the host's job,
//! which keeps every transition testable without a player or a transport.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::{AnswerChoice, AnswerSet, Question, ScoreReport};
use crate::ports::{TelemetryReporter, TrainingService};

/// Tolerance on forward position jumps, absorbing buffering jitter.
pub const SKIP_GRACE_SECONDS: f64 = 0.5;
/// How long the skip warning stays on screen before auto-dismissing.
pub const SKIP_WARNING_MS: u64 = 3_000;
/// Delay before playback restarts from zero after a blocked skip.
pub const SKIP_RESUME_DELAY_MS: u64 = 500;
/// Delay between revealing the video phase and initializing the player,
/// giving the layout time to settle.
pub const VIDEO_INIT_DELAY_MS: u64 = 200;

//=========================================================================================
// Configuration
//=========================================================================================

/// Initial page state, supplied out-of-band by the hosting page before the
/// controller starts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub attempt_id: i64,
    pub video_url: String,
    pub video_duration: u32,
}

/// Fatal configuration problems. No state machine is entered when
/// construction fails.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid attempt ID")]
    MissingAttemptId,
    #[error("Video URL not configured")]
    MissingVideoUrl,
}

//=========================================================================================
// State
//=========================================================================================

/// The four UI phases, plus the terminal state after a passed close.
/// Transitions are strictly forward; going back requires a full session
/// reload, which the host performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Start,
    Video,
    Quiz,
    Result,
    Closed,
}

/// Client-local playback tracking. `last_valid_time` only moves forward
/// through natural playback, except for the reset-to-zero after a detected
/// skip. `video_completed` is one-way.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackState {
    pub last_valid_time: f64,
    pub skip_attempts: u32,
    pub video_completed: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            last_valid_time: 0.0,
            skip_attempts: 0,
            video_completed: false,
        }
    }
}

//=========================================================================================
// Events and Effects
//=========================================================================================

/// Category of a media playback failure, as reported by the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackErrorKind {
    Aborted,
    Network,
    Decode,
    Unsupported,
}

impl PlaybackErrorKind {
    pub fn user_message(self) -> &'static str {
        match self {
            PlaybackErrorKind::Aborted => "Error loading video. Loading aborted.",
            PlaybackErrorKind::Network => "Error loading video. Network error.",
            PlaybackErrorKind::Decode => "Error loading video. Decoding failed.",
            PlaybackErrorKind::Unsupported => "Error loading video. Video format not supported.",
        }
    }
}

/// Everything that can happen to a session: user actions, player lifecycle
/// events, and explicit retries. The host translates its input sources into
/// these and dispatches them to [`TrainingSession::handle`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The learner pressed the start affordance.
    StartTraining,
    /// Playback actually began (reported once per player start).
    PlaybackStarted,
    /// Periodic progress from normal forward playback.
    PositionChanged { position: f64 },
    /// The player began moving to a new position.
    SeekStarted { target: f64 },
    /// The player finished moving to a new position.
    SeekFinished { position: f64 },
    /// Playback reached its natural end.
    PlaybackEnded,
    /// The media element failed.
    PlaybackFailed { kind: PlaybackErrorKind },
    /// Explicit retry of a failed question fetch.
    ReloadQuestions,
    /// The learner picked an option for a question.
    AnswerSelected { question_id: i64, choice: AnswerChoice },
    /// The learner pressed the submit affordance.
    SubmitAnswers,
    /// The learner pressed retry on a failed result.
    Retry,
    /// The learner pressed close on a passed result.
    Close,
}

/// Declarative view commands. The host renders these; the controller never
/// touches a player or a document tree directly.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    EnterPhase(SessionPhase),
    /// Set up the player once the video phase has had time to lay out.
    InitializeVideo { delay_ms: u64 },
    PauseVideo,
    /// Force the playback position back to zero.
    ResetPlayback,
    /// Restart playback after the given delay. Hosts must drop the timer if
    /// the session is torn down before it fires.
    ResumePlayback { delay_ms: u64 },
    ShowSkipWarning { count: u32, dismiss_after_ms: u64 },
    /// Mark the chosen option selected and clear its siblings.
    UpdateSelection { question_id: i64, choice: AnswerChoice },
    RenderQuestions(Vec<Question>),
    RenderResult(ScoreReport),
    ShowAlert { message: String },
    /// Full reload: the server supplies fresh state and the machine
    /// restarts at `Start`.
    ReloadSession,
    EndSession,
}

//=========================================================================================
// The Controller
//=========================================================================================

/// One learner's session. All state is scoped to a single page load and a
/// single attempt; nothing survives teardown.
pub struct TrainingSession {
    config: SessionConfig,
    phase: SessionPhase,
    playback: PlaybackState,
    questions: Vec<Question>,
    answers: AnswerSet,
    /// In-flight guard against duplicate scoring submissions.
    submitting: bool,
    /// Set once a result has been rendered; selects which terminal
    /// affordance is honored.
    passed: Option<bool>,
    service: Arc<dyn TrainingService>,
    telemetry: Arc<dyn TelemetryReporter>,
}

impl std::fmt::Debug for TrainingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingSession")
            .field("config", &self.config)
            .field("phase", &self.phase)
            .field("playback", &self.playback)
            .field("questions", &self.questions)
            .field("answers", &self.answers)
            .field("submitting", &self.submitting)
            .field("passed", &self.passed)
            .field("service", &"<dyn TrainingService>")
            .field("telemetry", &"<dyn TelemetryReporter>")
            .finish()
    }
}

impl TrainingSession {
    /// Validates the hosting page's configuration and builds the controller.
    pub fn new(
        config: SessionConfig,
        service: Arc<dyn TrainingService>,
        telemetry: Arc<dyn TelemetryReporter>,
    ) -> Result<Self, SessionError> {
        if config.attempt_id <= 0 {
            return Err(SessionError::MissingAttemptId);
        }
        if config.video_url.trim().is_empty() {
            return Err(SessionError::MissingVideoUrl);
        }
        Ok(Self {
            config,
            phase: SessionPhase::Start,
            playback: PlaybackState::default(),
            questions: Vec::new(),
            answers: AnswerSet::new(),
            submitting: false,
            passed: None,
            service,
            telemetry,
        })
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn playback(&self) -> &PlaybackState {
        &self.playback
    }

    pub fn attempt_id(&self) -> i64 {
        self.config.attempt_id
    }

    pub fn video_url(&self) -> &str {
        &self.config.video_url
    }

    /// The single update function: dispatches one event, mutates session
    /// state, and returns the view commands the host must execute in order.
    pub async fn handle(&mut self, event: SessionEvent) -> Vec<SessionEffect> {
        match event {
            SessionEvent::StartTraining => self.start_training(),
            SessionEvent::PlaybackStarted => self.playback_started().await,
            SessionEvent::PositionChanged { position } => self.position_changed(position),
            SessionEvent::SeekStarted { target } => self.guard_seek(target).await,
            SessionEvent::SeekFinished { position } => self.guard_seek(position).await,
            SessionEvent::PlaybackEnded => self.playback_ended().await,
            SessionEvent::PlaybackFailed { kind } => self.playback_failed(kind),
            SessionEvent::ReloadQuestions => self.load_questions().await,
            SessionEvent::AnswerSelected {
                question_id,
                choice,
            } => self.answer_selected(question_id, choice),
            SessionEvent::SubmitAnswers => self.submit_answers().await,
            SessionEvent::Retry => self.retry(),
            SessionEvent::Close => self.close(),
        }
    }

    fn ignored(&self, event: &str) -> Vec<SessionEffect> {
        warn!(phase = ?self.phase, event, "event ignored in current phase");
        Vec::new()
    }

    fn start_training(&mut self) -> Vec<SessionEffect> {
        if self.phase != SessionPhase::Start {
            return self.ignored("start_training");
        }
        info!(attempt_id = self.config.attempt_id, "training started");
        self.phase = SessionPhase::Video;
        vec![
            SessionEffect::EnterPhase(SessionPhase::Video),
            SessionEffect::InitializeVideo {
                delay_ms: VIDEO_INIT_DELAY_MS,
            },
        ]
    }

    async fn playback_started(&mut self) -> Vec<SessionEffect> {
        if self.phase != SessionPhase::Video {
            return self.ignored("playback_started");
        }
        // Advisory only: a failed report never blocks playback.
        if let Err(e) = self.telemetry.video_started(self.config.attempt_id).await {
            warn!(attempt_id = self.config.attempt_id, error = %e, "video-started report failed");
        }
        Vec::new()
    }

    fn position_changed(&mut self, position: f64) -> Vec<SessionEffect> {
        if self.phase != SessionPhase::Video {
            return Vec::new();
        }
        if position > self.playback.last_valid_time {
            self.playback.last_valid_time = position;
        }
        Vec::new()
    }

    /// The playback-integrity guard. Both the seek-in-progress and the
    /// seek-completed signals land here, so a transport that only delivers
    /// one of the two still trips it. After a punish the position and
    /// `last_valid_time` are both zero, which keeps the pair idempotent in
    /// effect: the echo of our own reset lands inside the grace window.
    async fn guard_seek(&mut self, target: f64) -> Vec<SessionEffect> {
        if self.phase != SessionPhase::Video || self.playback.video_completed {
            return Vec::new();
        }
        if target <= self.playback.last_valid_time + SKIP_GRACE_SECONDS {
            return Vec::new();
        }

        self.playback.skip_attempts += 1;
        self.playback.last_valid_time = 0.0;
        warn!(
            attempt_id = self.config.attempt_id,
            target,
            count = self.playback.skip_attempts,
            "skip attempt blocked"
        );

        if let Err(e) = self
            .telemetry
            .skip_attempt(self.config.attempt_id, self.playback.skip_attempts)
            .await
        {
            warn!(attempt_id = self.config.attempt_id, error = %e, "skip report failed");
        }

        vec![
            SessionEffect::PauseVideo,
            SessionEffect::ShowSkipWarning {
                count: self.playback.skip_attempts,
                dismiss_after_ms: SKIP_WARNING_MS,
            },
            SessionEffect::ResetPlayback,
            SessionEffect::ResumePlayback {
                delay_ms: SKIP_RESUME_DELAY_MS,
            },
        ]
    }

    async fn playback_ended(&mut self) -> Vec<SessionEffect> {
        if self.phase != SessionPhase::Video {
            return self.ignored("playback_ended");
        }
        if !self.playback.video_completed {
            info!(attempt_id = self.config.attempt_id, "video playback ended");
            self.playback.video_completed = true;
        }

        match self.service.complete_video(self.config.attempt_id).await {
            Ok(()) => {
                self.phase = SessionPhase::Quiz;
                let mut effects = vec![SessionEffect::EnterPhase(SessionPhase::Quiz)];
                effects.extend(self.load_questions().await);
                effects
            }
            Err(e) => {
                warn!(attempt_id = self.config.attempt_id, error = %e, "video completion failed");
                vec![SessionEffect::ShowAlert {
                    message: "Error completing video. Please try again.".to_string(),
                }]
            }
        }
    }

    fn playback_failed(&mut self, kind: PlaybackErrorKind) -> Vec<SessionEffect> {
        if self.phase != SessionPhase::Video {
            return self.ignored("playback_failed");
        }
        warn!(attempt_id = self.config.attempt_id, ?kind, "media playback error");
        vec![SessionEffect::ShowAlert {
            message: kind.user_message().to_string(),
        }]
    }

    async fn load_questions(&mut self) -> Vec<SessionEffect> {
        if self.phase != SessionPhase::Quiz {
            return self.ignored("load_questions");
        }
        match self.service.fetch_questions(self.config.attempt_id).await {
            Ok(questions) => {
                self.answers.clear();
                self.questions = questions.clone();
                vec![SessionEffect::RenderQuestions(questions)]
            }
            Err(e) => {
                warn!(attempt_id = self.config.attempt_id, error = %e, "question fetch failed");
                vec![SessionEffect::ShowAlert {
                    message: "Error loading questions. Please try again.".to_string(),
                }]
            }
        }
    }

    fn answer_selected(&mut self, question_id: i64, choice: AnswerChoice) -> Vec<SessionEffect> {
        if self.phase != SessionPhase::Quiz {
            return self.ignored("answer_selected");
        }
        if !self.questions.iter().any(|q| q.id == question_id) {
            return self.ignored("answer_selected");
        }
        self.answers.insert(question_id, choice);
        vec![SessionEffect::UpdateSelection {
            question_id,
            choice,
        }]
    }

    async fn submit_answers(&mut self) -> Vec<SessionEffect> {
        if self.phase != SessionPhase::Quiz {
            return self.ignored("submit_answers");
        }
        if self.submitting {
            return self.ignored("submit_answers");
        }

        let all_answered = !self.questions.is_empty()
            && self
                .questions
                .iter()
                .all(|q| self.answers.contains_key(&q.id));
        if !all_answered {
            return vec![SessionEffect::ShowAlert {
                message: "Please answer all questions before submitting.".to_string(),
            }];
        }

        self.submitting = true;
        let result = self
            .service
            .submit_answers(self.config.attempt_id, &self.answers)
            .await;
        self.submitting = false;

        match result {
            Ok(report) => {
                info!(
                    attempt_id = self.config.attempt_id,
                    score = report.score,
                    passed = report.passed,
                    "answers graded"
                );
                self.phase = SessionPhase::Result;
                self.passed = Some(report.passed);
                vec![
                    SessionEffect::EnterPhase(SessionPhase::Result),
                    SessionEffect::RenderResult(report),
                ]
            }
            Err(e) => {
                warn!(attempt_id = self.config.attempt_id, error = %e, "answer submission failed");
                vec![SessionEffect::ShowAlert {
                    message: "Error submitting answers. Please try again.".to_string(),
                }]
            }
        }
    }

    fn retry(&mut self) -> Vec<SessionEffect> {
        if self.phase != SessionPhase::Result || self.passed != Some(false) {
            return self.ignored("retry");
        }
        vec![SessionEffect::ReloadSession]
    }

    fn close(&mut self) -> Vec<SessionEffect> {
        if self.phase != SessionPhase::Result || self.passed != Some(true) {
            return self.ignored("close");
        }
        self.phase = SessionPhase::Closed;
        vec![SessionEffect::EndSession]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AnswerReview;
    use crate::ports::{PortError, PortResult};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    //------------------------------------------------------------------
    // Hand-rolled fakes for the two ports
    //------------------------------------------------------------------

    #[derive(Default)]
    struct FakeService {
        fail_complete: AtomicBool,
        fail_fetch: AtomicBool,
        fail_submit: AtomicBool,
        questions: Vec<Question>,
        report: Option<ScoreReport>,
        complete_calls: Mutex<Vec<i64>>,
        fetch_calls: Mutex<Vec<i64>>,
        submit_calls: Mutex<Vec<(i64, AnswerSet)>>,
    }

    #[async_trait::async_trait]
    impl TrainingService for FakeService {
        async fn complete_video(&self, attempt_id: i64) -> PortResult<()> {
            self.complete_calls.lock().unwrap().push(attempt_id);
            if self.fail_complete.load(Ordering::SeqCst) {
                return Err(PortError::Unexpected("backend down".to_string()));
            }
            Ok(())
        }

        async fn fetch_questions(&self, attempt_id: i64) -> PortResult<Vec<Question>> {
            self.fetch_calls.lock().unwrap().push(attempt_id);
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(PortError::Unexpected("backend down".to_string()));
            }
            Ok(self.questions.clone())
        }

        async fn submit_answers(
            &self,
            attempt_id: i64,
            answers: &AnswerSet,
        ) -> PortResult<ScoreReport> {
            self.submit_calls
                .lock()
                .unwrap()
                .push((attempt_id, answers.clone()));
            if self.fail_submit.load(Ordering::SeqCst) {
                return Err(PortError::Unexpected("backend down".to_string()));
            }
            Ok(self.report.clone().expect("report configured"))
        }
    }

    #[derive(Default)]
    struct FakeTelemetry {
        fail: AtomicBool,
        started: Mutex<Vec<i64>>,
        skips: Mutex<Vec<(i64, u32)>>,
    }

    #[async_trait::async_trait]
    impl TelemetryReporter for FakeTelemetry {
        async fn video_started(&self, attempt_id: i64) -> PortResult<()> {
            self.started.lock().unwrap().push(attempt_id);
            if self.fail.load(Ordering::SeqCst) {
                return Err(PortError::Unexpected("telemetry down".to_string()));
            }
            Ok(())
        }

        async fn skip_attempt(&self, attempt_id: i64, count: u32) -> PortResult<()> {
            self.skips.lock().unwrap().push((attempt_id, count));
            if self.fail.load(Ordering::SeqCst) {
                return Err(PortError::Unexpected("telemetry down".to_string()));
            }
            Ok(())
        }
    }

    //------------------------------------------------------------------
    // Helpers
    //------------------------------------------------------------------

    fn sample_questions(count: i64) -> Vec<Question> {
        (1..=count)
            .map(|i| Question {
                id: i,
                text: format!("Question {i}"),
                option_a: "first".to_string(),
                option_b: "second".to_string(),
                option_c: "third".to_string(),
                option_d: "fourth".to_string(),
            })
            .collect()
    }

    fn failing_report() -> ScoreReport {
        ScoreReport {
            passed: false,
            score: 42.0,
            correct_answers: 3,
            total_questions: 4,
            answers: vec![AnswerReview {
                question: "Question 1".to_string(),
                selected: AnswerChoice::B,
                correct: AnswerChoice::A,
                is_correct: false,
                explanation: Some("Hard hats are mandatory on site.".to_string()),
            }],
        }
    }

    fn passing_report() -> ScoreReport {
        ScoreReport {
            passed: true,
            score: 100.0,
            correct_answers: 4,
            total_questions: 4,
            answers: Vec::new(),
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            attempt_id: 501,
            video_url: "https://cdn.example.com/training/site-safety.mp4".to_string(),
            video_duration: 120,
        }
    }

    fn session(
        service: Arc<FakeService>,
        telemetry: Arc<FakeTelemetry>,
    ) -> TrainingSession {
        TrainingSession::new(config(), service, telemetry).expect("valid config")
    }

    async fn into_video(session: &mut TrainingSession) {
        let effects = session.handle(SessionEvent::StartTraining).await;
        assert_eq!(effects[0], SessionEffect::EnterPhase(SessionPhase::Video));
    }

    async fn answer_all(session: &mut TrainingSession, count: i64) {
        for id in 1..=count {
            session
                .handle(SessionEvent::AnswerSelected {
                    question_id: id,
                    choice: AnswerChoice::A,
                })
                .await;
        }
    }

    //------------------------------------------------------------------
    // Configuration errors
    //------------------------------------------------------------------

    #[test]
    fn rejects_missing_attempt_id_or_video_url() {
        let service = Arc::new(FakeService::default());
        let telemetry = Arc::new(FakeTelemetry::default());

        let mut bad = config();
        bad.attempt_id = 0;
        let err = TrainingSession::new(bad, service.clone(), telemetry.clone()).unwrap_err();
        assert_eq!(err, SessionError::MissingAttemptId);

        let mut bad = config();
        bad.video_url = "  ".to_string();
        let err = TrainingSession::new(bad, service, telemetry).unwrap_err();
        assert_eq!(err, SessionError::MissingVideoUrl);
    }

    //------------------------------------------------------------------
    // Phase transitions
    //------------------------------------------------------------------

    #[tokio::test]
    async fn start_reveals_video_and_schedules_player_init() {
        let service = Arc::new(FakeService::default());
        let telemetry = Arc::new(FakeTelemetry::default());
        let mut session = session(service, telemetry);

        let effects = session.handle(SessionEvent::StartTraining).await;
        assert_eq!(
            effects,
            vec![
                SessionEffect::EnterPhase(SessionPhase::Video),
                SessionEffect::InitializeVideo {
                    delay_ms: VIDEO_INIT_DELAY_MS
                },
            ]
        );
        assert_eq!(session.phase(), SessionPhase::Video);

        // A second press is meaningless once the phase has advanced.
        assert!(session.handle(SessionEvent::StartTraining).await.is_empty());
    }

    #[tokio::test]
    async fn honest_watch_completes_exactly_once() {
        let service = Arc::new(FakeService {
            questions: sample_questions(4),
            ..FakeService::default()
        });
        let telemetry = Arc::new(FakeTelemetry::default());
        let mut session = session(service.clone(), telemetry.clone());

        into_video(&mut session).await;
        session.handle(SessionEvent::PlaybackStarted).await;

        let mut position = 0.0;
        while position <= 118.0 {
            session
                .handle(SessionEvent::PositionChanged { position })
                .await;
            position += 5.0;
        }
        session
            .handle(SessionEvent::PositionChanged { position: 120.0 })
            .await;

        assert_eq!(session.playback().skip_attempts, 0);
        assert_eq!(session.playback().last_valid_time, 120.0);

        let effects = session.handle(SessionEvent::PlaybackEnded).await;
        assert_eq!(*service.complete_calls.lock().unwrap(), vec![501]);
        assert_eq!(*telemetry.started.lock().unwrap(), vec![501]);
        assert_eq!(session.phase(), SessionPhase::Quiz);
        assert!(effects.contains(&SessionEffect::EnterPhase(SessionPhase::Quiz)));
        assert!(effects
            .iter()
            .any(|e| matches!(e, SessionEffect::RenderQuestions(qs) if qs.len() == 4)));
    }

    #[tokio::test]
    async fn position_updates_never_move_backwards() {
        let service = Arc::new(FakeService::default());
        let telemetry = Arc::new(FakeTelemetry::default());
        let mut session = session(service, telemetry);
        into_video(&mut session).await;

        for position in [0.0, 4.0, 9.5, 7.0, 9.5, 12.0] {
            session
                .handle(SessionEvent::PositionChanged { position })
                .await;
        }
        assert_eq!(session.playback().last_valid_time, 12.0);
    }

    //------------------------------------------------------------------
    // Skip guarding
    //------------------------------------------------------------------

    #[tokio::test]
    async fn forward_jump_is_punished_and_reported() {
        let service = Arc::new(FakeService::default());
        let telemetry = Arc::new(FakeTelemetry::default());
        let mut session = session(service, telemetry.clone());
        into_video(&mut session).await;

        session
            .handle(SessionEvent::PositionChanged { position: 10.0 })
            .await;
        let effects = session.handle(SessionEvent::SeekStarted { target: 60.0 }).await;

        assert_eq!(
            effects,
            vec![
                SessionEffect::PauseVideo,
                SessionEffect::ShowSkipWarning {
                    count: 1,
                    dismiss_after_ms: SKIP_WARNING_MS
                },
                SessionEffect::ResetPlayback,
                SessionEffect::ResumePlayback {
                    delay_ms: SKIP_RESUME_DELAY_MS
                },
            ]
        );
        assert_eq!(session.playback().skip_attempts, 1);
        assert_eq!(session.playback().last_valid_time, 0.0);
        assert_eq!(*telemetry.skips.lock().unwrap(), vec![(501, 1)]);
    }

    #[tokio::test]
    async fn reset_echo_does_not_double_count() {
        let service = Arc::new(FakeService::default());
        let telemetry = Arc::new(FakeTelemetry::default());
        let mut session = session(service, telemetry);
        into_video(&mut session).await;

        session
            .handle(SessionEvent::PositionChanged { position: 10.0 })
            .await;
        session.handle(SessionEvent::SeekStarted { target: 60.0 }).await;
        // The player lands on zero after our forced reset; the completed-seek
        // signal for that landing is inside the grace window.
        let effects = session.handle(SessionEvent::SeekFinished { position: 0.0 }).await;

        assert!(effects.is_empty());
        assert_eq!(session.playback().skip_attempts, 1);
    }

    #[tokio::test]
    async fn lone_seek_finished_still_trips_the_guard() {
        let service = Arc::new(FakeService::default());
        let telemetry = Arc::new(FakeTelemetry::default());
        let mut session = session(service, telemetry);
        into_video(&mut session).await;

        session
            .handle(SessionEvent::PositionChanged { position: 10.0 })
            .await;
        let effects = session
            .handle(SessionEvent::SeekFinished { position: 60.0 })
            .await;

        assert_eq!(session.playback().skip_attempts, 1);
        assert!(effects.contains(&SessionEffect::ResetPlayback));
    }

    #[tokio::test]
    async fn jitter_inside_grace_window_is_not_a_skip() {
        let service = Arc::new(FakeService::default());
        let telemetry = Arc::new(FakeTelemetry::default());
        let mut session = session(service, telemetry);
        into_video(&mut session).await;

        session
            .handle(SessionEvent::PositionChanged { position: 10.0 })
            .await;
        let effects = session.handle(SessionEvent::SeekStarted { target: 10.4 }).await;

        assert!(effects.is_empty());
        assert_eq!(session.playback().skip_attempts, 0);
    }

    #[tokio::test]
    async fn guard_is_disabled_after_completion() {
        let service = Arc::new(FakeService::default());
        service.fail_complete.store(true, Ordering::SeqCst);
        let telemetry = Arc::new(FakeTelemetry::default());
        let mut session = session(service, telemetry);
        into_video(&mut session).await;

        // Completion latches even though the backend call failed, so the
        // session is still in the video phase with the guard off.
        session.handle(SessionEvent::PlaybackEnded).await;
        assert!(session.playback().video_completed);
        assert_eq!(session.phase(), SessionPhase::Video);

        let effects = session.handle(SessionEvent::SeekStarted { target: 999.0 }).await;
        assert!(effects.is_empty());
        assert_eq!(session.playback().skip_attempts, 0);
    }

    //------------------------------------------------------------------
    // Transition-call failures
    //------------------------------------------------------------------

    #[tokio::test]
    async fn completion_failure_keeps_video_phase_until_retried() {
        let service = Arc::new(FakeService {
            questions: sample_questions(2),
            ..FakeService::default()
        });
        service.fail_complete.store(true, Ordering::SeqCst);
        let telemetry = Arc::new(FakeTelemetry::default());
        let mut session = session(service.clone(), telemetry);
        into_video(&mut session).await;

        let effects = session.handle(SessionEvent::PlaybackEnded).await;
        assert_eq!(session.phase(), SessionPhase::Video);
        assert!(matches!(&effects[0], SessionEffect::ShowAlert { .. }));

        service.fail_complete.store(false, Ordering::SeqCst);
        session.handle(SessionEvent::PlaybackEnded).await;
        assert_eq!(session.phase(), SessionPhase::Quiz);
        assert_eq!(service.complete_calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn question_fetch_failure_is_recoverable() {
        let service = Arc::new(FakeService {
            questions: sample_questions(3),
            ..FakeService::default()
        });
        service.fail_fetch.store(true, Ordering::SeqCst);
        let telemetry = Arc::new(FakeTelemetry::default());
        let mut session = session(service.clone(), telemetry);
        into_video(&mut session).await;

        let effects = session.handle(SessionEvent::PlaybackEnded).await;
        assert_eq!(session.phase(), SessionPhase::Quiz);
        assert!(effects
            .iter()
            .any(|e| matches!(e, SessionEffect::ShowAlert { .. })));

        service.fail_fetch.store(false, Ordering::SeqCst);
        let effects = session.handle(SessionEvent::ReloadQuestions).await;
        assert!(effects
            .iter()
            .any(|e| matches!(e, SessionEffect::RenderQuestions(qs) if qs.len() == 3)));
    }

    #[tokio::test]
    async fn playback_error_surfaces_its_category() {
        let service = Arc::new(FakeService::default());
        let telemetry = Arc::new(FakeTelemetry::default());
        let mut session = session(service, telemetry);
        into_video(&mut session).await;

        let effects = session
            .handle(SessionEvent::PlaybackFailed {
                kind: PlaybackErrorKind::Decode,
            })
            .await;
        assert_eq!(
            effects,
            vec![SessionEffect::ShowAlert {
                message: "Error loading video. Decoding failed.".to_string()
            }]
        );
        assert_eq!(session.phase(), SessionPhase::Video);
    }

    //------------------------------------------------------------------
    // Quiz and submission
    //------------------------------------------------------------------

    async fn into_quiz(service: &Arc<FakeService>) -> TrainingSession {
        let telemetry = Arc::new(FakeTelemetry::default());
        let mut session = session(service.clone(), telemetry);
        into_video(&mut session).await;
        session.handle(SessionEvent::PlaybackEnded).await;
        assert_eq!(session.phase(), SessionPhase::Quiz);
        session
    }

    #[tokio::test]
    async fn reselecting_overwrites_the_previous_choice() {
        let service = Arc::new(FakeService {
            questions: sample_questions(2),
            ..FakeService::default()
        });
        let mut session = into_quiz(&service).await;

        let effects = session
            .handle(SessionEvent::AnswerSelected {
                question_id: 1,
                choice: AnswerChoice::A,
            })
            .await;
        assert_eq!(
            effects,
            vec![SessionEffect::UpdateSelection {
                question_id: 1,
                choice: AnswerChoice::A
            }]
        );

        let effects = session
            .handle(SessionEvent::AnswerSelected {
                question_id: 1,
                choice: AnswerChoice::C,
            })
            .await;
        assert_eq!(
            effects,
            vec![SessionEffect::UpdateSelection {
                question_id: 1,
                choice: AnswerChoice::C
            }]
        );

        // An id not in the quiz is ignored outright.
        assert!(session
            .handle(SessionEvent::AnswerSelected {
                question_id: 99,
                choice: AnswerChoice::B,
            })
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn incomplete_answer_set_is_blocked_locally() {
        let service = Arc::new(FakeService {
            questions: sample_questions(4),
            report: Some(failing_report()),
            ..FakeService::default()
        });
        let mut session = into_quiz(&service).await;
        answer_all(&mut session, 3).await;

        let effects = session.handle(SessionEvent::SubmitAnswers).await;
        assert_eq!(
            effects,
            vec![SessionEffect::ShowAlert {
                message: "Please answer all questions before submitting.".to_string()
            }]
        );
        assert!(service.submit_calls.lock().unwrap().is_empty());
        assert_eq!(session.phase(), SessionPhase::Quiz);
    }

    #[tokio::test]
    async fn failed_result_offers_retry_which_reloads() {
        let service = Arc::new(FakeService {
            questions: sample_questions(4),
            report: Some(failing_report()),
            ..FakeService::default()
        });
        let mut session = into_quiz(&service).await;
        answer_all(&mut session, 4).await;

        let effects = session.handle(SessionEvent::SubmitAnswers).await;
        assert_eq!(session.phase(), SessionPhase::Result);
        assert!(effects.contains(&SessionEffect::EnterPhase(SessionPhase::Result)));
        let rendered = effects.iter().find_map(|e| match e {
            SessionEffect::RenderResult(report) => Some(report),
            _ => None,
        });
        let report = rendered.expect("result rendered");
        assert!(!report.passed);
        assert_eq!(report.display_score(), "42.0%");
        assert_eq!((report.correct_answers, report.total_questions), (3, 4));

        let submitted = service.submit_calls.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].0, 501);
        assert_eq!(submitted[0].1.len(), 4);
        drop(submitted);

        // Close is the passed-only affordance; only retry works here.
        assert!(session.handle(SessionEvent::Close).await.is_empty());
        let effects = session.handle(SessionEvent::Retry).await;
        assert_eq!(effects, vec![SessionEffect::ReloadSession]);
    }

    #[tokio::test]
    async fn passed_result_offers_close_which_ends_the_session() {
        let service = Arc::new(FakeService {
            questions: sample_questions(4),
            report: Some(passing_report()),
            ..FakeService::default()
        });
        let mut session = into_quiz(&service).await;
        answer_all(&mut session, 4).await;
        session.handle(SessionEvent::SubmitAnswers).await;

        assert!(session.handle(SessionEvent::Retry).await.is_empty());
        let effects = session.handle(SessionEvent::Close).await;
        assert_eq!(effects, vec![SessionEffect::EndSession]);
        assert_eq!(session.phase(), SessionPhase::Closed);

        // Terminal: nothing is accepted afterwards.
        assert!(session.handle(SessionEvent::SubmitAnswers).await.is_empty());
    }

    #[tokio::test]
    async fn submission_failure_preserves_answers_for_retry() {
        let service = Arc::new(FakeService {
            questions: sample_questions(4),
            report: Some(passing_report()),
            ..FakeService::default()
        });
        service.fail_submit.store(true, Ordering::SeqCst);
        let mut session = into_quiz(&service).await;
        answer_all(&mut session, 4).await;

        let effects = session.handle(SessionEvent::SubmitAnswers).await;
        assert_eq!(session.phase(), SessionPhase::Quiz);
        assert!(matches!(&effects[0], SessionEffect::ShowAlert { .. }));

        service.fail_submit.store(false, Ordering::SeqCst);
        session.handle(SessionEvent::SubmitAnswers).await;
        assert_eq!(session.phase(), SessionPhase::Result);
        assert_eq!(service.submit_calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn telemetry_failures_never_block_the_flow() {
        let service = Arc::new(FakeService::default());
        let telemetry = Arc::new(FakeTelemetry::default());
        telemetry.fail.store(true, Ordering::SeqCst);
        let mut session = session(service, telemetry.clone());
        into_video(&mut session).await;

        assert!(session.handle(SessionEvent::PlaybackStarted).await.is_empty());

        session
            .handle(SessionEvent::PositionChanged { position: 10.0 })
            .await;
        let effects = session.handle(SessionEvent::SeekStarted { target: 60.0 }).await;

        // The punish sequence still runs in full.
        assert_eq!(effects.len(), 4);
        assert_eq!(session.playback().skip_attempts, 1);
        assert_eq!(telemetry.skips.lock().unwrap().len(), 1);
    }
}
