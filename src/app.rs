// app.rs — Per-turn state machine driving the tutor.
// States: Idle → AwaitingReply → Displaying → Idle, or AwaitingReply → Error.
// One session, one actor: `submit` takes `&mut self`, so a second call cannot
// start while a completion is outstanding.

use tracing::{error, info, warn};

use crate::error::{CompletionError, TutorError};
use crate::network::CompletionApi;
use crate::reply::{self, TutorReply};
use crate::session::ConversationSession;
use crate::tracking::{SessionStats, TokenEstimate, UsageTracker};

/// Cumulative failures after which every further failure advises a reset.
pub const RESET_ADVISORY_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Ready for the next message.
    Idle,
    /// User turn appended, completion call in flight.
    AwaitingReply,
    /// Reply received and recorded, waiting for the sink to render it.
    Displaying,
    /// Last completion call failed. Accepts a new message.
    Error,
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnState::Idle => write!(f, "IDLE"),
            TurnState::AwaitingReply => write!(f, "AWAITING_REPLY"),
            TurnState::Displaying => write!(f, "DISPLAYING"),
            TurnState::Error => write!(f, "ERROR"),
        }
    }
}

/// Everything a session mutates: transcript, usage history, error count.
/// Replaced together on reset.
pub struct Session {
    pub conversation: ConversationSession,
    pub usage: UsageTracker,
    pub error_count: u32,
}

impl Session {
    pub fn new(system_prompt: &str, model: &str) -> Self {
        Self {
            conversation: ConversationSession::new(system_prompt),
            usage: UsageTracker::new(model),
            error_count: 0,
        }
    }

    pub fn reset(&mut self, system_prompt: &str) {
        self.conversation.reset(system_prompt);
        self.usage.reset();
        self.error_count = 0;
    }
}

/// Result of one submitted message that reached the API.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Replied(TutorReply),
    Failed {
        error: CompletionError,
        /// Set once the session has failed `RESET_ADVISORY_THRESHOLD` times.
        advise_reset: bool,
    },
}

pub struct Tutor<C> {
    api: C,
    system_prompt: String,
    session: Session,
    state: TurnState,
}

impl<C: CompletionApi> Tutor<C> {
    pub fn new(api: C, system_prompt: String, model: &str) -> Self {
        let session = Session::new(&system_prompt, model);
        Self {
            api,
            system_prompt,
            session,
            state: TurnState::Idle,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn stats(&self) -> SessionStats {
        self.session.usage.session_stats()
    }

    pub fn estimate_tokens(&self, text: &str) -> TokenEstimate {
        self.session.usage.estimate_tokens(text)
    }

    fn transition(&mut self, to: TurnState) {
        info!("State: {} → {}", self.state, to);
        self.state = to;
    }

    /// Run one turn: append the user text, call the API with the full
    /// transcript, then parse and record the reply.
    ///
    /// `InvalidInput` and `Busy` are returned as errors and leave the session
    /// untouched. Transport failures are an outcome, not an error: the user
    /// turn stays in the transcript and the session carries on.
    ///
    /// Must be awaited to completion; dropping the future mid-call leaves the
    /// state at `AwaitingReply` until `reset`.
    pub async fn submit(&mut self, user_text: &str) -> Result<TurnOutcome, TutorError> {
        if matches!(self.state, TurnState::AwaitingReply | TurnState::Displaying) {
            return Err(TutorError::Busy(self.state));
        }

        self.session.conversation.append_user(user_text)?;
        self.transition(TurnState::AwaitingReply);

        let completion = match self.api.complete(self.session.conversation.transcript()).await {
            Ok(c) => c,
            Err(e) => {
                self.session.error_count += 1;
                error!(kind = e.kind(), %e, errors = self.session.error_count, "Completion failed");
                self.transition(TurnState::Error);

                let advise_reset = self.session.error_count >= RESET_ADVISORY_THRESHOLD;
                if advise_reset {
                    warn!(errors = self.session.error_count, "Repeated failures, suggesting a reset");
                }
                return Ok(TurnOutcome::Failed { error: e, advise_reset });
            }
        };

        let parsed = reply::parse(&completion.content);
        self.session.usage.record_interaction(
            completion.prompt_tokens,
            completion.completion_tokens,
            completion.cost_usd,
        );
        self.session.conversation.append_assistant(&completion.content);

        self.transition(TurnState::Displaying);
        Ok(TurnOutcome::Replied(parsed))
    }

    /// Called by the sink once the reply is on screen.
    pub fn finish_turn(&mut self) {
        if self.state == TurnState::Displaying {
            self.transition(TurnState::Idle);
        }
    }

    /// Replace transcript, usage history and error count in one step.
    pub fn reset(&mut self) {
        self.session.reset(&self.system_prompt);
        self.state = TurnState::Idle;
        info!("Session reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Completion;
    use crate::session::{Message, Role};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted results and remembers every transcript it was sent.
    struct ScriptedApi {
        script: Mutex<VecDeque<Result<Completion, CompletionError>>>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedApi {
        fn new(script: Vec<Result<Completion, CompletionError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionApi for ScriptedApi {
        async fn complete(&self, messages: &[Message]) -> Result<Completion, CompletionError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CompletionError::Upstream("script exhausted".into())))
        }
    }

    const GREETING: &str = r#"{"chinese":"你好！很高兴认识你。","pinyin":"nǐ hǎo! hěn gāoxìng rènshi nǐ.","english":"Hello! Nice to meet you.","corrections":"","explanation":"Standard greeting."}"#;

    fn greeting() -> Completion {
        Completion {
            content: GREETING.to_string(),
            prompt_tokens: 50,
            completion_tokens: 20,
            cost_usd: 0.002,
        }
    }

    fn tutor(script: Vec<Result<Completion, CompletionError>>) -> Tutor<ScriptedApi> {
        Tutor::new(ScriptedApi::new(script), "system prompt".to_string(), "gpt-4")
    }

    #[tokio::test]
    async fn test_successful_turn() {
        let mut t = tutor(vec![Ok(greeting())]);

        let outcome = t.submit("你好").await.unwrap();
        let TurnOutcome::Replied(reply) = outcome else {
            panic!("expected a reply");
        };

        let shown = reply::format(&reply);
        assert!(shown.contains("你好！很高兴认识你。"));
        assert!(shown.contains("nǐ hǎo! hěn gāoxìng rènshi nǐ."));
        assert!(shown.contains("Hello! Nice to meet you."));
        assert!(!shown.contains("Corrections"));
        assert!(!shown.contains("Tip"));

        let stats = t.stats();
        assert_eq!(stats.total_tokens, 70);
        assert_eq!(stats.total_cost, 0.002);

        assert_eq!(t.state(), TurnState::Displaying);
        t.finish_turn();
        assert_eq!(t.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_api_receives_full_transcript() {
        let mut t = tutor(vec![Ok(greeting()), Ok(greeting())]);
        t.submit("你好").await.unwrap();
        t.finish_turn();
        t.submit("谢谢").await.unwrap();

        let seen = t.api.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].len(), 2);
        let roles: Vec<Role> = seen[1].iter().map(|m| m.role()).collect();
        assert_eq!(roles, [Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(seen[1][3].content(), "谢谢");
    }

    #[tokio::test]
    async fn test_assistant_turn_is_raw_text() {
        let mut t = tutor(vec![Ok(Completion {
            content: "plain text, no JSON".into(),
            ..greeting()
        })]);

        let outcome = t.submit("hi").await.unwrap();
        let TurnOutcome::Replied(reply) = outcome else {
            panic!("expected a reply");
        };
        assert_eq!(reply.chinese, "plain text, no JSON");
        assert_eq!(reply.pinyin, "Error parsing response");

        let history = t.session().conversation.history();
        assert_eq!(history[1], Message::assistant("plain text, no JSON"));
    }

    #[tokio::test]
    async fn test_rate_limit_keeps_user_turn() {
        let mut t = tutor(vec![Err(CompletionError::RateLimit("HTTP 429".into()))]);

        let outcome = t.submit("你好").await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Failed {
                error: CompletionError::RateLimit("HTTP 429".into()),
                advise_reset: false,
            }
        );

        let history = t.session().conversation.history();
        assert_eq!(history, &[Message::user("你好")]);
        assert_eq!(t.session().error_count, 1);
        assert_eq!(t.stats().total_tokens, 0);
        assert_eq!(t.stats().total_cost, 0.0);
        assert_eq!(t.state(), TurnState::Error);
    }

    #[tokio::test]
    async fn test_error_state_accepts_next_message() {
        let mut t = tutor(vec![Err(CompletionError::Network("down".into())), Ok(greeting())]);
        t.submit("first").await.unwrap();
        let outcome = t.submit("second").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Replied(_)));
        assert_eq!(t.session().conversation.history().len(), 3);
    }

    #[tokio::test]
    async fn test_advisory_after_three_failures() {
        let mut t = tutor(vec![
            Err(CompletionError::Network("a".into())),
            Err(CompletionError::Auth("b".into())),
            Err(CompletionError::Upstream("c".into())),
            Err(CompletionError::Upstream("d".into())),
        ]);

        let mut advisories = Vec::new();
        for i in 0..4 {
            match t.submit(&format!("msg {i}")).await.unwrap() {
                TurnOutcome::Failed { advise_reset, .. } => advisories.push(advise_reset),
                TurnOutcome::Replied(_) => panic!("expected failure"),
            }
        }
        assert_eq!(advisories, [false, false, true, true]);
        assert_eq!(t.session().error_count, 4);
        // Advisory only; nothing was reset.
        assert_eq!(t.session().conversation.history().len(), 4);
    }

    #[tokio::test]
    async fn test_empty_input_never_reaches_api() {
        let mut t = tutor(vec![Ok(greeting())]);
        assert!(matches!(t.submit("   ").await, Err(TutorError::InvalidInput(_))));
        assert!(t.api.seen.lock().unwrap().is_empty());
        assert!(t.session().conversation.history().is_empty());
        assert_eq!(t.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_submit_while_displaying_is_busy() {
        let mut t = tutor(vec![Ok(greeting()), Ok(greeting())]);
        t.submit("你好").await.unwrap();
        assert!(matches!(
            t.submit("again").await,
            Err(TutorError::Busy(TurnState::Displaying))
        ));
        assert_eq!(t.session().conversation.history().len(), 2);
    }

    #[tokio::test]
    async fn test_reset_clears_everything_together() {
        let mut t = tutor(vec![Ok(greeting()), Err(CompletionError::Network("x".into()))]);
        t.submit("a").await.unwrap();
        t.finish_turn();
        t.submit("b").await.unwrap();

        t.reset();

        assert!(t.session().conversation.history().is_empty());
        assert_eq!(t.session().conversation.transcript(), &[Message::system("system prompt")]);
        assert_eq!(t.session().error_count, 0);
        let stats = t.stats();
        assert_eq!(stats.interactions, 0);
        assert_eq!(stats.total_tokens, 0);
        assert_eq!(stats.total_cost, 0.0);
        assert_eq!(stats.average_cost_per_interaction, 0.0);
        assert_eq!(t.state(), TurnState::Idle);
    }

    /// Never answers.
    struct StalledApi;

    #[async_trait]
    impl CompletionApi for StalledApi {
        async fn complete(&self, _messages: &[Message]) -> Result<Completion, CompletionError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_dropped_submit_stays_busy_until_reset() {
        let mut t = Tutor::new(StalledApi, "system prompt".to_string(), "gpt-4");
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(20), t.submit("你好")).await;
        assert!(timed_out.is_err());

        assert_eq!(t.state(), TurnState::AwaitingReply);
        assert!(matches!(
            t.submit("again").await,
            Err(TutorError::Busy(TurnState::AwaitingReply))
        ));

        t.reset();
        assert_eq!(t.state(), TurnState::Idle);
        assert!(t.session().conversation.history().is_empty());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(format!("{}", TurnState::Idle), "IDLE");
        assert_eq!(format!("{}", TurnState::AwaitingReply), "AWAITING_REPLY");
        assert_eq!(format!("{}", TurnState::Displaying), "DISPLAYING");
        assert_eq!(format!("{}", TurnState::Error), "ERROR");
    }
}
