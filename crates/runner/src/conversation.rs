use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::policy::{SafetyPolicy, Verdict};
use crate::prompt::extract_read_request;
use crate::sandbox::{ExecutionResult, Executor};
use crate::substitute::substitute_value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingValue,
}

/// An in-progress script waiting for the user to supply `pending_variable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub code: String,
    pub state: SessionState,
    pub pending_variable: String,
}

impl Session {
    fn awaiting(code: String, pending_variable: String) -> Self {
        Self {
            code,
            state: SessionState::AwaitingValue,
            pending_variable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Submit(String),
    Reply(String),
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionStage {
    /// The script as submitted matched the denylist.
    Submission,
    /// The script with every value filled in matched the denylist.
    Final,
}

/// The single outbound message produced for one inbound intent.
#[derive(Debug)]
pub enum Reply {
    Prompt(String),
    Output(ExecutionResult),
    Rejected(RejectionStage),
    MissingScript,
    Cancelled,
    NoActiveSession,
    NoPendingPrompt,
}

pub struct Pipeline {
    policy: Arc<dyn SafetyPolicy>,
    executor: Arc<dyn Executor>,
}

impl Pipeline {
    pub fn new(policy: Arc<dyn SafetyPolicy>, executor: Arc<dyn Executor>) -> Self {
        Self { policy, executor }
    }

    /// Advances one conversation by one intent. `session` is the conversation's only state.
    pub async fn handle(&self, session: &mut Option<Session>, intent: Intent) -> Reply {
        match intent {
            Intent::Cancel => match session.take() {
                Some(open) => {
                    info!(pending = %open.pending_variable, "session cancelled");
                    Reply::Cancelled
                }
                None => Reply::NoActiveSession,
            },
            Intent::Submit(script) => self.submit(session, script.trim()).await,
            Intent::Reply(value) => match session.take() {
                Some(open) => self.resolve(session, open, &value).await,
                None => Reply::NoPendingPrompt,
            },
        }
    }

    async fn submit(&self, session: &mut Option<Session>, script: &str) -> Reply {
        if script.is_empty() {
            return Reply::MissingScript;
        }
        if let Some(previous) = session.take() {
            info!(pending = %previous.pending_variable, "open session replaced by new script");
        }
        if let Verdict::Deny { rule } = self.policy.evaluate(script) {
            warn!(%rule, stage = "submission", "script rejected");
            return Reply::Rejected(RejectionStage::Submission);
        }
        match extract_read_request(script) {
            Some(request) => {
                debug!(variable = %request.variable, "awaiting value");
                *session = Some(Session::awaiting(script.to_owned(), request.variable));
                Reply::Prompt(request.prompt)
            }
            None => Reply::Output(self.executor.execute(script).await),
        }
    }

    async fn resolve(&self, session: &mut Option<Session>, open: Session, value: &str) -> Reply {
        let code = substitute_value(&open.code, &open.pending_variable, value);
        match extract_read_request(&code) {
            Some(request) => {
                debug!(variable = %request.variable, "awaiting value");
                *session = Some(Session::awaiting(code, request.variable));
                Reply::Prompt(request.prompt)
            }
            None => self.finalize(&code).await,
        }
    }

    async fn finalize(&self, code: &str) -> Reply {
        if let Verdict::Deny { rule } = self.policy.evaluate(code) {
            warn!(%rule, stage = "final", "script rejected");
            return Reply::Rejected(RejectionStage::Final);
        }
        Reply::Output(self.executor.execute(code).await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::policy::DenylistPolicy;

    struct CountingPolicy {
        inner: DenylistPolicy,
        checks: AtomicUsize,
    }

    impl SafetyPolicy for CountingPolicy {
        fn evaluate(&self, code: &str) -> Verdict {
            self.checks.fetch_add(1, Ordering::SeqCst);
            self.inner.evaluate(code)
        }
    }

    #[derive(Default)]
    struct EchoExecutor {
        runs: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Executor for EchoExecutor {
        async fn execute(&self, code: &str) -> ExecutionResult {
            self.runs.lock().unwrap().push(code.to_owned());
            ExecutionResult {
                output: code.to_owned(),
                truncated: false,
                error: None,
            }
        }
    }

    struct Harness {
        policy: Arc<CountingPolicy>,
        executor: Arc<EchoExecutor>,
        pipeline: Pipeline,
    }

    fn harness() -> Harness {
        let policy = Arc::new(CountingPolicy {
            inner: DenylistPolicy::default(),
            checks: AtomicUsize::new(0),
        });
        let executor = Arc::new(EchoExecutor::default());
        let pipeline = Pipeline::new(policy.clone(), executor.clone());
        Harness {
            policy,
            executor,
            pipeline,
        }
    }

    impl Harness {
        fn checks(&self) -> usize {
            self.policy.checks.load(Ordering::SeqCst)
        }

        fn runs(&self) -> Vec<String> {
            self.executor.runs.lock().unwrap().clone()
        }
    }

    fn output_of(reply: Reply) -> String {
        match reply {
            Reply::Output(result) => result.output,
            other => panic!("expected output, got {other:?}"),
        }
    }

    fn prompt_of(reply: Reply) -> String {
        match reply {
            Reply::Prompt(text) => text,
            other => panic!("expected prompt, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn script_without_reads_runs_immediately() {
        let h = harness();
        let mut session = None;
        let reply = h
            .pipeline
            .handle(&mut session, Intent::Submit("print(1 + 1)".to_owned()))
            .await;
        assert_eq!(output_of(reply), "print(1 + 1)");
        assert!(session.is_none());
        assert_eq!(h.checks(), 1);
        assert_eq!(h.runs().len(), 1);
    }

    #[tokio::test]
    async fn reads_are_resolved_in_source_order() {
        let h = harness();
        let mut session = None;
        let script = "a = input('first?')\nb = input()\nc = input(\"third?\")\nprint(a, b, c)";

        let prompt = prompt_of(
            h.pipeline
                .handle(&mut session, Intent::Submit(script.to_owned()))
                .await,
        );
        assert_eq!(prompt, "first?");
        assert_eq!(session.as_ref().unwrap().pending_variable, "a");

        let prompt = prompt_of(
            h.pipeline
                .handle(&mut session, Intent::Reply("1".to_owned()))
                .await,
        );
        assert_eq!(prompt, "Enter value for b:");
        assert_eq!(session.as_ref().unwrap().pending_variable, "b");
        assert_eq!(session.as_ref().unwrap().state, SessionState::AwaitingValue);

        let prompt = prompt_of(
            h.pipeline
                .handle(&mut session, Intent::Reply("two".to_owned()))
                .await,
        );
        assert_eq!(prompt, "third?");
        assert!(h.runs().is_empty());

        let output = output_of(
            h.pipeline
                .handle(&mut session, Intent::Reply("3.5".to_owned()))
                .await,
        );
        assert_eq!(output, "a = 1\nb = \"two\"\nc = 3.5\nprint(a, b, c)");
        assert!(session.is_none());
        assert_eq!(h.runs().len(), 1);
        assert_eq!(h.checks(), 2);
    }

    #[tokio::test]
    async fn pending_variable_is_always_present_in_code() {
        let h = harness();
        let mut session = None;
        let script = "x = input('x?')\nprint(int(input('stray')))\ny = input('y?')\nprint(x, y)";
        h.pipeline.handle(&mut session, Intent::Submit(script.to_owned())).await;
        h.pipeline.handle(&mut session, Intent::Reply("4".to_owned())).await;
        let open = session.as_ref().unwrap();
        assert_eq!(open.pending_variable, "y");
        assert!(open.code.contains("y = input('y?')"));
        assert!(!open.code.contains("stray"));
    }

    #[tokio::test]
    async fn unsafe_final_code_is_rejected_without_running() {
        let h = harness();
        let mut session = None;
        h.pipeline
            .handle(&mut session, Intent::Submit("name = input()\nprint(name)".to_owned()))
            .await;
        let reply = h
            .pipeline
            .handle(&mut session, Intent::Reply("__import__".to_owned()))
            .await;
        assert!(matches!(reply, Reply::Rejected(RejectionStage::Final)));
        assert!(session.is_none());
        assert!(h.runs().is_empty());
    }

    #[tokio::test]
    async fn unsafe_submission_creates_no_session() {
        let h = harness();
        let mut session = None;
        let reply = h
            .pipeline
            .handle(&mut session, Intent::Submit("import os\nx = input()".to_owned()))
            .await;
        assert!(matches!(reply, Reply::Rejected(RejectionStage::Submission)));
        assert!(session.is_none());
        assert!(h.runs().is_empty());
    }

    #[tokio::test]
    async fn empty_submission_is_a_user_error() {
        let h = harness();
        let mut session = None;
        let reply = h.pipeline.handle(&mut session, Intent::Submit("   \n".to_owned())).await;
        assert!(matches!(reply, Reply::MissingScript));
        assert_eq!(h.checks(), 0);
    }

    #[tokio::test]
    async fn cancel_discards_the_session() {
        let h = harness();
        let mut session = None;
        h.pipeline
            .handle(&mut session, Intent::Submit("x = input()".to_owned()))
            .await;
        assert!(session.is_some());
        let reply = h.pipeline.handle(&mut session, Intent::Cancel).await;
        assert!(matches!(reply, Reply::Cancelled));
        assert!(session.is_none());
    }

    #[tokio::test]
    async fn cancel_without_session_changes_nothing() {
        let h = harness();
        let mut session = None;
        let reply = h.pipeline.handle(&mut session, Intent::Cancel).await;
        assert!(matches!(reply, Reply::NoActiveSession));
        assert!(session.is_none());
        assert_eq!(h.checks(), 0);
    }

    #[tokio::test]
    async fn reply_without_session_is_not_executed() {
        let h = harness();
        let mut session = None;
        let reply = h.pipeline.handle(&mut session, Intent::Reply("5".to_owned())).await;
        assert!(matches!(reply, Reply::NoPendingPrompt));
        assert!(h.runs().is_empty());
    }

    #[tokio::test]
    async fn new_submission_replaces_open_session() {
        let h = harness();
        let mut session = None;
        h.pipeline
            .handle(&mut session, Intent::Submit("x = input('x?')".to_owned()))
            .await;
        let prompt = prompt_of(
            h.pipeline
                .handle(&mut session, Intent::Submit("y = input('y?')".to_owned()))
                .await,
        );
        assert_eq!(prompt, "y?");
        assert_eq!(session.unwrap().pending_variable, "y");
    }
}
