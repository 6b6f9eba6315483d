use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use runner::{Intent, Pipeline, Reply, Session};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug, info_span, warn};

pub type ConversationId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    Overloaded,
    Internal,
}

#[derive(Debug, Clone)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn overloaded(message: impl Into<String>) -> Self {
        Self {
            kind: SessionErrorKind::Overloaded,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: SessionErrorKind::Internal,
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub struct SessionRequest {
    pub conversation: ConversationId,
    pub intent: Intent,
    pub respond_to: oneshot::Sender<Result<Reply, SessionError>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionActorState {
    /// Handling or queued to handle at least one intent.
    Busy,
    /// Nothing queued; the conversation is waiting on the user for a value.
    AwaitingValue,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub max_sessions: usize,
    pub ingress_capacity: usize,
}

#[derive(Clone)]
pub struct SessionManagerHandle {
    sender: mpsc::Sender<SessionRequest>,
}

impl SessionManagerHandle {
    pub fn try_dispatch(&self, request: SessionRequest) -> Result<(), SessionError> {
        match self.sender.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SessionError::overloaded(
                "request queue is full; retry later",
            )),
            Err(TrySendError::Closed(_)) => {
                Err(SessionError::internal("session manager unavailable"))
            }
        }
    }

    /// Dispatches `intent` for `conversation` and waits for its reply.
    pub async fn converse(
        &self,
        conversation: ConversationId,
        intent: Intent,
    ) -> Result<Reply, SessionError> {
        let (respond_to, response) = oneshot::channel();
        self.try_dispatch(SessionRequest {
            conversation,
            intent,
            respond_to,
        })?;
        response
            .await
            .map_err(|_| SessionError::internal("session response channel closed"))?
    }
}

struct ActorEntry {
    sender: mpsc::UnboundedSender<ActorRequest>,
    pending: usize,
    state: SessionActorState,
}

struct ActorRequest {
    intent: Intent,
    respond_to: oneshot::Sender<Result<Reply, SessionError>>,
}

struct ActorFinished {
    conversation: ConversationId,
    session_open: bool,
}

/// Starts the manager task. Each conversation gets its own actor task owning its
/// [`Session`], so intents for one conversation are handled strictly in arrival order
/// while different conversations run in parallel. Must be called inside a tokio runtime.
pub fn spawn_session_manager(
    config: SessionConfig,
    pipeline: Arc<Pipeline>,
) -> SessionManagerHandle {
    let (request_sender, request_receiver) =
        mpsc::channel::<SessionRequest>(config.ingress_capacity.max(1));
    let (finished_sender, finished_receiver) = mpsc::unbounded_channel::<ActorFinished>();

    tokio::spawn(
        run_session_manager_loop(
            config,
            request_receiver,
            finished_receiver,
            finished_sender,
            pipeline,
        )
        .instrument(info_span!("session_manager")),
    );

    SessionManagerHandle {
        sender: request_sender,
    }
}

struct ManagerState {
    max_sessions: usize,
    actors: HashMap<ConversationId, ActorEntry>,
    idle_lru: VecDeque<ConversationId>,
    idle_index: HashSet<ConversationId>,
}

async fn run_session_manager_loop(
    config: SessionConfig,
    mut request_receiver: mpsc::Receiver<SessionRequest>,
    mut finished_receiver: mpsc::UnboundedReceiver<ActorFinished>,
    finished_sender: mpsc::UnboundedSender<ActorFinished>,
    pipeline: Arc<Pipeline>,
) {
    let mut state = ManagerState::new(config.max_sessions);

    loop {
        tokio::select! {
            biased;
            Some(finished) = finished_receiver.recv() => state.record_finished(finished),
            request = request_receiver.recv() => {
                let Some(request) = request else {
                    break;
                };
                state.dispatch(request, &finished_sender, &pipeline);
            }
        }
    }

    state.actors.clear();
}

impl ManagerState {
    fn new(max_sessions: usize) -> Self {
        let max_sessions = max_sessions.max(1);
        Self {
            max_sessions,
            actors: HashMap::with_capacity(max_sessions),
            idle_lru: VecDeque::with_capacity(max_sessions),
            idle_index: HashSet::with_capacity(max_sessions),
        }
    }

    fn dispatch(
        &mut self,
        request: SessionRequest,
        finished_sender: &mpsc::UnboundedSender<ActorFinished>,
        pipeline: &Arc<Pipeline>,
    ) {
        let SessionRequest {
            conversation,
            intent,
            respond_to,
        } = request;

        if !self.actors.contains_key(&conversation) {
            if !self.evict_until_capacity() {
                let _ = respond_to.send(Err(SessionError::overloaded(
                    "max sessions reached; no idle session available",
                )));
                return;
            }
            let sender =
                spawn_session_actor(conversation, finished_sender.clone(), pipeline.clone());
            self.actors.insert(
                conversation,
                ActorEntry {
                    sender,
                    pending: 0,
                    state: SessionActorState::Busy,
                },
            );
        }

        self.forget_idle(conversation);
        let Some(entry) = self.actors.get_mut(&conversation) else {
            let _ = respond_to.send(Err(SessionError::internal("session actor missing")));
            return;
        };
        entry.pending += 1;
        entry.state = SessionActorState::Busy;

        if let Err(err) = entry.sender.send(ActorRequest { intent, respond_to }) {
            let _ = err
                .0
                .respond_to
                .send(Err(SessionError::internal("failed to dispatch to actor")));
            self.actors.remove(&conversation);
        }
    }

    fn record_finished(&mut self, finished: ActorFinished) {
        let Some(entry) = self.actors.get_mut(&finished.conversation) else {
            return;
        };
        entry.pending = entry.pending.saturating_sub(1);
        if entry.pending > 0 {
            entry.state = SessionActorState::Busy;
            return;
        }
        if !finished.session_open {
            // No state left to keep; dropping the sender ends the actor.
            self.actors.remove(&finished.conversation);
            self.forget_idle(finished.conversation);
            return;
        }
        entry.state = SessionActorState::AwaitingValue;
        if self.idle_index.insert(finished.conversation) {
            self.idle_lru.push_back(finished.conversation);
        }
    }

    /// Keeps `idle_lru` holding exactly the members of `idle_index`.
    fn forget_idle(&mut self, conversation: ConversationId) {
        if self.idle_index.remove(&conversation) {
            self.idle_lru.retain(|queued| *queued != conversation);
        }
    }

    fn evict_until_capacity(&mut self) -> bool {
        while self.actors.len() >= self.max_sessions {
            if !self.evict_oldest_idle_actor() {
                return false;
            }
        }
        true
    }

    fn evict_oldest_idle_actor(&mut self) -> bool {
        while let Some(conversation) = self.idle_lru.pop_front() {
            self.idle_index.remove(&conversation);
            let is_idle = self
                .actors
                .get(&conversation)
                .is_some_and(|entry| {
                    entry.pending == 0 && entry.state == SessionActorState::AwaitingValue
                });
            if !is_idle {
                continue;
            }
            warn!(conversation, "evicting idle session to make room");
            self.actors.remove(&conversation);
            return true;
        }
        false
    }
}

fn spawn_session_actor(
    conversation: ConversationId,
    finished_sender: mpsc::UnboundedSender<ActorFinished>,
    pipeline: Arc<Pipeline>,
) -> mpsc::UnboundedSender<ActorRequest> {
    let (sender, receiver) = mpsc::unbounded_channel::<ActorRequest>();
    tokio::spawn(
        run_session_actor_loop(conversation, receiver, finished_sender, pipeline)
            .instrument(info_span!("conversation", id = conversation)),
    );
    sender
}

async fn run_session_actor_loop(
    conversation: ConversationId,
    mut receiver: mpsc::UnboundedReceiver<ActorRequest>,
    finished_sender: mpsc::UnboundedSender<ActorFinished>,
    pipeline: Arc<Pipeline>,
) {
    let mut session: Option<Session> = None;

    while let Some(request) = receiver.recv().await {
        let reply = pipeline.handle(&mut session, request.intent).await;
        if request.respond_to.send(Ok(reply)).is_err() {
            debug!("requester went away before the reply was ready");
        }
        let _ = finished_sender.send(ActorFinished {
            conversation,
            session_open: session.is_some(),
        });
    }

    if let Some(open) = session.take() {
        debug!(pending = %open.pending_variable, "session discarded with actor");
    }
}
