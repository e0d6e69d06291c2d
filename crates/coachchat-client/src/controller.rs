//! The chat controller: one room, one session.
//!
//! All mutable state sits in a single [`ChatState`] behind a mutex that is
//! never held across `.await`. Feed callbacks and spawned load/send tasks
//! capture the session generation and re-check it under that lock, so once
//! `teardown` has bumped the generation nothing from the old session can
//! mutate the state.
//!
//! Lock order: `subscriptions` before `state`. A subscription is never
//! dropped or unsubscribed while the state lock is held; feed callbacks
//! take the state lock while the feed holds their callback slot.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use coachchat_net::{FeedChannel, FeedStatus, PushTransport, RestBackend, Subscription, SubscriptionState};
use coachchat_shared::backend::{AuthProvider, ChatBackend};
use coachchat_shared::constants::CHANGE_CHANNEL_CAPACITY;
use coachchat_shared::error::{BackendError, ChatError};
use coachchat_shared::retry::RetryPolicy;
use coachchat_shared::types::{Message, MessageKind, Topic, TypingStatus, UserId};
use coachchat_store::fetch_page;

use crate::config::ChatConfig;
use crate::events::ChatEvent;
use crate::send::{set_stage, Outbound, PendingSend, SendPipeline, SendStage};
use crate::state::ChatState;
use crate::typing::{LocalTyping, TypingCoordinator};

/// State shared with feed callbacks and spawned tasks.
struct Core {
    state: Mutex<ChatState>,
    events: broadcast::Sender<ChatEvent>,
    pipeline: SendPipeline,
    auth: Arc<dyn AuthProvider>,
    page_size: u32,
}

#[derive(Default)]
struct Subscriptions {
    messages: Option<Subscription>,
    typing: Option<Subscription>,
    status_task: Option<JoinHandle<()>>,
}

pub struct ChatController {
    core: Arc<Core>,
    feed: FeedChannel,
    subscriptions: Mutex<Subscriptions>,
    load_retry: RetryPolicy,
}

impl ChatController {
    pub fn new(
        config: &ChatConfig,
        backend: Arc<dyn ChatBackend>,
        auth: Arc<dyn AuthProvider>,
        feed: FeedChannel,
    ) -> Self {
        let (events, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let typing = TypingCoordinator::with_windows(config.typing_freshness, config.typing_debounce);
        let core = Core {
            state: Mutex::new(ChatState::new(typing)),
            events,
            pipeline: SendPipeline::new(backend, Arc::clone(&auth)),
            auth,
            page_size: config.page_size,
        };
        Self {
            core: Arc::new(core),
            feed,
            subscriptions: Mutex::new(Subscriptions::default()),
            load_retry: RetryPolicy::for_load(),
        }
    }

    /// Controller talking to the REST backend described by `config`.
    pub fn connect(
        config: &ChatConfig,
        transport: Arc<dyn PushTransport>,
        auth: Arc<dyn AuthProvider>,
    ) -> Result<Self, BackendError> {
        let backend: Arc<dyn ChatBackend> = Arc::new(RestBackend::new(config.rest_config())?);
        let feed = FeedChannel::new(transport, Arc::clone(&backend));
        Ok(Self::new(config, backend, auth, feed))
    }

    pub fn with_load_retry(mut self, policy: RetryPolicy) -> Self {
        self.load_retry = policy;
        self
    }

    fn subscriptions(&self) -> MutexGuard<'_, Subscriptions> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open the feed subscriptions and load the first page. Must be called
    /// inside a tokio runtime.
    pub fn start(&self) -> JoinHandle<Result<usize, ChatError>> {
        let mut subs = self.subscriptions();
        let generation = {
            let mut state = self.core.lock();
            if state.torn_down {
                warn!("Start called after teardown");
                return tokio::spawn(async { Ok(0) });
            }
            state.started = true;
            state.generation
        };
        self.open_subscriptions(&mut subs, generation);
        drop(subs);

        info!("Chat controller started");
        self.load()
    }

    fn open_subscriptions(&self, subs: &mut Subscriptions, generation: u64) {
        if subs.status_task.is_none() {
            let mut status_rx = self.feed.status_events();
            let core = Arc::clone(&self.core);
            subs.status_task = Some(tokio::spawn(async move {
                loop {
                    match status_rx.recv().await {
                        Ok(status) => core.apply_feed_status(generation, status),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Feed status receiver lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }
        if subs.messages.is_none() {
            subs.messages = Some(self.subscribe_messages(generation));
        }
        if subs.typing.is_none() {
            subs.typing = Some(self.subscribe_typing(generation));
        }
    }

    fn subscribe_messages(&self, generation: u64) -> Subscription {
        let core = Arc::clone(&self.core);
        self.feed
            .subscribe_messages(move |message| core.apply_remote_message(generation, message))
    }

    fn subscribe_typing(&self, generation: u64) -> Subscription {
        let core = Arc::clone(&self.core);
        self.feed
            .subscribe_typing(move |status| core.apply_remote_typing(generation, status))
    }

    /// Re-open any subscription that gave up reconnecting.
    fn ensure_subscribed(&self) {
        let mut subs = self.subscriptions();
        let generation = {
            let state = self.core.lock();
            if !state.started || state.torn_down {
                return;
            }
            state.generation
        };

        if subs.messages.as_ref().map_or(true, Subscription::is_failed) {
            info!(topic = %Topic::Messages, "Re-subscribing");
            let stale = subs.messages.replace(self.subscribe_messages(generation));
            drop(stale);
        }
        if subs.typing.as_ref().map_or(true, Subscription::is_failed) {
            info!(topic = %Topic::Typing, "Re-subscribing");
            let stale = subs.typing.replace(self.subscribe_typing(generation));
            drop(stale);
        }
    }

    /// Cancel subscriptions and turn every in-flight continuation into a
    /// no-op. Idempotent.
    pub fn teardown(&self) {
        let stop_typing = {
            let mut state = self.core.lock();
            if state.torn_down {
                return;
            }
            state.torn_down = true;
            state.generation += 1;
            state.typing.clear_remote();
            state.typing.clear_local()
        };

        let subs = std::mem::take(&mut *self.subscriptions());
        if let Some(task) = subs.status_task {
            task.abort();
        }
        for sub in [subs.messages, subs.typing].into_iter().flatten() {
            sub.unsubscribe();
        }

        if stop_typing {
            if let (Some(user), Ok(runtime)) = (
                self.core.auth.current_user(),
                tokio::runtime::Handle::try_current(),
            ) {
                let backend = Arc::clone(self.core.pipeline.backend());
                runtime.spawn(async move {
                    if let Err(e) = backend.upsert_typing_status(&user.id, false).await {
                        debug!(error = %e, "Final typing reset failed");
                    }
                });
            }
        }

        info!("Chat controller torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.core.lock().torn_down
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Fetch the first page and merge it. Resolves to the number of rows
    /// that became visible.
    pub fn load(&self) -> JoinHandle<Result<usize, ChatError>> {
        self.ensure_subscribed();
        let generation = {
            let state = self.core.lock();
            if state.torn_down {
                return tokio::spawn(async { Ok(0) });
            }
            state.generation
        };
        let core = Arc::clone(&self.core);
        let retry = self.load_retry.clone();
        tokio::spawn(async move { core.load_page(generation, 0, false, retry).await })
    }

    /// Fetch the page after the last one loaded. A no-op while another
    /// `load_more` is in flight or after a short page.
    pub fn load_more(&self) -> JoinHandle<Result<usize, ChatError>> {
        self.ensure_subscribed();
        let (generation, offset) = {
            let mut state = self.core.lock();
            if state.torn_down || state.loading_more || !state.has_more {
                return tokio::spawn(async { Ok(0) });
            }
            state.loading_more = true;
            (state.generation, state.next_offset)
        };
        let core = Arc::clone(&self.core);
        let retry = self.load_retry.clone();
        tokio::spawn(async move { core.load_page(generation, offset, true, retry).await })
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    pub fn send(&self, content: &str) -> Result<PendingSend, ChatError> {
        self.send_with_kind(content, MessageKind::Text)
    }

    /// Send a message. For `Image` and `File` the content is the URL of the
    /// already uploaded media.
    ///
    /// Validation and session errors are returned before anything is
    /// inserted. Otherwise the placeholder is visible when this returns and
    /// the backend insert runs in the background.
    pub fn send_with_kind(&self, content: &str, kind: MessageKind) -> Result<PendingSend, ChatError> {
        self.ensure_subscribed();
        let stage = Arc::new(Mutex::new(SendStage::Composing));

        let outbound = match self.core.pipeline.prepare(content, kind, &stage) {
            Ok(outbound) => outbound,
            Err(e) => {
                self.core.record_error(None, e.clone());
                return Err(e);
            }
        };

        let (generation, stop_typing) = {
            let mut state = self.core.lock();
            if state.torn_down {
                set_stage(&stage, SendStage::Failed);
                return Err(ChatError::Network("chat session closed".into()));
            }
            state.store.insert_pending(outbound.placeholder.clone());
            (state.generation, state.typing.clear_local())
        };
        set_stage(&stage, SendStage::OptimisticallyInserted);
        debug!(placeholder = %outbound.placeholder.id, kind = kind.as_str(), "Optimistic insert");
        self.core.emit(ChatEvent::MessagesChanged);

        if stop_typing {
            self.core
                .spawn_typing_upsert(outbound.author.id.clone(), false);
        }

        let placeholder = outbound.placeholder.id;
        let core = Arc::clone(&self.core);
        let task_stage = Arc::clone(&stage);
        let handle =
            tokio::spawn(async move { core.complete_send(generation, outbound, task_stage).await });
        Ok(PendingSend::new(placeholder, stage, handle))
    }

    // ------------------------------------------------------------------
    // Typing
    // ------------------------------------------------------------------

    /// Report local typing activity. Updates are debounced; `false` goes
    /// out immediately.
    pub fn set_typing(&self, is_typing: bool) -> Result<(), ChatError> {
        self.ensure_subscribed();
        let user = self.core.pipeline.current_user()?;
        let (generation, decision) = {
            let mut state = self.core.lock();
            if state.torn_down {
                return Ok(());
            }
            let decision = state.typing.set_local_typing(is_typing, Instant::now());
            (state.generation, decision)
        };

        match decision {
            LocalTyping::Send(value) => self.core.spawn_typing_upsert(user.id, value),
            LocalTyping::Defer(delay) => self.core.schedule_typing_flush(generation, user.id, delay),
            LocalTyping::Skip => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn current_messages(&self) -> Vec<Message> {
        self.core.lock().store.messages().to_vec()
    }

    /// The most recent active remote typing status.
    pub fn current_typing(&self) -> Option<TypingStatus> {
        self.core.lock().typing.current(Instant::now())
    }

    pub fn typing_users(&self) -> Vec<TypingStatus> {
        self.core.lock().typing.active(Instant::now())
    }

    pub fn last_error(&self) -> Option<ChatError> {
        self.core.lock().last_error.clone()
    }

    pub fn clear_error(&self) {
        self.core.lock().last_error = None;
    }

    pub fn has_more(&self) -> bool {
        self.core.lock().has_more
    }

    pub fn subscription_state(&self, topic: Topic) -> Option<SubscriptionState> {
        let subs = self.subscriptions();
        let sub = match topic {
            Topic::Messages => subs.messages.as_ref(),
            Topic::Typing => subs.typing.as_ref(),
        };
        sub.map(Subscription::state)
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChatEvent> {
        self.core.events.subscribe()
    }
}

impl Drop for ChatController {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Core {
    fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ChatEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Store `error` as the last error and announce it. With a generation,
    /// only if that session is still current.
    fn record_error(&self, generation: Option<u64>, error: ChatError) {
        {
            let mut state = self.lock();
            if generation.is_some_and(|g| !state.is_current(g)) {
                return;
            }
            state.last_error = Some(error.clone());
        }
        self.emit(ChatEvent::Error(error));
    }

    fn apply_remote_message(&self, generation: u64, message: Message) {
        let changed = {
            let mut state = self.lock();
            if !state.is_current(generation) {
                debug!(msg_id = %message.id, "Dropping message for stale session");
                return;
            }
            state.store.append(message)
        };
        if changed {
            self.emit(ChatEvent::MessagesChanged);
        }
    }

    fn apply_remote_typing(&self, generation: u64, status: TypingStatus) {
        if self
            .auth
            .current_user()
            .is_some_and(|user| user.id == status.user_id)
        {
            return;
        }
        let changed = {
            let mut state = self.lock();
            if !state.is_current(generation) {
                return;
            }
            let now = Instant::now();
            state.typing.prune(now);
            state.typing.on_remote_typing(status, now)
        };
        if changed {
            self.emit(ChatEvent::TypingChanged);
        }
    }

    fn apply_feed_status(&self, generation: u64, status: FeedStatus) {
        if let Some(error) = status.error {
            warn!(topic = %status.topic, error = %error, "Feed subscription problem");
            self.record_error(Some(generation), error);
            return;
        }
        if status.state == SubscriptionState::Active {
            let mut state = self.lock();
            if state.is_current(generation)
                && matches!(state.last_error, Some(ChatError::Subscription(_)))
            {
                state.last_error = None;
            }
        }
    }

    async fn load_page(
        &self,
        generation: u64,
        offset: u32,
        more: bool,
        retry: RetryPolicy,
    ) -> Result<usize, ChatError> {
        let result =
            fetch_with_retry(self.pipeline.backend().as_ref(), self.page_size, offset, &retry)
                .await;

        let mut state = self.lock();
        if more {
            state.loading_more = false;
        }
        if !state.is_current(generation) {
            debug!(offset, "Discarding page for stale session");
            return result.map(|_| 0);
        }

        match result {
            Ok(page) => {
                let fetched = u32::try_from(page.len()).unwrap_or(u32::MAX);
                let added = state.store.merge_page(page);
                state.next_offset = state.next_offset.max(offset.saturating_add(fetched));
                state.has_more = fetched >= self.page_size;
                drop(state);

                info!(offset, fetched, added, "Page loaded");
                if added > 0 {
                    self.emit(ChatEvent::MessagesChanged);
                }
                Ok(added)
            }
            Err(e) => {
                state.last_error = Some(e.clone());
                drop(state);
                self.emit(ChatEvent::Error(e.clone()));
                Err(e)
            }
        }
    }

    async fn complete_send(
        &self,
        generation: u64,
        outbound: Outbound,
        stage: Arc<Mutex<SendStage>>,
    ) -> Result<Message, ChatError> {
        let result = self.pipeline.submit(&outbound).await;

        let current = {
            let mut state = self.lock();
            let current = state.is_current(generation);
            match &result {
                Ok(row) => {
                    set_stage(&stage, SendStage::Reconciled);
                    if current {
                        state.store.replace_placeholder(outbound.local_id, row.clone());
                    }
                }
                Err(e) => {
                    set_stage(&stage, SendStage::Failed);
                    if current {
                        state.store.remove_placeholder(outbound.local_id);
                        state.last_error = Some(e.clone());
                    }
                }
            }
            current
        };

        if current {
            self.emit(ChatEvent::MessagesChanged);
            if let Err(e) = &result {
                self.emit(ChatEvent::Error(e.clone()));
            }
        }
        if let Ok(row) = &result {
            info!(msg_id = %row.id, placeholder = %outbound.placeholder.id, "Message sent");
        }
        result
    }

    fn spawn_typing_upsert(&self, user: UserId, is_typing: bool) {
        let backend = Arc::clone(self.pipeline.backend());
        tokio::spawn(async move {
            if let Err(e) = backend.upsert_typing_status(&user, is_typing).await {
                warn!(user = %user.short(), is_typing, error = %e, "Typing update failed");
            }
        });
    }

    fn schedule_typing_flush(self: &Arc<Self>, generation: u64, user: UserId, delay: Duration) {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let flushed = {
                let mut state = core.lock();
                if !state.is_current(generation) {
                    return;
                }
                state.typing.flush_local(Instant::now())
            };
            if let Some(value) = flushed {
                core.spawn_typing_upsert(user, value);
            }
        });
    }
}

/// Fetch a page, retrying transient failures with `retry`.
async fn fetch_with_retry(
    backend: &dyn ChatBackend,
    limit: u32,
    offset: u32,
    retry: &RetryPolicy,
) -> Result<Vec<Message>, ChatError> {
    let mut attempt = 0;
    loop {
        match fetch_page(backend, limit, offset).await {
            Err(e) if e.is_retryable() => match retry.next_delay(attempt) {
                Some(delay) => {
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Page load failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(e),
            },
            result => return result,
        }
    }
}
