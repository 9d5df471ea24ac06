use std::{
    collections::HashMap,
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    time::Duration,
};

use shared::{
    action::{ActionEvent, ActionParams},
    domain::{CallId, PopupSlot},
    protocol::{RemoteView, ResponseEnvelope, CONTENT_OPEN_PATH},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

pub mod clock;
pub mod config;
pub mod confirm;
pub mod error;
pub mod guard;
pub mod interpreter;
pub mod page;
pub mod params;
pub mod transport;

use clock::{Clock, SystemClock};
use config::RuntimeSettings;
use confirm::{ConfirmationInterceptor, Interception, PendingConfirmation};
use error::DispatchError;
use guard::{GuardRejection, SubmissionGuard};
use interpreter::{apply_envelope, ApplyContext, BatchReport, FollowUp};
use page::{PageHost, RenderHook};
use params::{build_request, AliasTable, DocumentContext, RequestEnvelope};
use transport::{perform_call, Transport};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// What a wired element does when its action fires.
#[derive(Clone)]
pub enum ActionHandler {
    Post,
    Submit,
    PostCommand,
    /// Navigates the page to the action URL without a remote call.
    Forward,
    Custom(Arc<dyn Fn(ActionEvent) + Send + Sync>),
}

impl fmt::Debug for ActionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionHandler::Post => f.write_str("Post"),
            ActionHandler::Submit => f.write_str("Submit"),
            ActionHandler::PostCommand => f.write_str("PostCommand"),
            ActionHandler::Forward => f.write_str("Forward"),
            ActionHandler::Custom(_) => f.write_str("Custom"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum DispatchEvent {
    CallIssued {
        call_id: CallId,
        url: String,
    },
    CallRejected {
        url: String,
        reason: GuardRejection,
    },
    CallCompleted {
        call_id: CallId,
        applied: usize,
        skipped: usize,
    },
    CallFailed {
        call_id: CallId,
        message: String,
    },
    ConfirmationParked {
        target: Option<String>,
    },
    ConfirmationResumed,
    ConfirmationDeclined,
    DelayedPostFired {
        panel: String,
    },
}

#[derive(Debug)]
pub enum CallOutcome {
    /// The action had no URL to post to.
    Skipped,
    Rejected(GuardRejection),
    Completed(BatchReport),
    Failed(DispatchError),
}

impl CallOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CallOutcome::Completed(_))
    }
}

#[derive(Clone)]
struct ShortcutBinding {
    owner_panel: String,
    handler: ActionHandler,
    params: ActionParams,
}

struct DelayedPost {
    generation: u64,
    task: JoinHandle<()>,
}

enum Deferred {
    PostPath(String),
    Resume(PendingConfirmation<ActionHandler>),
}

struct SessionState {
    document: DocumentContext,
    aliases: AliasTable,
    remote_view: Option<RemoteView>,
    save_list: Vec<String>,
    remote_redirects: HashMap<String, String>,
    content_open_path: Option<String>,
    tab_close_id: Option<String>,
    shortcuts: HashMap<u32, ShortcutBinding>,
    last_user_activity: i64,
    hint_timer: Option<JoinHandle<()>>,
    delayed_posts: HashMap<String, DelayedPost>,
    delayed_generation: u64,
}

impl SessionState {
    fn new(settings: &RuntimeSettings) -> Self {
        Self {
            document: settings.document(),
            aliases: AliasTable::default(),
            remote_view: None,
            save_list: Vec::new(),
            remote_redirects: HashMap::new(),
            content_open_path: settings.content_open_path.clone(),
            tab_close_id: settings.tab_close_id.clone(),
            shortcuts: HashMap::new(),
            last_user_activity: 0,
            hint_timer: None,
            delayed_posts: HashMap::new(),
            delayed_generation: 0,
        }
    }

    fn abort_timers(&mut self) {
        if let Some(timer) = self.hint_timer.take() {
            timer.abort();
        }
        for (_, delayed) in self.delayed_posts.drain() {
            delayed.task.abort();
        }
    }

    fn resolve_post_path(&self, path: &str) -> Option<String> {
        if path == CONTENT_OPEN_PATH {
            return self.content_open_path.clone();
        }
        Some(
            self.remote_redirects
                .get(path)
                .cloned()
                .unwrap_or_else(|| path.to_string()),
        )
    }
}

struct RuntimeState {
    guard: SubmissionGuard,
    confirm: ConfirmationInterceptor<ActionHandler>,
    session: SessionState,
    hooks: Vec<Arc<dyn RenderHook>>,
    next_call_id: u64,
}

/// Owns every piece of dispatch state for one hosted document.
pub struct DispatchRuntime {
    settings: RuntimeSettings,
    transport: Arc<dyn Transport>,
    page: Arc<dyn PageHost>,
    clock: Arc<dyn Clock>,
    inner: Mutex<RuntimeState>,
    events: broadcast::Sender<DispatchEvent>,
}

impl DispatchRuntime {
    pub fn new(
        settings: RuntimeSettings,
        transport: Arc<dyn Transport>,
        page: Arc<dyn PageHost>,
    ) -> Arc<Self> {
        Self::new_with_clock(settings, transport, page, Arc::new(SystemClock))
    }

    pub fn new_with_clock(
        settings: RuntimeSettings,
        transport: Arc<dyn Transport>,
        page: Arc<dyn PageHost>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            inner: Mutex::new(RuntimeState {
                guard: SubmissionGuard::new(settings.busy_indicator_id.clone()),
                confirm: ConfirmationInterceptor::default(),
                session: SessionState::new(&settings),
                hooks: Vec::new(),
                next_call_id: 0,
            }),
            settings,
            transport,
            page,
            clock,
            events,
        })
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    pub async fn setup_document(&self, document: DocumentContext) {
        info!(path = %document.path, "dispatch: document set up");
        self.inner.lock().await.session.document = document;
    }

    pub async fn remote_view(&self) -> Option<RemoteView> {
        self.inner.lock().await.session.remote_view.clone()
    }

    pub async fn save_list(&self) -> Vec<String> {
        self.inner.lock().await.session.save_list.clone()
    }

    /// Params for a new action, scoped to the remote view of the last envelope that carried one.
    pub async fn new_params(&self, url: impl Into<String>) -> ActionParams {
        let viewer = self.remote_view().await.map(|view| view.view);
        ActionParams::new(url).with_viewer(viewer)
    }

    pub async fn register_render_hook(&self, hook: Arc<dyn RenderHook>) {
        self.inner.lock().await.hooks.push(hook);
    }

    pub async fn register_remote_redirect(
        &self,
        origin_path: impl Into<String>,
        action_path: impl Into<String>,
    ) {
        self.inner
            .lock()
            .await
            .session
            .remote_redirects
            .insert(origin_path.into(), action_path.into());
    }

    pub async fn set_content_open_path(&self, path: impl Into<String>) {
        self.inner.lock().await.session.content_open_path = Some(path.into());
    }

    /// Control clicked when a response asks to close the remote content tab.
    pub async fn set_tab_close_id(&self, id: impl Into<String>) {
        self.inner.lock().await.session.tab_close_id = Some(id.into());
    }

    pub async fn register_shortcut(
        &self,
        shortcut_code: u32,
        owner_panel: impl Into<String>,
        handler: ActionHandler,
        params: ActionParams,
    ) {
        self.inner.lock().await.session.shortcuts.insert(
            shortcut_code,
            ShortcutBinding {
                owner_panel: owner_panel.into(),
                handler,
                params,
            },
        );
    }

    /// Runs the shortcut bound to the key event, if its owning panel is on the page.
    pub async fn handle_key(self: &Arc<Self>, event: &mut ActionEvent) -> Option<CallOutcome> {
        let key_code = event.key_code?;
        let code = event.modifiers.shortcut_code(key_code);
        let binding = self.inner.lock().await.session.shortcuts.get(&code).cloned()?;
        if !self.page.contains(&binding.owner_panel) {
            return None;
        }
        debug!(code, panel = %binding.owner_panel, "dispatch: shortcut fired");
        event.params = binding.params;
        event.stop();
        Arc::clone(self)
            .run_handler(binding.handler, event.clone())
            .await
    }

    /// Fire-and-forget entry point for wired elements. Confirmation is checked first.
    pub fn raise(self: &Arc<Self>, handler: ActionHandler, event: ActionEvent) {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            let _ = runtime.handle(handler, event).await;
        });
    }

    pub fn post(self: &Arc<Self>, event: ActionEvent) {
        self.spawn_handler(ActionHandler::Post, event);
    }

    pub fn submit(self: &Arc<Self>, event: ActionEvent) {
        self.spawn_handler(ActionHandler::Submit, event);
    }

    pub fn post_command(self: &Arc<Self>, event: ActionEvent) {
        self.spawn_handler(ActionHandler::PostCommand, event);
    }

    pub fn post_commit(self: &Arc<Self>, params: ActionParams) {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            let _ = runtime.commit(params, None).await;
        });
    }

    pub fn post_to_path(self: &Arc<Self>, url: impl Into<String>) {
        tokio::spawn(Arc::clone(self).deferred(Deferred::PostPath(url.into())));
    }

    fn spawn_handler(self: &Arc<Self>, handler: ActionHandler, event: ActionEvent) {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            let _ = runtime.run_handler(handler, event).await;
        });
    }

    /// Awaitable form of [`DispatchRuntime::raise`].
    pub async fn handle(
        self: &Arc<Self>,
        handler: ActionHandler,
        event: ActionEvent,
    ) -> Option<CallOutcome> {
        let target = event.target.clone();
        let interception = {
            let mut state = self.inner.lock().await;
            state
                .confirm
                .intercept(handler, event, self.page.as_ref())
        };
        match interception {
            Interception::PassThrough(handler, event) => {
                Arc::clone(self).run_handler(handler, event).await
            }
            Interception::Redirect(params) => {
                debug!(
                    target_id = target.as_deref().unwrap_or_default(),
                    "dispatch: action parked for confirmation"
                );
                let _ = self
                    .events
                    .send(DispatchEvent::ConfirmationParked { target });
                self.page.hide_popup(PopupSlot::Document);
                Some(self.commit(params, None).await)
            }
        }
    }

    fn run_handler(
        self: Arc<Self>,
        handler: ActionHandler,
        event: ActionEvent,
    ) -> BoxFuture<Option<CallOutcome>> {
        Box::pin(async move {
            let target = event.target.clone();
            let params = event.params.clone();
            match handler {
                ActionHandler::Post => Some(self.commit(params, target).await),
                ActionHandler::Submit => {
                    let mut params = params;
                    params.synchronous = true;
                    Some(self.commit(params, target).await)
                }
                ActionHandler::PostCommand => {
                    let mut params = params;
                    params.url = params.command_url.clone();
                    params.command = Some(ActionParams::panel_command(
                        params.target_panel.as_deref().unwrap_or_default(),
                        params.target_command.as_deref().unwrap_or_default(),
                    ));
                    if !params.refresh_panels.is_empty() {
                        params.panels = params.refresh_panels.clone();
                    }
                    Some(self.commit(params, target).await)
                }
                ActionHandler::Forward => {
                    if let Some(url) = params.url.as_deref() {
                        self.page.navigate(url);
                    }
                    None
                }
                ActionHandler::Custom(callback) => {
                    callback(event);
                    None
                }
            }
        })
    }

    /// Busy-tracked post of `params` after writing its hidden values into the page.
    pub async fn commit(
        self: &Arc<Self>,
        mut params: ActionParams,
        trigger: Option<String>,
    ) -> CallOutcome {
        params.busy = true;
        self.issue(params, trigger, true).await
    }

    /// Builds, admits, sends and interprets one action.
    pub async fn dispatch(
        self: &Arc<Self>,
        params: ActionParams,
        trigger: Option<String>,
    ) -> CallOutcome {
        self.issue(params, trigger, false).await
    }

    async fn issue(
        self: &Arc<Self>,
        params: ActionParams,
        trigger: Option<String>,
        write_hidden_values: bool,
    ) -> CallOutcome {
        let Some(url) = params.url.clone().filter(|url| !url.is_empty()) else {
            debug!("dispatch: action has no url");
            return CallOutcome::Skipped;
        };
        let now = self.clock.now_millis();
        let prepared = {
            let mut state = self.inner.lock().await;
            // A dropped synchronous call must leave the page untouched.
            if params.synchronous && state.guard.is_submitting() {
                Err((url, GuardRejection::SubmissionInFlight))
            } else {
                if write_hidden_values {
                    for (name, value) in params.references.iter().zip(&params.hidden_values) {
                        self.page.set_hidden_value(name, value);
                    }
                }
                let request = build_request(
                    url,
                    &params,
                    trigger.as_deref(),
                    &state.session.aliases,
                    self.page.as_ref(),
                    &state.session.document,
                    now,
                );
                let admitted = self.admit(&mut state, request);
                if admitted.is_ok() && !params.auto_call {
                    state.session.last_user_activity = now;
                }
                admitted
            }
        };
        let (call_id, request, ticket) = match prepared {
            Ok(prepared) => prepared,
            Err((url, reason)) => {
                debug!(url = %url, "dispatch: call rejected by guard");
                let _ = self
                    .events
                    .send(DispatchEvent::CallRejected { url, reason });
                return CallOutcome::Rejected(reason);
            }
        };
        self.send_admitted(call_id, request, ticket).await
    }

    fn admit(
        self: &Arc<Self>,
        state: &mut RuntimeState,
        request: RequestEnvelope,
    ) -> Result<(CallId, RequestEnvelope, guard::GuardTicket), (String, GuardRejection)> {
        let ticket = state
            .guard
            .admit(request.flags, self.page.as_ref())
            .map_err(|reason| (request.url.clone(), reason))?;
        if ticket.arm_busy_timer {
            let timer = self.spawn_busy_timer();
            state.guard.set_busy_timer(timer);
        }
        state.next_call_id += 1;
        Ok((CallId(state.next_call_id), request, ticket))
    }

    async fn send_admitted(
        self: &Arc<Self>,
        call_id: CallId,
        request: RequestEnvelope,
        ticket: guard::GuardTicket,
    ) -> CallOutcome {
        info!(
            call_id = %call_id,
            url = %request.url,
            encoded = request.flags.encoded,
            synchronous = request.flags.synchronous,
            "dispatch: call issued"
        );
        let _ = self.events.send(DispatchEvent::CallIssued {
            call_id,
            url: request.url.clone(),
        });

        let result = perform_call(self.transport.as_ref(), &request).await;
        self.complete(call_id, ticket, result).await
    }

    async fn complete(
        self: &Arc<Self>,
        call_id: CallId,
        ticket: guard::GuardTicket,
        result: Result<String, DispatchError>,
    ) -> CallOutcome {
        let page = self.page.as_ref();
        let mut state = self.inner.lock().await;
        state.guard.release_call(&ticket, page);

        let result = result.and_then(|body| {
            let envelope = ResponseEnvelope::parse(&body)?;
            let RuntimeState {
                guard,
                session,
                hooks,
                ..
            } = &mut *state;
            session.remote_view = envelope.remote_view.clone();
            Ok(apply_envelope(
                envelope,
                ApplyContext {
                    page,
                    document: &session.document,
                    hooks,
                    guard,
                    aliases: &mut session.aliases,
                    save_list: &mut session.save_list,
                    hint_panel_id: self.settings.hint_panel_id.as_deref(),
                    tab_close_id: session.tab_close_id.as_deref(),
                    now_millis: self.clock.now_millis(),
                },
            ))
        });
        state.guard.release_debounce(&ticket.claim, page);

        match result {
            Ok(report) => {
                self.run_follow_ups(&mut state, &report.follow_ups);
                drop(state);
                info!(
                    call_id = %call_id,
                    applied = report.applied,
                    skipped = report.skipped.len(),
                    "dispatch: call completed"
                );
                let _ = self.events.send(DispatchEvent::CallCompleted {
                    call_id,
                    applied: report.applied,
                    skipped: report.skipped.len(),
                });
                CallOutcome::Completed(report)
            }
            Err(err) => {
                drop(state);
                error!(call_id = %call_id, error = %err, "dispatch: call failed");
                if let Some(message) = err.user_message() {
                    self.page.alert(&message);
                }
                let _ = self.events.send(DispatchEvent::CallFailed {
                    call_id,
                    message: err.to_string(),
                });
                CallOutcome::Failed(err)
            }
        }
    }

    fn run_follow_ups(self: &Arc<Self>, state: &mut RuntimeState, follow_ups: &[FollowUp]) {
        for follow_up in follow_ups {
            match follow_up {
                FollowUp::PostPath(path) => match state.session.resolve_post_path(path) {
                    Some(resolved) => {
                        tokio::spawn(Arc::clone(self).deferred(Deferred::PostPath(resolved)));
                    }
                    None => warn!(path = %path, "dispatch: no content-open path to post to"),
                },
                FollowUp::ResolveConfirmation { fire } => {
                    match state.confirm.resolve(*fire) {
                        Some(pending) => {
                            let _ = self.events.send(DispatchEvent::ConfirmationResumed);
                            tokio::spawn(Arc::clone(self).deferred(Deferred::Resume(pending)));
                        }
                        None => {
                            let _ = self.events.send(DispatchEvent::ConfirmationDeclined);
                        }
                    }
                }
                FollowUp::ClearShortcuts => state.session.shortcuts.clear(),
                FollowUp::ClearHint { panel_id } => {
                    if let Some(previous) = state.session.hint_timer.take() {
                        previous.abort();
                    }
                    state.session.hint_timer = Some(self.spawn_hint_clear(panel_id.clone()));
                }
            }
        }
    }

    fn deferred(self: Arc<Self>, work: Deferred) -> BoxFuture<()> {
        Box::pin(async move {
            match work {
                Deferred::PostPath(url) => {
                    let now = self.clock.now_millis();
                    let prepared = {
                        let mut state = self.inner.lock().await;
                        let request =
                            RequestEnvelope::document_post(url, &state.session.document, now);
                        self.admit(&mut state, request)
                    };
                    if let Ok((call_id, request, ticket)) = prepared {
                        let _ = self.send_admitted(call_id, request, ticket).await;
                    }
                }
                Deferred::Resume(PendingConfirmation { handler, event }) => {
                    let _ = self.run_handler(handler, event).await;
                }
            }
        })
    }

    fn spawn_busy_timer(self: &Arc<Self>) -> JoinHandle<()> {
        let runtime = Arc::clone(self);
        let delay = self.settings.busy_indicator_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = runtime.inner.lock().await;
            state.guard.busy_timer_elapsed(runtime.page.as_ref());
        })
    }

    fn spawn_hint_clear(self: &Arc<Self>, panel_id: String) -> JoinHandle<()> {
        let page = Arc::clone(&self.page);
        let period = self.settings.user_hint_display_period();
        tokio::spawn(async move {
            tokio::time::sleep(period).await;
            page.set_inner_html(&panel_id, "");
        })
    }

    /// Posts `panel->switchState` for `panel` after `period`, once, if the panel is still shown.
    ///
    /// With `on_user_activity`, a post falling due while the user has been idle past the activity
    /// window is pushed back by another period instead.
    pub async fn schedule_delayed_post(
        self: &Arc<Self>,
        panel: impl Into<String>,
        url: impl Into<String>,
        period: Duration,
        on_user_activity: bool,
    ) {
        let panel = panel.into();
        let delay = period.max(self.settings.delayed_post_min_delay());
        let mut params = self
            .new_params(url)
            .await
            .with_command(ActionParams::panel_command(&panel, "switchState"))
            .with_panels([panel.clone()])
            .auto();
        params.busy = false;

        let mut state = self.inner.lock().await;
        state.session.delayed_generation += 1;
        let generation = state.session.delayed_generation;
        let runtime = Arc::clone(self);
        let task_panel = panel.clone();
        let task = tokio::spawn(async move {
            runtime
                .run_delayed_post(task_panel, params, delay, on_user_activity, generation)
                .await;
        });
        if let Some(previous) = state
            .session
            .delayed_posts
            .insert(panel, DelayedPost { generation, task })
        {
            previous.task.abort();
        }
    }

    async fn run_delayed_post(
        self: Arc<Self>,
        panel: String,
        params: ActionParams,
        delay: Duration,
        on_user_activity: bool,
        generation: u64,
    ) {
        let window = i64::try_from(self.settings.user_activity_window_ms).unwrap_or(i64::MAX);
        loop {
            tokio::time::sleep(delay).await;
            let mut state = self.inner.lock().await;
            if on_user_activity {
                let now = self.clock.now_millis();
                let last = state.session.last_user_activity;
                if last > 0 {
                    if now - last >= window {
                        if self.page.contains(&panel) {
                            debug!(panel = %panel, "dispatch: user idle, postponing delayed post");
                            continue;
                        }
                        Self::forget_delayed(&mut state, &panel, generation);
                        return;
                    }
                } else {
                    state.session.last_user_activity = now;
                }
            }
            Self::forget_delayed(&mut state, &panel, generation);
            drop(state);

            if self.page.contains(&panel) {
                let _ = self.events.send(DispatchEvent::DelayedPostFired {
                    panel: panel.clone(),
                });
                let _ = self.dispatch(params, None).await;
            }
            return;
        }
    }

    fn forget_delayed(state: &mut RuntimeState, panel: &str, generation: u64) {
        if state
            .session
            .delayed_posts
            .get(panel)
            .is_some_and(|delayed| delayed.generation == generation)
        {
            state.session.delayed_posts.remove(panel);
        }
    }

    /// Drops every timer and all session state, as when the page navigates away.
    pub async fn shutdown(&self) {
        let mut state = self.inner.lock().await;
        state.session.abort_timers();
        state.session = SessionState::new(&self.settings);
        state.guard.reset(self.page.as_ref());
        state.confirm.clear();
        info!("dispatch: runtime shut down");
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
