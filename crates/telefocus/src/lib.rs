//! telefocus: connection-service focus arbitration.
//!
//! Single source of truth for which connection service may use shared call
//! resources (camera, audio) and which of its calls is primary.
//!
//! Arbitration rules:
//! - At most one service holds focus; within it, at most one call is the
//!   focus call. The focus call must be tracked, focusable, owned by the
//!   focused service, and in a state that holds focus priority.
//! - Hand-offs are two-step: the holder is told it lost focus and is
//!   expected to acknowledge once it released call resources. A holder that
//!   stays silent past the release timeout is forcibly torn down through the
//!   calls manager and the requested service takes over regardless.
//! - The latest focus request wins. A request arriving mid-hand-off replaces
//!   the pending target; the running release deadline is left untouched and
//!   acts on the newer target when it lapses.
//!
//! Threading model:
//! - A dedicated worker thread (`connsvc-focus`) owns every piece of focus
//!   state and processes events strictly in enqueue order. Producers on any
//!   thread only enqueue.
//! - [`FocusHandle::current_focus_call`] is safe from any thread: on the
//!   worker it reads directly, elsewhere it round-trips a query through the
//!   queue with a bounded wait and degrades to the last published value.
//!
//! # Stable API Surface
//! - [`FocusManager`] and [`FocusHandle`] for constructing and querying the
//!   arbiter.
//! - The collaborator traits: [`ConnectionService`], [`CallFocus`],
//!   [`CallsManagerRequester`] and [`AnomalyReporter`] consumed by the core,
//!   [`ConnectionServiceFocusListener`] and [`CallEventListener`] exposed to
//!   collaborators.
//! - [`FocusCfg`] for the tunables.
//!
//! # Test Utilities
//! Enable the `test-utils` feature to pull in [`test_support`] with scripted
//! services, calls and requesters for integration tests.
#![warn(missing_docs)]
#![warn(unsafe_op_in_unsafe_fn)]

use std::{
    io,
    pin::Pin,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc::{RecvTimeoutError, SyncSender, sync_channel},
    },
    thread::{self, ThreadId},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{
    sync::mpsc,
    time::{Instant as TokioInstant, Sleep, sleep},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

mod history;
mod traits;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

use history::{FocusHistory, NO_FOCUS_CALL};
pub use telefocus_types::{CallState, ComponentId};
pub use traits::{
    AnomalyReporter, CallEventListener, CallFocus, CallRef, CallsManagerRequester,
    ConnectionService, ConnectionServiceFocusListener, ServiceRef, TracingAnomalyReporter,
    call_eq, service_eq,
};

/// Anomaly id reported when a synchronous focus read times out.
pub const WATCHDOG_GET_CALL_FOCUS_TIMEOUT_ID: Uuid =
    Uuid::from_u128(0xedd7334a_ef87_432b_a1d0_a2f23959c73e);

/// Message accompanying the sync-read watchdog anomaly.
pub const WATCHDOG_GET_CALL_FOCUS_TIMEOUT_MSG: &str =
    "call focus watchdog detected a timeout while reading the focus call";

/// Where the release deadline parks while no hand-off is in flight.
const DEADLINE_PARK: Duration = Duration::from_secs(3600);

/// Configuration for the focus arbiter.
#[derive(Clone, Debug)]
pub struct FocusCfg {
    /// How long a service may sit on a focus-lost notification before the
    /// calls manager is asked to tear it down, in milliseconds.
    pub release_timeout_ms: u64,
    /// Bounded wait for the off-thread synchronous focus-call read, in
    /// milliseconds.
    pub sync_read_timeout_ms: u64,
    /// Number of focus transitions retained for [`FocusHandle::dump`].
    pub history_capacity: usize,
    /// When set, a timed-out synchronous read dumps worker state and files
    /// an anomaly report in addition to the warning log.
    pub anomaly_report_on_focus_timeout: bool,
}

impl Default for FocusCfg {
    fn default() -> Self {
        Self {
            release_timeout_ms: 5000,
            sync_read_timeout_ms: 1000,
            history_capacity: 20,
            anomaly_report_on_focus_timeout: false,
        }
    }
}

/// Callback invoked on the worker once a focus request has been processed.
pub type RequestFocusCallback = Box<dyn FnOnce(CallRef) + Send + 'static>;

/// A focus request in flight: the call to promote and its completion
/// callback.
struct FocusRequest {
    call: CallRef,
    callback: Option<RequestFocusCallback>,
}

impl FocusRequest {
    fn complete(self) {
        if let Some(callback) = self.callback {
            callback(self.call);
        }
    }
}

enum Command {
    RequestFocus(FocusRequest),
    ReleaseConnectionFocus(ServiceRef),
    ConnectionServiceDeath(ServiceRef),
    AddCall(CallRef),
    RemoveCall(CallRef),
    CallStateChanged {
        call: CallRef,
        old: CallState,
        new: CallState,
    },
    /// Rendezvous read of the focus call, answered from the worker.
    CurrentFocusCall {
        respond: SyncSender<Option<CallRef>>,
    },
}

/// State shared between the worker and handles: published snapshots for the
/// degraded read paths, the history ring, and worker diagnostics.
struct Shared {
    cfg: FocusCfg,
    /// Last focus call published by the worker.
    focus_call: Mutex<Option<CallRef>>,
    /// Last focused service published by the worker.
    focus_service: Mutex<Option<ServiceRef>>,
    history: Mutex<FocusHistory>,
    /// Commands enqueued but not yet processed.
    queue_depth: AtomicUsize,
    deadline_armed: AtomicBool,
    pending_set: AtomicBool,
    worker: OnceLock<ThreadId>,
    anomaly: Arc<dyn AnomalyReporter>,
}

/// Cheap, clonable handle to the focus arbiter.
#[derive(Clone)]
pub struct FocusHandle {
    tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl FocusHandle {
    fn send(&self, cmd: Command) {
        self.shared.queue_depth.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(cmd).is_err() {
            self.shared.queue_depth.fetch_sub(1, Ordering::Relaxed);
            warn!("focus worker gone; dropping event");
        }
    }

    /// Request focus for `call`. The callback fires on the worker once the
    /// request has been fully processed, which may be after a hand-off
    /// completes or its release deadline lapses.
    pub fn request_focus(&self, call: CallRef, callback: Option<RequestFocusCallback>) {
        self.send(Command::RequestFocus(FocusRequest { call, callback }));
    }

    /// Current focus call.
    ///
    /// On the worker thread this reads directly. From any other thread the
    /// read round-trips through the event queue so it observes a fully
    /// processed state; if the worker does not answer within the configured
    /// bound, the last published value is returned instead and, when
    /// [`FocusCfg::anomaly_report_on_focus_timeout`] is set, worker state is
    /// dumped and a watchdog anomaly filed.
    pub fn current_focus_call(&self) -> Option<CallRef> {
        if self
            .shared
            .worker
            .get()
            .is_some_and(|id| *id == thread::current().id())
        {
            return self.shared.focus_call.lock().clone();
        }
        let (respond, rx) = sync_channel(1);
        self.send(Command::CurrentFocusCall { respond });
        match rx.recv_timeout(Duration::from_millis(self.shared.cfg.sync_read_timeout_ms)) {
            Ok(value) => value,
            Err(RecvTimeoutError::Timeout) => {
                let cached = self.shared.focus_call.lock().clone();
                warn!(
                    call = ?cached.as_ref().map(|c| c.id()),
                    "timed out waiting for synchronous current focus; returning possibly \
                     inaccurate result"
                );
                if self.shared.cfg.anomaly_report_on_focus_timeout {
                    self.dump_worker_state();
                    self.shared.anomaly.report(
                        WATCHDOG_GET_CALL_FOCUS_TIMEOUT_ID,
                        WATCHDOG_GET_CALL_FOCUS_TIMEOUT_MSG,
                    );
                }
                cached
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!(
                    "focus worker gone while waiting for synchronous current focus; returning \
                     possibly inaccurate result"
                );
                self.shared.focus_call.lock().clone()
            }
        }
    }

    /// Currently focused connection service, read without synchronizing
    /// against the worker. Off-thread callers may observe a value that is a
    /// few events stale.
    pub fn current_focus_service(&self) -> Option<ServiceRef> {
        self.shared.focus_service.lock().clone()
    }

    /// Write the focus-call transition history to `w`.
    pub fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        writeln!(w, "Call Focus History:")?;
        self.shared.history.lock().dump(w)
    }

    /// Listener to hand to the calls manager. Calls that are external at
    /// notification time are dropped here and never reach the worker.
    #[must_use]
    pub fn calls_manager_listener(&self) -> Arc<dyn CallEventListener> {
        Arc::new(CallEventAdapter {
            handle: self.clone(),
        })
    }

    /// Listener installed on services as they gain focus. Exposed so tests
    /// and out-of-band integrations can feed release/death events directly.
    #[must_use]
    pub fn focus_listener(&self) -> Arc<dyn ConnectionServiceFocusListener> {
        Arc::new(FocusEventAdapter {
            handle: self.clone(),
        })
    }

    fn dump_worker_state(&self) {
        info!(
            queued = self.shared.queue_depth.load(Ordering::Relaxed),
            pending_request = self.shared.pending_set.load(Ordering::Relaxed),
            deadline_armed = self.shared.deadline_armed.load(Ordering::Relaxed),
            "focus worker state"
        );
    }
}

/// Translates calls-manager notifications into queued events.
struct CallEventAdapter {
    handle: FocusHandle,
}

impl CallEventListener for CallEventAdapter {
    fn on_call_added(&self, call: CallRef) {
        if call.is_external() {
            return;
        }
        self.handle.send(Command::AddCall(call));
    }

    fn on_call_removed(&self, call: CallRef) {
        if call.is_external() {
            return;
        }
        self.handle.send(Command::RemoveCall(call));
    }

    fn on_call_state_changed(&self, call: CallRef, old: CallState, new: CallState) {
        if call.is_external() {
            return;
        }
        self.handle.send(Command::CallStateChanged { call, old, new });
    }

    fn on_external_call_changed(&self, call: CallRef, is_external: bool) {
        if is_external {
            self.handle.send(Command::RemoveCall(call));
        } else {
            self.handle.send(Command::AddCall(call));
        }
    }
}

/// Translates service release/death notifications into queued events.
struct FocusEventAdapter {
    handle: FocusHandle,
}

impl ConnectionServiceFocusListener for FocusEventAdapter {
    fn on_connection_service_released(&self, service: ServiceRef) {
        self.handle.send(Command::ReleaseConnectionFocus(service));
    }

    fn on_connection_service_death(&self, service: ServiceRef) {
        self.handle.send(Command::ConnectionServiceDeath(service));
    }
}

/// Focus arbiter constructor. Spawns the worker and returns a handle.
pub struct FocusManager;

impl FocusManager {
    /// Start the arbiter with the default tracing-backed anomaly reporter.
    ///
    /// Installs the calls-manager listener on `requester` before returning,
    /// so no call event can slip past the arbiter.
    pub fn spawn(requester: Arc<dyn CallsManagerRequester>, cfg: FocusCfg) -> FocusHandle {
        Self::spawn_with_reporter(requester, cfg, Arc::new(TracingAnomalyReporter))
    }

    /// Start the arbiter with an explicit anomaly reporter.
    pub fn spawn_with_reporter(
        requester: Arc<dyn CallsManagerRequester>,
        cfg: FocusCfg,
        anomaly: Arc<dyn AnomalyReporter>,
    ) -> FocusHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            focus_call: Mutex::new(None),
            focus_service: Mutex::new(None),
            history: Mutex::new(FocusHistory::new(cfg.history_capacity)),
            queue_depth: AtomicUsize::new(0),
            deadline_armed: AtomicBool::new(false),
            pending_set: AtomicBool::new(false),
            worker: OnceLock::new(),
            anomaly,
            cfg,
        });
        let handle = FocusHandle {
            tx,
            shared: Arc::clone(&shared),
        };
        requester.set_calls_manager_listener(handle.calls_manager_listener());

        let state = FocusState {
            calls: Vec::new(),
            current_service: None,
            current_focus_call: None,
            pending: None,
            requester,
            listener: handle.focus_listener(),
            shared: Arc::clone(&shared),
        };
        let spawned = thread::Builder::new()
            .name("connsvc-focus".into())
            .spawn(move || {
                let _ = shared.worker.set(thread::current().id());
                match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(rt) => rt.block_on(run_worker(rx, state)),
                    Err(e) => warn!("failed to build focus worker runtime: {e}"),
                }
            });
        if let Err(e) = spawned {
            warn!("failed to spawn focus worker thread: {e}");
        }
        handle
    }
}

/// Worker-owned focus state: the call registry, the focus pair and the
/// pending hand-off.
struct FocusState {
    /// Tracked calls in insertion order; earlier entries win ties.
    calls: Vec<CallRef>,
    current_service: Option<ServiceRef>,
    current_focus_call: Option<CallRef>,
    pending: Option<FocusRequest>,
    requester: Arc<dyn CallsManagerRequester>,
    listener: Arc<dyn ConnectionServiceFocusListener>,
    shared: Arc<Shared>,
}

async fn run_worker(mut rx: mpsc::UnboundedReceiver<Command>, mut state: FocusState) {
    let release_timeout = Duration::from_millis(state.shared.cfg.release_timeout_ms);

    // Single scheduled-wakeup slot: parked far out while no hand-off is in
    // flight, reset to the release deadline when one is.
    let deadline = sleep(DEADLINE_PARK);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            // Queued events outrank the deadline: a release enqueued before
            // the timeout lapses must cancel it.
            biased;
            maybe_cmd = rx.recv() => {
                let Some(cmd) = maybe_cmd else { break };
                state.shared.queue_depth.fetch_sub(1, Ordering::Relaxed);
                match cmd {
                    Command::RequestFocus(request) => {
                        state.handle_request_focus(request, deadline.as_mut(), release_timeout);
                    }
                    Command::ReleaseConnectionFocus(service) => {
                        state.handle_released_focus(service, deadline.as_mut());
                    }
                    Command::ConnectionServiceDeath(service) => {
                        state.handle_connection_service_death(service);
                    }
                    Command::AddCall(call) => state.handle_added_call(call),
                    Command::RemoveCall(call) => state.handle_removed_call(call),
                    Command::CallStateChanged { call, old, new } => {
                        state.handle_call_state_changed(call, old, new);
                    }
                    Command::CurrentFocusCall { respond } => {
                        let _ = respond.try_send(state.current_focus_call.clone());
                    }
                }
            }
            _ = &mut deadline => {
                state.handle_release_timeout(deadline.as_mut());
            }
        }
    }
}

impl FocusState {
    fn handle_request_focus(
        &mut self,
        request: FocusRequest,
        deadline: Pin<&mut Sleep>,
        release_timeout: Duration,
    ) {
        info!(call = %request.call.id(), "handle_request_focus");
        let requested = request.call.connection_service();
        if self.current_service.is_none()
            || service_eq(self.current_service.as_ref(), Some(&requested))
        {
            self.update_connection_service(Some(requested));
            self.update_current_focus_call();
            request.complete();
        } else {
            if let Some(service) = &self.current_service {
                service.focus_lost();
            }
            if self.pending.is_none() {
                self.arm_deadline(deadline, release_timeout);
            } else {
                // Latest request wins, but the running deadline is kept: it
                // will act on whatever request is pending when it lapses.
                debug!("replacing pending focus request; release deadline unchanged");
            }
            self.set_pending(request);
        }
    }

    fn handle_released_focus(&mut self, service: ServiceRef, deadline: Pin<&mut Sleep>) {
        debug!(service = %service.component_id(), "handle_released_focus");
        // Services may ack long after losing focus; stale acks change nothing.
        if !service_eq(self.current_service.as_ref(), Some(&service)) {
            return;
        }
        self.park_deadline(deadline);
        let next = self
            .pending
            .as_ref()
            .map(|request| request.call.connection_service());
        self.update_connection_service(next);
        self.update_current_focus_call();
        if let Some(request) = self.take_pending() {
            request.complete();
        }
    }

    fn handle_release_timeout(&mut self, deadline: Pin<&mut Sleep>) {
        self.park_deadline(deadline);
        let Some(request) = self.take_pending() else {
            return;
        };
        debug!(call = %request.call.id(), "handle_release_timeout");
        // The holder never acked; have the calls manager tear it down. It
        // already received focus_lost and is presumed unhealthy, so the
        // incoming service is promoted without further notice to it.
        self.requester
            .release_connection_service(self.current_service.clone());
        self.update_connection_service(Some(request.call.connection_service()));
        self.update_current_focus_call();
        request.complete();
    }

    fn handle_connection_service_death(&mut self, service: ServiceRef) {
        debug!(service = %service.component_id(), "handle_connection_service_death");
        if service_eq(self.current_service.as_ref(), Some(&service)) {
            self.update_connection_service(None);
            self.update_current_focus_call();
        }
    }

    fn handle_added_call(&mut self, call: CallRef) {
        debug!(call = %call.id(), "handle_added_call");
        if !self.calls.iter().any(|c| Arc::ptr_eq(c, &call)) {
            self.calls.push(Arc::clone(&call));
        }
        let owner = call.connection_service();
        if service_eq(self.current_service.as_ref(), Some(&owner)) {
            self.update_current_focus_call();
        }
    }

    fn handle_removed_call(&mut self, call: CallRef) {
        debug!(call = %call.id(), "handle_removed_call");
        if let Some(idx) = self.calls.iter().position(|c| Arc::ptr_eq(c, &call)) {
            self.calls.remove(idx);
        }
        if call_eq(self.current_focus_call.as_ref(), Some(&call)) {
            self.update_current_focus_call();
        }
    }

    fn handle_call_state_changed(&mut self, call: CallRef, old: CallState, new: CallState) {
        debug!(call = %call.id(), %old, %new, "handle_call_state_changed");
        let owner = call.connection_service();
        if self.calls.iter().any(|c| Arc::ptr_eq(c, &call))
            && service_eq(self.current_service.as_ref(), Some(&owner))
        {
            self.update_current_focus_call();
        }
    }

    /// Move focus to `next` if it differs from the holder. The incoming
    /// service gets the listener and a focus_gained; the outgoing one was
    /// told focus_lost earlier in the hand-off (or died) and is not
    /// re-notified here.
    fn update_connection_service(&mut self, next: Option<ServiceRef>) {
        if service_eq(self.current_service.as_ref(), next.as_ref()) {
            return;
        }
        match &next {
            Some(service) => {
                info!(service = %service.component_id(), "update_connection_service");
                service.set_focus_listener(Arc::clone(&self.listener));
                service.focus_gained();
            }
            None => info!("update_connection_service: cleared"),
        }
        self.current_service = next;
        *self.shared.focus_service.lock() = self.current_service.clone();
    }

    /// Recompute the focus call from the registry: the first focusable call
    /// of the focused service whose state holds focus priority wins, in
    /// insertion order.
    fn update_current_focus_call(&mut self) {
        let previous = self.current_focus_call.take();
        let Some(service) = self.current_service.clone() else {
            info!("update_current_focus_call: no service holds focus");
            self.publish_focus_call();
            return;
        };
        for call in &self.calls {
            let owner = call.connection_service();
            if !service_eq(Some(&service), Some(&owner)) || !call.is_focusable() {
                continue;
            }
            if call.state().holds_focus_priority() {
                self.current_focus_call = Some(Arc::clone(call));
                if !call_eq(previous.as_ref(), Some(call)) {
                    self.shared.history.lock().record(call.id());
                }
                info!(call = %call.id(), "update_current_focus_call");
                self.publish_focus_call();
                return;
            }
        }
        if previous.is_some() {
            self.shared.history.lock().record(NO_FOCUS_CALL.to_string());
        }
        info!("update_current_focus_call: none");
        self.publish_focus_call();
    }

    fn publish_focus_call(&self) {
        *self.shared.focus_call.lock() = self.current_focus_call.clone();
    }

    fn set_pending(&mut self, request: FocusRequest) {
        self.pending = Some(request);
        self.shared.pending_set.store(true, Ordering::Relaxed);
    }

    fn take_pending(&mut self) -> Option<FocusRequest> {
        self.shared.pending_set.store(false, Ordering::Relaxed);
        self.pending.take()
    }

    fn arm_deadline(&self, mut deadline: Pin<&mut Sleep>, release_timeout: Duration) {
        deadline.as_mut().reset(TokioInstant::now() + release_timeout);
        self.shared.deadline_armed.store(true, Ordering::Relaxed);
    }

    fn park_deadline(&self, mut deadline: Pin<&mut Sleep>) {
        deadline.as_mut().reset(TokioInstant::now() + DEADLINE_PARK);
        self.shared.deadline_armed.store(false, Ordering::Relaxed);
    }
}
