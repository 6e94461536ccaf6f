//! Scripted collaborators for focus-arbiter tests.
//! Public, lightweight fakes imported by the test suite and the smoketest.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use telefocus_types::{CallState, ComponentId};
use uuid::Uuid;

use crate::{
    AnomalyReporter, CallEventListener, CallFocus, CallsManagerRequester, ConnectionService,
    ConnectionServiceFocusListener, RequestFocusCallback, ServiceRef,
};

/// Scripted connection service recording every notification it receives.
///
/// The fake never acknowledges a focus loss on its own; tests drive
/// [`FakeService::ack_release`] (or let the release deadline lapse) to model
/// cooperative and stuck services respectively.
pub struct FakeService {
    component: ComponentId,
    gained: AtomicUsize,
    lost: AtomicUsize,
    gain_delay: Mutex<Option<Duration>>,
    listener: Mutex<Option<Arc<dyn ConnectionServiceFocusListener>>>,
    weak: Weak<FakeService>,
}

impl FakeService {
    /// Create a service identified by `package`/`service`.
    pub fn new(package: &str, service: &str) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            component: ComponentId::new(package, service),
            gained: AtomicUsize::new(0),
            lost: AtomicUsize::new(0),
            gain_delay: Mutex::new(None),
            listener: Mutex::new(None),
            weak: weak.clone(),
        })
    }

    /// Times focus_gained has been delivered.
    pub fn gained_count(&self) -> usize {
        self.gained.load(Ordering::SeqCst)
    }

    /// Times focus_lost has been delivered.
    pub fn lost_count(&self) -> usize {
        self.lost.load(Ordering::SeqCst)
    }

    /// Stall the worker inside the next focus_gained deliveries. Used to
    /// provoke the synchronous-read timeout path.
    pub fn set_gain_delay(&self, delay: Duration) {
        *self.gain_delay.lock() = Some(delay);
    }

    /// Whether the arbiter has installed its listener on this service.
    pub fn has_listener(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Acknowledge a focus release through the installed listener.
    pub fn ack_release(&self) {
        let listener = self.listener.lock().clone();
        if let (Some(listener), Some(this)) = (listener, self.weak.upgrade()) {
            listener.on_connection_service_released(this);
        }
    }

    /// Report this service's death through the installed listener.
    pub fn report_death(&self) {
        let listener = self.listener.lock().clone();
        if let (Some(listener), Some(this)) = (listener, self.weak.upgrade()) {
            listener.on_connection_service_death(this);
        }
    }
}

impl ConnectionService for FakeService {
    fn focus_gained(&self) {
        if let Some(delay) = *self.gain_delay.lock() {
            thread::sleep(delay);
        }
        self.gained.fetch_add(1, Ordering::SeqCst);
    }

    fn focus_lost(&self) {
        self.lost.fetch_add(1, Ordering::SeqCst);
    }

    fn set_focus_listener(&self, listener: Arc<dyn ConnectionServiceFocusListener>) {
        *self.listener.lock() = Some(listener);
    }

    fn component_id(&self) -> ComponentId {
        self.component.clone()
    }
}

/// Scripted call with mutable state, focusability and externality.
pub struct FakeCall {
    id: String,
    service: ServiceRef,
    state: Mutex<CallState>,
    focusable: AtomicBool,
    external: AtomicBool,
}

impl FakeCall {
    /// Create a focusable, non-external call hosted by `service`.
    pub fn new(id: &str, service: &Arc<FakeService>, state: CallState) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            service: Arc::clone(service) as ServiceRef,
            state: Mutex::new(state),
            focusable: AtomicBool::new(true),
            external: AtomicBool::new(false),
        })
    }

    /// Mutate the call state. Tests deliver the matching state-changed
    /// notification themselves, as the calls manager would.
    pub fn set_state(&self, state: CallState) {
        *self.state.lock() = state;
    }

    /// Mark the call (non-)focusable.
    pub fn set_focusable(&self, focusable: bool) {
        self.focusable.store(focusable, Ordering::SeqCst);
    }

    /// Mark the call as living on another endpoint.
    pub fn set_external(&self, external: bool) {
        self.external.store(external, Ordering::SeqCst);
    }
}

impl CallFocus for FakeCall {
    fn connection_service(&self) -> ServiceRef {
        Arc::clone(&self.service)
    }

    fn state(&self) -> CallState {
        *self.state.lock()
    }

    fn is_focusable(&self) -> bool {
        self.focusable.load(Ordering::SeqCst)
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    fn is_external(&self) -> bool {
        self.external.load(Ordering::SeqCst)
    }
}

/// Calls-manager stub recording forced releases and the installed listener.
#[derive(Default)]
pub struct RecordingRequester {
    listener: Mutex<Option<Arc<dyn CallEventListener>>>,
    released: Mutex<Vec<Option<ComponentId>>>,
}

impl RecordingRequester {
    /// Create an empty requester.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Listener the arbiter installed at spawn.
    pub fn listener(&self) -> Arc<dyn CallEventListener> {
        self.listener
            .lock()
            .clone()
            .expect("arbiter installs the calls-manager listener at spawn")
    }

    /// Component ids of forcibly released services, in order. `None` records
    /// a teardown request while focus was already vacant.
    pub fn released(&self) -> Vec<Option<ComponentId>> {
        self.released.lock().clone()
    }
}

impl CallsManagerRequester for RecordingRequester {
    fn release_connection_service(&self, service: Option<ServiceRef>) {
        self.released
            .lock()
            .push(service.map(|s| s.component_id()));
    }

    fn set_calls_manager_listener(&self, listener: Arc<dyn CallEventListener>) {
        *self.listener.lock() = Some(listener);
    }
}

/// Records focus-request completions by call id.
#[derive(Default)]
pub struct CallbackTracker {
    completions: Mutex<Vec<String>>,
}

impl CallbackTracker {
    /// Create an empty tracker.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Callback pushing the completed call's id into this tracker.
    pub fn callback(self: &Arc<Self>) -> RequestFocusCallback {
        let tracker = Arc::clone(self);
        Box::new(move |call| tracker.completions.lock().push(call.id()))
    }

    /// Recorded completions, in order.
    pub fn completions(&self) -> Vec<String> {
        self.completions.lock().clone()
    }
}

/// Captures anomaly reports for assertions.
#[derive(Default)]
pub struct RecordingAnomalyReporter {
    reports: Mutex<Vec<(Uuid, String)>>,
}

impl RecordingAnomalyReporter {
    /// Create an empty reporter.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reports captured so far.
    pub fn reports(&self) -> Vec<(Uuid, String)> {
        self.reports.lock().clone()
    }
}

impl AnomalyReporter for RecordingAnomalyReporter {
    fn report(&self, id: Uuid, message: &str) {
        self.reports.lock().push((id, message.to_string()));
    }
}

/// Poll `pred` until it holds or `timeout_ms` elapses; returns the final
/// verdict.
pub fn wait_until<F: FnMut() -> bool>(timeout_ms: u64, mut pred: F) -> bool {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if pred() {
            return true;
        }
        if Instant::now() >= deadline {
            return pred();
        }
        thread::sleep(Duration::from_millis(2));
    }
}
