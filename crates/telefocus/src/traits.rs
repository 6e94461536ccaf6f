//! Boundary interfaces between the focus arbiter and its collaborators.
//!
//! The arbiter consumes [`ConnectionService`], [`CallFocus`] and
//! [`CallsManagerRequester`]; it hands its collaborators the listener
//! interfaces [`ConnectionServiceFocusListener`] and [`CallEventListener`],
//! both implemented internally as thin adapters that enqueue events onto the
//! worker. Collaborator handles are shared by reference and never mutated
//! here.

use std::sync::Arc;

use telefocus_types::{CallState, ComponentId};
use uuid::Uuid;

/// Shared handle to a connection service.
pub type ServiceRef = Arc<dyn ConnectionService>;

/// Shared handle to a call.
pub type CallRef = Arc<dyn CallFocus>;

/// A connection service as seen by the focus arbiter.
///
/// Services are compared by value on [`ConnectionService::component_id`];
/// see [`service_eq`].
pub trait ConnectionService: Send + Sync {
    /// The service now holds focus and may acquire shared call resources.
    fn focus_gained(&self);

    /// The service lost focus and must release shared call resources, then
    /// acknowledge through
    /// [`ConnectionServiceFocusListener::on_connection_service_released`].
    fn focus_lost(&self);

    /// Install the listener the service reports releases and death through.
    fn set_focus_listener(&self, listener: Arc<dyn ConnectionServiceFocusListener>);

    /// Component identity of the hosting service.
    fn component_id(&self) -> ComponentId;
}

/// The slice of a call the focus arbiter cares about.
///
/// Calls are compared by identity (`Arc::ptr_eq`), never by value.
pub trait CallFocus: Send + Sync {
    /// The connection service hosting this call.
    fn connection_service(&self) -> ServiceRef;

    /// Current lifecycle state.
    fn state(&self) -> CallState;

    /// Whether this call may receive focus at all.
    fn is_focusable(&self) -> bool;

    /// Stable identifier used in logs and the focus history.
    fn id(&self) -> String;

    /// Whether the call currently lives on another endpoint. External calls
    /// are invisible to the arbiter.
    fn is_external(&self) -> bool;
}

/// Listener a connection service reports back through once the arbiter has
/// installed it via [`ConnectionService::set_focus_listener`].
pub trait ConnectionServiceFocusListener: Send + Sync {
    /// The service finished releasing shared call resources, usually after a
    /// [`ConnectionService::focus_lost`] notification.
    fn on_connection_service_released(&self, service: ServiceRef);

    /// The service process disconnected.
    fn on_connection_service_death(&self, service: ServiceRef);
}

/// Call lifecycle notifications consumed by the arbiter.
///
/// The arbiter's implementation filters calls that are external at the
/// moment of notification; such calls never reach the worker.
pub trait CallEventListener: Send + Sync {
    /// A call was added to the calls manager.
    fn on_call_added(&self, call: CallRef);

    /// A call was removed from the calls manager.
    fn on_call_removed(&self, call: CallRef);

    /// A tracked call transitioned between lifecycle states.
    fn on_call_state_changed(&self, call: CallRef, old: CallState, new: CallState);

    /// A call moved between this endpoint and another one. Pulling a call in
    /// behaves like an add, pushing it out like a remove.
    fn on_external_call_changed(&self, call: CallRef, is_external: bool);
}

/// Channel back into the calls manager.
pub trait CallsManagerRequester: Send + Sync {
    /// Forcibly tear down a connection service that did not acknowledge a
    /// focus loss in time. `None` when no service holds focus anymore (the
    /// previous holder died mid-hand-off).
    fn release_connection_service(&self, service: Option<ServiceRef>);

    /// Install the listener the calls manager feeds call events through.
    fn set_calls_manager_listener(&self, listener: Arc<dyn CallEventListener>);
}

/// Sink for watchdog anomaly reports.
pub trait AnomalyReporter: Send + Sync {
    /// Record an anomaly under a stable identifier.
    fn report(&self, id: Uuid, message: &str);
}

/// Default reporter that surfaces anomalies through the tracing sink.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAnomalyReporter;

impl AnomalyReporter for TracingAnomalyReporter {
    fn report(&self, id: Uuid, message: &str) {
        tracing::error!(%id, message, "anomaly report");
    }
}

/// Value equality for optional service handles, by component identity.
#[must_use]
pub fn service_eq(a: Option<&ServiceRef>, b: Option<&ServiceRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.component_id() == b.component_id(),
        (None, None) => true,
        _ => false,
    }
}

/// Identity equality for optional call handles.
#[must_use]
pub fn call_eq(a: Option<&CallRef>, b: Option<&CallRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}
