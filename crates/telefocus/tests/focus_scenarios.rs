use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use telefocus::{
    CallEventListener, CallFocus, CallState, ConnectionService, FocusCfg, FocusHandle,
    FocusManager,
    test_support::{CallbackTracker, FakeCall, FakeService, RecordingRequester, wait_until},
};

fn spawn_manager() -> (FocusHandle, Arc<RecordingRequester>) {
    spawn_manager_with(FocusCfg::default())
}

fn spawn_manager_with(cfg: FocusCfg) -> (FocusHandle, Arc<RecordingRequester>) {
    let requester = RecordingRequester::new();
    let handle = FocusManager::spawn(requester.clone(), cfg);
    (handle, requester)
}

/// Seed a focused service with one active call and wait for the grant.
fn seed_focused_service(
    handle: &FocusHandle,
    package: &str,
) -> (Arc<FakeService>, Arc<FakeCall>) {
    let service = FakeService::new(package, "ConnectionService");
    let call = FakeCall::new(&format!("{package}-seed"), &service, CallState::Active);
    let listener = handle.calls_manager_listener();
    listener.on_call_added(call.clone());
    let tracker = CallbackTracker::new();
    handle.request_focus(call.clone(), Some(tracker.callback()));
    assert!(
        wait_until(1000, || tracker.completions().len() == 1),
        "seed focus request should complete"
    );
    (service, call)
}

#[test]
fn same_service_request_completes_inline() {
    let (handle, requester) = spawn_manager();
    let listener = handle.calls_manager_listener();

    let p1 = FakeService::new("com.example.sip", "SipConnectionService");
    let c1 = FakeCall::new("c1", &p1, CallState::Dialing);
    listener.on_call_added(c1.clone());

    let tracker = CallbackTracker::new();
    handle.request_focus(c1.clone(), Some(tracker.callback()));

    assert!(wait_until(1000, || tracker.completions() == vec!["c1".to_string()]));
    assert_eq!(p1.gained_count(), 1);
    assert_eq!(p1.lost_count(), 0);
    assert!(p1.has_listener());
    assert_eq!(
        handle.current_focus_call().map(|c| c.id()),
        Some("c1".to_string())
    );
    assert_eq!(
        handle.current_focus_service().map(|s| s.component_id()),
        Some(p1.component_id())
    );
    // Nothing was pending, so nothing is torn down later.
    thread::sleep(Duration::from_millis(50));
    assert!(requester.released().is_empty());
    assert_eq!(tracker.completions().len(), 1);
}

#[test]
fn cross_service_handoff_waits_for_voluntary_release() {
    let (handle, requester) = spawn_manager();
    let listener = handle.calls_manager_listener();
    let (p1, _c1) = seed_focused_service(&handle, "com.example.sip");

    let p2 = FakeService::new("com.example.pstn", "PstnConnectionService");
    let c2 = FakeCall::new("c2", &p2, CallState::Dialing);
    listener.on_call_added(c2.clone());

    let tracker2 = CallbackTracker::new();
    handle.request_focus(c2.clone(), Some(tracker2.callback()));

    assert!(wait_until(1000, || p1.lost_count() == 1));
    // Hand-off parks on the outgoing service: no grant, focus unchanged.
    thread::sleep(Duration::from_millis(30));
    assert!(tracker2.completions().is_empty());
    assert_eq!(p2.gained_count(), 0);
    assert_eq!(
        handle.current_focus_service().map(|s| s.component_id()),
        Some(p1.component_id())
    );

    p1.ack_release();
    assert!(wait_until(1000, || tracker2.completions() == vec!["c2".to_string()]));
    assert_eq!(p2.gained_count(), 1);
    assert_eq!(
        handle.current_focus_call().map(|c| c.id()),
        Some("c2".to_string())
    );
    assert_eq!(
        handle.current_focus_service().map(|s| s.component_id()),
        Some(p2.component_id())
    );
    // The voluntary release beat the deadline; no forced teardown, and the
    // grant does not fire a second time.
    thread::sleep(Duration::from_millis(50));
    assert!(requester.released().is_empty());
    assert_eq!(tracker2.completions().len(), 1);
}

#[test]
fn release_deadline_forces_teardown() {
    let (handle, requester) = spawn_manager_with(FocusCfg {
        release_timeout_ms: 100,
        ..FocusCfg::default()
    });
    let listener = handle.calls_manager_listener();
    let (p1, _c1) = seed_focused_service(&handle, "com.example.sip");

    let p2 = FakeService::new("com.example.pstn", "PstnConnectionService");
    let c2 = FakeCall::new("c2", &p2, CallState::Dialing);
    listener.on_call_added(c2.clone());

    let tracker2 = CallbackTracker::new();
    handle.request_focus(c2.clone(), Some(tracker2.callback()));
    assert!(wait_until(1000, || p1.lost_count() == 1));

    // Never ack: the deadline tears the holder down and promotes anyway.
    assert!(wait_until(1000, || tracker2.completions() == vec!["c2".to_string()]));
    assert_eq!(requester.released(), vec![Some(p1.component_id())]);
    assert_eq!(p2.gained_count(), 1);
    assert_eq!(
        handle.current_focus_call().map(|c| c.id()),
        Some("c2".to_string())
    );
    // The torn-down service is not re-notified on promotion.
    assert_eq!(p1.gained_count(), 1);
}

#[test]
fn state_change_recomputes_focus_call() {
    let (handle, _requester) = spawn_manager();
    let listener = handle.calls_manager_listener();

    let p1 = FakeService::new("com.example.sip", "SipConnectionService");
    let c1 = FakeCall::new("c1", &p1, CallState::Ringing);
    listener.on_call_added(c1.clone());
    let tracker = CallbackTracker::new();
    handle.request_focus(c1.clone(), Some(tracker.callback()));
    assert!(wait_until(1000, || tracker.completions().len() == 1));

    // A same-service call outside the priority states does not steal focus.
    let c3 = FakeCall::new("c3", &p1, CallState::New);
    listener.on_call_added(c3.clone());
    thread::sleep(Duration::from_millis(30));
    assert_eq!(
        handle.current_focus_call().map(|c| c.id()),
        Some("c1".to_string())
    );

    // The focus call leaving the priority states clears focus entirely.
    c1.set_state(CallState::Disconnected);
    listener.on_call_state_changed(c1.clone(), CallState::Ringing, CallState::Disconnected);
    assert!(wait_until(1000, || handle.current_focus_call().is_none()));

    // Once the idle call enters a priority state it takes over.
    c3.set_state(CallState::Active);
    listener.on_call_state_changed(c3.clone(), CallState::New, CallState::Active);
    assert!(wait_until(1000, || {
        handle.current_focus_call().map(|c| c.id()) == Some("c3".to_string())
    }));
}

#[test]
fn death_of_focused_service_clears_focus() {
    let (handle, requester) = spawn_manager();
    let (p1, _c1) = seed_focused_service(&handle, "com.example.sip");

    p1.report_death();
    assert!(wait_until(1000, || handle.current_focus_service().is_none()));
    assert!(handle.current_focus_call().is_none());
    // A dead service receives no further notifications and no teardown.
    assert_eq!(p1.lost_count(), 0);
    assert!(requester.released().is_empty());
}

#[test]
fn stale_release_from_former_holder_is_ignored() {
    let (handle, requester) = spawn_manager();
    let listener = handle.calls_manager_listener();
    let (p1, _c1) = seed_focused_service(&handle, "com.example.sip");

    let p2 = FakeService::new("com.example.pstn", "PstnConnectionService");
    let c2 = FakeCall::new("c2", &p2, CallState::Dialing);
    listener.on_call_added(c2.clone());
    let tracker2 = CallbackTracker::new();
    handle.request_focus(c2.clone(), Some(tracker2.callback()));
    assert!(wait_until(1000, || p1.lost_count() == 1));
    p1.ack_release();
    assert!(wait_until(1000, || tracker2.completions().len() == 1));

    // A late second ack from the former holder changes nothing.
    p1.ack_release();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(
        handle.current_focus_service().map(|s| s.component_id()),
        Some(p2.component_id())
    );
    assert_eq!(
        handle.current_focus_call().map(|c| c.id()),
        Some("c2".to_string())
    );
    assert_eq!(p2.gained_count(), 1);
    assert!(requester.released().is_empty());
    assert_eq!(tracker2.completions().len(), 1);
}

#[test]
fn death_during_handoff_defers_grant_to_deadline() {
    let (handle, requester) = spawn_manager_with(FocusCfg {
        release_timeout_ms: 300,
        ..FocusCfg::default()
    });
    let listener = handle.calls_manager_listener();
    let (p1, _c1) = seed_focused_service(&handle, "com.example.sip");

    let p2 = FakeService::new("com.example.pstn", "PstnConnectionService");
    let c2 = FakeCall::new("c2", &p2, CallState::Dialing);
    listener.on_call_added(c2.clone());
    let tracker2 = CallbackTracker::new();
    handle.request_focus(c2.clone(), Some(tracker2.callback()));
    assert!(wait_until(1000, || p1.lost_count() == 1));

    // The outgoing service dies before acking. Focus clears but the request
    // stays pending until the release deadline lapses.
    p1.report_death();
    assert!(wait_until(1000, || handle.current_focus_service().is_none()));
    assert!(tracker2.completions().is_empty());

    assert!(wait_until(1000, || tracker2.completions() == vec!["c2".to_string()]));
    // The teardown request went out with focus already vacant.
    assert_eq!(requester.released(), vec![None]);
    assert_eq!(
        handle.current_focus_service().map(|s| s.component_id()),
        Some(p2.component_id())
    );
    assert_eq!(p2.gained_count(), 1);
}

#[test]
fn replacing_request_keeps_original_deadline() {
    let (handle, requester) = spawn_manager_with(FocusCfg {
        release_timeout_ms: 600,
        ..FocusCfg::default()
    });
    let listener = handle.calls_manager_listener();
    let (p1, _c1) = seed_focused_service(&handle, "com.example.sip");

    let p2 = FakeService::new("com.example.pstn", "PstnConnectionService");
    let c2 = FakeCall::new("c2", &p2, CallState::Dialing);
    listener.on_call_added(c2.clone());
    let tracker2 = CallbackTracker::new();
    handle.request_focus(c2.clone(), Some(tracker2.callback()));
    assert!(wait_until(1000, || p1.lost_count() == 1));

    // Partway through the hand-off, a request for a third service replaces
    // the pending target without restarting the deadline.
    thread::sleep(Duration::from_millis(250));
    let p3 = FakeService::new("com.example.voip", "VoipConnectionService");
    let c3 = FakeCall::new("c3", &p3, CallState::Dialing);
    listener.on_call_added(c3.clone());
    let tracker3 = CallbackTracker::new();
    let replaced_at = Instant::now();
    handle.request_focus(c3.clone(), Some(tracker3.callback()));

    assert!(wait_until(1000, || tracker3.completions() == vec!["c3".to_string()]));
    // The original deadline (armed ~250 ms ago) acted on the newer request;
    // a restarted deadline would have taken the full 600 ms from here.
    assert!(replaced_at.elapsed() < Duration::from_millis(580));
    assert_eq!(requester.released(), vec![Some(p1.component_id())]);
    assert_eq!(
        handle.current_focus_call().map(|c| c.id()),
        Some("c3".to_string())
    );
    assert_eq!(p3.gained_count(), 1);
    assert_eq!(p2.gained_count(), 0);
    // The holder was told focus_lost once per hand-off request.
    assert_eq!(p1.lost_count(), 2);
    // The replaced request is abandoned; its grant never fires.
    assert!(tracker2.completions().is_empty());
}

#[test]
fn duplicate_adds_and_unknown_removes_are_noops() {
    let (handle, _requester) = spawn_manager();
    let listener = handle.calls_manager_listener();

    let p1 = FakeService::new("com.example.sip", "SipConnectionService");
    let c1 = FakeCall::new("c1", &p1, CallState::Active);
    listener.on_call_added(c1.clone());
    listener.on_call_added(c1.clone());

    // Removing a call that was never added changes nothing.
    let stray = FakeCall::new("stray", &p1, CallState::Active);
    listener.on_call_removed(stray);

    let tracker = CallbackTracker::new();
    handle.request_focus(c1.clone(), Some(tracker.callback()));
    assert!(wait_until(1000, || tracker.completions().len() == 1));
    assert_eq!(
        handle.current_focus_call().map(|c| c.id()),
        Some("c1".to_string())
    );

    // One remove suffices: the duplicate add was rejected.
    listener.on_call_removed(c1.clone());
    assert!(wait_until(1000, || handle.current_focus_call().is_none()));
}

#[test]
fn external_calls_never_enter_the_registry() {
    let (handle, _requester) = spawn_manager();
    let listener = handle.calls_manager_listener();

    let p1 = FakeService::new("com.example.sip", "SipConnectionService");
    let c1 = FakeCall::new("c1", &p1, CallState::Active);
    c1.set_external(true);
    listener.on_call_added(c1.clone());

    // The service can still win focus, but the external call is untracked
    // and cannot become the focus call.
    let tracker = CallbackTracker::new();
    handle.request_focus(c1.clone(), Some(tracker.callback()));
    assert!(wait_until(1000, || tracker.completions().len() == 1));
    assert!(handle.current_focus_call().is_none());

    // Pulling the call onto this endpoint adds it.
    c1.set_external(false);
    listener.on_external_call_changed(c1.clone(), false);
    assert!(wait_until(1000, || {
        handle.current_focus_call().map(|c| c.id()) == Some("c1".to_string())
    }));

    // Pushing it back out removes it again.
    c1.set_external(true);
    listener.on_external_call_changed(c1.clone(), true);
    assert!(wait_until(1000, || handle.current_focus_call().is_none()));
}

#[test]
fn registry_order_breaks_ties_between_eligible_calls() {
    let (handle, _requester) = spawn_manager();
    let listener = handle.calls_manager_listener();

    let p1 = FakeService::new("com.example.sip", "SipConnectionService");
    let c1 = FakeCall::new("c1", &p1, CallState::Active);
    let c2 = FakeCall::new("c2", &p1, CallState::Active);
    listener.on_call_added(c1.clone());
    listener.on_call_added(c2.clone());

    let tracker = CallbackTracker::new();
    handle.request_focus(c2.clone(), Some(tracker.callback()));
    assert!(wait_until(1000, || tracker.completions().len() == 1));
    // Both calls are eligible; the earlier insertion wins.
    assert_eq!(
        handle.current_focus_call().map(|c| c.id()),
        Some("c1".to_string())
    );

    // A non-focusable first call yields to the next eligible one.
    c1.set_focusable(false);
    listener.on_call_state_changed(c1.clone(), CallState::Active, CallState::Active);
    assert!(wait_until(1000, || {
        handle.current_focus_call().map(|c| c.id()) == Some("c2".to_string())
    }));
}
