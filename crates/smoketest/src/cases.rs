//! Scenario implementations driven against a live focus arbiter.
//!
//! Every case spawns a real [`FocusManager`] with scripted services and
//! calls, walks one arbitration flow end to end, and checks the externally
//! observable outcome: notification counts, forced teardowns, grant
//! callbacks and the published focus pair.

use std::{sync::Arc, thread, time::Duration};

use telefocus::{
    CallEventListener, CallFocus, CallState, ConnectionService, FocusCfg, FocusHandle,
    FocusManager,
    test_support::{CallbackTracker, FakeCall, FakeService, RecordingRequester, wait_until},
};
use tracing::info;

use crate::error::{Error, Result};

/// Per-case knobs shared across scenarios.
#[derive(Clone, Copy, Debug)]
pub struct CaseOpts {
    /// Bound for condition waits, in milliseconds.
    pub timeout_ms: u64,
    /// Release deadline installed on the arbiter, in milliseconds.
    pub release_timeout_ms: u64,
}

/// Runnable scenario registry, in execution order for `all`.
pub const CASES: &[(&str, fn(&CaseOpts) -> Result<String>)] = &[
    ("fast-path", fast_path),
    ("handoff", handoff),
    ("handoff-timeout", handoff_timeout),
    ("refocus", refocus),
    ("death", death),
    ("stale-release", stale_release),
];

fn bed(opts: &CaseOpts) -> (FocusHandle, Arc<RecordingRequester>) {
    let requester = RecordingRequester::new();
    let handle = FocusManager::spawn(
        requester.clone(),
        FocusCfg {
            release_timeout_ms: opts.release_timeout_ms,
            ..FocusCfg::default()
        },
    );
    (handle, requester)
}

fn await_condition<F: FnMut() -> bool>(
    opts: &CaseOpts,
    what: &'static str,
    pred: F,
) -> Result<()> {
    if wait_until(opts.timeout_ms, pred) {
        Ok(())
    } else {
        Err(Error::ConditionTimeout {
            what,
            timeout_ms: opts.timeout_ms,
        })
    }
}

fn ensure(ok: bool, what: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(Error::UnexpectedState(what.to_string()))
    }
}

fn focus_call_id(handle: &FocusHandle) -> Option<String> {
    handle.current_focus_call().map(|c| c.id())
}

/// Grant a first service focus and return it with its seeded call.
fn seed(
    opts: &CaseOpts,
    handle: &FocusHandle,
) -> Result<(Arc<FakeService>, Arc<FakeCall>)> {
    let sip = FakeService::new("com.telefocus.sip", "SipConnectionService");
    let call = FakeCall::new("sip-1", &sip, CallState::Active);
    handle.calls_manager_listener().on_call_added(call.clone());
    let tracker = CallbackTracker::new();
    handle.request_focus(call.clone(), Some(tracker.callback()));
    await_condition(opts, "seed focus grant", || tracker.completions().len() == 1)?;
    Ok((sip, call))
}

fn fast_path(opts: &CaseOpts) -> Result<String> {
    let (handle, requester) = bed(opts);
    let listener = handle.calls_manager_listener();

    let sip = FakeService::new("com.telefocus.sip", "SipConnectionService");
    let call = FakeCall::new("sip-1", &sip, CallState::Dialing);
    listener.on_call_added(call.clone());

    let tracker = CallbackTracker::new();
    handle.request_focus(call.clone(), Some(tracker.callback()));
    await_condition(opts, "focus grant", || tracker.completions().len() == 1)?;

    ensure(sip.gained_count() == 1, "service should gain focus exactly once")?;
    ensure(sip.lost_count() == 0, "no focus_lost on the fast path")?;
    ensure(
        focus_call_id(&handle).as_deref() == Some("sip-1"),
        "sip-1 should be the focus call",
    )?;
    ensure(requester.released().is_empty(), "no teardown on the fast path")?;
    Ok("granted inline without a hand-off".into())
}

fn handoff(opts: &CaseOpts) -> Result<String> {
    let (handle, requester) = bed(opts);
    let listener = handle.calls_manager_listener();
    let (sip, _seed_call) = seed(opts, &handle)?;

    let pstn = FakeService::new("com.telefocus.pstn", "PstnConnectionService");
    let call = FakeCall::new("pstn-1", &pstn, CallState::Dialing);
    listener.on_call_added(call.clone());
    let tracker = CallbackTracker::new();
    handle.request_focus(call.clone(), Some(tracker.callback()));

    await_condition(opts, "focus_lost on the holder", || sip.lost_count() == 1)?;
    ensure(
        tracker.completions().is_empty(),
        "grant must wait for the release",
    )?;
    info!("holder acknowledges the release");
    sip.ack_release();

    await_condition(opts, "focus grant after release", || {
        tracker.completions().len() == 1
    })?;
    ensure(pstn.gained_count() == 1, "incoming service should gain focus")?;
    ensure(
        focus_call_id(&handle).as_deref() == Some("pstn-1"),
        "pstn-1 should be the focus call",
    )?;
    ensure(
        requester.released().is_empty(),
        "voluntary release must not trigger a teardown",
    )?;
    Ok("voluntary release promoted the requested service".into())
}

fn handoff_timeout(opts: &CaseOpts) -> Result<String> {
    let (handle, requester) = bed(opts);
    let listener = handle.calls_manager_listener();
    let (sip, _seed_call) = seed(opts, &handle)?;

    let pstn = FakeService::new("com.telefocus.pstn", "PstnConnectionService");
    let call = FakeCall::new("pstn-1", &pstn, CallState::Dialing);
    listener.on_call_added(call.clone());
    let tracker = CallbackTracker::new();
    handle.request_focus(call.clone(), Some(tracker.callback()));
    await_condition(opts, "focus_lost on the holder", || sip.lost_count() == 1)?;

    // Never acknowledge; the deadline must force the hand-off through.
    await_condition(opts, "deadline-forced grant", || {
        tracker.completions().len() == 1
    })?;
    ensure(
        requester.released() == vec![Some(sip.component_id())],
        "stuck holder should be torn down via the calls manager",
    )?;
    ensure(
        focus_call_id(&handle).as_deref() == Some("pstn-1"),
        "pstn-1 should be the focus call",
    )?;
    Ok(format!(
        "silent holder torn down after {} ms",
        opts.release_timeout_ms
    ))
}

fn refocus(opts: &CaseOpts) -> Result<String> {
    let (handle, _requester) = bed(opts);
    let listener = handle.calls_manager_listener();

    let sip = FakeService::new("com.telefocus.sip", "SipConnectionService");
    let ringing = FakeCall::new("sip-ringing", &sip, CallState::Ringing);
    listener.on_call_added(ringing.clone());
    let tracker = CallbackTracker::new();
    handle.request_focus(ringing.clone(), Some(tracker.callback()));
    await_condition(opts, "focus grant", || tracker.completions().len() == 1)?;

    let idle = FakeCall::new("sip-idle", &sip, CallState::New);
    listener.on_call_added(idle.clone());
    thread::sleep(Duration::from_millis(20));
    ensure(
        focus_call_id(&handle).as_deref() == Some("sip-ringing"),
        "an idle call must not steal focus",
    )?;

    ringing.set_state(CallState::Disconnected);
    listener.on_call_state_changed(ringing.clone(), CallState::Ringing, CallState::Disconnected);
    await_condition(opts, "focus cleared after disconnect", || {
        focus_call_id(&handle).is_none()
    })?;

    idle.set_state(CallState::Active);
    listener.on_call_state_changed(idle.clone(), CallState::New, CallState::Active);
    await_condition(opts, "idle call promoted once active", || {
        focus_call_id(&handle).as_deref() == Some("sip-idle")
    })?;

    let mut dump = Vec::new();
    handle.dump(&mut dump)?;
    let transitions = String::from_utf8_lossy(&dump).lines().count().saturating_sub(1);
    ensure(transitions == 3, "history should record every transition")?;
    Ok(format!(
        "focus call tracked state changes; {transitions} transitions in history"
    ))
}

fn death(opts: &CaseOpts) -> Result<String> {
    let (handle, requester) = bed(opts);
    let (sip, _seed_call) = seed(opts, &handle)?;

    sip.report_death();
    await_condition(opts, "focus cleared after death", || {
        handle.current_focus_service().is_none()
    })?;
    ensure(focus_call_id(&handle).is_none(), "no focus call without a service")?;
    ensure(sip.lost_count() == 0, "dead services are not notified")?;
    ensure(requester.released().is_empty(), "death needs no teardown")?;
    Ok("death cleared the focus pair without callbacks into the corpse".into())
}

fn stale_release(opts: &CaseOpts) -> Result<String> {
    let (handle, requester) = bed(opts);
    let listener = handle.calls_manager_listener();
    let (sip, _seed_call) = seed(opts, &handle)?;

    let pstn = FakeService::new("com.telefocus.pstn", "PstnConnectionService");
    let call = FakeCall::new("pstn-1", &pstn, CallState::Dialing);
    listener.on_call_added(call.clone());
    let tracker = CallbackTracker::new();
    handle.request_focus(call.clone(), Some(tracker.callback()));
    await_condition(opts, "focus_lost on the holder", || sip.lost_count() == 1)?;
    sip.ack_release();
    await_condition(opts, "focus grant after release", || {
        tracker.completions().len() == 1
    })?;

    // A duplicate ack from the former holder must change nothing.
    sip.ack_release();
    thread::sleep(Duration::from_millis(30));
    ensure(
        handle.current_focus_service().map(|s| s.component_id())
            == Some(pstn.component_id()),
        "stale ack must not move focus",
    )?;
    ensure(pstn.gained_count() == 1, "stale ack must not re-grant focus")?;
    ensure(
        tracker.completions().len() == 1,
        "stale ack must not re-fire the grant",
    )?;
    ensure(requester.released().is_empty(), "stale ack must not tear down")?;
    Ok("late ack from the former holder was ignored".into())
}
