//! Shared identifiers for calls and connection services.
#![warn(missing_docs)]
#![warn(unsafe_op_in_unsafe_fn)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle states a call moves through, from creation to teardown.
///
/// A subset of these states carries *focus priority*: a call in such a state
/// is actively using (or about to use) shared call resources and is therefore
/// eligible to be the focus call of its connection service. See
/// [`CallState::holds_focus_priority`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// The call object exists but no connection attempt has started.
    New,
    /// An outgoing connection is being established.
    Connecting,
    /// Waiting for the user to pick an account to place the call with.
    SelectPhoneAccount,
    /// An outgoing call is dialing the remote party.
    Dialing,
    /// An incoming call is ringing locally.
    Ringing,
    /// An incoming call is being rung on behalf of a screening service.
    SimulatedRinging,
    /// The user answered but media has not been connected yet.
    Answered,
    /// Call audio is routed to a processing service instead of the user.
    AudioProcessing,
    /// The call is connected and live.
    Active,
    /// The call is connected but held.
    OnHold,
    /// Teardown has been requested and is in progress.
    Disconnecting,
    /// The call has ended.
    Disconnected,
    /// The call is being pulled from another endpoint to this one.
    Pulling,
    /// The call was abandoned before it ever connected.
    Aborted,
}

impl CallState {
    /// True when a call in this state is eligible to be the focus call.
    #[must_use]
    pub const fn holds_focus_priority(self) -> bool {
        matches!(
            self,
            Self::Active | Self::Connecting | Self::Dialing | Self::AudioProcessing | Self::Ringing
        )
    }

    /// Canonical upper-snake rendering used in logs and dumps.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Connecting => "CONNECTING",
            Self::SelectPhoneAccount => "SELECT_PHONE_ACCOUNT",
            Self::Dialing => "DIALING",
            Self::Ringing => "RINGING",
            Self::SimulatedRinging => "SIMULATED_RINGING",
            Self::Answered => "ANSWERED",
            Self::AudioProcessing => "AUDIO_PROCESSING",
            Self::Active => "ACTIVE",
            Self::OnHold => "ON_HOLD",
            Self::Disconnecting => "DISCONNECTING",
            Self::Disconnected => "DISCONNECTED",
            Self::Pulling => "PULLING",
            Self::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value identity of a connection-service implementation.
///
/// Two service handles refer to the same connection service exactly when
/// their component identifiers are equal; the focus arbiter never compares
/// services by pointer. The pairing of package and service name mirrors how
/// the platform addresses the hosting component.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentId {
    /// Package hosting the connection service.
    package: String,
    /// Service class within the package.
    service: String,
}

impl ComponentId {
    /// Construct a new identifier from the hosting package and service name.
    #[must_use]
    pub fn new(package: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            service: service.into(),
        }
    }

    /// Package hosting the connection service.
    #[must_use]
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Service class within the package.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_states_match_focus_eligibility() {
        let eligible = [
            CallState::Active,
            CallState::Connecting,
            CallState::Dialing,
            CallState::AudioProcessing,
            CallState::Ringing,
        ];
        for state in eligible {
            assert!(state.holds_focus_priority(), "{state} should hold priority");
        }
        for state in [
            CallState::New,
            CallState::SelectPhoneAccount,
            CallState::SimulatedRinging,
            CallState::Answered,
            CallState::OnHold,
            CallState::Disconnecting,
            CallState::Disconnected,
            CallState::Pulling,
            CallState::Aborted,
        ] {
            assert!(!state.holds_focus_priority(), "{state} should not hold priority");
        }
    }

    #[test]
    fn component_identity_is_value_based() {
        let a = ComponentId::new("com.example.telephony", "SipConnectionService");
        let b = ComponentId::new("com.example.telephony", "SipConnectionService");
        let c = ComponentId::new("com.example.telephony", "PstnConnectionService");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "com.example.telephony/SipConnectionService");
    }
}
