//! UI phase state machine for the step-up flow.
//!
//! Phases are mutually exclusive and the transition function is pure, so the
//! whole flow is testable without rendering anything. Every failure phase
//! keeps at least one exit besides sign-out; only the domain denial is
//! terminal. Async results are applied through an epoch stamp so a response
//! that raced an identity change can never move the machine.

/// Where the UI is in the step-up flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPhase {
    Loading,
    Login { error: Option<String> },
    DomainError,
    MfaCheck,
    MfaEnroll { error: Option<String> },
    MfaRequired,
    MfaError { message: String },
    Authenticated,
}

/// Everything that can move the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    IdentityResolved {
        present: bool,
        domain_allowed: bool,
        second_factor_required: bool,
    },
    ChallengeReady,
    NoRegisteredDevices,
    ChallengeFetchFailed { message: String },
    CeremonySucceeded,
    CeremonyFailed { message: String },
    /// Transport or device-capability failure before the verdict; the
    /// ceremony never reached the gateway.
    CeremonyUnavailable { message: String },
    EnrollSucceeded,
    EnrollFailed { message: String },
    EnrollAnotherDevice,
    Retry,
    ContinueWithoutSecondFactor,
    SignOut,
}

/// Side effects the host must perform after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    FetchChallenge,
    SignOut,
}

/// How the user agent classifies for the second-factor policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentClass {
    Desktop,
    Mobile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

const MOBILE_MARKERS: [&str; 4] = ["Android", "iPhone", "iPad", "Mobile"];

#[must_use]
pub fn classify_user_agent(user_agent: &str) -> AgentClass {
    if MOBILE_MARKERS.iter().any(|m| user_agent.contains(m)) {
        AgentClass::Mobile
    } else {
        AgentClass::Desktop
    }
}

/// Production always requires the second factor. Development skips it for
/// desktop agents only; this asymmetry is deliberate and load-bearing.
#[must_use]
pub fn second_factor_required(environment: Environment, agent: AgentClass) -> bool {
    match environment {
        Environment::Production => true,
        Environment::Development => agent == AgentClass::Mobile,
    }
}

/// Pure transition: `(phase, event) -> (phase, effects)`. Events that do not
/// apply to the current phase leave it untouched.
#[must_use]
pub fn transition(phase: &AuthPhase, event: &AuthEvent) -> (AuthPhase, Vec<Effect>) {
    match (phase, event) {
        (
            _,
            AuthEvent::IdentityResolved {
                present,
                domain_allowed,
                second_factor_required,
            },
        ) => {
            if !present {
                (AuthPhase::Login { error: None }, vec![])
            } else if !domain_allowed {
                (AuthPhase::DomainError, vec![])
            } else if !second_factor_required {
                (AuthPhase::Authenticated, vec![])
            } else {
                (AuthPhase::MfaCheck, vec![Effect::FetchChallenge])
            }
        }

        // Domain denial is terminal: sign-out is the only exit.
        (AuthPhase::DomainError, AuthEvent::SignOut) => {
            (AuthPhase::Login { error: None }, vec![Effect::SignOut])
        }
        (AuthPhase::DomainError, _) => (AuthPhase::DomainError, vec![]),

        (AuthPhase::MfaCheck, AuthEvent::ChallengeReady) => (AuthPhase::MfaRequired, vec![]),
        (AuthPhase::MfaCheck, AuthEvent::NoRegisteredDevices) => {
            (AuthPhase::MfaEnroll { error: None }, vec![])
        }
        (AuthPhase::MfaCheck, AuthEvent::ChallengeFetchFailed { message }) => (
            AuthPhase::MfaError {
                message: message.clone(),
            },
            vec![],
        ),

        (AuthPhase::MfaRequired, AuthEvent::CeremonySucceeded) => (AuthPhase::Authenticated, vec![]),
        // A failed ceremony resets the check and forces sign-out: retrying
        // against a possibly stale identity is worse than logging in again.
        (AuthPhase::MfaRequired, AuthEvent::CeremonyFailed { .. }) => {
            (AuthPhase::MfaCheck, vec![Effect::SignOut])
        }
        // A transport or device fault during the ceremony is not a rejected
        // verification; it lands in the recoverable error phase.
        (AuthPhase::MfaRequired, AuthEvent::CeremonyUnavailable { message }) => (
            AuthPhase::MfaError {
                message: message.clone(),
            },
            vec![],
        ),
        (AuthPhase::MfaRequired, AuthEvent::EnrollAnotherDevice) => {
            (AuthPhase::MfaEnroll { error: None }, vec![])
        }

        (AuthPhase::MfaEnroll { .. }, AuthEvent::EnrollSucceeded) => {
            (AuthPhase::Authenticated, vec![])
        }
        (AuthPhase::MfaEnroll { .. }, AuthEvent::EnrollFailed { message }) => (
            AuthPhase::MfaEnroll {
                error: Some(message.clone()),
            },
            vec![],
        ),

        (AuthPhase::MfaError { .. }, AuthEvent::Retry) => {
            (AuthPhase::MfaCheck, vec![Effect::FetchChallenge])
        }
        // Explicit risk acceptance: a broken device or network must never
        // permanently lock out a domain-allowed user.
        (AuthPhase::MfaError { .. }, AuthEvent::ContinueWithoutSecondFactor) => {
            (AuthPhase::Authenticated, vec![])
        }

        (_, AuthEvent::SignOut) => (AuthPhase::Login { error: None }, vec![Effect::SignOut]),

        (phase, _) => (phase.clone(), vec![]),
    }
}

/// Holds the current phase and an epoch counter that invalidates in-flight
/// fetches when the identity changes under them.
#[derive(Debug)]
pub struct Orchestrator {
    phase: AuthPhase,
    epoch: u64,
    pending_error: Option<String>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: AuthPhase::Loading,
            epoch: 0,
            pending_error: None,
        }
    }

    #[must_use]
    pub fn phase(&self) -> &AuthPhase {
        &self.phase
    }

    /// Stamp for an async operation started now. Pass it back through
    /// [`Self::apply_if_current`] when the result arrives.
    #[must_use]
    pub fn stamp(&self) -> u64 {
        self.epoch
    }

    pub fn apply(&mut self, event: &AuthEvent) -> Vec<Effect> {
        if matches!(event, AuthEvent::IdentityResolved { .. } | AuthEvent::SignOut) {
            self.epoch += 1;
        }

        let (mut next, effects) = transition(&self.phase, event);

        // Hold the failure message only when the transition actually forced
        // the sign-out; a no-op ceremony event must not leave a stale message
        // for an unrelated later login.
        if let AuthEvent::CeremonyFailed { message } = event {
            if effects.contains(&Effect::SignOut) {
                self.pending_error = Some(message.clone());
            }
        }

        // Surface a ceremony failure on the login screen once the forced
        // sign-out lands.
        if let AuthPhase::Login { error: error @ None } = &mut next {
            *error = self.pending_error.take();
        }

        self.phase = next;
        effects
    }

    /// Apply an async result only if no identity change happened since the
    /// stamp was taken. Stale results are dropped without effect.
    pub fn apply_if_current(&mut self, stamp: u64, event: &AuthEvent) -> Option<Vec<Effect>> {
        if stamp != self.epoch {
            return None;
        }
        Some(self.apply(event))
    }
}
