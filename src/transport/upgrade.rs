//! Upgrade probe state machine.
//!
//! One [`Probe`] tracks one candidate transport opened next to the primary.
//! The engine connection feeds it [`ProbeInput`]s and executes the returned
//! [`ProbeAction`]; the machine itself performs no I/O.
//!
//! # Transitions
//!
//! | State | Input | Next | Action |
//! |-------|-------|------|--------|
//! | Scheduled | DelayElapsed | Opening | Open |
//! | Opening | TransportOpen | AwaitingPong | SendPing |
//! | AwaitingPong | Packet(pong "probe") | Pausing | PausePrimary |
//! | AwaitingPong | Packet(other) | Failed | Abort |
//! | Pausing | PrimaryPaused | Upgraded | Promote |
//! | Scheduled, Opening, AwaitingPong | OtherUpgrading | Failed | Freeze |
//! | any live | Error, Close, EngineClosed | Failed | Abort |
//!
//! `Failed` and `Upgraded` are terminal and ignore every input.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tracing::{debug, trace};

use crate::error::TransportError;
use crate::protocol::engine::{Packet, PacketType};

use super::TransportName;

// ============================================================================
// Constants
// ============================================================================

/// Head start given to a WebTransport candidate over the other candidates.
pub const WEBTRANSPORT_HEAD_START: Duration = Duration::from_millis(200);

/// Payload of probe ping and pong packets.
const PROBE_PAYLOAD: &str = "probe";

// ============================================================================
// ProbeState
// ============================================================================

/// Probe lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    /// Waiting for a competing candidate's head start to run out.
    Scheduled,
    /// Candidate transport connecting.
    Opening,
    /// Ping sent, waiting for the echo.
    AwaitingPong,
    /// Echo received, waiting for the primary to pause.
    Pausing,
    /// Candidate became primary.
    Upgraded,
    /// Probe abandoned.
    Failed,
}

impl ProbeState {
    /// Returns `true` for `Upgraded` and `Failed`.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Upgraded | Self::Failed)
    }
}

// ============================================================================
// ProbeInput / ProbeAction
// ============================================================================

/// Stimulus fed to a probe.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeInput {
    /// The head start elapsed.
    DelayElapsed,
    /// The candidate transport opened.
    TransportOpen,
    /// The candidate transport received a packet.
    Packet(Packet),
    /// The primary finished pausing.
    PrimaryPaused,
    /// The candidate transport failed.
    Error(TransportError),
    /// The candidate transport closed.
    Close,
    /// The engine connection closed.
    EngineClosed,
    /// Another candidate is upgrading.
    OtherUpgrading(TransportName),
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeAction {
    /// Open the candidate transport.
    Open,
    /// Send `ping "probe"` on the candidate.
    SendPing,
    /// Mark the engine upgrading and pause the primary.
    PausePrimary,
    /// Make the candidate primary and send `upgrade` on it.
    Promote,
    /// Close the candidate and report the failure.
    Abort(TransportError),
    /// Close the candidate silently.
    Freeze,
}

// ============================================================================
// Probe
// ============================================================================

/// Upgrade probe for one candidate transport.
#[derive(Debug, Clone)]
pub struct Probe {
    name: TransportName,
    state: ProbeState,
}

impl Probe {
    /// Creates a probe; `delayed` probes wait for [`ProbeInput::DelayElapsed`].
    #[must_use]
    pub fn new(name: TransportName, delayed: bool) -> Self {
        let state = if delayed {
            ProbeState::Scheduled
        } else {
            ProbeState::Opening
        };
        Self { name, state }
    }

    /// Candidate name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> TransportName {
        self.name
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ProbeState {
        self.state
    }

    /// Returns the action an undelayed probe needs on creation.
    #[must_use]
    pub fn start(&self) -> Option<ProbeAction> {
        (self.state == ProbeState::Opening).then_some(ProbeAction::Open)
    }

    fn fail(&mut self, reason: impl std::fmt::Display) -> Option<ProbeAction> {
        self.state = ProbeState::Failed;
        let error = TransportError::new(format!("probe error: {reason}")).with_context(self.name);
        debug!(transport = %self.name, error = %error, "Probe failed");
        Some(ProbeAction::Abort(error))
    }

    /// Applies one input.
    pub fn transition(&mut self, input: ProbeInput) -> Option<ProbeAction> {
        use ProbeState as S;

        if self.state.is_terminal() {
            trace!(transport = %self.name, ?input, "Input after probe settled");
            return None;
        }

        match (self.state, input) {
            (S::Scheduled, ProbeInput::DelayElapsed) => {
                self.state = S::Opening;
                Some(ProbeAction::Open)
            }

            (S::Opening, ProbeInput::TransportOpen) => {
                debug!(transport = %self.name, "Probe transport open");
                self.state = S::AwaitingPong;
                Some(ProbeAction::SendPing)
            }

            (S::AwaitingPong, ProbeInput::Packet(packet)) => {
                if packet.kind == PacketType::Pong && packet.text() == Some(PROBE_PAYLOAD) {
                    debug!(transport = %self.name, "Probe succeeded");
                    self.state = S::Pausing;
                    Some(ProbeAction::PausePrimary)
                } else {
                    self.fail(format!("unexpected {} packet", packet.kind))
                }
            }

            (S::Pausing, ProbeInput::PrimaryPaused) => {
                self.state = S::Upgraded;
                Some(ProbeAction::Promote)
            }

            (S::Scheduled | S::Opening | S::AwaitingPong, ProbeInput::OtherUpgrading(other))
                if other != self.name =>
            {
                debug!(transport = %self.name, upgrading = %other, "Probe frozen");
                self.state = S::Failed;
                Some(ProbeAction::Freeze)
            }

            (_, ProbeInput::Error(error)) => self.fail(error),
            (_, ProbeInput::Close) => self.fail("transport closed"),
            (_, ProbeInput::EngineClosed) => self.fail("socket closed"),

            (state, input) => {
                trace!(transport = %self.name, ?state, ?input, "Probe input ignored");
                None
            }
        }
    }
}

/// Returns the probe ping packet.
#[must_use]
pub fn probe_ping() -> Packet {
    Packet::with_data(PacketType::Ping, PROBE_PAYLOAD)
}

/// Returns the probe pong packet a server answers with.
#[must_use]
pub fn probe_pong() -> Packet {
    Packet::with_data(PacketType::Pong, PROBE_PAYLOAD)
}

// ============================================================================
// Tests
// ============================================================================
