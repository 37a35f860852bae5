// ── CWMP session state machine (§4.5) ──
//
// Pure state transitions; no I/O, no SOAP types. The HTTP handler
// drives this with outcomes it already parsed so the machine itself is
// testable without standing up a listener.

use std::time::Instant;

use fleet_core::model::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Authenticated,
    Active,
    Closing,
    Faulted,
    Closed,
}

impl SessionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub device_id: DeviceId,
    pub cookie: String,
    pub state: SessionState,
    pub in_flight_command_key: Option<String>,
    pub created_at: Instant,
    pub last_activity: Instant,
}

/// A transition attempted from a state that doesn't support it. Carries
/// enough context to fail the in-flight RPC and log, but is never a
/// panic -- a device that races two requests on the same cookie is
/// protocol noise, not a bug.
#[derive(Debug, Clone, thiserror::Error)]
#[error("cannot apply {attempted} to a session in state {from:?}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub attempted: &'static str,
}

impl Session {
    #[must_use]
    pub fn new(device_id: DeviceId, cookie: impl Into<String>) -> Self {
        let now = Instant::now();
        Self { device_id, cookie: cookie.into(), state: SessionState::New, in_flight_command_key: None, created_at: now, last_activity: now }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// `new` -> `authenticated` on a valid Inform, else terminal `closed`.
    pub fn on_inform(&mut self, valid: bool) -> Result<(), InvalidTransition> {
        if self.state != SessionState::New {
            return Err(InvalidTransition { from: self.state, attempted: "on_inform" });
        }
        self.touch();
        self.state = if valid { SessionState::Authenticated } else { SessionState::Closed };
        Ok(())
    }

    /// `authenticated` -> `active` if an RPC is queued, else `closing`.
    pub fn on_inform_response_sent(&mut self, has_queued_rpc: bool) -> Result<(), InvalidTransition> {
        if self.state != SessionState::Authenticated {
            return Err(InvalidTransition { from: self.state, attempted: "on_inform_response_sent" });
        }
        self.touch();
        self.state = if has_queued_rpc { SessionState::Active } else { SessionState::Closing };
        Ok(())
    }

    /// `active` -> `active` (next queued RPC popped) or `closing` (queue
    /// empty) on a well-formed RPC response; `active` -> `faulted` on a
    /// malformed body.
    pub fn on_rpc_response(&mut self, outcome: RpcResponseOutcome) -> Result<(), InvalidTransition> {
        if self.state != SessionState::Active {
            return Err(InvalidTransition { from: self.state, attempted: "on_rpc_response" });
        }
        self.touch();
        self.state = match outcome {
            RpcResponseOutcome::NextQueued => SessionState::Active,
            RpcResponseOutcome::QueueEmpty => SessionState::Closing,
            RpcResponseOutcome::Malformed => SessionState::Faulted,
        };
        Ok(())
    }

    /// `closing` -> `closed` once the empty 204 has been sent;
    /// `faulted` -> `closed` unconditionally (the table's "Always").
    pub fn on_close(&mut self) -> Result<(), InvalidTransition> {
        if !matches!(self.state, SessionState::Closing | SessionState::Faulted) {
            return Err(InvalidTransition { from: self.state, attempted: "on_close" });
        }
        self.touch();
        self.state = SessionState::Closed;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcResponseOutcome {
    NextQueued,
    QueueEmpty,
    Malformed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(DeviceId::legacy_cpe("Acme", "001122", "Router", "SN1"), "cookie-1")
    }

    #[test]
    fn happy_path_walks_new_to_closed() {
        let mut s = session();
        s.on_inform(true).unwrap();
        assert_eq!(s.state, SessionState::Authenticated);
        s.on_inform_response_sent(true).unwrap();
        assert_eq!(s.state, SessionState::Active);
        s.on_rpc_response(RpcResponseOutcome::QueueEmpty).unwrap();
        assert_eq!(s.state, SessionState::Closing);
        s.on_close().unwrap();
        assert_eq!(s.state, SessionState::Closed);
        assert!(s.state.is_terminal());
    }

    #[test]
    fn invalid_inform_closes_immediately() {
        let mut s = session();
        s.on_inform(false).unwrap();
        assert_eq!(s.state, SessionState::Closed);
    }

    #[test]
    fn malformed_rpc_body_faults_then_closes() {
        let mut s = session();
        s.on_inform(true).unwrap();
        s.on_inform_response_sent(true).unwrap();
        s.on_rpc_response(RpcResponseOutcome::Malformed).unwrap();
        assert_eq!(s.state, SessionState::Faulted);
        s.on_close().unwrap();
        assert_eq!(s.state, SessionState::Closed);
    }

    #[test]
    fn cannot_reopen_a_closed_session() {
        let mut s = session();
        s.on_inform(false).unwrap();
        assert!(s.on_inform_response_sent(true).is_err());
    }

    #[test]
    fn active_stays_active_while_more_rpcs_are_queued() {
        let mut s = session();
        s.on_inform(true).unwrap();
        s.on_inform_response_sent(true).unwrap();
        s.on_rpc_response(RpcResponseOutcome::NextQueued).unwrap();
        assert_eq!(s.state, SessionState::Active);
    }
}
