//! Per-session lifecycle state machine
//!
//! ```text
//! Intro -> Creating -> ProviderLoading -> Active -> Completed
//!            |
//!            +-- gate denied --> Intro
//! ```
//!
//! A provider failure still lands in `Active` (with the fallback asset).
//! Completion is idempotent.

use crate::entitlements::DenialReason;
use crate::error::{Error, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Intro,
    Creating,
    ProviderLoading,
    Active,
    Completed,
}

#[derive(Debug, Clone)]
pub struct SessionFlow {
    phase: SessionPhase,
    denial: Option<DenialReason>,
}

impl Default for SessionFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFlow {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Intro,
            denial: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Reason for the most recent return to `Intro`
    pub fn denial(&self) -> Option<DenialReason> {
        self.denial
    }

    fn transition(&mut self, from: SessionPhase, to: SessionPhase) -> Result<()> {
        if self.phase != from {
            return Err(Error::Internal(format!(
                "invalid session transition {:?} -> {:?} (currently {:?})",
                from, to, self.phase
            )));
        }
        self.phase = to;
        Ok(())
    }

    pub fn begin(&mut self) -> Result<()> {
        self.denial = None;
        self.transition(SessionPhase::Intro, SessionPhase::Creating)
    }

    pub fn gate_passed(&mut self) -> Result<()> {
        self.transition(SessionPhase::Creating, SessionPhase::ProviderLoading)
    }

    pub fn gate_denied(&mut self, reason: DenialReason) -> Result<()> {
        self.transition(SessionPhase::Creating, SessionPhase::Intro)?;
        self.denial = Some(reason);
        Ok(())
    }

    /// Live conversation or fallback asset, both enter `Active`
    pub fn provider_ready(&mut self) -> Result<()> {
        self.transition(SessionPhase::ProviderLoading, SessionPhase::Active)
    }

    /// Returns true only for the first completion
    pub fn complete(&mut self) -> Result<bool> {
        match self.phase {
            SessionPhase::Completed => Ok(false),
            _ => self.transition(SessionPhase::Active, SessionPhase::Completed).map(|_| true),
        }
    }
}
