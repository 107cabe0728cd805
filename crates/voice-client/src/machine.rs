//! The visible session state and the deferred `Speaking` transition.
//!
//! Control-plane `state` messages and media-plane track events travel on
//! independent channels. A `speaking` state can therefore arrive before the
//! agent's audio track exists; it is held as [`Phase::SpeakingPendingTrack`]
//! and applied when the track attaches.

use voice_protocol::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Steady(SessionState),
    /// `speaking` was requested without a remote track. `shown` is what the
    /// caller sees meanwhile.
    SpeakingPendingTrack { shown: SessionState },
}

/// Pure transition logic. Every method returns the new visible state when,
/// and only when, it changed.
#[derive(Debug, Clone)]
pub struct StateMachine {
    phase: Phase,
    track_attached: bool,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            phase: Phase::Steady(SessionState::Disconnected),
            track_attached: false,
        }
    }
}

impl StateMachine {
    pub fn visible(&self) -> SessionState {
        match self.phase {
            Phase::Steady(state) => state,
            Phase::SpeakingPendingTrack { shown } => shown,
        }
    }

    pub fn is_speaking_deferred(&self) -> bool {
        matches!(self.phase, Phase::SpeakingPendingTrack { .. })
    }

    pub fn request(&mut self, target: SessionState) -> Option<SessionState> {
        let shown = self.visible();
        if target == SessionState::Speaking && !self.track_attached {
            self.phase = Phase::SpeakingPendingTrack { shown };
            return None;
        }
        self.phase = Phase::Steady(target);
        (target != shown).then_some(target)
    }

    pub fn on_track_attached(&mut self) -> Option<SessionState> {
        self.track_attached = true;
        match self.phase {
            Phase::SpeakingPendingTrack { .. } => {
                self.phase = Phase::Steady(SessionState::Speaking);
                Some(SessionState::Speaking)
            }
            Phase::Steady(_) => None,
        }
    }

    /// The remote track went away. A visible `Speaking` falls back to `Idle`
    /// and waits for the next track.
    pub fn on_track_detached(&mut self) -> Option<SessionState> {
        self.track_attached = false;
        match self.phase {
            Phase::Steady(SessionState::Speaking) => {
                self.phase = Phase::SpeakingPendingTrack {
                    shown: SessionState::Idle,
                };
                Some(SessionState::Idle)
            }
            _ => None,
        }
    }

    /// Back to `Disconnected`, dropping any deferred transition.
    pub fn reset(&mut self) -> Option<SessionState> {
        self.request(SessionState::Disconnected)
    }
}
