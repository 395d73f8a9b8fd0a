use serde::{Deserialize, Serialize};

/// Lifecycle of one stream activation.
///
/// CLOSED is terminal and reachable from every state. The non-terminal states
/// (everything but STOPPED and CLOSED) are mutually exclusive per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamState {
    Initializing,
    Ready,
    Live,
    Error,
    Stopped,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidState {
    pub from: StreamState,
    pub to: StreamState,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamState::Closed)
    }

    /// States that block another activation of the same device.
    pub fn is_non_terminal(&self) -> bool {
        matches!(
            self,
            StreamState::Initializing | StreamState::Ready | StreamState::Live | StreamState::Error
        )
    }

    pub fn can_transition(self, to: StreamState) -> bool {
        use StreamState::*;
        if to == Closed {
            return true;
        }
        match (self, to) {
            (Initializing, Ready) | (Initializing, Error) | (Initializing, Stopped) => true,
            (Ready, Live) | (Ready, Error) | (Ready, Stopped) => true,
            (Live, Error) | (Live, Stopped) => true,
            (Error, Initializing) | (Error, Stopped) => true,
            (Stopped, Initializing) => true,
            _ => false,
        }
    }

    pub fn transition(&mut self, to: StreamState) -> Result<(), InvalidState> {
        if self.can_transition(to) {
            *self = to;
            Ok(())
        } else {
            Err(InvalidState { from: *self, to })
        }
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StreamState::Initializing => "INITIALIZING",
            StreamState::Ready => "READY",
            StreamState::Live => "LIVE",
            StreamState::Error => "ERROR",
            StreamState::Stopped => "STOPPED",
            StreamState::Closed => "CLOSED",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for StreamState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INITIALIZING" => Ok(StreamState::Initializing),
            "READY" => Ok(StreamState::Ready),
            "LIVE" => Ok(StreamState::Live),
            "ERROR" => Ok(StreamState::Error),
            "STOPPED" => Ok(StreamState::Stopped),
            "CLOSED" => Ok(StreamState::Closed),
            other => Err(format!("unknown stream state: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use StreamState::*;

    const ALL: [StreamState; 6] = [Initializing, Ready, Live, Error, Stopped, Closed];

    #[test]
    fn closed_reachable_from_everywhere() {
        for state in ALL {
            assert!(state.can_transition(Closed), "{state} -> CLOSED");
        }
    }

    #[test]
    fn closed_is_terminal() {
        for to in ALL {
            if to != Closed {
                assert!(!Closed.can_transition(to), "CLOSED -> {to}");
            }
        }
    }

    #[test]
    fn happy_path() {
        let mut state = Initializing;
        state.transition(Ready).unwrap();
        state.transition(Live).unwrap();
        state.transition(Stopped).unwrap();
        state.transition(Initializing).unwrap();
    }

    #[test]
    fn live_cannot_skip_back_to_ready() {
        assert!(!Live.can_transition(Ready));
        assert!(!Live.can_transition(Initializing));
    }

    #[test]
    fn error_recovery_arrows() {
        assert!(Error.can_transition(Initializing));
        assert!(Error.can_transition(Stopped));
        assert!(!Error.can_transition(Live));
        assert!(!Error.can_transition(Ready));
    }

    #[test]
    fn rejected_transition_reports_pair() {
        let mut state = Ready;
        let err = state.transition(Initializing).unwrap_err();
        assert_eq!(err.from, Ready);
        assert_eq!(err.to, Initializing);
        assert_eq!(state, Ready, "state unchanged on rejection");
    }

    #[test]
    fn non_terminal_set() {
        assert!(Initializing.is_non_terminal());
        assert!(Ready.is_non_terminal());
        assert!(Live.is_non_terminal());
        assert!(Error.is_non_terminal());
        assert!(!Stopped.is_non_terminal());
        assert!(!Closed.is_non_terminal());
    }

    #[test]
    fn display_parse_round_trip() {
        for state in ALL {
            assert_eq!(state.to_string().parse::<StreamState>().unwrap(), state);
        }
    }
}
