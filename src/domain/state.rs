use serde::{Deserialize, Serialize};
use std::fmt;

use super::StatusId;
use crate::error::{PostSignalError, Result};

/// Execution state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionState {
    /// Decision produced an order, nothing sent yet
    Pending,
    /// Order request in flight at the exchange
    Submitting,
    /// Exchange accepted the order
    Confirmed,
    /// Last attempt failed transiently, may be retried
    FailedRetryable,
    /// Rejected, or retries exhausted
    FailedPermanent,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Pending => "PENDING",
            ExecutionState::Submitting => "SUBMITTING",
            ExecutionState::Confirmed => "CONFIRMED",
            ExecutionState::FailedRetryable => "FAILED_RETRYABLE",
            ExecutionState::FailedPermanent => "FAILED_PERMANENT",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: ExecutionState) -> bool {
        use ExecutionState::*;

        match (self, target) {
            // From Pending
            (Pending, Submitting) => true,
            (Pending, Confirmed) => true, // Order found at the exchange before any attempt

            // From Submitting
            (Submitting, Confirmed) => true,
            (Submitting, FailedRetryable) => true,
            (Submitting, FailedPermanent) => true,

            // From FailedRetryable
            (FailedRetryable, Submitting) => true, // Retry
            (FailedRetryable, FailedPermanent) => true, // Retries exhausted
            (FailedRetryable, Confirmed) => true, // Earlier attempt found at the exchange

            // Confirmed and FailedPermanent are terminal
            _ => false,
        }
    }

    /// Get valid next states from current state
    pub fn valid_transitions(&self) -> Vec<ExecutionState> {
        use ExecutionState::*;

        match self {
            Pending => vec![Submitting, Confirmed],
            Submitting => vec![Confirmed, FailedRetryable, FailedPermanent],
            FailedRetryable => vec![Submitting, FailedPermanent, Confirmed],
            Confirmed | FailedPermanent => vec![],
        }
    }

    /// Is this a terminal state?
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Confirmed | ExecutionState::FailedPermanent
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for ExecutionState {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(ExecutionState::Pending),
            "SUBMITTING" => Ok(ExecutionState::Submitting),
            "CONFIRMED" => Ok(ExecutionState::Confirmed),
            "FAILED_RETRYABLE" => Ok(ExecutionState::FailedRetryable),
            "FAILED_PERMANENT" => Ok(ExecutionState::FailedPermanent),
            _ => Err(format!("Invalid execution state: {}", s)),
        }
    }
}

/// Attempt and outcome tracking for one status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionRecord {
    pub status_id: StatusId,
    pub attempt_count: u32,
    pub state: ExecutionState,
    pub last_error: Option<String>,
    pub order_id: Option<String>,
}

impl ExecutionRecord {
    pub fn new(status_id: StatusId) -> Self {
        Self {
            status_id,
            attempt_count: 0,
            state: ExecutionState::Pending,
            last_error: None,
            order_id: None,
        }
    }

    fn transition(&mut self, target: ExecutionState) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(PostSignalError::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }
        self.state = target;
        Ok(())
    }

    /// Enter `Submitting`, counting the attempt. Refuses past `max_attempts`.
    pub fn begin_attempt(&mut self, max_attempts: u32) -> Result<u32> {
        if self.attempt_count >= max_attempts {
            return Err(PostSignalError::InvalidStateTransition {
                from: format!("{} (attempt {}/{})", self.state, self.attempt_count, max_attempts),
                to: ExecutionState::Submitting.to_string(),
            });
        }
        self.transition(ExecutionState::Submitting)?;
        self.attempt_count += 1;
        Ok(self.attempt_count)
    }

    pub fn confirm(&mut self, order_id: impl Into<String>) -> Result<()> {
        self.transition(ExecutionState::Confirmed)?;
        self.order_id = Some(order_id.into());
        Ok(())
    }

    pub fn fail_retryable(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(ExecutionState::FailedRetryable)?;
        self.last_error = Some(error.into());
        Ok(())
    }

    pub fn fail_permanent(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(ExecutionState::FailedPermanent)?;
        self.last_error = Some(error.into());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ExecutionRecord {
        ExecutionRecord::new(StatusId::new("100").expect("id"))
    }

    #[test]
    fn test_valid_transitions() {
        use ExecutionState::*;

        assert!(Pending.can_transition_to(Submitting));
        assert!(Pending.can_transition_to(Confirmed));
        assert!(!Pending.can_transition_to(FailedRetryable));
        assert!(Submitting.can_transition_to(FailedRetryable));
        assert!(FailedRetryable.can_transition_to(Submitting));
        assert!(!Confirmed.can_transition_to(Submitting));
        assert!(!FailedPermanent.can_transition_to(Submitting));
    }

    #[test]
    fn test_valid_transitions_matches_can_transition() {
        use ExecutionState::*;
        let all = [Pending, Submitting, Confirmed, FailedRetryable, FailedPermanent];

        for from in all {
            for to in all {
                assert_eq!(
                    from.valid_transitions().contains(&to),
                    from.can_transition_to(to),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_retry_then_confirm() {
        let mut rec = record();
        assert_eq!(rec.begin_attempt(5).unwrap(), 1);
        rec.fail_retryable("timeout").unwrap();
        assert_eq!(rec.begin_attempt(5).unwrap(), 2);
        rec.confirm("order-1").unwrap();

        assert_eq!(rec.state, ExecutionState::Confirmed);
        assert_eq!(rec.attempt_count, 2);
        assert_eq!(rec.order_id.as_deref(), Some("order-1"));
    }

    #[test]
    fn test_confirm_without_attempt() {
        let mut rec = record();
        rec.confirm("found-at-exchange").unwrap();

        assert_eq!(rec.state, ExecutionState::Confirmed);
        assert_eq!(rec.attempt_count, 0);
    }

    #[test]
    fn test_terminal_state_is_immutable() {
        let mut rec = record();
        rec.begin_attempt(3).unwrap();
        rec.fail_permanent("rejected").unwrap();

        assert!(rec.begin_attempt(3).is_err());
        assert!(rec.confirm("late").is_err());
        assert_eq!(rec.state, ExecutionState::FailedPermanent);
        assert_eq!(rec.last_error.as_deref(), Some("rejected"));
    }

    #[test]
    fn test_attempts_are_bounded() {
        let mut rec = record();
        rec.begin_attempt(1).unwrap();
        rec.fail_retryable("timeout").unwrap();
        assert!(rec.begin_attempt(1).is_err());
        assert_eq!(rec.attempt_count, 1);
    }

    #[test]
    fn test_state_round_trips_through_str() {
        for state in [
            ExecutionState::Pending,
            ExecutionState::FailedRetryable,
            ExecutionState::FailedPermanent,
        ] {
            assert_eq!(ExecutionState::try_from(state.as_str()), Ok(state));
        }
    }
}
