use std::str::FromStr;

use crate::models::{OrderStatus, UnknownVariant};

/// How strictly non-terminal orders may move between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusPolicy {
    /// Any non-terminal status may move to any status, backwards included.
    #[default]
    Permissive,
    /// Only later steps of pending → accepted → in_progress → completed, or
    /// cancellation.
    ForwardOnly,
}

impl FromStr for StatusPolicy {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "permissive" => Ok(StatusPolicy::Permissive),
            "forward_only" => Ok(StatusPolicy::ForwardOnly),
            other => Err(UnknownVariant {
                kind: "order status policy",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Cannot update a completed or cancelled order.")]
    Terminal,

    #[error("Cannot move an order from {from} to {to}.")]
    Backwards { from: OrderStatus, to: OrderStatus },
}

fn step(status: OrderStatus) -> u8 {
    match status {
        OrderStatus::Pending => 0,
        OrderStatus::Accepted => 1,
        OrderStatus::InProgress => 2,
        OrderStatus::Completed => 3,
        OrderStatus::Cancelled => 4,
    }
}

/// Decides whether an order currently in `from` may be set to `to`.
///
/// Terminal orders are locked regardless of the target or the policy.
pub fn check_transition(
    policy: StatusPolicy,
    from: OrderStatus,
    to: OrderStatus,
) -> Result<(), TransitionError> {
    if from.is_terminal() {
        return Err(TransitionError::Terminal);
    }

    match policy {
        StatusPolicy::Permissive => Ok(()),
        StatusPolicy::ForwardOnly => {
            if to == OrderStatus::Cancelled || step(to) > step(from) {
                Ok(())
            } else {
                Err(TransitionError::Backwards { from, to })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    #[test]
    fn test_terminal_states_reject_every_target() {
        for policy in [StatusPolicy::Permissive, StatusPolicy::ForwardOnly] {
            for from in [Completed, Cancelled] {
                for to in OrderStatus::ALL {
                    assert_eq!(
                        check_transition(policy, from, to),
                        Err(TransitionError::Terminal),
                        "{:?}: {} -> {}",
                        policy,
                        from,
                        to
                    );
                }
            }
        }
    }

    #[test]
    fn test_terminal_message_is_fixed() {
        assert_eq!(
            TransitionError::Terminal.to_string(),
            "Cannot update a completed or cancelled order."
        );
    }

    #[test]
    fn test_happy_path() {
        for policy in [StatusPolicy::Permissive, StatusPolicy::ForwardOnly] {
            assert!(check_transition(policy, Pending, Accepted).is_ok());
            assert!(check_transition(policy, Accepted, InProgress).is_ok());
            assert!(check_transition(policy, InProgress, Completed).is_ok());
        }
    }

    #[test]
    fn test_cancel_from_any_open_state() {
        for policy in [StatusPolicy::Permissive, StatusPolicy::ForwardOnly] {
            for from in [Pending, Accepted, InProgress] {
                assert!(check_transition(policy, from, Cancelled).is_ok());
            }
        }
    }

    #[test]
    fn test_permissive_allows_going_backwards() {
        assert!(check_transition(StatusPolicy::Permissive, Accepted, Pending).is_ok());
        assert!(check_transition(StatusPolicy::Permissive, InProgress, Accepted).is_ok());
    }

    #[test]
    fn test_forward_only_rejects_going_backwards() {
        assert_eq!(
            check_transition(StatusPolicy::ForwardOnly, Accepted, Pending),
            Err(TransitionError::Backwards {
                from: Accepted,
                to: Pending
            })
        );
        assert_eq!(
            TransitionError::Backwards {
                from: InProgress,
                to: Accepted
            }
            .to_string(),
            "Cannot move an order from in_progress to accepted."
        );
        assert!(check_transition(StatusPolicy::ForwardOnly, Pending, Pending).is_err());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("permissive".parse::<StatusPolicy>().unwrap(), StatusPolicy::Permissive);
        assert_eq!("forward_only".parse::<StatusPolicy>().unwrap(), StatusPolicy::ForwardOnly);
        assert!("strict".parse::<StatusPolicy>().is_err());
    }
}
