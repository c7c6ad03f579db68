//! Trigger rules decide when a task may run given its upstream states.

use dagline_core::TaskState;
use serde::{Deserialize, Serialize};

/// Per-task policy over upstream outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerRule {
    /// Run only when every upstream succeeded
    #[default]
    AllSuccess,
    /// Run once every upstream finished, whatever the outcome
    AllDone,
    /// Run only when every upstream failed
    AllFailed,
    /// Run as soon as one upstream succeeded
    OneSuccess,
    /// Run as soon as one upstream failed
    OneFailed,
    /// Run when no upstream failed (skipped upstreams are fine)
    NoneFailed,
}

/// Outcome of evaluating a trigger rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Upstreams still pending
    Wait,
    /// Task may run now
    Run,
    /// Task will not run; nothing failed
    Skip,
    /// Task will not run because of an upstream failure
    UpstreamFailed,
}

impl TriggerRule {
    /// Evaluate the rule over the current upstream states.
    ///
    /// A task without upstreams always runs.
    #[must_use]
    pub fn evaluate(self, upstream: &[TaskState]) -> TriggerDecision {
        if upstream.is_empty() {
            return TriggerDecision::Run;
        }

        let all_done = upstream.iter().all(|s| s.is_terminal());
        let successes = upstream.iter().filter(|s| **s == TaskState::Success).count();
        let failures = upstream.iter().filter(|s| s.is_failure()).count();
        let skipped = upstream.iter().filter(|s| **s == TaskState::Skipped).count();

        match self {
            Self::OneSuccess if successes > 0 => return TriggerDecision::Run,
            Self::OneFailed if failures > 0 => return TriggerDecision::Run,
            _ => {}
        }

        if !all_done {
            return TriggerDecision::Wait;
        }

        match self {
            Self::AllSuccess => {
                if failures > 0 {
                    TriggerDecision::UpstreamFailed
                } else if skipped > 0 {
                    TriggerDecision::Skip
                } else {
                    TriggerDecision::Run
                }
            }
            Self::AllDone => TriggerDecision::Run,
            Self::AllFailed => {
                if failures == upstream.len() {
                    TriggerDecision::Run
                } else {
                    TriggerDecision::Skip
                }
            }
            Self::OneSuccess => {
                if failures > 0 {
                    TriggerDecision::UpstreamFailed
                } else {
                    TriggerDecision::Skip
                }
            }
            Self::OneFailed => TriggerDecision::Skip,
            Self::NoneFailed => {
                if failures > 0 {
                    TriggerDecision::UpstreamFailed
                } else {
                    TriggerDecision::Run
                }
            }
        }
    }

    /// Snake-case name as used in configuration
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AllSuccess => "all_success",
            Self::AllDone => "all_done",
            Self::AllFailed => "all_failed",
            Self::OneSuccess => "one_success",
            Self::OneFailed => "one_failed",
            Self::NoneFailed => "none_failed",
        }
    }
}

impl std::fmt::Display for TriggerRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
