//! Task lifecycle state machine.
//!
//! Owns the legal edge set between [`TaskState`]s. Every status change in the
//! stores goes through [`TaskStateMachine::apply`], so a rejected transition
//! never leaves a partially updated task behind.

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Task, TaskState, TaskStatus};

/// Why a requested state change was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    /// The edge is not in the lifecycle graph.
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition {
        /// Current state.
        from: TaskState,
        /// Requested state.
        to: TaskState,
    },

    /// The task already finished; nothing may change its state.
    #[error("task is already terminal ({state})")]
    TaskAlreadyTerminal {
        /// The terminal state the task is in.
        state: TaskState,
    },
}

/// Stateless validator and applier for task transitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Returns true if `from → to` is a legal edge.
    #[must_use]
    #[allow(clippy::match_same_arms)] // One arm per source state reads as the edge table
    pub const fn can_transition(from: TaskState, to: TaskState) -> bool {
        use crate::models::TaskState::{
            AuthRequired, Canceled, Completed, Failed, InputRequired, Rejected, Submitted,
            Unknown, Working,
        };
        match (from, to) {
            (Submitted, Working | Canceled | Rejected) => true,
            (Working, InputRequired | Completed | Failed | Canceled | AuthRequired) => true,
            (InputRequired, Working | Canceled) => true,
            (AuthRequired, Working | Canceled | Failed) => true,
            (Unknown, Working | Canceled | Failed) => true,
            _ => false,
        }
    }

    /// Checks a transition without applying it.
    ///
    /// # Errors
    /// * `TransitionError::TaskAlreadyTerminal` - If `from` is terminal
    /// * `TransitionError::IllegalTransition` - If the edge is not legal
    pub fn validate(from: TaskState, to: TaskState) -> Result<(), TransitionError> {
        if from.is_terminal() {
            return Err(TransitionError::TaskAlreadyTerminal { state: from });
        }
        if !Self::can_transition(from, to) {
            return Err(TransitionError::IllegalTransition { from, to });
        }
        Ok(())
    }

    /// Moves the task to `to`, recording the message and timestamps.
    ///
    /// `started_at` is set the first time the task enters `working`;
    /// `completed_at` when it reaches a terminal state. On error the task is
    /// left untouched.
    ///
    /// # Errors
    /// Same as [`TaskStateMachine::validate`].
    pub fn apply(task: &mut Task, to: TaskState, message: Option<String>) -> Result<(), TransitionError> {
        let from = task.state();
        if let Err(err) = Self::validate(from, to) {
            warn!(task_id = %task.id, from = %from, to = %to, "Rejected task transition");
            return Err(err);
        }

        let now = Utc::now();
        task.status = TaskStatus { state: to, message, timestamp: now };
        if to == TaskState::Working && task.started_at.is_none() {
            task.started_at = Some(now);
        }
        if to.is_terminal() {
            task.completed_at = Some(now);
        }
        debug!(task_id = %task.id, from = %from, to = %to, "Task transition");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskState::{
        AuthRequired, Canceled, Completed, Failed, InputRequired, Rejected, Submitted, Unknown,
        Working,
    };

    const LEGAL: &[(TaskState, TaskState)] = &[
        (Submitted, Working),
        (Submitted, Canceled),
        (Submitted, Rejected),
        (Working, InputRequired),
        (Working, Completed),
        (Working, Failed),
        (Working, Canceled),
        (Working, AuthRequired),
        (InputRequired, Working),
        (InputRequired, Canceled),
        (AuthRequired, Working),
        (AuthRequired, Canceled),
        (AuthRequired, Failed),
        (Unknown, Working),
        (Unknown, Canceled),
        (Unknown, Failed),
    ];

    fn task_in(state: TaskState) -> Task {
        let mut task = Task::new();
        task.status.state = state;
        task
    }

    #[test]
    fn test_every_pair_matches_edge_table() {
        for from in TaskState::ALL {
            for to in TaskState::ALL {
                let expected_legal = LEGAL.contains(&(from, to));
                let result = TaskStateMachine::validate(from, to);
                match result {
                    Ok(()) => assert!(expected_legal, "{from} -> {to} should be refused"),
                    Err(TransitionError::TaskAlreadyTerminal { state }) => {
                        assert!(from.is_terminal());
                        assert_eq!(state, from);
                    }
                    Err(TransitionError::IllegalTransition { .. }) => {
                        assert!(!expected_legal, "{from} -> {to} should be accepted");
                        assert!(!from.is_terminal());
                    }
                }
            }
        }
    }

    #[test]
    fn test_rejected_apply_leaves_task_unchanged() {
        let mut task = task_in(Submitted);
        let before = task.clone();
        let err = TaskStateMachine::apply(&mut task, Completed, Some("skip".into())).unwrap_err();
        assert_eq!(err, TransitionError::IllegalTransition { from: Submitted, to: Completed });
        assert_eq!(task, before);

        let mut done = task_in(Failed);
        let before = done.clone();
        let err = TaskStateMachine::apply(&mut done, Working, None).unwrap_err();
        assert_eq!(err, TransitionError::TaskAlreadyTerminal { state: Failed });
        assert_eq!(done, before);
    }

    #[test]
    fn test_apply_sets_timestamps() {
        let mut task = Task::new();
        TaskStateMachine::apply(&mut task, Working, None).unwrap();
        let started = task.started_at.unwrap();
        assert!(task.completed_at.is_none());

        TaskStateMachine::apply(&mut task, InputRequired, Some("need a file".into())).unwrap();
        TaskStateMachine::apply(&mut task, Working, None).unwrap();
        assert_eq!(task.started_at, Some(started));

        TaskStateMachine::apply(&mut task, Completed, Some("done".into())).unwrap();
        assert!(task.completed_at.is_some());
        assert_eq!(task.status.message.as_deref(), Some("done"));
    }
}
