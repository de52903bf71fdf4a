/// Convenience result type used across Ravel.
pub type RavelResult<T> = Result<T, RavelError>;

/// Top-level error taxonomy used by engine APIs.
#[derive(thiserror::Error, Debug)]
pub enum RavelError {
    /// Invalid user-provided or graph data.
    #[error("validation error: {0}")]
    Validation(String),

    /// Misuse or internal failure of the scheduling protocol.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Failure reported by an effect implementation.
    #[error("effect error: {0}")]
    Effect(String),

    /// The owning render was cancelled while the operation was in flight.
    #[error("render aborted")]
    Aborted,

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RavelError {
    /// Build a [`RavelError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`RavelError::Scheduler`] value.
    pub fn scheduler(msg: impl Into<String>) -> Self {
        Self::Scheduler(msg.into())
    }

    /// Build a [`RavelError::Effect`] value.
    pub fn effect(msg: impl Into<String>) -> Self {
        Self::Effect(msg.into())
    }
}

/// Terminal outcome of a render or query action.
///
/// Statuses are values, not errors: a request's terminal status is stored
/// once and handed to every waiter without retry. Cancellation is a distinct
/// terminal outcome, not a failure of the scheduler itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ActionStatus {
    /// The action completed and produced its result.
    Ok,
    /// The action failed; dependents observe the failure when consuming it.
    Failed,
    /// The action was cooperatively cancelled.
    Aborted,
}

impl ActionStatus {
    /// True for [`ActionStatus::Ok`].
    pub fn is_ok(self) -> bool {
        matches!(self, ActionStatus::Ok)
    }

    /// True for any terminal outcome other than [`ActionStatus::Ok`].
    pub fn is_failed(self) -> bool {
        !self.is_ok()
    }

    /// Collapse a fallible call into a terminal status code.
    pub fn from_result<T>(res: &RavelResult<T>) -> ActionStatus {
        match res {
            Ok(_) => ActionStatus::Ok,
            Err(RavelError::Aborted) => ActionStatus::Aborted,
            Err(_) => ActionStatus::Failed,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
