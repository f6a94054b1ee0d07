/// Result of a best-effort call to an external service.
///
/// Callers that only need the items use [`ServiceOutcome::into_items`], which
/// turns a degraded call into an empty list. `Degraded` keeps the reason so
/// "nothing found" stays distinguishable from "service unreachable".
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceOutcome<T> {
    Ok(Vec<T>),
    Degraded { reason: String },
}

impl<T> ServiceOutcome<T> {
    pub fn degraded(reason: impl std::fmt::Display) -> Self {
        ServiceOutcome::Degraded {
            reason: reason.to_string(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ServiceOutcome::Degraded { .. })
    }

    pub fn into_items(self) -> Vec<T> {
        match self {
            ServiceOutcome::Ok(items) => items,
            ServiceOutcome::Degraded { .. } => Vec::new(),
        }
    }
}

impl<T, E: std::fmt::Display> From<Result<Vec<T>, E>> for ServiceOutcome<T> {
    fn from(result: Result<Vec<T>, E>) -> Self {
        match result {
            Ok(items) => ServiceOutcome::Ok(items),
            Err(e) => ServiceOutcome::degraded(e),
        }
    }
}
