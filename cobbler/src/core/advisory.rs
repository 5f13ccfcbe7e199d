//! Advisory (degraded) results for best-effort bookkeeping.
//!
//! Fatal failures are `Err` values. Bookkeeping failures that must not abort
//! the caller are recorded here instead, so reports can carry them and tests
//! can assert on them without reading logs.

use std::fmt;

use serde::Serialize;
use tracing::warn;

/// One best-effort step that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Degradation {
    /// Short step identifier, e.g. `claim` or `remove-worktree`.
    pub step: String,
    pub message: String,
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.message)
    }
}

/// Collector for degradations raised during one operation.
#[derive(Debug, Default)]
pub struct Advisories {
    items: Vec<Degradation>,
}

impl Advisories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb a best-effort result: `Ok` passes through, `Err` is logged and recorded.
    pub fn absorb<T>(&mut self, step: &str, result: anyhow::Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(step, err = %format!("{err:#}"), "best-effort step failed");
                self.items.push(Degradation {
                    step: step.to_string(),
                    message: format!("{err:#}"),
                });
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<Degradation> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn absorb_records_errors_and_passes_values() {
        let mut advisories = Advisories::new();
        assert_eq!(advisories.absorb("ok", Ok::<_, anyhow::Error>(3)), Some(3));
        assert_eq!(
            advisories.absorb::<()>("claim", Err(anyhow!("tracker offline"))),
            None
        );
        let items = advisories.into_vec();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].step, "claim");
        assert_eq!(items[0].to_string(), "claim: tracker offline");
    }
}
