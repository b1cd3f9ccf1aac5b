//! The ranked endpoint resource (§3 "Endpoint resource").

use std::sync::atomic::{AtomicI64, Ordering};

/// Which of the three resource lists an endpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    BlobContainer,
    Queue,
    StatusTable,
}

/// A single advertised endpoint, carrying a rolling success/failure score (§3, §4.4
/// "Ranking"). Handed out wrapped in `Arc` so `report()` after use is visible to
/// whichever snapshot the caller drew it from.
#[derive(Debug)]
pub struct Endpoint {
    pub kind: EndpointKind,
    pub url: String,
    pub sas_token: String,
    score: AtomicI64,
}

impl Endpoint {
    pub fn new(kind: EndpointKind, url: impl Into<String>, sas_token: impl Into<String>) -> Self {
        Endpoint { kind, url: url.into(), sas_token: sas_token.into(), score: AtomicI64::new(0) }
    }

    pub fn score(&self) -> i64 {
        self.score.load(Ordering::Relaxed)
    }

    /// `report(success)` (§4.4): increments on success, decrements on failure.
    /// Scores are never clamped to a floor -- a consistently-failing endpoint simply
    /// falls out of the top-ranked subset, it is never removed from the list (§4.4
    /// "temporarily demoted but never permanently removed").
    pub fn report(&self, success: bool) {
        if success {
            self.score.fetch_add(1, Ordering::Relaxed);
        } else {
            self.score.fetch_sub(1, Ordering::Relaxed);
        }
    }
}
