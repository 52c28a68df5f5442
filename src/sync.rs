use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Thread ids currently being worked on during this run.
///
/// A claim is held from content fetch until the thread reaches a terminal
/// state, so two workers never classify the same thread at once.
#[derive(Debug, Default, Clone)]
pub struct ThreadClaims {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ThreadClaims {
    /// Returns `None` when another worker already holds the thread.
    pub fn claim(&self, thread_id: &str) -> Option<ClaimGuard> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if !in_flight.insert(thread_id.to_string()) {
            return None;
        }
        Some(ClaimGuard {
            claims: self.clone(),
            thread_id: thread_id.to_string(),
        })
    }
}

/// Releases the claim when dropped, including when the worker is cancelled.
#[derive(Debug)]
pub struct ClaimGuard {
    claims: ThreadClaims,
    thread_id: String,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.claims.in_flight.lock() {
            in_flight.remove(&self.thread_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_is_refused() {
        let claims = ThreadClaims::default();
        let first = claims.claim("t-1");
        assert!(first.is_some());
        assert!(claims.claim("t-1").is_none());
        assert!(claims.claim("t-2").is_some());
    }

    #[test]
    fn test_claim_released_on_drop() {
        let claims = ThreadClaims::default();
        {
            let _guard = claims.claim("t-1").unwrap();
            assert!(claims.claim("t-1").is_none());
        }
        assert!(claims.claim("t-1").is_some());
    }
}
