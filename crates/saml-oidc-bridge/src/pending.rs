use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

const PENDING_TTL: Duration = Duration::from_secs(10 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// An AuthnRequest parked while the browser makes the OIDC detour. The
/// base64 payload is kept verbatim so any signature over it stays valid
/// when the request is replayed.
pub struct PendingAuthnRequest {
    pub saml_request: String,
    pub relay_state: Option<String>,
    created_at: DateTime<Utc>,
}

/// Process-local table of in-flight AuthnRequests, keyed by request ID.
/// Entries are consumed at most once and evicted after a bounded TTL.
#[derive(Clone)]
pub struct PendingRequests {
    inner: Arc<DashMap<String, PendingAuthnRequest>>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    pub fn put(&self, request_id: String, saml_request: String, relay_state: Option<String>) {
        self.inner.insert(
            request_id,
            PendingAuthnRequest {
                saml_request,
                relay_state,
                created_at: Utc::now(),
            },
        );
    }

    /// Atomic read-and-delete: of any number of concurrent callers for the
    /// same key, exactly one receives the value.
    pub fn take(&self, request_id: &str) -> Option<PendingAuthnRequest> {
        let (_, pending) = self.inner.remove(request_id)?;

        let age = Utc::now()
            .signed_duration_since(pending.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age > PENDING_TTL {
            return None;
        }

        Some(pending)
    }

    fn sweep(&self) {
        let now = Utc::now();
        self.inner.retain(|_, pending| {
            let age = now
                .signed_duration_since(pending.created_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            age <= PENDING_TTL
        });
    }
}

pub async fn pending_sweep_task(table: PendingRequests) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let before = table.inner.len();
        table.sweep();
        let removed = before - table.inner.len();
        if removed > 0 {
            tracing::info!(removed, "evicted stale pending requests");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_take() {
        let table = PendingRequests::new();
        table.put("_req1".into(), "encoded-request".into(), Some("relay".into()));

        let pending = table.take("_req1").unwrap();
        assert_eq!(pending.saml_request, "encoded-request");
        assert_eq!(pending.relay_state.as_deref(), Some("relay"));
    }

    #[test]
    fn take_consumes_the_entry() {
        let table = PendingRequests::new();
        table.put("_req1".into(), "encoded-request".into(), None);

        assert!(table.take("_req1").is_some());
        assert!(table.take("_req1").is_none());
    }

    #[test]
    fn take_missing_returns_none() {
        let table = PendingRequests::new();
        assert!(table.take("_missing").is_none());
    }

    #[test]
    fn expired_entry_is_dropped_on_take() {
        let table = PendingRequests::new();
        table.put("_req1".into(), "encoded-request".into(), None);

        if let Some(mut entry) = table.inner.get_mut("_req1") {
            entry.created_at = Utc::now() - chrono::Duration::minutes(20);
        }

        assert!(table.take("_req1").is_none());
    }

    #[test]
    fn sweep_removes_only_stale_entries() {
        let table = PendingRequests::new();
        table.put("_fresh".into(), "a".into(), None);
        table.put("_stale".into(), "b".into(), None);

        if let Some(mut entry) = table.inner.get_mut("_stale") {
            entry.created_at = Utc::now() - chrono::Duration::minutes(20);
        }

        table.sweep();

        assert!(table.take("_fresh").is_some());
        assert!(table.take("_stale").is_none());
    }

    #[test]
    fn concurrent_take_yields_exactly_one_winner() {
        let table = PendingRequests::new();
        table.put("_contested".into(), "payload".into(), None);

        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let table = table.clone();
                    scope.spawn(move || table.take("_contested").is_some())
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|&won| won)
                .count()
        });

        assert_eq!(winners, 1);
    }
}
