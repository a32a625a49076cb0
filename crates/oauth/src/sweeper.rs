//! Removal of stale state nonces and dead credentials.

use {
    serde::Serialize,
    tracing::{debug, info},
};

use crate::{storage::CredentialStore, types::StoredRecord};

/// Pending authorizations older than this are discarded.
pub const STATE_TTL_SECS: u64 = 60 * 60;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_states: usize,
    pub expired_credentials: usize,
    /// Users whose credential was removed; their connections should be closed.
    pub removed_users: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired_states == 0 && self.expired_credentials == 0
    }
}

fn is_dead(record: &StoredRecord, now: u64) -> bool {
    match record {
        StoredRecord::Pending(p) => p.is_stale(now, STATE_TTL_SECS),
        StoredRecord::Credential(c) => c.is_terminal(now),
    }
}

/// Delete pending authorizations past their TTL and credentials that are
/// expired without a refresh token. Refreshable credentials are kept.
pub async fn sweep(store: &dyn CredentialStore, now: u64) -> SweepReport {
    let mut report = SweepReport::default();

    for (key, record) in store.list().await {
        if !is_dead(&record, now) {
            continue;
        }
        // Re-check right before deleting: the entry may have been replaced
        // by a fresh exchange since the listing.
        let Some(current) = store.get(&key).await else {
            continue;
        };
        if !is_dead(&current, now) {
            continue;
        }
        if store.delete(&key).await.is_none() {
            continue;
        }
        match current {
            StoredRecord::Pending(_) => report.expired_states += 1,
            StoredRecord::Credential(_) => {
                report.expired_credentials += 1;
                report.removed_users.push(key);
            },
        }
    }

    if report.is_empty() {
        debug!("credential sweep found nothing to remove");
    } else {
        info!(
            expired_states = report.expired_states,
            expired_credentials = report.expired_credentials,
            "credential sweep removed entries"
        );
    }
    report
}
