//! Case subscriptions
//!
//! Operators bundle `(sender id, event names)` subscriptions into cases; the
//! signal bridge records matching execution events into the case log. The
//! cache is written only by control intake and read only by the bridge.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;

use crate::protocol::Subscription;

/// `case_id -> subscriptions`, replaced atomically per case.
#[derive(Default)]
pub struct SubscriptionCache {
    cases: RwLock<HashMap<String, Vec<Subscription>>>,
}

impl SubscriptionCache {
    /// Install or replace a case's subscriptions. Create and update are the
    /// same operation; reapplying is a no-op.
    pub fn install(&self, case_id: &str, subscriptions: Vec<Subscription>) {
        self.cases
            .write()
            .insert(case_id.to_string(), subscriptions);
    }

    /// Remove all subscriptions for a case. Unknown cases are ignored.
    pub fn remove(&self, case_id: &str) {
        self.cases.write().remove(case_id);
    }

    /// Cases with a subscription matching `(sender_id, event)`.
    pub fn matching_cases(&self, sender_id: &str, event: &str) -> Vec<String> {
        self.cases
            .read()
            .iter()
            .filter(|(_, subscriptions)| {
                subscriptions
                    .iter()
                    .any(|s| s.id == sender_id && s.events.iter().any(|e| e == event))
            })
            .map(|(case_id, _)| case_id.clone())
            .collect()
    }

    pub fn case_count(&self) -> usize {
        self.cases.read().len()
    }

    pub fn subscriptions(&self, case_id: &str) -> Option<Vec<Subscription>> {
        self.cases.read().get(case_id).cloned()
    }
}

/// One recorded execution event.
#[derive(Debug, Clone, Serialize)]
pub struct CaseEntry {
    pub case_id: String,
    pub event: String,
    pub sender_id: String,
    pub data: Option<Value>,
    pub logged_at: DateTime<Utc>,
}

/// The case database surface. Implementations log their own failures; the
/// bridge never lets case recording block event publication.
pub trait CaseLog: Send + Sync {
    fn append(&self, entry: CaseEntry);
}

/// In-memory case log for tests and standalone runs.
#[derive(Default)]
pub struct MemoryCaseLog {
    entries: Mutex<Vec<CaseEntry>>,
}

impl MemoryCaseLog {
    pub fn entries(&self) -> Vec<CaseEntry> {
        self.entries.lock().clone()
    }

    pub fn for_case(&self, case_id: &str) -> Vec<CaseEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.case_id == case_id)
            .cloned()
            .collect()
    }
}

impl CaseLog for MemoryCaseLog {
    fn append(&self, entry: CaseEntry) {
        self.entries.lock().push(entry);
    }
}

/// Fans one execution event out to every matching case.
pub struct CaseLogger {
    cache: Arc<SubscriptionCache>,
    log: Arc<dyn CaseLog>,
}

impl CaseLogger {
    pub fn new(cache: Arc<SubscriptionCache>, log: Arc<dyn CaseLog>) -> Self {
        Self { cache, log }
    }

    pub fn record(&self, event: &str, sender_id: &str, data: Option<&Value>) {
        for case_id in self.cache.matching_cases(sender_id, event) {
            self.log.append(CaseEntry {
                case_id,
                event: event.to_string(),
                sender_id: sender_id.to_string(),
                data: data.cloned(),
                logged_at: Utc::now(),
            });
        }
    }
}
