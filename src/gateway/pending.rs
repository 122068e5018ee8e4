//! In-flight command tracking
//!
//! Each command sent to the gateway owns one entry keyed by its correlation
//! id. Entries leave the table when the matching reply arrives or when they
//! expire.

use super::protocol::{CorrelationId, GatewayCommand};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub command: GatewayCommand,
    pub sent_at: Instant,
    pub expires_at: Instant,
}

#[derive(Debug)]
pub struct PendingRequests {
    entries: HashMap<CorrelationId, PendingCommand>,
    ttl: Duration,
}

impl PendingRequests {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Track a command under a freshly generated id and return the id
    pub fn register(&mut self, command: GatewayCommand, now: Instant) -> CorrelationId {
        let mut id = CorrelationId::generate();
        while self.entries.contains_key(&id) {
            id = CorrelationId::generate();
        }

        self.entries.insert(
            id.clone(),
            PendingCommand {
                command,
                sent_at: now,
                expires_at: now + self.ttl,
            },
        );
        id
    }

    /// Remove and return the command a reply belongs to
    pub fn resolve(&mut self, id: &CorrelationId) -> Option<PendingCommand> {
        self.entries.remove(id)
    }

    /// Drop every entry whose deadline has passed
    pub fn expire(&mut self, now: Instant) -> Vec<(CorrelationId, PendingCommand)> {
        let expired: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|(_, pending)| pending.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|pending| (id, pending)))
            .collect()
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
