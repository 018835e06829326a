//! Ticket registry. A ticket lets its bearer act with a restricted subset
//! of the owner's rights; the bearer authenticates as `ticket:<digest>` and
//! the resolver intersects the owner's rights with the ticket's own
//! per-path masks.

use std::time::{Duration, SystemTime};

use dashmap::DashMap;

use crate::path;
use crate::rights::Rights;

/// Subject prefix identifying a ticket bearer.
pub const TICKET_SUBJECT_PREFIX: &str = "ticket:";

/// A registered ticket.
#[derive(Debug, Clone)]
pub struct Ticket {
    /// Subject that registered the ticket.
    pub owner: String,
    /// Opaque credential text the digest is derived from.
    pub credential: String,
    pub expires_at: SystemTime,
    /// Per-path rights masks, normalized paths. Resolution takes the union
    /// of every mask whose path is a prefix of the directory in question.
    pub rights: Vec<(String, Rights)>,
}

impl Ticket {
    /// True once the ticket's lifetime has elapsed.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }

    /// Mask applicable to `dir`.
    pub fn rights_for(&self, dir: &str) -> Rights {
        let mut mask = Rights::NONE;
        for (prefix, rights) in &self.rights {
            if dir == prefix
                || prefix == "/"
                || dir.starts_with(&format!("{prefix}/"))
            {
                mask |= *rights;
            }
        }
        mask
    }
}

/// Shared registry of live tickets, keyed by digest.
#[derive(Debug, Default)]
pub struct TicketRegistry {
    tickets: DashMap<String, Ticket>,
}

/// Digest identifying a credential: lowercase hex of its content hash.
pub fn credential_digest(credential: &str) -> String {
    hex::encode(blake3::hash(credential.as_bytes()).as_bytes())
}

/// Extracts the digest from a `ticket:<digest>` subject.
pub fn subject_digest(subject: &str) -> Option<&str> {
    subject.strip_prefix(TICKET_SUBJECT_PREFIX)
}

impl TicketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a ticket for `owner`, valid for `duration`. Re-registering
    /// the same credential replaces the previous ticket. Returns the digest.
    pub fn register(&self, owner: &str, credential: &str, duration: Duration) -> String {
        let digest = credential_digest(credential);
        tracing::debug!(owner, digest = %digest, "ticket registered");
        self.tickets.insert(
            digest.clone(),
            Ticket {
                owner: owner.to_string(),
                credential: credential.to_string(),
                expires_at: SystemTime::now() + duration,
                rights: Vec::new(),
            },
        );
        digest
    }

    /// Looks up a live ticket; expired tickets are dropped on access.
    pub fn get(&self, digest: &str) -> Option<Ticket> {
        let expired = match self.tickets.get(digest) {
            Some(t) if !t.is_expired(SystemTime::now()) => return Some(t.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.tickets.remove(digest);
        }
        None
    }

    /// Digests of every live ticket owned by `owner`.
    pub fn list(&self, owner: &str) -> Vec<String> {
        let now = SystemTime::now();
        let mut names: Vec<String> = self
            .tickets
            .iter()
            .filter(|e| e.value().owner == owner && !e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Sets the rights mask a ticket grants under `dir`. Returns false when
    /// the ticket does not exist.
    pub fn modify(&self, digest: &str, dir: &str, rights: Rights) -> bool {
        let Some(mut ticket) = self.tickets.get_mut(digest) else {
            return false;
        };
        let dir = path::collapse(dir);
        if let Some(entry) = ticket.rights.iter_mut().find(|(p, _)| *p == dir) {
            entry.1 = rights;
        } else {
            ticket.rights.push((dir, rights));
        }
        true
    }

    /// Removes a ticket. Returns false when it does not exist.
    pub fn delete(&self, digest: &str) -> bool {
        self.tickets.remove(digest).is_some()
    }
}
