//! Peer registry and relay pair bookkeeping.
//!
//! [`Registry`] owns every connected client's outbound send half, keyed by
//! identifier; routing is a lookup, never a cross-handle reference. All
//! methods run under the server's single mutex; callers clone send handles
//! out and send after releasing it.

use std::collections::{HashMap, HashSet};

use axum::extract::ws::Message;
use tokio::sync::mpsc;

/// A connected client, created on successful `register` and destroyed on
/// socket close.
pub struct ClientSession {
    pub tx: mpsc::UnboundedSender<Message>,
    /// Set by a successful `relay_auth`; lost on reconnect.
    pub relay_authenticated: bool,
}

/// An unordered pair of identifiers authorized to exchange relay data.
///
/// Stored canonicalized (lexicographically smaller end first) so that
/// `{A,B}` and `{B,A}` hash and compare as the same pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayPair {
    lo: String,
    hi: String,
}

impl RelayPair {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        if a <= b {
            Self { lo: a, hi: b }
        } else {
            Self { lo: b, hi: a }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lo == id || self.hi == id
    }

    /// The counterparty of `id`, if `id` is one of the two ends.
    pub fn other_end(&self, id: &str) -> Option<&str> {
        if self.lo == id {
            Some(&self.hi)
        } else if self.hi == id {
            Some(&self.lo)
        } else {
            None
        }
    }

    pub fn ends(&self) -> (&str, &str) {
        (&self.lo, &self.hi)
    }
}

/// Registry of live sessions plus the relay pair set.
#[derive(Default)]
pub struct Registry {
    sessions: HashMap<String, ClientSession>,
    relay_pairs: HashSet<RelayPair>,
    next_peer_id: u64,
}

impl Registry {
    /// Assign an identifier for a registering socket and insert its
    /// session. An empty or already-taken request gets a freshly minted
    /// `peer_<n>` instead; registration never fails.
    pub fn assign_id(&mut self, requested: &str, tx: mpsc::UnboundedSender<Message>) -> String {
        let id = if !requested.is_empty() && !self.sessions.contains_key(requested) {
            requested.to_string()
        } else {
            self.mint_id()
        };

        self.sessions.insert(
            id.clone(),
            ClientSession {
                tx,
                relay_authenticated: false,
            },
        );
        id
    }

    fn mint_id(&mut self) -> String {
        loop {
            self.next_peer_id += 1;
            let candidate = format!("peer_{}", self.next_peer_id);
            if !self.sessions.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Clone the destination's send handle for use outside the lock.
    pub fn sender_of(&self, id: &str) -> Option<mpsc::UnboundedSender<Message>> {
        self.sessions.get(id).map(|s| s.tx.clone())
    }

    pub fn remove_session(&mut self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn set_relay_authenticated(&mut self, id: &str) -> bool {
        match self.sessions.get_mut(id) {
            Some(session) => {
                session.relay_authenticated = true;
                true
            }
            None => false,
        }
    }

    pub fn is_relay_authenticated(&self, id: &str) -> bool {
        self.sessions
            .get(id)
            .map(|s| s.relay_authenticated)
            .unwrap_or(false)
    }

    /// Identifiers of every registered peer except `exclude`.
    pub fn peer_ids_excluding(&self, exclude: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .keys()
            .filter(|id| id.as_str() != exclude)
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Snapshot of all sessions for broadcasts and the console.
    pub fn sessions_snapshot(&self) -> Vec<(String, bool, mpsc::UnboundedSender<Message>)> {
        self.sessions
            .iter()
            .map(|(id, s)| (id.clone(), s.relay_authenticated, s.tx.clone()))
            .collect()
    }

    /// Insert the unordered pair `{a, b}`. Idempotent; returns false if
    /// the pair was already present.
    pub fn insert_pair(&mut self, a: &str, b: &str) -> bool {
        self.relay_pairs.insert(RelayPair::new(a, b))
    }

    pub fn remove_pair(&mut self, a: &str, b: &str) -> bool {
        self.relay_pairs.remove(&RelayPair::new(a, b))
    }

    pub fn has_pair(&self, a: &str, b: &str) -> bool {
        self.relay_pairs.contains(&RelayPair::new(a, b))
    }

    /// Snapshot of the active pairs for the console.
    pub fn pairs_snapshot(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .relay_pairs
            .iter()
            .map(|p| (p.lo.clone(), p.hi.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    pub fn pair_count(&self) -> usize {
        self.relay_pairs.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Disconnect sweep: remove the session and every pair containing
    /// `id`, returning the counterparties (with their send handles) that
    /// must be told about the teardown. Runs entirely under the registry
    /// lock so racing forwards observe either the full session or none
    /// of it.
    pub fn sweep_disconnected(
        &mut self,
        id: &str,
    ) -> Vec<(String, mpsc::UnboundedSender<Message>)> {
        self.sessions.remove(id);

        let dead: Vec<RelayPair> = self
            .relay_pairs
            .iter()
            .filter(|p| p.contains(id))
            .cloned()
            .collect();

        let mut notify = Vec::new();
        for pair in dead {
            if let Some(other) = pair.other_end(id) {
                if let Some(tx) = self.sender_of(other) {
                    notify.push((other.to_string(), tx));
                }
            }
            self.relay_pairs.remove(&pair);
        }
        notify
    }
}
