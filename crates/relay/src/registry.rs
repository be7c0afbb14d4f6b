//! Subscription registry: who tracks which keyword.
//!
//! Maintains:
//! - Client ID → tracked keywords
//! - Keyword → number of distinct clients tracking it (the global set)
//!
//! A keyword is in the global set iff its count is non-zero. Every mutation
//! keeps both maps in step, so the global set is always the union of the
//! per-client sets. The global set keeps first-tracked order; a keyword that
//! drops out and comes back goes to the end.

use crate::client::ClientId;
use crate::keyword::Keyword;
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

/// Per-client keyword sets plus reference-counted global keyword set.
///
/// Not synchronized; the hub owns the only instance.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    users: HashMap<ClientId, BTreeSet<Keyword>>,
    refcounts: IndexMap<Keyword, usize>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty interest set for a client if it has none yet.
    pub fn register(&mut self, user: ClientId) {
        self.users.entry(user).or_default();
    }

    /// Add a keyword to a client's set.
    ///
    /// Returns true iff the keyword was not tracked by anyone before this
    /// call, i.e. the upstream subscription needs the new keyword.
    pub fn track(&mut self, user: ClientId, keyword: &Keyword) -> bool {
        let newly_held = self.users.entry(user).or_default().insert(keyword.clone());
        if !newly_held {
            return false;
        }

        let count = self.refcounts.entry(keyword.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            info!("Track keyword: {}", keyword);
            true
        } else {
            debug!("Keyword {} now held by {} clients", keyword, count);
            false
        }
    }

    /// Remove a keyword from a client's set.
    ///
    /// Returns true iff the client was the last holder, in which case the
    /// keyword has left the global set.
    pub fn untrack(&mut self, user: ClientId, keyword: &Keyword) -> bool {
        let held = self
            .users
            .get_mut(&user)
            .map(|keywords| keywords.remove(keyword))
            .unwrap_or(false);
        if !held {
            return false;
        }
        self.release(keyword)
    }

    /// Drop a client and all of its keywords.
    ///
    /// Returns the keywords that no remaining client tracks.
    pub fn remove_user(&mut self, user: ClientId) -> BTreeSet<Keyword> {
        let Some(keywords) = self.users.remove(&user) else {
            return BTreeSet::new();
        };

        keywords
            .into_iter()
            .filter(|keyword| self.release(keyword))
            .collect()
    }

    /// Clients whose set intersects `keywords`.
    pub fn matching_users<'a, I>(&self, keywords: I) -> HashSet<ClientId>
    where
        I: IntoIterator<Item = &'a Keyword>,
    {
        let wanted: Vec<&Keyword> = keywords.into_iter().collect();
        if wanted.is_empty() {
            return HashSet::new();
        }

        self.users
            .iter()
            .filter(|(_, held)| wanted.iter().any(|keyword| held.contains(*keyword)))
            .map(|(user, _)| *user)
            .collect()
    }

    /// Iterate the global keyword set in first-tracked order.
    pub fn global_keywords(&self) -> impl Iterator<Item = &Keyword> {
        self.refcounts.keys()
    }

    /// The global keyword set as the list handed to the upstream.
    pub fn keywords(&self) -> Vec<String> {
        self.refcounts.keys().map(|k| k.to_string()).collect()
    }

    pub fn is_tracked(&self, keyword: &Keyword) -> bool {
        self.refcounts.contains_key(keyword)
    }

    /// Number of clients tracking `keyword`.
    pub fn refcount(&self, keyword: &Keyword) -> usize {
        self.refcounts.get(keyword).copied().unwrap_or(0)
    }

    /// Keywords tracked by one client, None if the client is unknown.
    pub fn user_keywords(&self, user: &ClientId) -> Option<&BTreeSet<Keyword>> {
        self.users.get(user)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn keyword_count(&self) -> usize {
        self.refcounts.len()
    }

    /// Decrement a keyword's count. Returns true if it dropped to zero.
    fn release(&mut self, keyword: &Keyword) -> bool {
        let Some(count) = self.refcounts.get_mut(keyword) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            self.refcounts.shift_remove(keyword);
            info!("Untrack keyword: {}", keyword);
            true
        } else {
            false
        }
    }
}
