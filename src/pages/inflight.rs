//! Coalescing of identical in-flight page requests.

use crate::types::PageRequest;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Role of a caller that asked for a page.
pub enum Claim<T> {
    /// No identical request was running. The caller must fetch and then call
    /// [`InFlightLoads::complete`].
    Leader,
    /// An identical request is running; its outcome arrives here.
    Follower(Receiver<T>),
}

/// Requests currently being fetched, with callers waiting on each.
pub struct InFlightLoads<T> {
    waiting: Mutex<HashMap<PageRequest, Vec<Sender<T>>>>,
}

impl<T: Clone> InFlightLoads<T> {
    pub fn new() -> Self {
        Self {
            waiting: Mutex::new(HashMap::new()),
        }
    }

    /// Register interest in a request.
    pub fn claim(&self, request: &PageRequest) -> Claim<T> {
        let mut waiting = self.waiting.lock();
        match waiting.get_mut(request) {
            Some(followers) => {
                let (sender, receiver) = bounded(1);
                followers.push(sender);
                Claim::Follower(receiver)
            }
            None => {
                waiting.insert(request.clone(), Vec::new());
                Claim::Leader
            }
        }
    }

    /// Publish the leader's outcome to every follower and clear the slot.
    ///
    /// Returns the number of followers notified.
    pub fn complete(&self, request: &PageRequest, outcome: T) -> usize {
        let followers = self.waiting.lock().remove(request).unwrap_or_default();
        for follower in &followers {
            // Receiver may have gone away; nothing to deliver then.
            let _ = follower.send(outcome.clone());
        }
        followers.len()
    }

    /// Number of distinct requests in flight.
    pub fn len(&self) -> usize {
        self.waiting.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for InFlightLoads<T> {
    fn default() -> Self {
        Self::new()
    }
}
