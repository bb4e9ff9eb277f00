//! Search term handling shared by history and live messages.

use crate::error::{Result, SyncError};
use crate::types::Message;

/// Case-insensitive substring predicate over message text.
///
/// An empty term matches everything. The same predicate is applied to
/// fetched and pushed messages so the view does not depend on origin.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchPredicate {
    term: String,
    folded: String,
}

impl SearchPredicate {
    /// Validate and normalize a raw search term.
    pub fn parse(raw: &str, max_len: usize) -> Result<Self> {
        let term = raw.trim();
        if term.chars().count() > max_len {
            return Err(SyncError::Validation {
                field: "search",
                reason: format!("search term longer than {max_len} characters"),
            });
        }
        if term.chars().any(char::is_control) {
            return Err(SyncError::Validation {
                field: "search",
                reason: "search term contains control characters".to_string(),
            });
        }
        Ok(Self {
            term: term.to_string(),
            folded: term.to_lowercase(),
        })
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn is_empty(&self) -> bool {
        self.term.is_empty()
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.folded.is_empty() || message.text.to_lowercase().contains(&self.folded)
    }
}
