//! Numbered lists of discovery results.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// A shareable list whose entries are numbered from 1 as they are added.
///
/// Cloning shares the list, so one clone can be handed to a discovery
/// listener while the other is read afterwards.
#[derive(Debug, Clone, Default)]
pub struct IndexedTextList {
    items: Arc<Mutex<Vec<String>>>,
}

impl IndexedTextList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `item` as `"<n>: <item>"`.
    pub fn push(&self, item: &str) {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let line = format!("{}: {}", items.len() + 1, item);
        items.push(line);
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The numbered lines, in insertion order.
    pub fn lines(&self) -> Vec<String> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The item numbered `index`, without its number.
    pub fn item(&self, index: usize) -> Option<String> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let line = items.get(index.checked_sub(1)?)?;
        line.split_once(": ").map(|(_, item)| item.to_string())
    }
}

impl fmt::Display for IndexedTextList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lines().join("\n"))
    }
}
