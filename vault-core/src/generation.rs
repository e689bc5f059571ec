//! Store generation: the cursor token for paginated searches

use crate::error::VaultError;
use crate::store::EntryStore;
use serde::{Deserialize, Serialize};

const META_KEY: &str = "generation";

/// Counter bumped on every state-changing write and persisted in the store's
/// meta table, so it keeps rising across reopens. A search offset is only
/// meaningful under the generation it was computed at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    pub fn from_value(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Last persisted generation; a fresh store starts at 0
    pub(crate) fn load(store: &EntryStore) -> crate::Result<Self> {
        Ok(store
            .get_meta(META_KEY)?
            .and_then(|raw| raw.parse().ok())
            .map(Self)
            .unwrap_or_default())
    }

    pub(crate) fn persist(&self, store: &EntryStore) -> crate::Result<()> {
        store.set_meta(META_KEY, &self.0.to_string())
    }

    /// Reject a continuation page whose cursor was taken under another
    /// generation. Offset 0 always starts fresh.
    pub fn check_cursor(&self, cursor: Option<u64>, offset: usize) -> crate::Result<()> {
        match cursor {
            Some(expected) if offset > 0 && expected != self.0 => {
                Err(VaultError::StaleGeneration {
                    expected,
                    found: self.0,
                })
            }
            _ => Ok(()),
        }
    }
}
