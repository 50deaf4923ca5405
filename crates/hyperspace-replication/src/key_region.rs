//! The key of the key-state table.

use bytes::Bytes;
use hyperspace_types::RegionId;

/// `(region, key-bytes)`: one object in one region. The same key bytes
/// in two regions are two independent key-states.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyRegion {
    pub region: RegionId,
    pub key: Bytes,
}

impl KeyRegion {
    pub fn new(region: RegionId, key: Bytes) -> Self {
        Self { region, key }
    }
}

impl std::fmt::Display for KeyRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "region={} key=", self.region)?;

        for b in self.key.iter().take(16) {
            write!(f, "{b:02x}")?;
        }

        if self.key.len() > 16 {
            write!(f, "..")?;
        }

        Ok(())
    }
}
