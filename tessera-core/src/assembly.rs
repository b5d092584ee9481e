// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::time::Duration;

use bitflags::bitflags;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::Timestamp;

/// Identifies one organization's materialized projection of one entity set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntitySetAssemblyKey {
    pub entity_set_id: Uuid,
    pub organization_id: Uuid,
}

impl EntitySetAssemblyKey {
    pub fn new(entity_set_id: Uuid, organization_id: Uuid) -> Self {
        Self {
            entity_set_id,
            organization_id,
        }
    }
}

impl Display for EntitySetAssemblyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.entity_set_id, self.organization_id)
    }
}

bitflags! {
    /// Ways in which a materialized entity set went out of sync with its source.
    ///
    /// Flags are set and cleared independently, several concerns can be dirty at once.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct SyncFlags: u8 {
        /// Upstream rows changed since the last refresh.
        const DATA_UNSYNCHRONIZED = 1 << 0;

        /// Schema or columns changed, a plain refresh is unsafe until the view is rebuilt.
        const EDM_UNSYNCHRONIZED = 1 << 1;

        /// Column grants need to be recomputed.
        const MATERIALIZE_PERMISSION_UNSYNCHRONIZED = 1 << 2;

        /// The organization lost MATERIALIZE on the entity set, the view must be torn down.
        const MATERIALIZE_PERMISSION_REMOVED = 1 << 3;
    }
}

/// State of one materialized projection of an entity set into an organization database.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MaterializedEntitySet {
    pub key: EntitySetAssemblyKey,

    /// Name of the materialized view as it currently exists in the organization database.
    pub view_name: String,

    /// Property types present as columns in the materialized view.
    pub columns: BTreeSet<Uuid>,

    /// Minimum time between automatic refreshes, `None` means manual refresh only.
    pub refresh_rate: Option<Duration>,

    pub flags: SyncFlags,

    pub last_refresh: Timestamp,
}

impl MaterializedEntitySet {
    pub fn new(
        key: EntitySetAssemblyKey,
        view_name: impl Into<String>,
        columns: BTreeSet<Uuid>,
        refresh_rate: Option<Duration>,
        last_refresh: Timestamp,
    ) -> Self {
        Self {
            key,
            view_name: view_name.into(),
            columns,
            refresh_rate,
            flags: SyncFlags::empty(),
            last_refresh,
        }
    }

    /// Returns `true` if the data refresh task should refresh this entry at the given time.
    ///
    /// Requires changed data, no pending schema change, an automatic refresh rate and that at
    /// least one refresh interval passed since the last refresh.
    pub fn is_refreshable(&self, now: Timestamp) -> bool {
        let Some(refresh_rate) = self.refresh_rate else {
            return false;
        };

        self.flags.contains(SyncFlags::DATA_UNSYNCHRONIZED)
            && !self.flags.contains(SyncFlags::EDM_UNSYNCHRONIZED)
            && now.saturating_sub(self.last_refresh) >= refresh_rate.as_millis() as Timestamp
    }
}

/// An organization's database and the entity sets materialized into it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OrganizationAssembly {
    pub organization_id: Uuid,

    pub initialized: bool,

    /// Coarse mirror of the flags of every `MaterializedEntitySet` of this organization.
    pub materialized_entity_sets: BTreeMap<Uuid, SyncFlags>,
}

impl OrganizationAssembly {
    pub fn new(organization_id: Uuid) -> Self {
        Self {
            organization_id,
            initialized: false,
            materialized_entity_sets: BTreeMap::new(),
        }
    }

    /// Entity sets of this organization which have any of the given flags set.
    pub fn flagged(&self, flags: SyncFlags) -> impl Iterator<Item = Uuid> + '_ {
        self.materialized_entity_sets
            .iter()
            .filter(move |(_, entry_flags)| entry_flags.intersects(flags))
            .map(|(entity_set_id, _)| *entity_set_id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use uuid::Uuid;

    use super::{EntitySetAssemblyKey, MaterializedEntitySet, SyncFlags};

    const MINUTE: u64 = 60 * 1000;

    fn entry(refresh_rate: Option<Duration>, last_refresh: u64) -> MaterializedEntitySet {
        MaterializedEntitySet::new(
            EntitySetAssemblyKey::new(Uuid::new_v4(), Uuid::new_v4()),
            "people",
            BTreeSet::new(),
            refresh_rate,
            last_refresh,
        )
    }

    #[test]
    fn refresh_rate_gating() {
        let now = 100 * MINUTE;
        let five_minutes = Some(Duration::from_secs(5 * 60));

        let mut recent = entry(five_minutes, now - 4 * MINUTE);
        recent.flags.insert(SyncFlags::DATA_UNSYNCHRONIZED);
        assert!(!recent.is_refreshable(now));

        let mut due = entry(five_minutes, now - 6 * MINUTE);
        due.flags.insert(SyncFlags::DATA_UNSYNCHRONIZED);
        assert!(due.is_refreshable(now));

        // Schema drift blocks the refresh.
        due.flags.insert(SyncFlags::EDM_UNSYNCHRONIZED);
        assert!(!due.is_refreshable(now));

        // Clean data is never refreshed.
        let clean = entry(five_minutes, 0);
        assert!(!clean.is_refreshable(now));

        // Manual refresh only.
        let mut manual = entry(None, 0);
        manual.flags.insert(SyncFlags::DATA_UNSYNCHRONIZED);
        assert!(!manual.is_refreshable(now));
    }

    #[test]
    fn flags_are_independent() {
        let mut flags = SyncFlags::empty();
        flags.insert(SyncFlags::DATA_UNSYNCHRONIZED);
        flags.insert(SyncFlags::EDM_UNSYNCHRONIZED);
        flags.remove(SyncFlags::EDM_UNSYNCHRONIZED);
        assert!(flags.contains(SyncFlags::DATA_UNSYNCHRONIZED));
        assert!(!flags.contains(SyncFlags::EDM_UNSYNCHRONIZED));
    }
}
