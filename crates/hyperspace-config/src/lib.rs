//! # hyperspace-config: Cluster configuration
//!
//! The coordinator distributes a [`Configuration`] snapshot to every
//! daemon: the set of spaces, their subspaces, the regions partitioning
//! each subspace's hyperspace, and the replica chain owning each region.
//! Each snapshot carries a monotonically increasing [`ConfigEpoch`];
//! chain messages are stamped with the epoch they were sent under.
//!
//! This crate is read-side only. Building, validating, and distributing
//! configurations is the coordinator's job; the daemon treats a snapshot
//! as immutable and swaps whole snapshots on reconfiguration.
//!
//! The navigation surface mirrors what the replication engine needs:
//! chain order within a region (`next_in_region`, `head/tail`), subspace
//! order within a space (`subspace_prev/next`, `subspace_adjacent`), and
//! the hyperspace mapping from an object's attribute-hash vector to the
//! region owning it (`lookup_region`).

mod error;

pub use error::ConfigError;

use hyperspace_data::Schema;
use hyperspace_types::{ConfigEpoch, RegionId, ServerId, SpaceId, SubspaceId, VirtualServerId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Snapshot shape
// ============================================================================

/// One region: a rectangle of its subspace's hash space plus the replica
/// chain that owns it. Bounds are inclusive and indexed by the owning
/// subspace's attribute list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub id: RegionId,
    pub lower: Vec<u64>,
    pub upper: Vec<u64>,
    /// Chain order: head first, tail last.
    pub replicas: Vec<VirtualServerId>,
}

impl RegionConfig {
    fn covers(&self, coords: &[u64]) -> bool {
        debug_assert_eq!(coords.len(), self.lower.len());
        coords
            .iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .all(|(c, (lo, hi))| lo <= c && c <= hi)
    }
}

/// One subspace: the attribute indices it hashes on (into the space's
/// schema, key = 0) and the regions partitioning it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubspaceConfig {
    pub id: SubspaceId,
    pub attrs: Vec<u16>,
    pub regions: Vec<RegionConfig>,
}

/// One space: schema plus subspaces in chain order (key subspace first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceConfig {
    pub id: SpaceId,
    pub schema: Schema,
    pub subspaces: Vec<SubspaceConfig>,
}

/// Mapping from a virtual server to its place in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placement {
    server: ServerId,
    space: usize,
    subspace: usize,
    region: usize,
    /// Position in the chain; 0 is the head.
    link: usize,
}

/// A full configuration snapshot.
#[derive(Debug, Clone)]
pub struct Configuration {
    epoch: ConfigEpoch,
    spaces: Vec<SpaceConfig>,
    assignments: HashMap<VirtualServerId, ServerId>,
    placements: HashMap<VirtualServerId, Placement>,
    regions: HashMap<RegionId, (usize, usize, usize)>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self::empty()
    }
}

impl Configuration {
    /// An empty configuration at epoch zero, used before the coordinator
    /// has delivered anything.
    pub fn empty() -> Self {
        Self {
            epoch: ConfigEpoch::ZERO,
            spaces: Vec::new(),
            assignments: HashMap::new(),
            placements: HashMap::new(),
            regions: HashMap::new(),
        }
    }

    /// Builds a snapshot from coordinator state.
    ///
    /// `assignments` maps each virtual server to the physical daemon
    /// hosting it; every chain member of every region must be assigned.
    pub fn new(
        epoch: ConfigEpoch,
        spaces: Vec<SpaceConfig>,
        assignments: HashMap<VirtualServerId, ServerId>,
    ) -> Result<Self, ConfigError> {
        let mut placements = HashMap::new();
        let mut regions = HashMap::new();

        for (si, space) in spaces.iter().enumerate() {
            for (ssi, subspace) in space.subspaces.iter().enumerate() {
                for attr in &subspace.attrs {
                    if space.schema.attr(*attr).is_none() {
                        return Err(ConfigError::UnknownAttribute {
                            space: space.id,
                            attr: *attr,
                        });
                    }
                }

                for (ri, region) in subspace.regions.iter().enumerate() {
                    if region.lower.len() != subspace.attrs.len()
                        || region.upper.len() != subspace.attrs.len()
                    {
                        return Err(ConfigError::BadRectangle { region: region.id });
                    }

                    if region.replicas.is_empty() {
                        return Err(ConfigError::EmptyChain { region: region.id });
                    }

                    if regions.insert(region.id, (si, ssi, ri)).is_some() {
                        return Err(ConfigError::DuplicateRegion { region: region.id });
                    }

                    for (link, vsi) in region.replicas.iter().enumerate() {
                        let server = assignments
                            .get(vsi)
                            .copied()
                            .ok_or(ConfigError::UnassignedVirtualServer { vsi: *vsi })?;
                        let placement = Placement {
                            server,
                            space: si,
                            subspace: ssi,
                            region: ri,
                            link,
                        };

                        if placements.insert(*vsi, placement).is_some() {
                            return Err(ConfigError::DuplicateVirtualServer { vsi: *vsi });
                        }
                    }
                }
            }
        }

        Ok(Self {
            epoch,
            spaces,
            assignments,
            placements,
            regions,
        })
    }

    pub fn epoch(&self) -> ConfigEpoch {
        self.epoch
    }

    pub fn spaces(&self) -> &[SpaceConfig] {
        &self.spaces
    }

    // ========================================================================
    // Virtual-server navigation
    // ========================================================================

    /// The daemon hosting a virtual server.
    pub fn server_of(&self, vsi: VirtualServerId) -> Option<ServerId> {
        self.assignments.get(&vsi).copied()
    }

    /// The region a virtual server serves.
    pub fn region_of(&self, vsi: VirtualServerId) -> Option<RegionId> {
        let p = self.placements.get(&vsi)?;
        Some(self.spaces[p.space].subspaces[p.subspace].regions[p.region].id)
    }

    /// The schema of the space a virtual server belongs to.
    pub fn schema_of(&self, vsi: VirtualServerId) -> Option<&Schema> {
        let p = self.placements.get(&vsi)?;
        Some(&self.spaces[p.space].schema)
    }

    /// The schema of the space owning a region.
    pub fn schema_of_region(&self, ri: RegionId) -> Option<&Schema> {
        let (si, _, _) = *self.regions.get(&ri)?;
        Some(&self.spaces[si].schema)
    }

    /// The successor of a virtual server in its own chain, if any.
    pub fn next_in_region(&self, vsi: VirtualServerId) -> VirtualServerId {
        let Some(p) = self.placements.get(&vsi) else {
            return VirtualServerId::NONE;
        };
        let chain = &self.spaces[p.space].subspaces[p.subspace].regions[p.region].replicas;
        chain
            .get(p.link + 1)
            .copied()
            .unwrap_or(VirtualServerId::NONE)
    }

    /// The predecessor of a virtual server in its own chain, if any.
    pub fn prev_in_region(&self, vsi: VirtualServerId) -> VirtualServerId {
        let Some(p) = self.placements.get(&vsi) else {
            return VirtualServerId::NONE;
        };

        if p.link == 0 {
            return VirtualServerId::NONE;
        }

        let chain = &self.spaces[p.space].subspaces[p.subspace].regions[p.region].replicas;
        chain[p.link - 1]
    }

    pub fn head_of_region(&self, ri: RegionId) -> VirtualServerId {
        match self.regions.get(&ri) {
            Some(&(si, ssi, rgi)) => self.spaces[si].subspaces[ssi].regions[rgi].replicas[0],
            None => VirtualServerId::NONE,
        }
    }

    pub fn tail_of_region(&self, ri: RegionId) -> VirtualServerId {
        match self.regions.get(&ri) {
            Some(&(si, ssi, rgi)) => *self.spaces[si].subspaces[ssi].regions[rgi]
                .replicas
                .last()
                .expect("chains are non-empty by construction"),
            None => VirtualServerId::NONE,
        }
    }

    pub fn is_tail(&self, vsi: VirtualServerId) -> bool {
        self.region_of(vsi)
            .is_some_and(|ri| self.tail_of_region(ri) == vsi)
    }

    /// A point leader is the head of a region of the key subspace: the
    /// virtual server that assigns versions for client atomics.
    pub fn is_point_leader(&self, vsi: VirtualServerId) -> bool {
        match self.placements.get(&vsi) {
            Some(p) => p.subspace == 0 && p.link == 0,
            None => false,
        }
    }

    /// Regions of the key subspaces whose head lives on `server`.
    pub fn point_leader_regions(&self, server: ServerId) -> Vec<RegionId> {
        let mut out = Vec::new();

        for space in &self.spaces {
            if let Some(subspace) = space.subspaces.first() {
                for region in &subspace.regions {
                    let head = region.replicas[0];

                    if self.assignments.get(&head) == Some(&server) {
                        out.push(region.id);
                    }
                }
            }
        }

        out
    }

    /// Every region with at least one chain link on `server`. Used to
    /// seed identifier generators and collectors on reconfiguration.
    pub fn regions_on(&self, server: ServerId) -> Vec<RegionId> {
        let mut out = Vec::new();

        for space in &self.spaces {
            for subspace in &space.subspaces {
                for region in &subspace.regions {
                    let mine = region
                        .replicas
                        .iter()
                        .any(|vsi| self.assignments.get(vsi) == Some(&server));

                    if mine {
                        out.push(region.id);
                    }
                }
            }
        }

        out
    }

    /// Every virtual server hosted by `server`.
    pub fn virtual_servers_on(&self, server: ServerId) -> Vec<VirtualServerId> {
        let mut out: Vec<VirtualServerId> = self
            .placements
            .iter()
            .filter(|(_, p)| p.server == server)
            .map(|(vsi, _)| *vsi)
            .collect();
        out.sort_unstable();
        out
    }

    // ========================================================================
    // Subspace navigation
    // ========================================================================

    pub fn subspace_of(&self, ri: RegionId) -> SubspaceId {
        match self.regions.get(&ri) {
            Some(&(si, ssi, _)) => self.spaces[si].subspaces[ssi].id,
            None => SubspaceId::NONE,
        }
    }

    /// The subspace before `si` in its space's chain order, or NONE for
    /// the key subspace.
    pub fn subspace_prev(&self, si: SubspaceId) -> SubspaceId {
        match self.locate_subspace(si) {
            Some((_, 0)) | None => SubspaceId::NONE,
            Some((space, ssi)) => self.spaces[space].subspaces[ssi - 1].id,
        }
    }

    /// The subspace after `si`, or NONE for the last.
    pub fn subspace_next(&self, si: SubspaceId) -> SubspaceId {
        match self.locate_subspace(si) {
            Some((space, ssi)) => self.spaces[space]
                .subspaces
                .get(ssi + 1)
                .map_or(SubspaceId::NONE, |ss| ss.id),
            None => SubspaceId::NONE,
        }
    }

    /// True when `a` and `b` serve adjacent subspaces of the same space;
    /// chain messages may legitimately cross exactly such boundaries.
    pub fn subspace_adjacent(&self, a: VirtualServerId, b: VirtualServerId) -> bool {
        let (Some(pa), Some(pb)) = (self.placements.get(&a), self.placements.get(&b)) else {
            return false;
        };
        pa.space == pb.space && pa.subspace.abs_diff(pb.subspace) == 1
    }

    fn locate_subspace(&self, si: SubspaceId) -> Option<(usize, usize)> {
        for (space_idx, space) in self.spaces.iter().enumerate() {
            if let Some(ssi) = space.subspaces.iter().position(|ss| ss.id == si) {
                return Some((space_idx, ssi));
            }
        }

        None
    }

    // ========================================================================
    // Hyperspace mapping
    // ========================================================================

    /// Maps an object's full attribute-hash vector (key first, one entry
    /// per schema attribute) to the region of `si` owning it.
    pub fn lookup_region(&self, si: SubspaceId, hashes: &[u64]) -> RegionId {
        let Some((space_idx, ssi)) = self.locate_subspace(si) else {
            return RegionId::NONE;
        };
        let subspace = &self.spaces[space_idx].subspaces[ssi];
        let coords: Vec<u64> = subspace
            .attrs
            .iter()
            .map(|a| hashes.get(usize::from(*a)).copied().unwrap_or(0))
            .collect();

        for region in &subspace.regions {
            if region.covers(&coords) {
                return region.id;
            }
        }

        RegionId::NONE
    }
}
