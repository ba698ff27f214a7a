//! The placement model: which Dom0 each DomU (and each of its disks) is
//! assigned to, primary and secondary. A `Configuration` is immutable once
//! built — [`Configuration::new`] validates every structural invariant in
//! SPEC_FULL.md §3 eagerly, so an invalid configuration can never exist.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, Result};
use crate::search::moves::Move;
use crate::topology::Cluster;

/// A contiguous range of extents on a specific Dom0Disk, consumed by a
/// DomUDisk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhysicalVolumeConfiguration {
    pub dom0_hostname: String,
    pub device_path: String,
    pub extents: u64,
}

impl PhysicalVolumeConfiguration {
    pub fn new(dom0_hostname: impl Into<String>, device_path: impl Into<String>, extents: u64) -> Self {
        Self {
            dom0_hostname: dom0_hostname.into(),
            device_path: device_path.into(),
            extents,
        }
    }
}

/// Where a single DomUDisk's primary and secondary copies live.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct DiskPlacement {
    pub primary: Vec<PhysicalVolumeConfiguration>,
    pub secondary: Vec<PhysicalVolumeConfiguration>,
}

/// Where one DomU (and all of its disks) is placed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomUPlacement {
    pub primary: String,
    pub secondary: Option<String>,
    pub disks: BTreeMap<String, DiskPlacement>,
}

/// A compact, order-independent key for the search driver's closed set.
/// Deliberately excludes the parent chain and originating move — those
/// participate in path reconstruction, not in "have we seen this state".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigFingerprint(BTreeMap<String, DomUPlacement>);

/// A fully-assigned placement of every DomU in a cluster.
///
/// Configurations form a tree via `parent`: the initial configuration (no
/// parent, depth 0) is supplied by the caller; every other configuration is
/// produced by the move generator and reachable by walking `parent` back to
/// the root.
#[derive(Debug, Clone)]
pub struct Configuration {
    cluster: Arc<Cluster>,
    placements: BTreeMap<String, DomUPlacement>,
    parent: Option<Arc<Configuration>>,
    produced_by: Option<Move>,
    depth: u32,
}

impl Configuration {
    /// Build and validate the initial configuration of a search (no parent,
    /// depth 0).
    pub fn initial(cluster: Arc<Cluster>, placements: BTreeMap<String, DomUPlacement>) -> Result<Self> {
        Self::new(cluster, placements, None, None, 0)
    }

    /// Build and validate a configuration produced by applying `produced_by`
    /// to `parent`.
    pub fn successor(
        parent: Arc<Configuration>,
        placements: BTreeMap<String, DomUPlacement>,
        produced_by: Move,
    ) -> Result<Self> {
        let cluster = Arc::clone(&parent.cluster);
        let depth = parent.depth + 1;
        Self::new(cluster, placements, Some(parent), Some(produced_by), depth)
    }

    fn new(
        cluster: Arc<Cluster>,
        placements: BTreeMap<String, DomUPlacement>,
        parent: Option<Arc<Configuration>>,
        produced_by: Option<Move>,
        depth: u32,
    ) -> Result<Self> {
        validate(&cluster, &placements)?;
        Ok(Self {
            cluster,
            placements,
            parent,
            produced_by,
            depth,
        })
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn parent(&self) -> Option<&Arc<Configuration>> {
        self.parent.as_ref()
    }

    pub fn produced_by(&self) -> Option<&Move> {
        self.produced_by.as_ref()
    }

    pub fn placement(&self, domu_hostname: &str) -> Option<&DomUPlacement> {
        self.placements.get(domu_hostname)
    }

    pub fn placements(&self) -> impl Iterator<Item = (&str, &DomUPlacement)> {
        self.placements.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn fingerprint(&self) -> ConfigFingerprint {
        ConfigFingerprint(self.placements.clone())
    }

    /// Walk `parent` pointers back to the root, returning the path from
    /// initial configuration to `self` inclusive.
    pub fn path_from_root(self: &Arc<Self>) -> Vec<Arc<Configuration>> {
        let mut path = Vec::with_capacity(self.depth as usize + 1);
        let mut current = Arc::clone(self);
        loop {
            let parent = current.parent.clone();
            path.push(current);
            match parent {
                Some(p) => current = p,
                None => break,
            }
        }
        path.reverse();
        path
    }
}

fn validate(cluster: &Cluster, placements: &BTreeMap<String, DomUPlacement>) -> Result<()> {
    for domu in cluster.domus() {
        let placement = placements.get(&domu.hostname).ok_or_else(|| {
            ClusterError::structural(format!("DomU '{}' has no placement", domu.hostname))
        })?;

        if cluster.dom0(&placement.primary).is_none() {
            return Err(ClusterError::structural(format!(
                "DomU '{}' primary Dom0 '{}' does not exist",
                domu.hostname, placement.primary
            )));
        }

        match (&placement.secondary, domu.has_secondary()) {
            (Some(secondary), true) => {
                if *secondary == placement.primary {
                    return Err(ClusterError::structural(format!(
                        "DomU '{}' has identical primary and secondary Dom0 '{}'",
                        domu.hostname, secondary
                    )));
                }
                if cluster.dom0(secondary).is_none() {
                    return Err(ClusterError::structural(format!(
                        "DomU '{}' secondary Dom0 '{}' does not exist",
                        domu.hostname, secondary
                    )));
                }
            }
            (None, true) => {
                return Err(ClusterError::structural(format!(
                    "DomU '{}' requires a secondary Dom0 but none was assigned",
                    domu.hostname
                )));
            }
            (Some(_), false) => {
                return Err(ClusterError::structural(format!(
                    "DomU '{}' has no failover reservation but a secondary was assigned",
                    domu.hostname
                )));
            }
            (None, false) => {}
        }

        for disk in domu.disks() {
            let disk_placement = placement.disks.get(&disk.device_path).ok_or_else(|| {
                ClusterError::structural(format!(
                    "DomU '{}' disk '{}' has no placement",
                    domu.hostname, disk.device_path
                ))
            })?;

            validate_pv_set(
                cluster,
                domu.hostname.as_str(),
                disk.device_path.as_str(),
                &placement.primary,
                disk.total_extents,
                &disk_placement.primary,
            )?;

            if domu.has_secondary() {
                validate_pv_set(
                    cluster,
                    domu.hostname.as_str(),
                    disk.device_path.as_str(),
                    placement.secondary.as_deref().unwrap(),
                    disk.total_extents,
                    &disk_placement.secondary,
                )?;
            } else if !disk_placement.secondary.is_empty() {
                return Err(ClusterError::structural(format!(
                    "DomU '{}' disk '{}' has a secondary placement but no failover reservation",
                    domu.hostname, disk.device_path
                )));
            }
        }
    }
    Ok(())
}

fn validate_pv_set(
    cluster: &Cluster,
    domu_hostname: &str,
    domu_disk_path: &str,
    expected_dom0: &str,
    total_extents: u64,
    pvs: &[PhysicalVolumeConfiguration],
) -> Result<()> {
    if pvs.is_empty() {
        return Err(ClusterError::structural(format!(
            "DomU '{}' disk '{}' has an empty physical volume list",
            domu_hostname, domu_disk_path
        )));
    }

    let mut sum = 0u64;
    for pv in pvs {
        if pv.dom0_hostname != expected_dom0 {
            return Err(ClusterError::structural(format!(
                "DomU '{}' disk '{}' places a physical volume on '{}' instead of its assigned Dom0 '{}'",
                domu_hostname, domu_disk_path, pv.dom0_hostname, expected_dom0
            )));
        }
        let dom0 = cluster.dom0(&pv.dom0_hostname).ok_or_else(|| {
            ClusterError::structural(format!(
                "physical volume references unknown Dom0 '{}'",
                pv.dom0_hostname
            ))
        })?;
        if dom0.disk(&pv.device_path).is_none() {
            return Err(ClusterError::structural(format!(
                "physical volume references unknown Dom0Disk '{}' on '{}'",
                pv.device_path, pv.dom0_hostname
            )));
        }
        sum += pv.extents;
    }

    if sum != total_extents {
        return Err(ClusterError::structural(format!(
            "DomU '{}' disk '{}' physical volumes sum to {} extents, expected {}",
            domu_hostname, domu_disk_path, sum, total_extents
        )));
    }
    Ok(())
}
