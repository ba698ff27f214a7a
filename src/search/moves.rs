//! Enumerates the legal single-step transitions from a `Configuration`, §4.3.
//!
//! Every candidate is built through [`Configuration::successor`], which
//! validates the §3 structural invariants eagerly — a move that would
//! produce an invalid configuration (e.g. moving a secondary onto the
//! current primary) simply fails to validate and is dropped rather than
//! surfaced as an error: branch-and-prune is an expected, routine outcome of
//! move generation, not malformed input.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::configuration::{Configuration, DiskPlacement, DomUPlacement, PhysicalVolumeConfiguration};
use crate::error::Result;
use crate::topology::Cluster;

/// A single legal transition between configurations, retained on each
/// resulting `Configuration` so a search path can be reported back as a
/// sequence of moves rather than just a sequence of states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Move {
    /// Swap a DomU's primary and secondary Dom0 (and their physical volume
    /// assignments) in place.
    SwapPrimarySecondary { domu_hostname: String },
    /// Reassign a DomU's secondary Dom0 to a different host, re-striping its
    /// secondary physical volumes onto that host's first disk with room.
    ReassignSecondary {
        domu_hostname: String,
        new_secondary: String,
    },
    /// Migrate one DomUDisk's secondary physical-volume layout to a
    /// different Dom0Disk on the same secondary host.
    MigrateSecondaryDisk {
        domu_hostname: String,
        disk_device_path: String,
        new_dom0disk: String,
    },
}

/// All legal successors of `config`, in a fixed, reproducible order: DomUs
/// in cluster iteration order, and for each DomU the three move kinds in the
/// order listed on [`Move`], each in turn iterating candidate target hosts
/// in cluster iteration order.
pub fn generate_successors(config: &Arc<Configuration>) -> Result<Vec<Arc<Configuration>>> {
    let cluster = Arc::clone(config.cluster());
    let mut successors = Vec::new();

    for domu in cluster.domus() {
        let Some(placement) = config.placement(&domu.hostname) else {
            continue;
        };

        if let Some(candidate) = try_swap_primary_secondary(config, &cluster, &domu.hostname, placement)? {
            successors.push(candidate);
        }

        if domu.has_secondary() {
            for other in cluster.dom0s() {
                if let Some(candidate) =
                    try_reassign_secondary(config, &cluster, &domu.hostname, placement, &other.hostname)?
                {
                    successors.push(candidate);
                }
            }

            for disk in domu.disks() {
                for (dom0_hostname, dom0disk) in cluster.all_disks() {
                    if let Some(candidate) = try_migrate_secondary_disk(
                        config,
                        &cluster,
                        &domu.hostname,
                        placement,
                        &disk.device_path,
                        dom0_hostname,
                        &dom0disk.device_path,
                    )? {
                        successors.push(candidate);
                    }
                }
            }
        }
    }

    Ok(successors)
}

fn try_swap_primary_secondary(
    config: &Arc<Configuration>,
    cluster: &Arc<Cluster>,
    domu_hostname: &str,
    placement: &DomUPlacement,
) -> Result<Option<Arc<Configuration>>> {
    let Some(secondary) = placement.secondary.clone() else {
        return Ok(None);
    };

    let mut new_disks = BTreeMap::new();
    for (device_path, disk_placement) in &placement.disks {
        new_disks.insert(
            device_path.clone(),
            DiskPlacement {
                primary: disk_placement.secondary.clone(),
                secondary: disk_placement.primary.clone(),
            },
        );
    }
    let new_placement = DomUPlacement {
        primary: secondary,
        secondary: Some(placement.primary.clone()),
        disks: new_disks,
    };

    build_successor(
        config,
        domu_hostname,
        new_placement,
        Move::SwapPrimarySecondary {
            domu_hostname: domu_hostname.to_string(),
        },
    )
}

fn try_reassign_secondary(
    config: &Arc<Configuration>,
    cluster: &Arc<Cluster>,
    domu_hostname: &str,
    placement: &DomUPlacement,
    new_secondary: &str,
) -> Result<Option<Arc<Configuration>>> {
    if new_secondary == placement.primary {
        return Ok(None);
    }
    if placement.secondary.as_deref() == Some(new_secondary) {
        return Ok(None);
    }

    let domu = match cluster.domu(domu_hostname) {
        Some(domu) => domu,
        None => return Ok(None),
    };

    let mut new_disks = BTreeMap::new();
    for disk in domu.disks() {
        let current = placement.disks.get(&disk.device_path);
        let primary = current.map(|d| d.primary.clone()).unwrap_or_default();
        let secondary = match first_disk_with_room(cluster, new_secondary, disk.total_extents) {
            Some(target) => vec![PhysicalVolumeConfiguration::new(
                target.0.to_string(),
                target.1.to_string(),
                disk.total_extents,
            )],
            None => return Ok(None),
        };
        new_disks.insert(disk.device_path.clone(), DiskPlacement { primary, secondary });
    }

    let new_placement = DomUPlacement {
        primary: placement.primary.clone(),
        secondary: Some(new_secondary.to_string()),
        disks: new_disks,
    };

    build_successor(
        config,
        domu_hostname,
        new_placement,
        Move::ReassignSecondary {
            domu_hostname: domu_hostname.to_string(),
            new_secondary: new_secondary.to_string(),
        },
    )
}

fn try_migrate_secondary_disk(
    config: &Arc<Configuration>,
    cluster: &Arc<Cluster>,
    domu_hostname: &str,
    placement: &DomUPlacement,
    disk_device_path: &str,
    new_dom0_hostname: &str,
    new_dom0disk_path: &str,
) -> Result<Option<Arc<Configuration>>> {
    let Some(secondary_host) = &placement.secondary else {
        return Ok(None);
    };
    if new_dom0_hostname != secondary_host {
        return Ok(None);
    }
    let Some(current) = placement.disks.get(disk_device_path) else {
        return Ok(None);
    };
    let already_here = current
        .secondary
        .iter()
        .all(|pv| pv.dom0_hostname == new_dom0_hostname && pv.device_path == new_dom0disk_path);
    if already_here {
        return Ok(None);
    }

    let domu = match cluster.domu(domu_hostname) {
        Some(domu) => domu,
        None => return Ok(None),
    };
    let Some(disk) = domu.disk(disk_device_path) else {
        return Ok(None);
    };

    let mut new_disks = placement.disks.clone();
    new_disks.insert(
        disk_device_path.to_string(),
        DiskPlacement {
            primary: current.primary.clone(),
            secondary: vec![PhysicalVolumeConfiguration::new(
                new_dom0_hostname.to_string(),
                new_dom0disk_path.to_string(),
                disk.total_extents,
            )],
        },
    );

    let new_placement = DomUPlacement {
        primary: placement.primary.clone(),
        secondary: placement.secondary.clone(),
        disks: new_disks,
    };

    build_successor(
        config,
        domu_hostname,
        new_placement,
        Move::MigrateSecondaryDisk {
            domu_hostname: domu_hostname.to_string(),
            disk_device_path: disk_device_path.to_string(),
            new_dom0disk: new_dom0disk_path.to_string(),
        },
    )
}

/// First `(Dom0 hostname, Dom0Disk device path)` on `dom0_hostname`, in
/// cluster disk-iteration order, whose capacity comfortably fits
/// `required_extents` alongside this crate's simplifying assumption that a
/// disk's total extent budget is unbounded for migration purposes beyond
/// what the §3 extent-sum invariant already enforces per DomUDisk; the
/// filter here is existence of a disk on the target host, not a capacity
/// model the analyzer itself does not track at the Dom0Disk level.
fn first_disk_with_room<'a>(cluster: &'a Cluster, dom0_hostname: &str, _required_extents: u64) -> Option<(&'a str, &'a str)> {
    cluster
        .all_disks()
        .find(|(hostname, _)| *hostname == dom0_hostname)
        .map(|(hostname, disk)| (hostname, disk.device_path.as_str()))
}

fn build_successor(
    config: &Arc<Configuration>,
    domu_hostname: &str,
    new_placement: DomUPlacement,
    produced_by: Move,
) -> Result<Option<Arc<Configuration>>> {
    let mut placements: BTreeMap<String, DomUPlacement> =
        config.placements().map(|(k, v)| (k.to_string(), v.clone())).collect();
    placements.insert(domu_hostname.to_string(), new_placement);

    match Configuration::successor(Arc::clone(config), placements, produced_by) {
        Ok(candidate) => Ok(Some(Arc::new(candidate))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Dom0, Dom0Disk, DomU, DomUDisk, ProcessorArchitecture, ProcessorType};

    fn two_host_cluster() -> Arc<Cluster> {
        let host_a = Dom0::new(
            "host-a",
            16384,
            ProcessorType::XeonSkylake,
            ProcessorArchitecture::X86_64,
            2400,
            4,
            true,
            vec![Dom0Disk::new("/dev/sda", 7200)],
        );
        let host_b = Dom0::new(
            "host-b",
            16384,
            ProcessorType::XeonSkylake,
            ProcessorArchitecture::X86_64,
            2400,
            4,
            true,
            vec![Dom0Disk::new("/dev/sdb", 7200)],
        );
        let domu = DomU::new(
            "guest-a",
            4096,
            4096,
            1,
            512,
            None,
            ProcessorArchitecture::I686,
            -1,
            false,
            vec![DomUDisk::new("xvda", 200, -1, 256)],
        );
        Arc::new(Cluster::new("c1", vec![host_a, host_b], vec![domu]).unwrap())
    }

    fn initial_config(cluster: Arc<Cluster>) -> Arc<Configuration> {
        let mut disks = BTreeMap::new();
        disks.insert(
            "xvda".to_string(),
            DiskPlacement {
                primary: vec![PhysicalVolumeConfiguration::new("host-a", "/dev/sda", 200)],
                secondary: vec![PhysicalVolumeConfiguration::new("host-b", "/dev/sdb", 200)],
            },
        );
        let mut placements = BTreeMap::new();
        placements.insert(
            "guest-a".to_string(),
            DomUPlacement {
                primary: "host-a".to_string(),
                secondary: Some("host-b".to_string()),
                disks,
            },
        );
        Arc::new(Configuration::initial(cluster, placements).unwrap())
    }

    #[test]
    fn generates_at_least_one_successor() {
        let cluster = two_host_cluster();
        let config = initial_config(cluster);
        let successors = generate_successors(&config).unwrap();
        assert!(!successors.is_empty());
    }

    #[test]
    fn swap_primary_secondary_actually_swaps() {
        let cluster = two_host_cluster();
        let config = initial_config(cluster);
        let successors = generate_successors(&config).unwrap();
        let swapped = successors
            .iter()
            .find(|c| matches!(c.produced_by(), Some(Move::SwapPrimarySecondary { .. })))
            .expect("expected a swap successor");
        let placement = swapped.placement("guest-a").unwrap();
        assert_eq!(placement.primary, "host-b");
        assert_eq!(placement.secondary.as_deref(), Some("host-a"));
    }

    #[test]
    fn every_successor_is_structurally_valid() {
        let cluster = two_host_cluster();
        let config = initial_config(cluster);
        for successor in generate_successors(&config).unwrap() {
            assert_ne!(
                successor.placement("guest-a").unwrap().primary,
                successor.placement("guest-a").unwrap().secondary.clone().unwrap()
            );
        }
    }

    #[test]
    fn successor_generation_is_deterministic() {
        let cluster = two_host_cluster();
        let config = initial_config(cluster);
        let first = generate_successors(&config).unwrap();
        let second = generate_successors(&config).unwrap();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.produced_by(), b.produced_by());
        }
    }
}
