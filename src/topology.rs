//! Immutable description of a cluster: hypervisor hosts (Dom0), the disks
//! they expose, and the guest workloads (DomU) that need to run somewhere.
//!
//! Every type here is constructed once per optimization run and never
//! mutated afterward. Host/guest identity is by hostname: per-cluster
//! uniqueness is enforced at construction, and since each run analyzes
//! exactly one cluster (see SPEC_FULL.md's non-goals), hostname alone is a
//! sufficient, canonical comparison key — there is no cross-cluster
//! comparison to disambiguate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, Result};

/// Sentinel used throughout the data model for "no minimum specified".
pub const NONE_SENTINEL: i64 = -1;

/// Processor generation, ordered oldest/slowest to newest/fastest. Used only
/// for ordinal comparisons (`Dom0` generation vs `DomU` minimum) — never for
/// anything but `>=`/`<` checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProcessorType {
    Opteron,
    XeonNehalem,
    XeonWestmere,
    XeonSandyBridge,
    XeonIvyBridge,
    XeonHaswell,
    XeonBroadwell,
    XeonSkylake,
    EpycRome,
    EpycMilan,
}

/// Processor instruction-set level, ordered least to most capable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProcessorArchitecture {
    I686,
    X86_64,
}

/// A physical disk attached to a Dom0, identified within that host by device
/// path (e.g. `/dev/sdb`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dom0Disk {
    pub device_path: String,
    /// Rotational speed in RPM; [`NONE_SENTINEL`] means unspecified.
    pub rotational_speed: i64,
}

impl Dom0Disk {
    pub fn new(device_path: impl Into<String>, rotational_speed: i64) -> Self {
        Self {
            device_path: device_path.into(),
            rotational_speed,
        }
    }
}

/// A physical hypervisor host.
#[derive(Debug, Clone, Serialize)]
pub struct Dom0 {
    pub hostname: String,
    pub installed_ram_mib: u64,
    pub processor_type: ProcessorType,
    pub processor_architecture: ProcessorArchitecture,
    pub processor_speed_mhz: u32,
    pub processor_cores: u32,
    pub supports_hvm: bool,
    disks: Vec<Dom0Disk>,
    #[serde(skip)]
    disk_index: HashMap<String, usize>,
}

impl Dom0 {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hostname: impl Into<String>,
        installed_ram_mib: u64,
        processor_type: ProcessorType,
        processor_architecture: ProcessorArchitecture,
        processor_speed_mhz: u32,
        processor_cores: u32,
        supports_hvm: bool,
        disks: Vec<Dom0Disk>,
    ) -> Self {
        let disk_index = disks
            .iter()
            .enumerate()
            .map(|(i, d)| (d.device_path.clone(), i))
            .collect();
        Self {
            hostname: hostname.into(),
            installed_ram_mib,
            processor_type,
            processor_architecture,
            processor_speed_mhz,
            processor_cores,
            supports_hvm,
            disks,
            disk_index,
        }
    }

    pub fn disk(&self, device_path: &str) -> Option<&Dom0Disk> {
        self.disk_index.get(device_path).map(|&i| &self.disks[i])
    }

    /// In construction order — iteration order is part of this crate's
    /// determinism contract (see SPEC_FULL.md §4.1, §4.3).
    pub fn disks(&self) -> impl Iterator<Item = &Dom0Disk> {
        self.disks.iter()
    }

    pub fn total_processor_weight(&self) -> u32 {
        self.processor_cores * 1024
    }
}

impl PartialEq for Dom0 {
    fn eq(&self, other: &Self) -> bool {
        self.hostname == other.hostname
    }
}
impl Eq for Dom0 {}
impl std::hash::Hash for Dom0 {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hostname.hash(state);
    }
}

/// Mirrors [`Dom0`]'s wire shape; `disk_index` is rebuilt rather than
/// deserialized since it is derived data.
#[derive(Deserialize)]
struct Dom0Data {
    hostname: String,
    installed_ram_mib: u64,
    processor_type: ProcessorType,
    processor_architecture: ProcessorArchitecture,
    processor_speed_mhz: u32,
    processor_cores: u32,
    supports_hvm: bool,
    disks: Vec<Dom0Disk>,
}

impl<'de> Deserialize<'de> for Dom0 {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let data = Dom0Data::deserialize(deserializer)?;
        Ok(Dom0::new(
            data.hostname,
            data.installed_ram_mib,
            data.processor_type,
            data.processor_architecture,
            data.processor_speed_mhz,
            data.processor_cores,
            data.supports_hvm,
            data.disks,
        ))
    }
}

/// A logical disk attached to a guest, backed by one or more physical
/// volumes once placed by a [`crate::configuration::Configuration`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomUDisk {
    pub device_path: String,
    pub total_extents: u64,
    /// Minimum acceptable `Dom0Disk::rotational_speed`; [`NONE_SENTINEL`]
    /// means no minimum.
    pub minimum_speed: i64,
    /// 0-1024 scale, analogous to processor weight.
    pub weight: u32,
}

impl DomUDisk {
    pub fn new(
        device_path: impl Into<String>,
        total_extents: u64,
        minimum_speed: i64,
        weight: u32,
    ) -> Self {
        Self {
            device_path: device_path.into(),
            total_extents,
            minimum_speed,
            weight,
        }
    }
}

/// A guest virtual machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomU {
    pub hostname: String,
    pub primary_ram_mib: u64,
    /// [`NONE_SENTINEL`] means this guest has no failover reservation.
    pub secondary_ram_mib: i64,
    /// [`NONE_SENTINEL`] means no minimum core count.
    pub required_processor_cores: i64,
    /// 0-1024 scale; 1024 == one whole core entitlement.
    pub processor_weight: u32,
    pub minimum_processor_type: Option<ProcessorType>,
    pub minimum_processor_architecture: ProcessorArchitecture,
    /// [`NONE_SENTINEL`] means no minimum processor speed.
    pub minimum_processor_speed_mhz: i64,
    pub requires_hvm: bool,
    disks: Vec<DomUDisk>,
}

impl DomU {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hostname: impl Into<String>,
        primary_ram_mib: u64,
        secondary_ram_mib: i64,
        required_processor_cores: i64,
        processor_weight: u32,
        minimum_processor_type: Option<ProcessorType>,
        minimum_processor_architecture: ProcessorArchitecture,
        minimum_processor_speed_mhz: i64,
        requires_hvm: bool,
        disks: Vec<DomUDisk>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            primary_ram_mib,
            secondary_ram_mib,
            required_processor_cores,
            processor_weight,
            minimum_processor_type,
            minimum_processor_architecture,
            minimum_processor_speed_mhz,
            requires_hvm,
            disks,
        }
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary_ram_mib != NONE_SENTINEL
    }

    pub fn disks(&self) -> impl Iterator<Item = &DomUDisk> {
        self.disks.iter()
    }

    pub fn disk(&self, device_path: &str) -> Option<&DomUDisk> {
        self.disks.iter().find(|d| d.device_path == device_path)
    }
}

impl PartialEq for DomU {
    fn eq(&self, other: &Self) -> bool {
        self.hostname == other.hostname
    }
}
impl Eq for DomU {}
impl std::hash::Hash for DomU {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hostname.hash(state);
    }
}

/// A named collection of Dom0 hosts and the DomU guests that need placing
/// on them. Built once per optimization run; every accessor borrows from
/// `self` rather than handing out owned copies.
#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    pub name: String,
    dom0s: Vec<Dom0>,
    domus: Vec<DomU>,
    #[serde(skip)]
    dom0_index: HashMap<String, usize>,
    #[serde(skip)]
    domu_index: HashMap<String, usize>,
}

impl Cluster {
    pub fn new(name: impl Into<String>, dom0s: Vec<Dom0>, domus: Vec<DomU>) -> Result<Self> {
        let mut dom0_index = HashMap::with_capacity(dom0s.len());
        for (i, host) in dom0s.iter().enumerate() {
            if dom0_index.insert(host.hostname.clone(), i).is_some() {
                return Err(ClusterError::structural(format!(
                    "duplicate Dom0 hostname '{}'",
                    host.hostname
                )));
            }
        }
        let mut domu_index = HashMap::with_capacity(domus.len());
        for (i, guest) in domus.iter().enumerate() {
            if domu_index.insert(guest.hostname.clone(), i).is_some() {
                return Err(ClusterError::structural(format!(
                    "duplicate DomU hostname '{}'",
                    guest.hostname
                )));
            }
        }
        Ok(Self {
            name: name.into(),
            dom0s,
            domus,
            dom0_index,
            domu_index,
        })
    }

    pub fn dom0(&self, hostname: &str) -> Option<&Dom0> {
        self.dom0_index.get(hostname).map(|&i| &self.dom0s[i])
    }

    pub fn domu(&self, hostname: &str) -> Option<&DomU> {
        self.domu_index.get(hostname).map(|&i| &self.domus[i])
    }

    pub fn dom0s(&self) -> impl Iterator<Item = &Dom0> {
        self.dom0s.iter()
    }

    pub fn domus(&self) -> impl Iterator<Item = &DomU> {
        self.domus.iter()
    }

    /// Every `(Dom0 hostname, Dom0Disk)` pair in the cluster, in stable
    /// Dom0-then-disk order so that rule evaluation (and move generation,
    /// which picks the first eligible disk) is reproducible across runs.
    pub fn all_disks(&self) -> impl Iterator<Item = (&str, &Dom0Disk)> {
        self.dom0s
            .iter()
            .flat_map(|host| host.disks().map(move |disk| (host.hostname.as_str(), disk)))
    }
}

/// Mirrors [`Cluster`]'s wire shape; the hostname indices are rebuilt by
/// [`Cluster::new`] rather than deserialized, so a deserialized `Cluster` is
/// validated exactly as if it had been constructed directly.
#[derive(Deserialize)]
struct ClusterData {
    name: String,
    dom0s: Vec<Dom0>,
    domus: Vec<DomU>,
}

impl<'de> Deserialize<'de> for Cluster {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let data = ClusterData::deserialize(deserializer)?;
        Cluster::new(data.name, data.dom0s, data.domus).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dom0(hostname: &str) -> Dom0 {
        Dom0::new(
            hostname,
            16384,
            ProcessorType::XeonSkylake,
            ProcessorArchitecture::X86_64,
            2400,
            4,
            true,
            vec![Dom0Disk::new("/dev/sda", 7200)],
        )
    }

    #[test]
    fn rejects_duplicate_dom0_hostnames() {
        let err = Cluster::new(
            "c1",
            vec![sample_dom0("host-a"), sample_dom0("host-a")],
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ClusterError::Structural(_)));
    }

    #[test]
    fn looks_up_by_hostname() {
        let cluster = Cluster::new("c1", vec![sample_dom0("host-a")], Vec::new()).unwrap();
        assert!(cluster.dom0("host-a").is_some());
        assert!(cluster.dom0("host-b").is_none());
    }

    #[test]
    fn processor_type_is_ordered() {
        assert!(ProcessorType::Opteron < ProcessorType::XeonSkylake);
        assert!(ProcessorArchitecture::I686 < ProcessorArchitecture::X86_64);
    }

    /// A `Cluster` round-tripped through JSON must rebuild its hostname and
    /// disk-path indices, not just its visible fields — §6's "loader can be
    /// written against this crate without modification" only holds if the
    /// indices survive deserialization.
    #[test]
    fn cluster_round_trips_through_json_with_indices_rebuilt() {
        let cluster = Cluster::new("c1", vec![sample_dom0("host-a")], Vec::new()).unwrap();
        let json = serde_json::to_string(&cluster).unwrap();
        let restored: Cluster = serde_json::from_str(&json).unwrap();

        let dom0 = restored.dom0("host-a").expect("hostname index must be rebuilt");
        assert!(dom0.disk("/dev/sda").is_some(), "disk index must be rebuilt");
        assert!(restored.dom0("host-b").is_none());
    }

    #[test]
    fn deserializing_a_cluster_with_duplicate_hostnames_fails() {
        let json = serde_json::json!({
            "name": "c1",
            "dom0s": [
                {
                    "hostname": "host-a",
                    "installed_ram_mib": 16384,
                    "processor_type": "XeonSkylake",
                    "processor_architecture": "X86_64",
                    "processor_speed_mhz": 2400,
                    "processor_cores": 4,
                    "supports_hvm": true,
                    "disks": []
                },
                {
                    "hostname": "host-a",
                    "installed_ram_mib": 8192,
                    "processor_type": "Opteron",
                    "processor_architecture": "I686",
                    "processor_speed_mhz": 1200,
                    "processor_cores": 2,
                    "supports_hvm": false,
                    "disks": []
                }
            ],
            "domus": []
        })
        .to_string();

        let result: std::result::Result<Cluster, _> = serde_json::from_str(&json);
        assert!(result.is_err());
    }
}
