//! Cost-to-go estimators for the search driver, §4.2.
//!
//! Both heuristics are plain functions folding over the analyzer's result
//! stream via a local accumulator captured by a `FnMut` sink closure — no
//! heuristic carries state across calls, so both are trivially `Send + Sync`
//! and may be shared across search workers without synchronization (§5).

use crate::analysis::{analyze, AlertLevel};
use crate::configuration::Configuration;
use crate::error::Result;

/// h(c, g) = g if `c` is optimal, else g + 1. Admissible but uninformative —
/// every optimal configuration has h = g, nothing else does.
pub fn least_informed(config: &Configuration, g: u64) -> Result<u64> {
    let mut violation_found = false;
    let mut probe = |result: &crate::analysis::AnalysisResult| {
        if result.level > AlertLevel::None {
            violation_found = true;
            false
        } else {
            true
        }
    };
    analyze(config, AlertLevel::Low, &mut probe)?;
    Ok(if violation_found { g + 1 } else { g })
}

/// h(c, g) = g + Σ w(level) over every result at the LOW floor, weighted
/// `{LOW: 4, MEDIUM: 8, HIGH: 16, CRITICAL: 1024}`. The exponential gap
/// between CRITICAL and the lesser levels biases the search toward
/// eliminating hard-constraint violations first, even at the cost of a
/// longer plan.
pub fn exponential(config: &Configuration, g: u64) -> Result<f64> {
    let mut total = 0u64;
    let mut accumulate = |result: &crate::analysis::AnalysisResult| {
        // NONE is the normal result for a healthy Dom0/DomU pair — every
        // rule emits one whether or not it's violated — so it contributes
        // no weight rather than signaling a bug.
        let weight = match result.level {
            AlertLevel::None => 0,
            AlertLevel::Low => 4,
            AlertLevel::Medium => 8,
            AlertLevel::High => 16,
            AlertLevel::Critical => 1024,
        };
        total += weight;
        true
    };
    analyze(config, AlertLevel::Low, &mut accumulate)?;
    Ok(g as f64 + total as f64)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::configuration::{DiskPlacement, DomUPlacement, PhysicalVolumeConfiguration};
    use crate::topology::{Cluster, Dom0, Dom0Disk, DomU, DomUDisk, ProcessorArchitecture, ProcessorType};

    fn single_host_config(primary_ram: u64) -> Configuration {
        let dom0 = Dom0::new(
            "host-a",
            16384,
            ProcessorType::XeonSkylake,
            ProcessorArchitecture::X86_64,
            2400,
            4,
            true,
            vec![Dom0Disk::new("/dev/sda", 7200)],
        );
        let domu = DomU::new(
            "guest-a",
            primary_ram,
            -1,
            1,
            512,
            None,
            ProcessorArchitecture::I686,
            -1,
            false,
            vec![DomUDisk::new("xvda", 200, -1, 256)],
        );
        let cluster = Arc::new(Cluster::new("c1", vec![dom0], vec![domu]).unwrap());
        let mut disks = BTreeMap::new();
        disks.insert(
            "xvda".to_string(),
            DiskPlacement {
                primary: vec![PhysicalVolumeConfiguration::new("host-a", "/dev/sda", 200)],
                secondary: Vec::new(),
            },
        );
        let mut placements = BTreeMap::new();
        placements.insert(
            "guest-a".to_string(),
            DomUPlacement {
                primary: "host-a".to_string(),
                secondary: None,
                disks,
            },
        );
        Configuration::initial(cluster, placements).unwrap()
    }

    #[test]
    fn grounding_property_holds_for_optimal_configurations() {
        let config = single_host_config(4096);
        assert_eq!(least_informed(&config, 7).unwrap(), 7);
        assert_eq!(exponential(&config, 7).unwrap(), 7.0);
    }

    #[test]
    fn least_informed_adds_one_for_any_violation() {
        let config = single_host_config(20480);
        assert_eq!(least_informed(&config, 3).unwrap(), 4);
    }

    #[test]
    fn exponential_weighs_critical_violations_heavily() {
        let config = single_host_config(20480);
        assert_eq!(exponential(&config, 0).unwrap(), 1024.0);
    }
}
