//! The constraint analyzer: a pure, multi-rule evaluator over a
//! [`Configuration`](crate::configuration::Configuration), producing a lazily
//! consumed stream of graded [`AnalysisResult`]s.
//!
//! Rules are grouped per-Dom0 (1-8) then per-Dom0Disk (9-10), and are always
//! evaluated in that fixed order so that, for identical input, the result
//! stream is byte-for-byte identical across runs — callers may rely on
//! position, not just content.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::configuration::Configuration;
use crate::error::{ClusterError, Result};
use crate::sink::{CountingSink, ResultSink};
use crate::topology::{Dom0, ProcessorArchitecture, ProcessorType};

/// Graded severity of a single analyzer [`AnalysisResult`], totally ordered
/// so that rule implementations and callers can compare with `<`/`>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

/// The rule-specific payload carried by an [`AnalysisResult`]. A tagged enum
/// rather than `Box<dyn Any>`: the payload's type range is small and fixed
/// (§9), so a closed enum keeps it checkable at the call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResultPayload {
    None,
    Int(i64),
    Bool(bool),
    ProcessorType(ProcessorType),
    ProcessorArchitecture(ProcessorArchitecture),
}

/// A single rule evaluation against a Configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Human-readable subject of the result — typically a hostname.
    pub label: String,
    /// Signed ratio: negative means overcommit, positive means shortfall
    /// toward a limit. Exact meaning is rule-specific; see SPEC_FULL.md §4.1.
    pub deviation: f64,
    pub level: AlertLevel,
    pub payload: ResultPayload,
}

impl AnalysisResult {
    fn new(label: impl Into<String>, deviation: f64, level: AlertLevel, payload: ResultPayload) -> Self {
        Self {
            label: label.into(),
            deviation,
            level,
            payload,
        }
    }
}

/// Drives every rule, in fixed order, against `config`, stopping as soon as
/// `sink.accept` returns `false` or a rule's precondition is violated.
///
/// `minimum_alert_level` is a genuine skip-computation floor: a rule whose
/// maximum possible severity is strictly below it is never evaluated, not
/// merely filtered after the fact.
pub fn analyze(config: &Configuration, minimum_alert_level: AlertLevel, sink: &mut dyn ResultSink) -> Result<()> {
    let cluster = config.cluster();
    let span = tracing::debug_span!("analyze", cluster = %cluster.name, depth = config.depth());
    let _enter = span.enter();

    for dom0 in cluster.dom0s() {
        if !rule_available_ram(config, dom0, sink)? {
            return Ok(());
        }
        if minimum_alert_level <= AlertLevel::High && !rule_allocated_secondary_ram(config, dom0, sink)? {
            return Ok(());
        }
        if minimum_alert_level <= AlertLevel::Low && !rule_processor_type(config, dom0, sink)? {
            return Ok(());
        }
        if !rule_processor_architecture(config, dom0, sink)? {
            return Ok(());
        }
        if minimum_alert_level <= AlertLevel::Low && !rule_processor_speed(config, dom0, sink)? {
            return Ok(());
        }
        if minimum_alert_level <= AlertLevel::Medium && !rule_processor_cores(config, dom0, sink)? {
            return Ok(());
        }
        if minimum_alert_level <= AlertLevel::Medium && !rule_processor_weight(config, dom0, sink)? {
            return Ok(());
        }
        if !rule_requires_hvm(config, dom0, sink)? {
            return Ok(());
        }
    }

    if minimum_alert_level <= AlertLevel::Medium {
        for (dom0_hostname, disk) in cluster.all_disks() {
            let dom0 = cluster.dom0(dom0_hostname).ok_or_else(|| {
                ClusterError::precondition(format!("all_disks() yielded unknown Dom0 '{}'", dom0_hostname))
            })?;
            if !rule_disk_weight(config, dom0, disk, sink)? {
                return Ok(());
            }
            if !rule_disk_speed(config, dom0, disk, sink)? {
                return Ok(());
            }
        }
    }

    Ok(())
}

/// True iff no rule at `AlertLevel::Low` would emit any result above `None`.
/// Short-circuits on the first violation via [`CountingSink`].
pub fn is_optimal(config: &Configuration) -> Result<bool> {
    let mut sink = CountingSink::new();
    analyze(config, AlertLevel::Low, &mut sink)?;
    Ok(!sink.violation_found)
}

/// DomUs with `dom0.hostname` as primary.
fn primaries_on<'a>(
    config: &'a Configuration,
    dom0: &'a Dom0,
) -> impl Iterator<Item = (&'a crate::topology::DomU, &'a crate::configuration::DomUPlacement)> + 'a {
    let cluster = config.cluster();
    config.placements().filter_map(move |(hostname, placement)| {
        if placement.primary == dom0.hostname {
            cluster.domu(hostname).map(|domu| (domu, placement))
        } else {
            None
        }
    })
}

/// DomUs with `dom0.hostname` as secondary and a non-negative secondary RAM
/// reservation (i.e. one that actually needs to be absorbed on failover).
fn reserved_secondaries_on<'a>(
    config: &'a Configuration,
    dom0: &'a Dom0,
) -> impl Iterator<Item = (&'a crate::topology::DomU, &'a crate::configuration::DomUPlacement)> + 'a {
    let cluster = config.cluster();
    config.placements().filter_map(move |(hostname, placement)| {
        if placement.secondary.as_deref() == Some(dom0.hostname.as_str()) {
            cluster.domu(hostname).and_then(|domu| {
                if domu.has_secondary() {
                    Some((domu, placement))
                } else {
                    None
                }
            })
        } else {
            None
        }
    })
}

/// Rule 1: Available RAM.
fn rule_available_ram(config: &Configuration, dom0: &Dom0, sink: &mut dyn ResultSink) -> Result<bool> {
    let allocated: u64 = primaries_on(config, dom0).map(|(domu, _)| domu.primary_ram_mib).sum();
    let free = dom0.installed_ram_mib as i64 - allocated as i64;
    let level = if free < 0 { AlertLevel::Critical } else { AlertLevel::None };
    let deviation = -(free as f64) / dom0.installed_ram_mib as f64;
    Ok(sink.accept(&AnalysisResult::new(&dom0.hostname, deviation, level, ResultPayload::Int(free))))
}

/// Rule 2: Allocated secondary RAM, one result per origin host that has any
/// DomU secondaried here with a non-negative secondary RAM reservation.
fn rule_allocated_secondary_ram(config: &Configuration, dom0: &Dom0, sink: &mut dyn ResultSink) -> Result<bool> {
    let primary_allocated: u64 = primaries_on(config, dom0).map(|(domu, _)| domu.primary_ram_mib).sum();
    let free_primary = dom0.installed_ram_mib as i64 - primary_allocated as i64;

    let mut by_origin: std::collections::BTreeMap<&str, i64> = std::collections::BTreeMap::new();
    for (domu, placement) in reserved_secondaries_on(config, dom0) {
        by_origin
            .entry(placement.primary.as_str())
            .and_modify(|s| *s += domu.secondary_ram_mib)
            .or_insert(domu.secondary_ram_mib);
    }

    for (origin_hostname, s) in by_origin {
        let level = if s > free_primary { AlertLevel::High } else { AlertLevel::None };
        let deviation = (s - free_primary) as f64 / dom0.installed_ram_mib as f64;
        let label = format!("{} (origin {})", dom0.hostname, origin_hostname);
        if !sink.accept(&AnalysisResult::new(label, deviation, level, ResultPayload::Int(s))) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Rule 3: Processor type, checked against every DomU primary here or
/// secondary here with a RAM reservation.
fn rule_processor_type(config: &Configuration, dom0: &Dom0, sink: &mut dyn ResultSink) -> Result<bool> {
    for (domu, _) in primaries_on(config, dom0).chain(reserved_secondaries_on(config, dom0)) {
        let Some(minimum) = domu.minimum_processor_type else {
            continue;
        };
        let level = if dom0.processor_type < minimum { AlertLevel::Low } else { AlertLevel::None };
        let deviation = if level == AlertLevel::None {
            0.0
        } else {
            1.0
        };
        if !sink.accept(&AnalysisResult::new(
            &dom0.hostname,
            deviation,
            level,
            ResultPayload::ProcessorType(minimum),
        )) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Rule 4: Processor architecture. CRITICAL for primaries, HIGH for
/// secondaries — the only rule whose severity depends on primary/secondary
/// role rather than a single fixed level.
fn rule_processor_architecture(config: &Configuration, dom0: &Dom0, sink: &mut dyn ResultSink) -> Result<bool> {
    for (domu, placement) in primaries_on(config, dom0).chain(reserved_secondaries_on(config, dom0)) {
        let is_primary = placement.primary == dom0.hostname;
        let minimum = domu.minimum_processor_architecture;
        let below = dom0.processor_architecture < minimum;
        let level = match (below, is_primary) {
            (true, true) => AlertLevel::Critical,
            (true, false) => AlertLevel::High,
            (false, _) => AlertLevel::None,
        };
        let deviation = if below { 1.0 } else { 0.0 };
        if !sink.accept(&AnalysisResult::new(
            &dom0.hostname,
            deviation,
            level,
            ResultPayload::ProcessorArchitecture(minimum),
        )) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Rule 5: Processor speed. Skipped entirely (per DomU) when the minimum is
/// unspecified.
fn rule_processor_speed(config: &Configuration, dom0: &Dom0, sink: &mut dyn ResultSink) -> Result<bool> {
    for (domu, _) in primaries_on(config, dom0).chain(reserved_secondaries_on(config, dom0)) {
        let minimum = domu.minimum_processor_speed_mhz;
        if minimum == crate::topology::NONE_SENTINEL {
            continue;
        }
        let actual = dom0.processor_speed_mhz as i64;
        let level = if actual < minimum { AlertLevel::Low } else { AlertLevel::None };
        let deviation = (minimum - actual) as f64 / minimum as f64;
        if !sink.accept(&AnalysisResult::new(&dom0.hostname, deviation, level, ResultPayload::Int(actual))) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Rule 6: Processor cores. Skipped when the DomU has no core requirement
/// ([`crate::topology::NONE_SENTINEL`]), per the same -1-means-unset
/// convention as every other "minimum" field in §3.
fn rule_processor_cores(config: &Configuration, dom0: &Dom0, sink: &mut dyn ResultSink) -> Result<bool> {
    for (domu, _) in primaries_on(config, dom0).chain(reserved_secondaries_on(config, dom0)) {
        let minimum = domu.required_processor_cores;
        if minimum == crate::topology::NONE_SENTINEL {
            continue;
        }
        let level = if (dom0.processor_cores as i64) < minimum { AlertLevel::Medium } else { AlertLevel::None };
        let deviation = (minimum as f64 - dom0.processor_cores as f64) / minimum as f64;
        if !sink.accept(&AnalysisResult::new(
            &dom0.hostname,
            deviation,
            level,
            ResultPayload::Int(dom0.processor_cores as i64),
        )) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Rule 7: Available processor weight, aggregated across primaries only. A
/// DomU with no core requirement set ([`crate::topology::NONE_SENTINEL`])
/// consumes no weight here — the sentinel means "no minimum to enforce", not
/// "a negative core count".
fn rule_processor_weight(config: &Configuration, dom0: &Dom0, sink: &mut dyn ResultSink) -> Result<bool> {
    let total = dom0.total_processor_weight() as i64;
    let allocated: i64 = primaries_on(config, dom0)
        .map(|(domu, _)| domu.required_processor_cores.max(0) * domu.processor_weight as i64)
        .sum();
    let free = total - allocated;
    let level = if free < 0 { AlertLevel::Medium } else { AlertLevel::None };
    let deviation = -(free as f64) / total as f64;
    Ok(sink.accept(&AnalysisResult::new(&dom0.hostname, deviation, level, ResultPayload::Int(free))))
}

/// Rule 8: Requires-HVM. CRITICAL for primaries, HIGH for secondaries.
fn rule_requires_hvm(config: &Configuration, dom0: &Dom0, sink: &mut dyn ResultSink) -> Result<bool> {
    for (domu, placement) in primaries_on(config, dom0).chain(reserved_secondaries_on(config, dom0)) {
        if !domu.requires_hvm || dom0.supports_hvm {
            continue;
        }
        let is_primary = placement.primary == dom0.hostname;
        let level = if is_primary { AlertLevel::Critical } else { AlertLevel::High };
        if !sink.accept(&AnalysisResult::new(&dom0.hostname, 1.0, level, ResultPayload::Bool(true))) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Every `(DomU hostname, DomUDisk device path)` pair with a physical volume
/// (primary or secondary) on `(dom0_hostname, disk_device_path)`, paired with
/// the extents it places there. Deduplicated per the §9 open-question
/// resolution: a DomUDisk that happens to have both its primary and
/// secondary volumes on the same disk (not normally possible given the §3
/// different-hosts invariant, but a disk can still receive multiple physical
/// volumes from the same side) is still counted once for weight purposes.
fn disk_occupants<'a>(
    config: &'a Configuration,
    dom0_hostname: &'a str,
    disk_device_path: &'a str,
) -> impl Iterator<Item = (&'a crate::topology::DomU, &'a crate::topology::DomUDisk, u64)> + 'a {
    let cluster = config.cluster();
    config.placements().flat_map(move |(hostname, placement)| {
        let domu = cluster.domu(hostname);
        placement.disks.iter().filter_map(move |(device_path, disk_placement)| {
            let domu = domu?;
            let domu_disk = domu.disk(device_path)?;
            let extents: u64 = disk_placement
                .primary
                .iter()
                .chain(disk_placement.secondary.iter())
                .filter(|pv| pv.dom0_hostname == dom0_hostname && pv.device_path == disk_device_path)
                .map(|pv| pv.extents)
                .sum();
            if extents > 0 {
                Some((domu, domu_disk, extents))
            } else {
                None
            }
        })
    })
}

/// Rule 9: Available disk weight, counting each DomUDisk at most once per
/// disk even if both its primary and secondary volumes happen to land here.
fn rule_disk_weight(
    config: &Configuration,
    dom0: &Dom0,
    disk: &crate::topology::Dom0Disk,
    sink: &mut dyn ResultSink,
) -> Result<bool> {
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut allocated: i64 = 0;
    for (domu, domu_disk, _) in disk_occupants(config, &dom0.hostname, &disk.device_path) {
        if seen.insert((domu.hostname.as_str(), domu_disk.device_path.as_str())) {
            allocated += domu_disk.weight as i64;
        }
    }
    let free = 1024 - allocated;
    let level = if free < 0 { AlertLevel::Medium } else { AlertLevel::None };
    let deviation = -(free as f64) / 1024.0;
    let label = format!("{} {}", dom0.hostname, disk.device_path);
    Ok(sink.accept(&AnalysisResult::new(label, deviation, level, ResultPayload::Int(free))))
}

/// Rule 10: Disk speed per DomUDisk, one result per occupant whose minimum
/// speed this disk fails to meet.
fn rule_disk_speed(
    config: &Configuration,
    dom0: &Dom0,
    disk: &crate::topology::Dom0Disk,
    sink: &mut dyn ResultSink,
) -> Result<bool> {
    let mut by_domu_disk: std::collections::BTreeMap<(&str, &str), (u64, u64)> = std::collections::BTreeMap::new();
    for (domu, domu_disk, extents) in disk_occupants(config, &dom0.hostname, &disk.device_path) {
        let entry = by_domu_disk
            .entry((domu.hostname.as_str(), domu_disk.device_path.as_str()))
            .or_insert((0, domu_disk.total_extents));
        if domu_disk.minimum_speed != crate::topology::NONE_SENTINEL && disk.rotational_speed < domu_disk.minimum_speed {
            entry.0 += extents;
        }
    }

    for ((domu_hostname, disk_path), (too_slow_extents, total_extents)) in by_domu_disk {
        if too_slow_extents == 0 {
            continue;
        }
        let level = AlertLevel::Medium;
        let deviation = too_slow_extents as f64 / total_extents as f64;
        let label = format!("{} {} ({} {})", dom0.hostname, disk.device_path, domu_hostname, disk_path);
        if !sink.accept(&AnalysisResult::new(label, deviation, level, ResultPayload::Int(too_slow_extents as i64))) {
            return Ok(false);
        }
    }
    Ok(true)
}
