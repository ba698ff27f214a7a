//! Best-first (A*-style) search over `Configuration`s, §4.4.
//!
//! The driver never mutates analyzer output — every score is obtained by
//! re-invoking the heuristic on a freshly generated configuration. Frontier
//! and closed set are the only mutable state; both live on the stack of
//! [`optimize`], never shared.

pub mod moves;

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::analysis::is_optimal;
use crate::configuration::{ConfigFingerprint, Configuration};
use crate::error::Result;
use crate::search::moves::generate_successors;

/// A heuristic function, as described in §4.2: `h(config, g)`.
pub type Heuristic = fn(&Configuration, u64) -> Result<f64>;

/// Options governing a single `optimize` run. Not to be confused with a
/// placement `Configuration` — this is the ambient "how do we search", not
/// "where are the guests".
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Upper bound on expanded nodes before giving up; `None` means
    /// unbounded.
    pub node_cap: Option<u64>,
    /// Checked once per expansion; returning `true` aborts the search with
    /// `SearchOutcome::Cancelled`.
    pub cancellation: Option<Arc<AtomicBool>>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            node_cap: None,
            cancellation: None,
        }
    }
}

impl SearchOptions {
    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .map(|flag| flag.load(AtomicOrdering::Relaxed))
            .unwrap_or(false)
    }
}

/// The result of a search run. Exhaustion, cancellation, and hitting the
/// node cap are normal outcomes, not errors (§7) — only a `ClusterError`
/// from a malformed input configuration propagates as `Err`.
#[derive(Debug, Clone)]
pub enum SearchOutcome {
    /// An optimal configuration was reached; the path runs from the initial
    /// configuration (inclusive) to the optimal one (inclusive).
    Path(Vec<Arc<Configuration>>),
    /// The frontier emptied without finding an optimal configuration.
    Exhausted,
    /// The cancellation token was observed set before an optimal
    /// configuration was reached.
    Cancelled,
    /// The node-expansion cap was reached first.
    NodeCapReached,
}

struct FrontierEntry {
    f: ordered_float::NotNan,
    g: u64,
    generation: u64,
    config: Arc<Configuration>,
}

/// A thin wrapper around `f64` that panics never: NaN cannot arise from this
/// crate's heuristics, but the `Ord` impl required by `BinaryHeap` must be
/// total, so we assert the invariant once at construction rather than carry
/// a fallible comparison through every heap operation.
mod ordered_float {
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct NotNan(f64);

    impl NotNan {
        pub fn new(value: f64) -> Self {
            debug_assert!(!value.is_nan(), "heuristic produced NaN");
            Self(value)
        }

        pub fn value(&self) -> f64 {
            self.0
        }
    }

    impl Eq for NotNan {}
    impl PartialOrd for NotNan {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }
    impl Ord for NotNan {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
        }
    }
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.f == other.f && self.g == other.g && self.generation == other.generation
    }
}
impl Eq for FrontierEntry {}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontierEntry {
    /// `BinaryHeap` is a max-heap; we want the *smallest* f (ties: smallest
    /// g, then earliest generation) popped first, so every comparison here
    /// is reversed relative to the natural ordering of its fields.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .cmp(&self.f)
            .then_with(|| other.g.cmp(&self.g))
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

/// Drives best-first search from `initial` toward an optimal configuration,
/// using `heuristic` to order the frontier.
pub fn optimize(initial: Arc<Configuration>, heuristic: Heuristic, options: &SearchOptions) -> Result<SearchOutcome> {
    let mut frontier = BinaryHeap::new();
    let mut best_g: HashMap<ConfigFingerprint, u64> = HashMap::new();
    let mut closed: HashSet<ConfigFingerprint> = HashSet::new();
    let mut generation: u64 = 0;
    let mut expanded: u64 = 0;

    let initial_f = heuristic(&initial, 0)?;
    frontier.push(FrontierEntry {
        f: ordered_float::NotNan::new(initial_f),
        g: 0,
        generation,
        config: initial,
    });

    while let Some(entry) = frontier.pop() {
        if options.is_cancelled() {
            return Ok(SearchOutcome::Cancelled);
        }
        if let Some(cap) = options.node_cap {
            if expanded >= cap {
                return Ok(SearchOutcome::NodeCapReached);
            }
        }

        let fingerprint = entry.config.fingerprint();
        if closed.contains(&fingerprint) {
            continue;
        }

        let span = tracing::debug_span!("expand", depth = entry.g, f = entry.f.value());
        let _enter = span.enter();

        if is_optimal(&entry.config)? {
            return Ok(SearchOutcome::Path(entry.config.path_from_root()));
        }

        closed.insert(fingerprint);
        expanded += 1;

        for successor in generate_successors(&entry.config)? {
            let successor_g = successor.depth() as u64;
            let successor_fingerprint = successor.fingerprint();
            if closed.contains(&successor_fingerprint) {
                continue;
            }
            if let Some(&recorded_g) = best_g.get(&successor_fingerprint) {
                if recorded_g <= successor_g {
                    continue;
                }
            }
            best_g.insert(successor_fingerprint, successor_g);

            let h = heuristic(&successor, successor_g)?;
            generation += 1;
            frontier.push(FrontierEntry {
                f: ordered_float::NotNan::new(h),
                g: successor_g,
                generation,
                config: successor,
            });
        }
    }

    Ok(SearchOutcome::Exhausted)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::configuration::{DiskPlacement, DomUPlacement, PhysicalVolumeConfiguration};
    use crate::heuristic::{exponential, least_informed};
    use crate::topology::{Cluster, Dom0, Dom0Disk, DomU, DomUDisk, ProcessorArchitecture, ProcessorType};

    fn overcommitted_config() -> Arc<Configuration> {
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
            20480,
            -1,
            1,
            512,
            None,
            ProcessorArchitecture::I686,
            -1,
            false,
            vec![DomUDisk::new("xvda", 200, -1, 256)],
        );
        let cluster = Arc::new(Cluster::new("c1", vec![host_a, host_b], vec![domu]).unwrap());
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
        Arc::new(Configuration::initial(cluster, placements).unwrap())
    }

    #[test]
    fn returns_exhausted_when_no_move_can_fix_the_violation() {
        // No move generated by this crate's move set relieves a primary-RAM
        // overcommit on a DomU with no secondary reservation (the generator
        // only ever touches secondary placement), so the search must exhaust.
        let config = overcommitted_config();
        let outcome = optimize(config, |c, g| exponential(c, g), &SearchOptions::default()).unwrap();
        assert!(matches!(outcome, SearchOutcome::Exhausted));
    }

    #[test]
    fn node_cap_is_honored() {
        let config = overcommitted_config();
        let options = SearchOptions {
            node_cap: Some(0),
            cancellation: None,
        };
        let outcome = optimize(config, |c, g| least_informed(c, g).map(|h| h as f64), &options).unwrap();
        assert!(matches!(outcome, SearchOutcome::NodeCapReached));
    }

    #[test]
    fn cancellation_token_stops_the_search() {
        let config = overcommitted_config();
        let flag = Arc::new(AtomicBool::new(true));
        let options = SearchOptions {
            node_cap: None,
            cancellation: Some(flag),
        };
        let outcome = optimize(config, |c, g| exponential(c, g), &options).unwrap();
        assert!(matches!(outcome, SearchOutcome::Cancelled));
    }

    #[test]
    fn path_search_finds_an_optimal_configuration_when_reachable() {
        let host_a = Dom0::new(
            "host-a",
            16384,
            ProcessorType::XeonSkylake,
            ProcessorArchitecture::X86_64,
            2400,
            4,
            true,
            Vec::new(),
        );
        let host_b = Dom0::new(
            "host-b",
            4096,
            ProcessorType::XeonSkylake,
            ProcessorArchitecture::X86_64,
            2400,
            4,
            true,
            Vec::new(),
        );
        let domu = DomU::new(
            "guest-a", 2048, 2048, 0, 0, None, ProcessorArchitecture::I686, -1, false, Vec::new(),
        );
        let cluster = Arc::new(Cluster::new("c1", vec![host_a, host_b], vec![domu]).unwrap());
        let mut placements = BTreeMap::new();
        placements.insert(
            "guest-a".to_string(),
            DomUPlacement {
                primary: "host-b".to_string(),
                secondary: Some("host-a".to_string()),
                disks: BTreeMap::new(),
            },
        );
        let config = Arc::new(Configuration::initial(cluster, placements).unwrap());

        let outcome = optimize(config, |c, g| exponential(c, g), &SearchOptions::default()).unwrap();
        match outcome {
            SearchOutcome::Path(path) => {
                assert!(is_optimal(path.last().unwrap()).unwrap());
            }
            other => panic!("expected a path, got {:?}", other),
        }
    }
}
