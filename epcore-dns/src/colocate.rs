//! Colocation of candidate pairs from two node selections.
//!
//! Hostnames prefixed `topon.<interface>.<canonical>` advertise that their
//! canonical labels encode topological location; pairs of such names are
//! scored by the number of matching labels from the root.

use crate::selector::NodeSelectorResult;

/// A hostname reduced to its canonical form, with the reversed label list
/// used for topological comparison when the `topon` prefix was present.
#[derive(Debug, Clone, Default)]
pub struct CanonicalNodeName {
    name: String,
    topon: bool,
    labels: Vec<String>,
}

impl CanonicalNodeName {
    pub fn new(hostname: &str) -> Self {
        let mut parts = hostname.split('.');
        let first = parts.next().unwrap_or("");

        let topon = first == "topon";
        if !topon && first != "topoff" {
            // no topology prefix: the whole hostname is the canonical name
            return Self {
                name: hostname.to_owned(),
                topon: false,
                labels: Vec::new(),
            };
        }

        // skip the interface label
        let _interface = parts.next();
        let name: String = parts.collect::<Vec<_>>().join(".");

        let labels = if topon {
            let mut labels: Vec<String> = name.split('.').map(str::to_owned).collect();
            labels.reverse();
            labels
        } else {
            Vec::new()
        };

        Self { name, topon, labels }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topon(&self) -> bool {
        self.topon
    }

    /// Reversed labels (root first); empty unless `topon`.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Number of matching leading labels, comparing from the root.
    pub fn topological_compare(&self, other: &Self) -> usize {
        self.labels
            .iter()
            .zip(other.labels.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }
}

/// Classification of a candidate pair, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PairType {
    Colocated = 1,
    TopologicalDistance = 2,
    DnsPriority = 3,
}

/// One pair of candidates, one from each selection.
#[derive(Debug, Clone)]
pub struct ColocatedCandidate {
    pub candidate1: NodeSelectorResult,
    pub candidate2: NodeSelectorResult,
    pub canonical1: CanonicalNodeName,
    pub canonical2: CanonicalNodeName,
    pub pair_type: PairType,
    pub topological_matches: usize,
}

impl ColocatedCandidate {
    pub fn new(candidate1: NodeSelectorResult, candidate2: NodeSelectorResult) -> Self {
        let canonical1 = CanonicalNodeName::new(&candidate1.hostname);
        let canonical2 = CanonicalNodeName::new(&candidate2.hostname);

        // a pair with only one topon side has no comparable topology and
        // falls back to DNS priority
        let pair_type = if canonical1.name() == canonical2.name() {
            PairType::Colocated
        } else if canonical1.topon() && canonical2.topon() {
            PairType::TopologicalDistance
        } else {
            PairType::DnsPriority
        };

        let topological_matches = if pair_type == PairType::TopologicalDistance {
            canonical1.topological_compare(&canonical2)
        } else {
            0
        };

        Self {
            candidate1,
            candidate2,
            canonical1,
            canonical2,
            pair_type,
            topological_matches,
        }
    }
}

/// All pairs from two selections, classified and sorted: colocated pairs
/// first, then topologically closest, then DNS priority; ties break on the
/// first candidate's `(order, preference)`.
#[derive(Debug, Clone, Default)]
pub struct ColocatedCandidateList {
    pairs: Vec<ColocatedCandidate>,
}

impl ColocatedCandidateList {
    pub fn new(list1: &[NodeSelectorResult], list2: &[NodeSelectorResult]) -> Self {
        let mut pairs = Vec::with_capacity(list1.len() * list2.len());
        for c1 in list1 {
            for c2 in list2 {
                pairs.push(ColocatedCandidate::new(c1.clone(), c2.clone()));
            }
        }
        pairs.sort_by_key(|p| {
            (
                p.pair_type,
                p.candidate1.order,
                p.candidate1.preference,
            )
        });
        Self { pairs }
    }

    pub fn pairs(&self) -> &[ColocatedCandidate] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
