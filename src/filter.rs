use crate::models::{normalize_code, CanonicalRecord, Week};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashSet;
use std::hash::Hash;
use tracing::debug;

/// Dashboard selections narrowing the canonical set. An empty list means
/// no restriction on that field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordFilter {
    pub ports: Vec<String>,
    pub facilities: Vec<String>,
    pub weeks: Vec<Week>,
    pub carriers: Vec<String>,
}

struct Selection {
    ports: HashSet<String>,
    facilities: HashSet<String>,
    weeks: HashSet<Week>,
    carriers: HashSet<String>,
}

fn codes(values: &[String]) -> HashSet<String> {
    values.iter().map(|v| normalize_code(v)).collect()
}

fn allows<T, Q>(set: &HashSet<T>, value: &Q) -> bool
where
    T: Borrow<Q> + Hash + Eq,
    Q: Hash + Eq + ?Sized,
{
    set.is_empty() || set.contains(value)
}

impl RecordFilter {
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
            && self.facilities.is_empty()
            && self.weeks.is_empty()
            && self.carriers.is_empty()
    }

    /// Keep the records matching every non-empty selection, returning them
    /// with the number removed.
    pub fn apply(&self, records: &[CanonicalRecord]) -> (Vec<CanonicalRecord>, usize) {
        if self.is_empty() {
            return (records.to_vec(), 0);
        }

        let selection = Selection {
            ports: codes(&self.ports),
            facilities: codes(&self.facilities),
            weeks: self.weeks.iter().copied().collect(),
            carriers: codes(&self.carriers),
        };
        let kept: Vec<CanonicalRecord> = records
            .iter()
            .filter(|r| {
                allows(&selection.ports, &r.lane.port)
                    && allows(&selection.facilities, &r.lane.facility)
                    && allows(&selection.weeks, &r.week)
                    && allows(&selection.carriers, r.carrier.as_str())
            })
            .cloned()
            .collect();

        let removed = records.len() - kept.len();
        debug!("Filter kept {} records, removed {}", kept.len(), removed);
        (kept, removed)
    }
}
