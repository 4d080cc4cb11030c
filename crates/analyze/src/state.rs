//! Flow facts and the join lattice.
//!
//! A [`FlowState`] maps `(family, reference, token)` keys to values. Facts
//! are "must" facts: after a join a fact survives only if every incoming
//! path agrees on it. Call counts are the exception and merge as ranges,
//! an absent count standing for zero calls.

use crate::reference::SymbolicReference;
use ctxeffects_core::{EffectFamily, InvocationKind, TypeHierarchy};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

// ──────────────────────────────────────────────
// Count ranges
// ──────────────────────────────────────────────

/// Inclusive range of call counts; `max: None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CountRange {
    pub min: u32,
    pub max: Option<u32>,
}

impl CountRange {
    pub const ZERO: CountRange = CountRange {
        min: 0,
        max: Some(0),
    };
    pub const ONE: CountRange = CountRange {
        min: 1,
        max: Some(1),
    };
    pub const ANY: CountRange = CountRange { min: 0, max: None };

    pub fn exactly(n: u32) -> Self {
        CountRange {
            min: n,
            max: Some(n),
        }
    }

    pub fn of_kind(kind: InvocationKind) -> Self {
        let (min, max) = kind.bounds();
        CountRange { min, max }
    }

    /// Sequential composition: `a` calls followed by `b` calls.
    pub fn add(self, other: CountRange) -> CountRange {
        CountRange {
            min: self.min.saturating_add(other.min),
            max: match (self.max, other.max) {
                (Some(a), Some(b)) => Some(a.saturating_add(b)),
                _ => None,
            },
        }
    }

    /// Branch merge.
    pub fn union(self, other: CountRange) -> CountRange {
        CountRange {
            min: self.min.min(other.min),
            max: match (self.max, other.max) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            },
        }
    }

    /// A body counted `self` times, run `times` times.
    pub fn times(self, times: CountRange) -> CountRange {
        let max = match (self.max, times.max) {
            (Some(0), _) | (_, Some(0)) => Some(0),
            (Some(a), Some(b)) => Some(a.saturating_mul(b)),
            _ => None,
        };
        CountRange {
            min: self.min.saturating_mul(times.min),
            max,
        }
    }

    /// Loop widening: bounds that moved between iterations go to their limit.
    pub fn widen(self, next: CountRange) -> CountRange {
        let min = self.min.min(next.min);
        let max = match (self.max, next.max) {
            (Some(a), Some(b)) if b <= a => Some(a),
            _ => None,
        };
        CountRange { min, max }
    }

    pub fn satisfies(&self, kind: InvocationKind) -> bool {
        match kind {
            InvocationKind::ExactlyOnce => *self == CountRange::ONE,
            InvocationKind::AtLeastOnce => self.min >= 1,
            InvocationKind::AtMostOnce => matches!(self.max, Some(m) if m <= 1),
            InvocationKind::Unknown => true,
        }
    }
}

impl fmt::Display for CountRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{}", max),
            Some(max) => write!(f, "{} to {}", self.min, max),
            None => write!(f, "{} or more", self.min),
        }
    }
}

// ──────────────────────────────────────────────
// Facts
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FactKey {
    pub family: EffectFamily,
    pub reference: SymbolicReference,
    pub token: String,
}

impl FactKey {
    pub fn new(family: EffectFamily, reference: SymbolicReference, token: impl Into<String>) -> Self {
        FactKey {
            family,
            reference,
            token: token.into(),
        }
    }

    pub fn obligation(&self) -> String {
        self.family
            .render_obligation(&self.token, &self.reference.to_string())
    }
}

impl fmt::Display for FactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            EffectFamily::ExceptionCatch => write!(f, "CatchesException<{}>", self.token),
            EffectFamily::DslMarker => write!(f, "DslMarkers({})", self.reference),
            EffectFamily::CallCount => write!(f, "Calls({}, {})", self.token, self.reference),
            EffectFamily::OpenClose => write!(f, "{}({})", self.token, self.reference),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FactValue {
    Holds,
    Opened,
    Count(CountRange),
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactValue::Holds => f.write_str("holds"),
            FactValue::Opened => f.write_str("open"),
            FactValue::Count(range) => write!(f, "called {}", range),
        }
    }
}

// ──────────────────────────────────────────────
// Flow state
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowState {
    facts: BTreeMap<FactKey, FactValue>,
    reachable: bool,
}

impl Default for FlowState {
    fn default() -> Self {
        FlowState::new()
    }
}

impl FlowState {
    /// Reachable state with no facts.
    pub fn new() -> Self {
        FlowState {
            facts: BTreeMap::new(),
            reachable: true,
        }
    }

    /// Bottom of the lattice: the path after a `return`.
    pub fn unreachable() -> Self {
        FlowState {
            facts: BTreeMap::new(),
            reachable: false,
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    pub fn get(&self, key: &FactKey) -> Option<&FactValue> {
        self.facts.get(key)
    }

    pub fn insert(&mut self, key: FactKey, value: FactValue) {
        self.facts.insert(key, value);
    }

    pub fn remove(&mut self, key: &FactKey) -> Option<FactValue> {
        self.facts.remove(key)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&FactKey, &FactValue) -> bool) {
        self.facts.retain(|k, v| keep(k, v));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FactKey, &FactValue)> {
        self.facts.iter()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Record that the effect behind `key` now holds. Counts are incremented.
    pub fn provide(&mut self, key: FactKey) {
        let value = match key.family {
            EffectFamily::ExceptionCatch | EffectFamily::DslMarker => FactValue::Holds,
            EffectFamily::OpenClose => FactValue::Opened,
            EffectFamily::CallCount => {
                let current = match self.facts.get(&key) {
                    Some(FactValue::Count(range)) => *range,
                    _ => CountRange::ZERO,
                };
                FactValue::Count(current.add(CountRange::ONE))
            }
        };
        self.facts.insert(key, value);
    }

    /// True when the fact behind `key` definitely holds on this path.
    ///
    /// Exception facts are satisfied by any handler for a supertype.
    pub fn satisfies(&self, key: &FactKey, hierarchy: &TypeHierarchy) -> bool {
        match key.family {
            EffectFamily::ExceptionCatch => self.facts.iter().any(|(k, v)| {
                k.family == EffectFamily::ExceptionCatch
                    && *v == FactValue::Holds
                    && hierarchy.is_subtype(&key.token, &k.token)
            }),
            EffectFamily::DslMarker => self.facts.get(key) == Some(&FactValue::Holds),
            EffectFamily::CallCount => {
                matches!(self.facts.get(key), Some(FactValue::Count(r)) if r.min >= 1)
            }
            EffectFamily::OpenClose => self.facts.get(key) == Some(&FactValue::Opened),
        }
    }

    pub fn is_open(&self, key: &FactKey) -> bool {
        self.facts.get(key) == Some(&FactValue::Opened)
    }

    /// Merge point of two paths.
    pub fn join(&self, other: &FlowState) -> FlowState {
        if !self.reachable {
            return other.clone();
        }
        if !other.reachable {
            return self.clone();
        }
        let mut facts = BTreeMap::new();
        for key in self.facts.keys().chain(other.facts.keys()) {
            if facts.contains_key(key) {
                continue;
            }
            if let Some(v) = merge_values(key.family, self.facts.get(key), other.facts.get(key)) {
                facts.insert(key.clone(), v);
            }
        }
        FlowState {
            facts,
            reachable: true,
        }
    }

    /// Collapse facts that still change between two loop iterations: counts
    /// are widened, anything else is dropped.
    pub fn collapse_toward(&self, next: &FlowState) -> FlowState {
        if !self.reachable {
            return next.clone();
        }
        if !next.reachable {
            return self.clone();
        }
        let mut facts = BTreeMap::new();
        for key in self.facts.keys().chain(next.facts.keys()) {
            if facts.contains_key(key) {
                continue;
            }
            let before = self.facts.get(key);
            let after = next.facts.get(key);
            let value = match (before, after) {
                (Some(a), Some(b)) if a == b => Some(*a),
                _ if key.family == EffectFamily::CallCount => {
                    Some(FactValue::Count(count_of(before).widen(count_of(after))))
                }
                _ => None,
            };
            if let Some(v) = value {
                facts.insert(key.clone(), v);
            }
        }
        FlowState {
            facts,
            reachable: true,
        }
    }

    /// Facts rendered for summaries, in key order.
    pub fn describe(&self) -> Vec<String> {
        self.facts
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect()
    }
}

fn count_of(value: Option<&FactValue>) -> CountRange {
    match value {
        Some(FactValue::Count(range)) => *range,
        _ => CountRange::ZERO,
    }
}

fn merge_values(
    family: EffectFamily,
    a: Option<&FactValue>,
    b: Option<&FactValue>,
) -> Option<FactValue> {
    match family {
        EffectFamily::CallCount => Some(FactValue::Count(count_of(a).union(count_of(b)))),
        EffectFamily::ExceptionCatch | EffectFamily::DslMarker | EffectFamily::OpenClose => {
            match (a, b) {
                (Some(x), Some(y)) if x == y => Some(*x),
                _ => None,
            }
        }
    }
}
