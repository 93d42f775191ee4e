//! Unification policies.
//!
//! Both policies act on a pair of adjacent cells `(a, b)` whose labels differ
//! and whose intensities pass the threshold test:
//!
//! - [`FullPropagation`] rewrites every cell of the band holding `label[b]`
//!   to `label[a]`. O(band) per event, but the band is a consistent
//!   equivalence labeling after every sweep.
//! - [`MinSwap`] sets both cells to `min(label[a], label[b])`. O(1) per event
//!   and commutative, so concurrent writers may apply it without locks; other
//!   cells still carrying the larger label only catch up in later sweeps.

use crate::core::error::ConfigError;
use crate::core::types::Label;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a unification event rewrites labels.
pub trait Unifier: Send + Sync {
    /// Unify cells `a` and `b`. Returns whether any label changed.
    fn unify(&self, labels: &mut [Label], a: usize, b: usize) -> bool;
}

/// Rewrite the whole band so `b`'s region takes `a`'s label.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullPropagation;

impl Unifier for FullPropagation {
    fn unify(&self, labels: &mut [Label], a: usize, b: usize) -> bool {
        let target = labels[a];
        let old = labels[b];
        if target == old {
            return false;
        }
        for label in labels.iter_mut().filter(|l| **l == old) {
            *label = target;
        }
        true
    }
}

/// Set both cells to the smaller of their labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinSwap;

impl Unifier for MinSwap {
    fn unify(&self, labels: &mut [Label], a: usize, b: usize) -> bool {
        let (la, lb) = (labels[a], labels[b]);
        if la == lb {
            return false;
        }
        let min = la.min(lb);
        labels[a] = min;
        labels[b] = min;
        true
    }
}

/// Configurable choice of unification policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnificationPolicy {
    /// See [`FullPropagation`].
    FullPropagation,
    /// See [`MinSwap`].
    #[default]
    MinSwap,
}

impl UnificationPolicy {
    /// The unifier implementing this policy.
    pub fn unifier(self) -> &'static dyn Unifier {
        match self {
            UnificationPolicy::FullPropagation => &FullPropagation,
            UnificationPolicy::MinSwap => &MinSwap,
        }
    }

    /// Whether concurrent writers may apply this policy without a lock.
    pub fn is_lock_free(self) -> bool {
        matches!(self, UnificationPolicy::MinSwap)
    }
}

impl fmt::Display for UnificationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnificationPolicy::FullPropagation => "full_propagation",
            UnificationPolicy::MinSwap => "min_swap",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for UnificationPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" | "full_propagation" | "full-propagation" => {
                Ok(UnificationPolicy::FullPropagation)
            }
            "min" | "min_swap" | "min-swap" => Ok(UnificationPolicy::MinSwap),
            other => Err(ConfigError::Parse(format!("unknown policy '{}'", other))),
        }
    }
}
