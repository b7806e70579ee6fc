//! Embedding comparison and gallery lookup.

use serde::{Deserialize, Serialize};

use crate::config::MatchConfig;

/// Descriptors shorter than this are not worth matching.
pub const MIN_DESCRIPTOR_LEN: usize = 64;

/// Immutable face or body embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(Vec<f32>);

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Minkowski distance without the final root: `sum(|a - b|^order)`.
pub fn distance(a: &[f32], b: &[f32], order: f32) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            if order == 2.0 {
                d * d
            } else {
                d.abs().powf(order)
            }
        })
        .sum()
}

/// `max(0, 100 - distance^(1/order)) / 100`, zero for empty or mismatched
/// descriptors.
pub fn similarity(a: &[f32], b: &[f32], order: f32) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let root = distance(a, b, order).powf(1.0 / order);
    (100.0 - root).max(0.0) / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub index: Option<usize>,
    pub distance: f32,
    pub similarity: f32,
}

impl Match {
    fn none() -> Self {
        Self {
            index: None,
            distance: f32::INFINITY,
            similarity: 0.0,
        }
    }
}

/// Linear scan for the closest gallery entry.
///
/// Entries with a different length are skipped. The scan stops as soon as the
/// best distance drops under `options.threshold`.
pub fn find_match(descriptor: &[f32], gallery: &[Descriptor], options: &MatchConfig) -> Match {
    if gallery.is_empty() || descriptor.len() < MIN_DESCRIPTOR_LEN {
        return Match::none();
    }

    let mut best = Match::none();
    for (index, entry) in gallery.iter().enumerate() {
        if entry.len() != descriptor.len() {
            continue;
        }
        let d = distance(descriptor, entry.as_slice(), options.order);
        if d < best.distance {
            best.distance = d;
            best.index = Some(index);
        }
        if best.distance < options.threshold {
            break;
        }
    }

    if let Some(index) = best.index {
        best.similarity = similarity(descriptor, gallery[index].as_slice(), options.order);
    }
    best
}
