//! Transient memory aliasing.
//!
//! [`pack`] assigns every transient resource a byte offset inside one memory
//! block so that resources alive at the same time never share bytes, while
//! resources with disjoint lifetimes reuse the same range.
//!
//! # Algorithm
//!
//! First-fit decreasing over size with tree-structured buckets:
//!
//! 1. Sort by size, largest first (ties by reference, so output is reproducible).
//! 2. Each bucket is a tree rooted at the largest resource placed into it.
//!    A child lives inside its parent's byte range and is never alive while
//!    the parent is; siblings sit back-to-back, alignment padded.
//! 3. A candidate walks every bucket: a node whose lifetime overlaps the
//!    candidate rejects its whole subtree, otherwise the candidate tries
//!    the node's children before being appended after the last child.
//! 4. A candidate no bucket accepts opens a new bucket.
//!
//! Buckets are laid out back-to-back. A bucket's size is its root's size and
//! never changes after creation, so its base offset is fixed when it opens.
//!
//! Offsets are computed with checked arithmetic. A candidate whose padded
//! range would pass `u64::MAX` does not fit inside a bucket; if it cannot
//! open a new bucket either, packing fails with
//! [`GraphError::LayoutOverflow`].
//!
//! The tree is an arena: nodes live in a flat `Vec` and refer to their
//! children by index.

use std::collections::HashMap;

use crate::error::{GraphError, GraphResult};
use crate::profile_scope;

use super::resource::ResourceRef;

/// Lifetime and memory needs of one transient resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransientInterval {
    pub resource: ResourceRef,
    /// Index of the first pass using the resource.
    pub first: usize,
    /// Index of the last pass using the resource.
    pub last: usize,
    pub size: u64,
    /// Zero is treated as one.
    pub alignment: u64,
}

impl TransientInterval {
    pub fn new(resource: ResourceRef, first: usize, last: usize, size: u64, alignment: u64) -> Self {
        Self {
            resource,
            first,
            last,
            size,
            alignment,
        }
    }

    /// Check if both resources are alive during some pass.
    pub fn overlaps(&self, other: &TransientInterval) -> bool {
        self.first <= other.last && other.first <= self.last
    }

    fn effective_alignment(&self) -> u64 {
        self.alignment.max(1)
    }
}

/// A placed resource in the bucket arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasNode {
    pub interval: TransientInterval,
    /// Absolute offset in the memory block.
    pub offset: u64,
    /// Indices into [`PackedLayout::nodes`].
    pub children: Vec<usize>,
    /// First free byte after the last child.
    cursor: u64,
}

impl AliasNode {
    fn new(interval: TransientInterval, offset: u64) -> Self {
        Self {
            interval,
            offset,
            children: Vec::new(),
            cursor: offset,
        }
    }

    fn end(&self) -> u64 {
        self.offset.saturating_add(self.interval.size)
    }
}

/// A contiguous range of the block owned by one tree of nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasBucket {
    /// Index of the root node.
    pub root: usize,
    pub offset: u64,
    pub size: u64,
}

/// Result of [`pack`].
#[derive(Debug, Clone, Default)]
pub struct PackedLayout {
    total_size: u64,
    alignment: u64,
    offsets: HashMap<ResourceRef, u64>,
    nodes: Vec<AliasNode>,
    buckets: Vec<AliasBucket>,
}

impl PackedLayout {
    /// Bytes the memory block must hold.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Alignment the block's start must satisfy for every offset to stay
    /// aligned in device memory. One for an empty layout.
    pub fn alignment(&self) -> u64 {
        self.alignment.max(1)
    }

    pub fn offset(&self, resource: ResourceRef) -> Option<u64> {
        self.offsets.get(&resource).copied()
    }

    pub fn offsets(&self) -> &HashMap<ResourceRef, u64> {
        &self.offsets
    }

    pub fn nodes(&self) -> &[AliasNode] {
        &self.nodes
    }

    pub fn buckets(&self) -> &[AliasBucket] {
        &self.buckets
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the bucket holding `resource`.
    pub fn bucket_of(&self, resource: ResourceRef) -> Option<usize> {
        let offset = self.offset(resource)?;
        self.buckets
            .iter()
            .position(|bucket| {
                offset >= bucket.offset && offset < bucket.offset.saturating_add(bucket.size.max(1))
            })
    }

    /// Sum of all resource sizes, i.e. the block size without aliasing.
    /// Saturates at `u64::MAX`.
    pub fn unaliased_size(&self) -> u64 {
        self.nodes
            .iter()
            .fold(0u64, |sum, node| sum.saturating_add(node.interval.size))
    }

    /// Re-check the packing invariants.
    ///
    /// Every offset must be a multiple of its alignment, and two resources
    /// alive during the same pass must not share a byte.
    pub fn verify(&self) -> GraphResult<()> {
        for node in &self.nodes {
            let alignment = node.interval.effective_alignment();
            if node.offset % alignment != 0 {
                return Err(GraphError::MisalignedOffset {
                    resource: node.interval.resource,
                    offset: node.offset,
                    alignment,
                });
            }
        }
        for (i, a) in self.nodes.iter().enumerate() {
            for b in &self.nodes[i + 1..] {
                let bytes_overlap = a.offset < b.end() && b.offset < a.end();
                if bytes_overlap && a.interval.overlaps(&b.interval) {
                    return Err(GraphError::LayoutViolation {
                        first: a.interval.resource,
                        second: b.interval.resource,
                    });
                }
            }
        }
        Ok(())
    }

    fn open_bucket(&mut self, interval: TransientInterval) -> GraphResult<()> {
        let overflow = || GraphError::LayoutOverflow {
            resource: interval.resource,
            size: interval.size,
            alignment: interval.effective_alignment(),
        };
        let offset = align_up(self.total_size, interval.effective_alignment()).ok_or_else(overflow)?;
        let end = offset.checked_add(interval.size).ok_or_else(overflow)?;
        let root = self.push_node(interval, offset);
        self.buckets.push(AliasBucket {
            root,
            offset,
            size: interval.size,
        });
        self.total_size = end;
        Ok(())
    }

    fn push_node(&mut self, interval: TransientInterval, offset: u64) -> usize {
        self.nodes.push(AliasNode::new(interval, offset));
        self.offsets.insert(interval.resource, offset);
        self.alignment = lcm_or_max(self.alignment.max(1), interval.effective_alignment());
        self.nodes.len() - 1
    }

    /// Try to place `candidate` in the subtree rooted at `node`.
    fn insert(&mut self, node: usize, candidate: &TransientInterval) -> bool {
        if self.nodes[node].interval.overlaps(candidate) {
            return false;
        }

        // Index loop: the recursive call needs `&mut self`.
        let child_count = self.nodes[node].children.len();
        for i in 0..child_count {
            let child = self.nodes[node].children[i];
            if self.insert(child, candidate) {
                return true;
            }
        }

        let parent = &self.nodes[node];
        let Some((offset, end)) = align_up(parent.cursor, candidate.effective_alignment())
            .and_then(|offset| Some((offset, offset.checked_add(candidate.size)?)))
        else {
            return false;
        };
        if end > parent.end() {
            return false;
        }
        let child = self.push_node(*candidate, offset);
        let parent = &mut self.nodes[node];
        parent.cursor = end;
        parent.children.push(child);
        true
    }
}

/// Pack transient resources into one memory block.
///
/// Zero intervals produce an empty layout of size zero. Fails only when the
/// block would not be addressable with 64-bit offsets.
pub fn pack(intervals: &[TransientInterval]) -> GraphResult<PackedLayout> {
    profile_scope!("render_graph_pack");

    let mut layout = PackedLayout::default();
    for candidate in sorted(intervals) {
        let placed = (0..layout.buckets.len()).any(|bucket| {
            let root = layout.buckets[bucket].root;
            layout.insert(root, &candidate)
        });
        if !placed {
            layout.open_bucket(candidate)?;
        }
        log::debug!(
            "transient {} ({} bytes, passes {}..={}) placed at offset {:?}",
            candidate.resource,
            candidate.size,
            candidate.first,
            candidate.last,
            layout.offset(candidate.resource)
        );
    }
    Ok(layout)
}

/// Place every resource in its own bucket, without any reuse.
pub fn pack_unaliased(intervals: &[TransientInterval]) -> GraphResult<PackedLayout> {
    let mut layout = PackedLayout::default();
    for candidate in sorted(intervals) {
        layout.open_bucket(candidate)?;
    }
    Ok(layout)
}

fn sorted(intervals: &[TransientInterval]) -> Vec<TransientInterval> {
    let mut sorted = intervals.to_vec();
    sorted.sort_by(|a, b| b.size.cmp(&a.size).then(a.resource.cmp(&b.resource)));
    sorted
}

/// `None` when the aligned value does not fit in a `u64`.
pub(crate) fn align_up(value: u64, alignment: u64) -> Option<u64> {
    let alignment = alignment.max(1);
    value.div_ceil(alignment).checked_mul(alignment)
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Least common multiple, falling back to the larger value on overflow.
fn lcm_or_max(a: u64, b: u64) -> u64 {
    (a / gcd(a, b)).checked_mul(b).unwrap_or(a.max(b))
}
