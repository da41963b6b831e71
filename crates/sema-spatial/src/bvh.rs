//! Bounding-volume tree.
//!
//! Built bottom-up from entries already sorted by locality key: consecutive
//! runs of entries become leaves, consecutive runs of nodes become internal
//! nodes, up to a single root. Because the input is in curve order, sibling
//! leaves are spatially adjacent and the resulting boxes stay tight.
//!
//! The tree is immutable after construction; it belongs to exactly one
//! index generation.

use sema_vector::AtomId;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Entries per leaf.
const LEAF_SIZE: usize = 16;

/// Children per internal node.
const FAN_OUT: usize = 8;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Aabb {
    /// Box containing nothing; identity for [`Aabb::union`].
    pub fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    /// Box containing a single point.
    pub fn from_point(p: [f64; 3]) -> Self {
        Self { min: p, max: p }
    }

    /// Grow to cover another box.
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: [
                self.min[0].min(other.min[0]),
                self.min[1].min(other.min[1]),
                self.min[2].min(other.min[2]),
            ],
            max: [
                self.max[0].max(other.max[0]),
                self.max[1].max(other.max[1]),
                self.max[2].max(other.max[2]),
            ],
        }
    }

    /// Squared distance from a point to the nearest face of the box
    /// (0 if the point is inside).
    pub fn distance_sq_to(&self, p: [f64; 3]) -> f64 {
        let mut sum = 0.0;
        for axis in 0..3 {
            let d = if p[axis] < self.min[axis] {
                self.min[axis] - p[axis]
            } else if p[axis] > self.max[axis] {
                p[axis] - self.max[axis]
            } else {
                0.0
            };
            sum += d * d;
        }
        sum
    }

    /// True if the box intersects the sphere `(center, radius)`.
    pub fn intersects_sphere(&self, center: [f64; 3], radius: f64) -> bool {
        self.distance_sq_to(center) <= radius * radius
    }
}

/// One indexed point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpatialEntry {
    pub atom: AtomId,
    pub coord: [f64; 3],
    pub locality_key: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum NodeKind {
    /// Range into the entry array.
    Leaf { start: usize, len: usize },
    /// Indices into the node array.
    Internal { children: Vec<usize> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    aabb: Aabb,
    kind: NodeKind,
}

/// Immutable bounding-volume tree over locality-key-sorted entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bvh {
    /// Entries in ascending locality-key order.
    entries: Vec<SpatialEntry>,
    nodes: Vec<Node>,
    root: Option<usize>,
}

/// Candidate ordered by f64 distance, then atom for reproducible ties.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Scored {
    distance_sq: f64,
    atom: AtomId,
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance_sq
            .total_cmp(&other.distance_sq)
            .then_with(|| self.atom.cmp(&other.atom))
    }
}

/// Node frontier entry for best-first traversal.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FrontierNode {
    distance_sq: f64,
    node: usize,
}

impl Eq for FrontierNode {}

impl PartialOrd for FrontierNode {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontierNode {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance_sq
            .total_cmp(&other.distance_sq)
            .then_with(|| self.node.cmp(&other.node))
    }
}

impl Bvh {
    /// Build from entries sorted by locality key.
    ///
    /// # Panics (debug)
    ///
    /// Debug-asserts the sort order; release builds trust the caller
    /// (the generation builder sorts before sealing).
    pub fn build(entries: Vec<SpatialEntry>) -> Self {
        debug_assert!(entries.windows(2).all(|w| w[0].locality_key <= w[1].locality_key));

        if entries.is_empty() {
            return Self {
                entries,
                nodes: Vec::new(),
                root: None,
            };
        }

        let mut nodes: Vec<Node> = Vec::new();

        // Level 0: leaves over consecutive entry runs
        let mut level: Vec<usize> = Vec::new();
        let mut start = 0;
        while start < entries.len() {
            let len = LEAF_SIZE.min(entries.len() - start);
            let mut aabb = Aabb::empty();
            for entry in &entries[start..start + len] {
                aabb = aabb.union(&Aabb::from_point(entry.coord));
            }
            nodes.push(Node {
                aabb,
                kind: NodeKind::Leaf { start, len },
            });
            level.push(nodes.len() - 1);
            start += len;
        }

        // Upper levels: group FAN_OUT consecutive nodes
        while level.len() > 1 {
            let mut next: Vec<usize> = Vec::new();
            for chunk in level.chunks(FAN_OUT) {
                let mut aabb = Aabb::empty();
                for &child in chunk {
                    aabb = aabb.union(&nodes[child].aabb);
                }
                nodes.push(Node {
                    aabb,
                    kind: NodeKind::Internal {
                        children: chunk.to_vec(),
                    },
                });
                next.push(nodes.len() - 1);
            }
            level = next;
        }

        let root = Some(level[0]);
        Self {
            entries,
            nodes,
            root,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in locality-key order.
    pub fn entries(&self) -> &[SpatialEntry] {
        &self.entries
    }

    /// All atoms whose coordinate lies within `radius` of `center`,
    /// ordered by distance (ties by atom id).
    pub fn range_query(&self, center: [f64; 3], radius: f64) -> Vec<AtomId> {
        let mut hits: Vec<Scored> = Vec::new();
        let radius_sq = radius * radius;

        let root = match self.root {
            Some(root) => root,
            None => return Vec::new(),
        };

        let mut stack = vec![root];
        while let Some(node_idx) = stack.pop() {
            let node = &self.nodes[node_idx];
            if !node.aabb.intersects_sphere(center, radius) {
                continue;
            }
            match &node.kind {
                NodeKind::Leaf { start, len } => {
                    for entry in &self.entries[*start..*start + *len] {
                        let d_sq = distance_sq(entry.coord, center);
                        if d_sq <= radius_sq {
                            hits.push(Scored {
                                distance_sq: d_sq,
                                atom: entry.atom,
                            });
                        }
                    }
                }
                NodeKind::Internal { children } => stack.extend(children.iter().copied()),
            }
        }

        hits.sort();
        hits.into_iter().map(|s| s.atom).collect()
    }

    /// The `n` entries nearest to `coord` by coarse (projected) distance,
    /// via best-first traversal ordered by minimum box distance.
    pub fn coarse_knn(&self, coord: [f64; 3], n: usize) -> Vec<AtomId> {
        if n == 0 {
            return Vec::new();
        }
        let root = match self.root {
            Some(root) => root,
            None => return Vec::new(),
        };

        // Min-heap over nodes by box distance
        let mut frontier: BinaryHeap<Reverse<FrontierNode>> = BinaryHeap::new();
        // Max-heap of the current best n entries
        let mut best: BinaryHeap<Scored> = BinaryHeap::new();

        frontier.push(Reverse(FrontierNode {
            distance_sq: self.nodes[root].aabb.distance_sq_to(coord),
            node: root,
        }));

        while let Some(Reverse(current)) = frontier.pop() {
            // Every entry under this node is at least current.distance_sq away;
            // once the result set is full and closer, the traversal is done.
            if best.len() >= n {
                if let Some(worst) = best.peek() {
                    if current.distance_sq > worst.distance_sq {
                        break;
                    }
                }
            }

            match &self.nodes[current.node].kind {
                NodeKind::Leaf { start, len } => {
                    for entry in &self.entries[*start..*start + *len] {
                        let scored = Scored {
                            distance_sq: distance_sq(entry.coord, coord),
                            atom: entry.atom,
                        };
                        if best.len() < n {
                            best.push(scored);
                        } else if let Some(worst) = best.peek() {
                            if scored < *worst {
                                best.pop();
                                best.push(scored);
                            }
                        }
                    }
                }
                NodeKind::Internal { children } => {
                    for &child in children {
                        frontier.push(Reverse(FrontierNode {
                            distance_sq: self.nodes[child].aabb.distance_sq_to(coord),
                            node: child,
                        }));
                    }
                }
            }
        }

        let mut result: Vec<Scored> = best.into_iter().collect();
        result.sort();
        result.into_iter().map(|s| s.atom).collect()
    }
}

fn distance_sq(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}
