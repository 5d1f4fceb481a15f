//! Height functions reconstructed from local tile records.
//!
//! Each tile contributes fixed height differences between lattice vertices.
//! Fixing one vertex to height 0 and propagating by breadth-first search
//! recovers the height function; a valid configuration never produces two
//! different values for the same vertex.

use std::collections::{HashMap, VecDeque};

/// Lattice vertex coordinate.
pub type Vertex = (i32, i32);

/// Neighbour visiting order used by the traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisitOrder {
    #[default]
    Forward,
    Reverse,
}

/// Height-difference constraints between lattice vertices.
#[derive(Debug, Clone, Default)]
pub struct HeightGraph {
    index: HashMap<Vertex, usize>,
    vertices: Vec<Vertex>,
    adjacency: Vec<Vec<(usize, i32)>>,
}

impl HeightGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn vertex_id(&mut self, v: Vertex) -> usize {
        if let Some(&id) = self.index.get(&v) {
            return id;
        }
        let id = self.vertices.len();
        self.index.insert(v, id);
        self.vertices.push(v);
        self.adjacency.push(Vec::new());
        id
    }

    /// Record `h(to) - h(from) = delta`.
    pub fn add_difference(&mut self, from: Vertex, to: Vertex, delta: i32) {
        let a = self.vertex_id(from);
        let b = self.vertex_id(to);
        self.adjacency[a].push((b, delta));
        self.adjacency[b].push((a, -delta));
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn contains(&self, v: Vertex) -> bool {
        self.index.contains_key(&v)
    }

    /// Propagate heights from `start` (fixed to 0).
    pub fn solve(&self, start: Vertex) -> Result<HeightFunction, HeightError> {
        self.solve_with_order(start, VisitOrder::Forward)
    }

    /// Propagate heights from `start`, visiting neighbours in the given order.
    pub fn solve_with_order(
        &self,
        start: Vertex,
        order: VisitOrder,
    ) -> Result<HeightFunction, HeightError> {
        let &root = self
            .index
            .get(&start)
            .ok_or(HeightError::UnknownVertex(start))?;

        let mut heights: Vec<Option<i32>> = vec![None; self.vertices.len()];
        heights[root] = Some(0);
        let mut queue = VecDeque::from([root]);

        while let Some(v) = queue.pop_front() {
            let hv = heights[v].unwrap_or_default();
            let edges = &self.adjacency[v];
            let mut visit = |&(w, delta): &(usize, i32)| -> Result<(), HeightError> {
                let expected = hv + delta;
                match heights[w] {
                    None => {
                        heights[w] = Some(expected);
                        queue.push_back(w);
                    }
                    Some(found) if found != expected => {
                        return Err(HeightError::Inconsistent {
                            vertex: self.vertices[w],
                            expected,
                            found,
                        });
                    }
                    Some(_) => {}
                }
                Ok(())
            };
            match order {
                VisitOrder::Forward => edges.iter().try_for_each(&mut visit)?,
                VisitOrder::Reverse => edges.iter().rev().try_for_each(&mut visit)?,
            }
        }

        let mut map = HashMap::with_capacity(self.vertices.len());
        for (id, h) in heights.into_iter().enumerate() {
            match h {
                Some(h) => {
                    map.insert(self.vertices[id], h);
                }
                None => return Err(HeightError::Disconnected(self.vertices[id])),
            }
        }
        Ok(HeightFunction { heights: map })
    }
}

/// Integer heights on lattice vertices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeightFunction {
    heights: HashMap<Vertex, i32>,
}

impl HeightFunction {
    pub fn get(&self, v: Vertex) -> Option<i32> {
        self.heights.get(&v).copied()
    }

    pub fn len(&self) -> usize {
        self.heights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heights.is_empty()
    }

    /// Shift every height so that `v` has height `value`.
    pub fn normalized_at(&self, v: Vertex, value: i32) -> Option<HeightFunction> {
        let offset = value - self.get(v)?;
        Some(HeightFunction {
            heights: self.heights.iter().map(|(&k, &h)| (k, h + offset)).collect(),
        })
    }

    /// Whether both functions agree up to an additive constant.
    pub fn same_differences(&self, other: &HeightFunction) -> bool {
        if self.heights.len() != other.heights.len() {
            return false;
        }
        let Some((&v, &h)) = self.heights.iter().next() else {
            return true;
        };
        let Some(oh) = other.get(v) else {
            return false;
        };
        let offset = oh - h;
        self.heights
            .iter()
            .all(|(k, &h)| other.get(*k) == Some(h + offset))
    }
}

/// Height reconstruction errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeightError {
    #[error("Vertex {0:?} is not part of the height graph")]
    UnknownVertex(Vertex),
    #[error("Inconsistent height at {vertex:?}: expected {expected}, found {found}")]
    Inconsistent {
        vertex: Vertex,
        expected: i32,
        found: i32,
    },
    #[error("Vertex {0:?} is not reachable from the start vertex")]
    Disconnected(Vertex),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_cycle_consistent() {
        let mut graph = HeightGraph::new();
        graph.add_difference((0, 0), (1, 0), 1);
        graph.add_difference((1, 0), (1, 1), 1);
        graph.add_difference((1, 1), (0, 1), 1);
        graph.add_difference((0, 1), (0, 0), -3);

        let h = graph.solve((0, 0)).unwrap();
        assert_eq!(h.get((1, 1)), Some(2));
        assert_eq!(h.get((0, 1)), Some(3));

        let other = graph.solve_with_order((1, 1), VisitOrder::Reverse).unwrap();
        assert!(h.same_differences(&other));
        assert_eq!(other.normalized_at((0, 0), 0), Some(h));
    }

    #[test]
    fn test_inconsistent_cycle_detected() {
        let mut graph = HeightGraph::new();
        graph.add_difference((0, 0), (1, 0), 1);
        graph.add_difference((1, 0), (1, 1), 1);
        graph.add_difference((1, 1), (0, 0), 1);
        assert!(matches!(
            graph.solve((0, 0)),
            Err(HeightError::Inconsistent { .. })
        ));
    }

    #[test]
    fn test_disconnected_graph() {
        let mut graph = HeightGraph::new();
        graph.add_difference((0, 0), (1, 0), 1);
        graph.add_difference((5, 5), (6, 5), 1);
        assert!(matches!(
            graph.solve((0, 0)),
            Err(HeightError::Disconnected(_))
        ));
    }

    #[test]
    fn test_unknown_start() {
        let graph = HeightGraph::new();
        assert_eq!(
            graph.solve((0, 0)),
            Err(HeightError::UnknownVertex((0, 0)))
        );
    }
}
