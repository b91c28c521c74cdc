// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Kahn's algorithm for topological sorting over a dense vertex space.

use std::collections::VecDeque;
use std::error::Error;
use std::fmt;

/// An error indicating that the graph contains at least one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotADagError {
    /// One concrete cycle, listed in edge direction; the last vertex holds
    /// an edge back to the first.
    pub cycle: Vec<usize>,
    /// Every vertex the traversal could not place (cycle members plus
    /// anything downstream of a cycle), in ascending order.
    pub vertices: Vec<usize>,
}

impl fmt::Display for NotADagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph is not a DAG; cycle: ")?;
        for vertex in &self.cycle {
            write!(f, "{vertex} -> ")?;
        }
        if let Some(first) = self.cycle.first() {
            write!(f, "{first}")?;
        }
        write!(f, " ({} vertices left unordered)", self.vertices.len())
    }
}

impl Error for NotADagError {}

/// Orders the vertices `0..vertex_count` so that for every edge `(u, v)`,
/// `u` appears before `v`.
///
/// Kahn's algorithm with a FIFO queue. The output is deterministic for a
/// given input: ties break by ascending vertex id and successors are visited
/// in edge order. Duplicate edges are permitted and self-consistent.
///
/// # Arguments
///
/// * `vertex_count`: The number of vertices; ids are dense in
///   `0..vertex_count`.
/// * `edges`: Directed edges as `(predecessor, successor)` pairs.
///
/// # Returns
///
/// * `Ok(Vec<usize>)`: A permutation of `0..vertex_count` in a valid
///   topological order.
/// * `Err(NotADagError)`: If the graph contains one or more cycles.
///
/// # Panics
///
/// Panics if an edge names a vertex outside `0..vertex_count`.
pub fn topological_sort(
    vertex_count: usize,
    edges: &[(usize, usize)],
) -> Result<Vec<usize>, NotADagError> {
    if vertex_count == 0 {
        return Ok(Vec::new());
    }

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); vertex_count];
    let mut in_degree: Vec<usize> = vec![0; vertex_count];

    // 1. Build adjacency and in-degree counts from edges.
    for &(parent, child) in edges {
        adjacency[parent].push(child);
        in_degree[child] += 1;
    }

    // 2. Seed the queue with every root (in-degree 0), in ascending order.
    let mut queue: VecDeque<usize> = (0..vertex_count).filter(|&v| in_degree[v] == 0).collect();

    // 3. Process the queue.
    let mut sorted_list = Vec::with_capacity(vertex_count);
    while let Some(parent) = queue.pop_front() {
        sorted_list.push(parent);
        for &child in &adjacency[parent] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    // 4. Anything not placed participates in or depends on a cycle.
    if sorted_list.len() != vertex_count {
        Err(leftover_error(vertex_count, edges, &sorted_list))
    } else {
        Ok(sorted_list)
    }
}

/// Builds the failure report once the traversal stalls: collects the
/// unplaced vertices, then walks predecessor links among them until a vertex
/// repeats, which pins down one concrete cycle.
fn leftover_error(
    vertex_count: usize,
    edges: &[(usize, usize)],
    sorted_list: &[usize],
) -> NotADagError {
    let mut placed = vec![false; vertex_count];
    for &vertex in sorted_list {
        placed[vertex] = true;
    }
    let leftover: Vec<usize> = (0..vertex_count).filter(|&v| !placed[v]).collect();

    // Predecessor lists restricted to the leftover set. Every leftover
    // vertex keeps at least one leftover predecessor (that is what pinned
    // its in-degree above zero), so the walk cannot get stuck.
    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); vertex_count];
    for &(parent, child) in edges {
        if !placed[parent] && !placed[child] {
            predecessors[child].push(parent);
        }
    }

    let mut cycle = Vec::new();
    if let Some(&start) = leftover.first() {
        let mut walk = vec![start];
        let mut current = start;
        loop {
            let previous = match predecessors[current].first() {
                Some(&previous) => previous,
                None => break,
            };
            if let Some(position) = walk.iter().position(|&v| v == previous) {
                // The walk followed edges backwards, so reversing the tail
                // yields the cycle in edge direction.
                cycle = walk[position..].to_vec();
                cycle.reverse();
                break;
            }
            walk.push(previous);
            current = previous;
        }
    }

    NotADagError {
        cycle,
        vertices: leftover,
    }
}
