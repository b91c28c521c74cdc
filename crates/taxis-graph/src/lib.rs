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

//! # Taxis Graph
//!
//! Ordering primitives for anything that must run, initialize, or shut down
//! in dependency order: a keyed [`DependencyGraph`] with `after`/`before`
//! constraints and a cached deterministic sort, built on a plain
//! [`topological_sort`] over dense vertex ids.

#![warn(missing_docs)]

pub mod dependency_graph;
pub mod topological_sort;

pub use dependency_graph::{CycleError, DependencyGraph};
pub use topological_sort::{topological_sort, NotADagError};
