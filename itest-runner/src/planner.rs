// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ordering of tests into batches.
//!
//! [`ExecutionPlanner::plan`] turns the discovered tests into an [`ExecutionPlan`]: a sequence of
//! [`Batch`]es in which every test appears after all of its dependencies.

use crate::{catalog::TestCase, errors::PlanningError};
use itest_metadata::TestId;
use petgraph::{
    Directed, Graph,
    algo::{scc::kosaraju_scc, toposort},
    graph::NodeIndex,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};
use tracing::debug;

/// How a test may be scheduled relative to other tests.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Isolation {
    /// The test may run concurrently with other parallel tests.
    #[default]
    Parallel,

    /// The test must not run concurrently with any other test.
    Serial,
}

/// How the tests within a batch are run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchIsolation {
    /// Tests run concurrently, up to the worker limit.
    Parallel,

    /// Tests run one at a time, in order.
    Sequential,
}

impl fmt::Display for BatchIsolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchIsolation::Parallel => write!(f, "parallel"),
            BatchIsolation::Sequential => write!(f, "sequential"),
        }
    }
}

/// An ordered group of tests that share an isolation policy.
///
/// Batches are created by [`ExecutionPlanner`] and never empty.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Batch {
    index: usize,
    isolation: BatchIsolation,
    tests: Vec<TestId>,
}

impl Batch {
    /// Creates a new batch.
    ///
    /// Most batches are created by [`ExecutionPlanner`]; this is useful to run tests directly
    /// through a [`Runner`](crate::runner::Runner).
    pub fn new(index: usize, isolation: BatchIsolation, tests: Vec<TestId>) -> Self {
        Self {
            index,
            isolation,
            tests,
        }
    }

    /// Returns the 0-based position of this batch in its plan.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the isolation policy for this batch.
    pub fn isolation(&self) -> BatchIsolation {
        self.isolation
    }

    /// Returns the tests in this batch, in discovery order.
    pub fn tests(&self) -> &[TestId] {
        &self.tests
    }

    /// Returns the number of tests in this batch.
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Returns true if this batch has no tests.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

/// The ordered batches for a run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecutionPlan {
    batches: Vec<Batch>,
}

impl ExecutionPlan {
    /// Creates a plan from already-ordered batches.
    pub fn new(batches: Vec<Batch>) -> Self {
        Self { batches }
    }

    /// Returns the batches in execution order.
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// Returns the number of tests across all batches.
    pub fn test_count(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }

    /// Returns the index of the batch containing `id`, if any.
    pub fn batch_index_of(&self, id: &TestId) -> Option<usize> {
        self.batches
            .iter()
            .position(|batch| batch.tests.contains(id))
    }
}

impl IntoIterator for ExecutionPlan {
    type Item = Batch;
    type IntoIter = std::vec::IntoIter<Batch>;

    fn into_iter(self) -> Self::IntoIter {
        self.batches.into_iter()
    }
}

/// Orders tests into batches.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExecutionPlanner;

impl ExecutionPlanner {
    /// Orders `tests`, which must be in discovery order, into batches.
    ///
    /// Tests are layered by dependency depth. Each layer becomes a parallel batch of its
    /// parallel-safe tests followed by a sequential batch of its serial tests, skipping empty
    /// batches. Within a batch, tests keep their discovery order.
    pub fn plan(&self, tests: &[TestCase]) -> Result<ExecutionPlan, PlanningError> {
        let mut graph = Graph::<usize, (), Directed>::with_capacity(tests.len(), 0);
        let mut nodes: HashMap<&TestId, NodeIndex> = HashMap::with_capacity(tests.len());
        for (ix, test) in tests.iter().enumerate() {
            let node = graph.add_node(ix);
            if nodes.insert(test.id(), node).is_some() {
                return Err(PlanningError::DuplicateTest {
                    test: test.id().clone(),
                });
            }
        }

        // Edges point from a dependency to its dependents.
        for (ix, test) in tests.iter().enumerate() {
            for dep in test.dependencies() {
                let Some(&dep_node) = nodes.get(dep) else {
                    return Err(PlanningError::UnknownDependency {
                        test: test.id().clone(),
                        dependency: dep.clone(),
                    });
                };
                graph.update_edge(dep_node, NodeIndex::new(ix), ());
            }
        }

        check_cycles(&graph, tests)?;

        // The graph is acyclic at this point.
        let order = toposort(&graph, None).map_err(|cycle| PlanningError::Cycle {
            cycles: vec![vec![tests[graph[cycle.node_id()]].id().clone()]],
        })?;
        let mut depths = vec![0_usize; tests.len()];
        for node in order {
            let depth = graph
                .neighbors_directed(node, petgraph::Direction::Incoming)
                .map(|dep| depths[graph[dep]] + 1)
                .max()
                .unwrap_or(0);
            depths[graph[node]] = depth;
        }

        let layer_count = depths.iter().max().map_or(0, |max| max + 1);
        let mut batches = Vec::new();
        for layer in 0..layer_count {
            for (isolation, batch_isolation) in [
                (Isolation::Parallel, BatchIsolation::Parallel),
                (Isolation::Serial, BatchIsolation::Sequential),
            ] {
                let members: Vec<TestId> = tests
                    .iter()
                    .zip(&depths)
                    .filter(|(test, depth)| **depth == layer && test.isolation() == isolation)
                    .map(|(test, _)| test.id().clone())
                    .collect();
                if !members.is_empty() {
                    batches.push(Batch::new(batches.len(), batch_isolation, members));
                }
            }
        }

        debug!(
            tests = tests.len(),
            layers = layer_count,
            batches = batches.len(),
            "planned test execution",
        );

        Ok(ExecutionPlan { batches })
    }
}

/// Reports every strongly connected component that forms a cycle, including self-dependencies.
fn check_cycles(graph: &Graph<usize, ()>, tests: &[TestCase]) -> Result<(), PlanningError> {
    let mut cycles: Vec<Vec<usize>> = kosaraju_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() >= 2 || graph.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            let mut members: Vec<usize> = scc.into_iter().map(|node| graph[node]).collect();
            members.sort_unstable();
            members
        })
        .collect();

    if cycles.is_empty() {
        return Ok(());
    }

    cycles.sort_unstable();
    Err(PlanningError::Cycle {
        cycles: cycles
            .into_iter()
            .map(|members| {
                members
                    .into_iter()
                    .map(|ix| tests[ix].id().clone())
                    .collect()
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{SourceLocation, TestCommand};
    use pretty_assertions::assert_eq;
    use proptest::{collection::vec, prelude::*};
    use std::collections::BTreeSet;

    fn make_test(id: &str, deps: &[&str], isolation: Isolation) -> TestCase {
        TestCase::new(
            id,
            SourceLocation::new("plan.itest.toml", 1),
            TestCommand::new("true", Vec::<String>::new(), "/"),
        )
        .with_dependencies(deps.iter().copied())
        .with_isolation(isolation)
    }

    fn batch_ids(plan: &ExecutionPlan) -> Vec<(BatchIsolation, Vec<&str>)> {
        plan.batches()
            .iter()
            .map(|batch| {
                (
                    batch.isolation(),
                    batch.tests().iter().map(TestId::as_str).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn independent_tests_share_a_batch() {
        let tests = [
            make_test("a", &["b"], Isolation::Parallel),
            make_test("b", &[], Isolation::Parallel),
            make_test("c", &[], Isolation::Parallel),
        ];
        let plan = ExecutionPlanner.plan(&tests).expect("plan succeeds");
        assert_eq!(
            batch_ids(&plan),
            vec![
                (BatchIsolation::Parallel, vec!["b", "c"]),
                (BatchIsolation::Parallel, vec!["a"]),
            ]
        );
        assert_eq!(plan.test_count(), 3);
        assert_eq!(plan.batches()[1].index(), 1);
    }

    #[test]
    fn serial_tests_get_sequential_batches() {
        let tests = [
            make_test("migrate", &[], Isolation::Serial),
            make_test("ping", &[], Isolation::Parallel),
            make_test("seed", &[], Isolation::Serial),
            make_test("query", &["migrate"], Isolation::Parallel),
            make_test("drop", &["migrate"], Isolation::Serial),
        ];
        let plan = ExecutionPlanner.plan(&tests).unwrap();
        assert_eq!(
            batch_ids(&plan),
            vec![
                (BatchIsolation::Parallel, vec!["ping"]),
                (BatchIsolation::Sequential, vec!["migrate", "seed"]),
                (BatchIsolation::Parallel, vec!["query"]),
                (BatchIsolation::Sequential, vec!["drop"]),
            ]
        );
    }

    #[test]
    fn empty_input() {
        let plan = ExecutionPlanner.plan(&[]).unwrap();
        assert!(plan.batches().is_empty());
    }

    #[test]
    fn cycles_are_reported() {
        let tests = [
            make_test("x", &[], Isolation::Parallel),
            make_test("b", &["a"], Isolation::Parallel),
            make_test("a", &["b"], Isolation::Parallel),
            make_test("self", &["self"], Isolation::Parallel),
        ];
        let err = ExecutionPlanner.plan(&tests).unwrap_err();
        assert_eq!(
            err,
            PlanningError::Cycle {
                cycles: vec![
                    vec![TestId::new("b"), TestId::new("a")],
                    vec![TestId::new("self")],
                ]
            }
        );
    }

    #[test]
    fn unknown_dependency() {
        let tests = [make_test("a", &["missing"], Isolation::Parallel)];
        assert_eq!(
            ExecutionPlanner.plan(&tests).unwrap_err(),
            PlanningError::UnknownDependency {
                test: TestId::new("a"),
                dependency: TestId::new("missing"),
            }
        );
    }

    #[test]
    fn duplicate_test() {
        let tests = [
            make_test("a", &[], Isolation::Parallel),
            make_test("a", &[], Isolation::Serial),
        ];
        assert_eq!(
            ExecutionPlanner.plan(&tests).unwrap_err(),
            PlanningError::DuplicateTest {
                test: TestId::new("a")
            }
        );
    }

    /// Generates acyclic test sets: test `i` may only depend on tests with a larger index, and
    /// the set is listed in index order so dependencies are often discovered after dependents.
    fn acyclic_tests() -> impl Strategy<Value = Vec<TestCase>> {
        (1_usize..12).prop_flat_map(|n| {
            (
                vec(vec(any::<prop::sample::Index>(), 0..3), n),
                vec(any::<bool>(), n),
            )
                .prop_map(move |(deps, serial)| {
                    (0..n)
                        .map(|i| {
                            let later = n - i - 1;
                            let deps: BTreeSet<String> = if later == 0 {
                                BTreeSet::new()
                            } else {
                                deps[i]
                                    .iter()
                                    .map(|ix| format!("t{}", i + 1 + ix.index(later)))
                                    .collect()
                            };
                            let isolation = if serial[i] {
                                Isolation::Serial
                            } else {
                                Isolation::Parallel
                            };
                            make_test(
                                &format!("t{i}"),
                                &deps.iter().map(String::as_str).collect::<Vec<_>>(),
                                isolation,
                            )
                        })
                        .collect()
                })
        })
    }

    proptest! {
        #[test]
        fn proptest_dependencies_respected(tests in acyclic_tests()) {
            let plan = ExecutionPlanner.plan(&tests).expect("acyclic input plans");

            prop_assert_eq!(plan.test_count(), tests.len());
            for batch in plan.batches() {
                prop_assert!(!batch.is_empty());
            }
            for test in &tests {
                let ix = plan.batch_index_of(test.id()).expect("test is planned");
                for dep in test.dependencies() {
                    let dep_ix = plan.batch_index_of(dep).expect("dependency is planned");
                    prop_assert!(dep_ix < ix, "{} must run before {}", dep, test.id());
                }
            }
        }

        #[test]
        fn proptest_cycles_fail(len in 2_usize..8, extra in 0_usize..4) {
            let mut tests: Vec<TestCase> = (0..extra)
                .map(|i| make_test(&format!("free{i}"), &[], Isolation::Parallel))
                .collect();
            for i in 0..len {
                let next = format!("c{}", (i + 1) % len);
                tests.push(make_test(&format!("c{i}"), &[next.as_str()], Isolation::Parallel));
            }

            match ExecutionPlanner.plan(&tests) {
                Err(PlanningError::Cycle { cycles }) => {
                    prop_assert_eq!(cycles.len(), 1);
                    prop_assert_eq!(cycles[0].len(), len);
                }
                other => prop_assert!(false, "expected a cycle error, got {:?}", other),
            }
        }
    }
}
