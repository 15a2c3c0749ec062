use std::fmt::Debug;
use std::hash::Hash;

use indexmap::{IndexMap, IndexSet};

use crate::error::{QueryError, Result};

/// Orders `nodes` so every `(before, after)` edge is respected. Ties keep
/// the input order. A cycle is an error naming the nodes caught in it.
pub fn topological_sort<N>(nodes: &[N], edges: &[(N, N)]) -> Result<Vec<N>>
where
    N: Clone + Eq + Hash + Debug,
{
    let mut incoming: IndexMap<N, usize> = nodes.iter().map(|n| (n.clone(), 0)).collect();
    let mut outgoing: IndexMap<N, IndexSet<N>> = IndexMap::new();
    for (before, after) in edges {
        for n in [before, after] {
            incoming.entry(n.clone()).or_insert(0);
        }
        if outgoing.entry(before.clone()).or_default().insert(after.clone()) {
            *incoming.entry(after.clone()).or_insert(0) += 1;
        }
    }

    let mut ready: Vec<N> = incoming.iter().filter(|(_, c)| **c == 0).map(|(n, _)| n.clone()).collect();
    ready.reverse();
    let mut sorted = Vec::with_capacity(incoming.len());
    while let Some(node) = ready.pop() {
        let mut released = Vec::new();
        if let Some(successors) = outgoing.get(&node) {
            for next in successors {
                if let Some(count) = incoming.get_mut(next) {
                    *count -= 1;
                    if *count == 0 {
                        released.push(next.clone());
                    }
                }
            }
        }
        // keep input order among newly released nodes
        released.sort_by_key(|n| incoming.get_index_of(n));
        ready.extend(released.into_iter().rev());
        sorted.push(node);
    }

    if sorted.len() != incoming.len() {
        let stuck: Vec<_> = incoming.iter().filter(|(_, c)| **c > 0).map(|(n, _)| format!("{n:?}")).collect();
        return Err(QueryError::CyclicDependency(stuck.join(", ")));
    }
    Ok(sorted)
}
