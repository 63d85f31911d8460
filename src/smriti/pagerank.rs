//! PageRank over the knowledge graph's edge list.
//!
//! The graph arrives as string-id nodes and `(source, target)` edges, never
//! as pointer structures. Dangling nodes redistribute their rank uniformly;
//! iteration stops at an ℓ1 tolerance of 1e-6 or the iteration cap.

use std::collections::HashMap;

/// Standard damping factor.
pub const DAMPING: f64 = 0.85;

/// Minimum iterations before convergence may stop the loop.
pub const MIN_ITERATIONS: usize = 30;

/// Iteration cap.
pub const MAX_ITERATIONS: usize = 100;

/// ℓ1 convergence tolerance.
pub const TOLERANCE: f64 = 1e-6;

/// Compute PageRank for `nodes` over directed `edges`.
///
/// Ranks sum to 1. Unknown edge endpoints are ignored; an empty node set
/// yields an empty map.
pub fn pagerank(nodes: &[String], edges: &[(String, String)]) -> HashMap<String, f64> {
    let n = nodes.len();
    if n == 0 {
        return HashMap::new();
    }

    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    // Adjacency: per-source list of target indices.
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (source, target) in edges {
        let (Some(&s), Some(&t)) = (index.get(source.as_str()), index.get(target.as_str()))
        else {
            continue;
        };
        outgoing[s].push(t);
    }

    let uniform = 1.0 / n as f64;
    let mut ranks = vec![uniform; n];

    for iteration in 0..MAX_ITERATIONS {
        let mut next = vec![(1.0 - DAMPING) * uniform; n];

        // Dangling mass is spread uniformly.
        let dangling: f64 = outgoing
            .iter()
            .zip(ranks.iter())
            .filter(|(targets, _)| targets.is_empty())
            .map(|(_, rank)| *rank)
            .sum();
        let dangling_share = DAMPING * dangling * uniform;
        for value in &mut next {
            *value += dangling_share;
        }

        for (source, targets) in outgoing.iter().enumerate() {
            if targets.is_empty() {
                continue;
            }
            let share = DAMPING * ranks[source] / targets.len() as f64;
            for &target in targets {
                next[target] += share;
            }
        }

        let delta: f64 = next
            .iter()
            .zip(ranks.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        ranks = next;

        if iteration + 1 >= MIN_ITERATIONS && delta < TOLERANCE {
            break;
        }
    }

    nodes
        .iter()
        .enumerate()
        .map(|(i, id)| (id.clone(), ranks[i]))
        .collect()
}
