//! DAG validation - topological ordering and reachability
//!
//! Kahn's algorithm with a fixed tie-break: among ready tasks, declaration
//! order wins. Certain task bodies submit jobs against shared external quota,
//! so a fixed graph must always execute in the same order.

use std::collections::BTreeSet;

use super::TaskSpec;

/// Topological order over task indices, or a rendered cycle on failure.
///
/// `deps[i]` lists the dependency indices of task `i`.
pub fn toposort(tasks: &[TaskSpec], deps: &[Vec<usize>]) -> Result<Vec<usize>, String> {
    let n = tasks.len();
    let mut remaining_deps: Vec<usize> = deps.iter().map(|d| d.len()).collect();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, dep_list) in deps.iter().enumerate() {
        for &d in dep_list {
            successors[d].push(i);
        }
    }

    let mut emitted = vec![false; n];
    let mut order = Vec::with_capacity(n);

    // n passes at most; each pass takes the first ready task in declaration
    // order. Quadratic, but graphs here are tens of tasks.
    while order.len() < n {
        let next = (0..n).find(|&i| !emitted[i] && remaining_deps[i] == 0);
        match next {
            Some(i) => {
                emitted[i] = true;
                order.push(i);
                for &s in &successors[i] {
                    remaining_deps[s] -= 1;
                }
            }
            None => return Err(render_cycle(tasks, deps, &emitted)),
        }
    }

    Ok(order)
}

/// Walk dependency edges among the non-emitted tasks until a repeat shows up
fn render_cycle(tasks: &[TaskSpec], deps: &[Vec<usize>], emitted: &[bool]) -> String {
    let start = (0..tasks.len())
        .find(|&i| !emitted[i])
        .expect("cycle render called without stuck tasks");

    let mut path = vec![start];
    let mut seen = BTreeSet::from([start]);
    let mut current = start;

    loop {
        // Any unemitted dependency keeps the walk inside the cycle
        let next = deps[current]
            .iter()
            .copied()
            .find(|&d| !emitted[d])
            .expect("stuck task must have a stuck dependency");
        if !seen.insert(next) {
            // Trim the lead-in so the rendered path starts at the repeat
            let pos = path.iter().position(|&i| i == next).unwrap_or(0);
            path.drain(..pos);
            path.push(next);
            break;
        }
        path.push(next);
        current = next;
    }

    path.iter()
        .map(|&i| tasks[i].name.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Indices reachable backwards (via dependency edges) from `targets`, inclusive
pub fn reachable(deps: &[Vec<usize>], targets: impl IntoIterator<Item = usize>) -> BTreeSet<usize> {
    let mut visited = BTreeSet::new();
    let mut stack: Vec<usize> = targets.into_iter().collect();

    while let Some(i) = stack.pop() {
        if visited.insert(i) {
            stack.extend(deps[i].iter().copied());
        }
    }

    visited
}
