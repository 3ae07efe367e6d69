//! Commit ordering over an arena of tracked items.

use std::collections::HashSet;

use crate::error::{QueryError, Result};

/// Orders `count` items so that every item comes after its predecessors.
///
/// `before[i]` lists the items that must precede item `i`. Visiting is a
/// depth-first search with an explicit stack; meeting an item that is on
/// the stack but not finished is a cycle, reported through `describe`.
pub fn topological_order(
    count: usize,
    before: &[Vec<usize>],
    describe: impl Fn(usize) -> String,
) -> Result<Vec<usize>> {
    let mut seen = HashSet::with_capacity(count);
    let mut done = HashSet::with_capacity(count);
    let mut order = Vec::with_capacity(count);
    for start in 0..count {
        if done.contains(&start) {
            continue;
        }
        seen.insert(start);
        let mut stack = vec![(start, 0_usize)];
        while let Some((node, next)) = stack.last_mut() {
            let node = *node;
            let preds = before.get(node).map_or(&[][..], Vec::as_slice);
            if let Some(&pred) = preds.get(*next) {
                *next += 1;
                if done.contains(&pred) {
                    continue;
                }
                if !seen.insert(pred) {
                    return Err(QueryError::DependencyCycle {
                        item: describe(pred),
                    });
                }
                stack.push((pred, 0));
            } else {
                done.insert(node);
                order.push(node);
                stack.pop();
            }
        }
    }
    Ok(order)
}
