//! Attendant selection per distribution strategy.
//!
//! Pure functions over a queue snapshot and the current per-member load.
//! The router makes the choice atomic by committing the advanced cursor
//! together with the assignment under the queue's version.

use std::collections::HashMap;

use switchboard_types::ticket::{DistributionStrategy, Queue};

/// A chosen attendant and the cursor the queue should store afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub assignee: String,
    pub next_cursor: u64,
}

/// Pick an attendant for the next ticket of `queue`, or `None` when every
/// member is at capacity (or the queue has no members).
///
/// `load` maps member id to non-terminal tickets held in this queue;
/// missing members count as zero.
pub fn select_assignee(queue: &Queue, load: &HashMap<String, u32>) -> Option<Selection> {
    let n = queue.members.len();
    if n == 0 {
        return None;
    }

    let load_of = |member: &str| load.get(member).copied().unwrap_or(0);
    let has_room = |member: &str| match queue.capacity_per_attendant {
        Some(cap) => load_of(member) < cap,
        None => true,
    };
    let start = (queue.cursor % n as u64) as usize;
    // Members in scan order from the cursor, paired with their offset.
    let from_cursor = (0..n).map(|offset| (offset, &queue.members[(start + offset) % n]));

    match queue.strategy {
        DistributionStrategy::RoundRobin => from_cursor
            .filter(|(_, m)| has_room(m))
            .map(|(offset, m)| Selection {
                assignee: m.clone(),
                next_cursor: queue.cursor + offset as u64 + 1,
            })
            .next(),
        DistributionStrategy::LeastLoad => from_cursor
            .filter(|(_, m)| has_room(m))
            // min_by_key keeps the first minimum, i.e. the earliest in scan order.
            .min_by_key(|(_, m)| load_of(m))
            .map(|(offset, m)| Selection {
                assignee: m.clone(),
                next_cursor: queue.cursor + offset as u64 + 1,
            }),
        DistributionStrategy::Priority => queue
            .members
            .iter()
            .find(|m| has_room(m))
            .map(|m| Selection {
                assignee: m.clone(),
                next_cursor: queue.cursor,
            }),
    }
}
