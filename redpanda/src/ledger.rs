//! Per-partition bookkeeping of handed-out offsets.
//!
//! Kafka only knows one committed offset per partition, so "complete this
//! message" has to be turned into "advance the committed offset past every
//! contiguous completed message". Everything at or after the first
//! uncompleted offset is read again after a seek; completed offsets in that
//! range are remembered and skipped instead of being handed out twice.

use std::collections::{BTreeMap, BTreeSet, HashMap};

/// What to do with one partition when a batch is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    /// Partition number
    pub partition: i32,
    /// Offset to commit (the next offset the group should read)
    pub commit_offset: i64,
    /// `true` when an uncompleted message sits at `commit_offset` and the
    /// consumer must seek back to it
    pub rewind: bool,
}

/// Offsets handed out since the last settlement, plus delivery counts and
/// completions of offsets above the committed position.
#[derive(Debug, Default)]
pub struct PartitionLedger {
    outstanding: BTreeMap<i32, BTreeMap<i64, bool>>,
    deliveries: HashMap<(i32, i64), u32>,
    completed_ahead: BTreeMap<i32, BTreeSet<i64>>,
}

impl PartitionLedger {
    /// Create an empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivery and return its delivery count (starting at 1).
    ///
    /// Returns `None` for an offset that was already completed in an earlier
    /// batch; it is settled as completed and must not be handed out.
    pub fn record(&mut self, partition: i32, offset: i64) -> Option<u32> {
        let already_completed = self
            .completed_ahead
            .get(&partition)
            .is_some_and(|offsets| offsets.contains(&offset));

        self.outstanding
            .entry(partition)
            .or_default()
            .insert(offset, already_completed);
        if already_completed {
            return None;
        }

        let count = self.deliveries.entry((partition, offset)).or_insert(0);
        *count += 1;
        Some(*count)
    }

    /// Mark a delivery completed. Returns `false` if it was not outstanding.
    pub fn complete(&mut self, partition: i32, offset: i64) -> bool {
        match self
            .outstanding
            .get_mut(&partition)
            .and_then(|offsets| offsets.get_mut(&offset))
        {
            Some(done) => {
                *done = true;
                self.completed_ahead.entry(partition).or_default().insert(offset);
                true
            }
            None => false,
        }
    }

    /// Number of deliveries not yet settled
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.values().map(BTreeMap::len).sum()
    }

    /// Close the current batch and return one settlement per partition.
    pub fn settle(&mut self) -> Vec<Settlement> {
        let outstanding = std::mem::take(&mut self.outstanding);
        let mut settlements = Vec::with_capacity(outstanding.len());

        for (partition, offsets) in outstanding {
            let first_open = offsets
                .iter()
                .find_map(|(offset, done)| (!done).then_some(*offset));

            let settlement = match first_open {
                Some(offset) => Settlement {
                    partition,
                    commit_offset: offset,
                    rewind: true,
                },
                None => Settlement {
                    partition,
                    commit_offset: offsets.keys().next_back().map_or(0, |last| last + 1),
                    rewind: false,
                },
            };

            self.deliveries
                .retain(|(p, offset), _| *p != partition || *offset >= settlement.commit_offset);
            if let Some(completed) = self.completed_ahead.get_mut(&partition) {
                completed.retain(|offset| *offset >= settlement.commit_offset);
                if completed.is_empty() {
                    self.completed_ahead.remove(&partition);
                }
            }
            settlements.push(settlement);
        }

        settlements
    }
}

/// Lock token for a delivery.
#[must_use]
pub fn lock_token(partition: i32, offset: i64) -> String {
    format!("{partition}:{offset}")
}

/// Parse a token produced by [`lock_token`].
#[must_use]
pub fn parse_lock_token(token: &str) -> Option<(i32, i64)> {
    let (partition, offset) = token.split_once(':')?;
    Some((partition.parse().ok()?, offset.parse().ok()?))
}
