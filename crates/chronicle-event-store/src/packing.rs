//! Fitting a write into bounded transactions.
//!
//! A transaction holds one header operation plus one record operation per
//! event. Writes too large for that are packed: events are split evenly into
//! packets and each packet is written as a single record.

use chronicle_core::error::DomainError;

use crate::config::EventStoreConfig;

/// How the events of one write are laid out as record operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordPlan {
    /// One record per event.
    Individual,
    /// `packets` records, each holding a contiguous run of events.
    Packed {
        /// Number of packets.
        packets: usize,
    },
}

/// Chooses the record layout for `event_count` events.
///
/// # Errors
///
/// Returns `DomainError::EventPackingLimitExceeded` when the events do not
/// fit individually and packing is disabled, or when even the packed layout
/// needs more operations than one transaction allows.
pub fn plan(event_count: usize, config: &EventStoreConfig) -> Result<RecordPlan, DomainError> {
    let record_budget = config.max_operations_per_transaction.saturating_sub(1);
    if event_count <= record_budget {
        return Ok(RecordPlan::Individual);
    }
    if !config.packing_enabled {
        return Err(DomainError::EventPackingLimitExceeded {
            event_count,
            limit: record_budget,
        });
    }

    let per_packet = config.max_events_per_packet.max(1);
    let packets = event_count.div_ceil(per_packet);
    if packets > record_budget {
        return Err(DomainError::EventPackingLimitExceeded {
            event_count,
            limit: record_budget.saturating_mul(per_packet),
        });
    }
    Ok(RecordPlan::Packed { packets })
}

/// Splits `items` into exactly `groups` contiguous runs whose sizes differ by
/// at most one, larger runs first. Zero groups is treated as one.
pub fn split_evenly<T>(items: Vec<T>, groups: usize) -> Vec<Vec<T>> {
    let groups = groups.max(1);
    let base = items.len() / groups;
    let larger = items.len() % groups;

    let mut remaining = items.into_iter();
    (0..groups)
        .map(|index| {
            let size = if index < larger { base + 1 } else { base };
            remaining.by_ref().take(size).collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_operations: usize, per_packet: usize, packing: bool) -> EventStoreConfig {
        EventStoreConfig {
            max_operations_per_transaction: max_operations,
            max_events_per_packet: per_packet,
            packing_enabled: packing,
            ..EventStoreConfig::default()
        }
    }

    #[test]
    fn test_split_evenly_balances_and_preserves_order() {
        let groups = split_evenly((0..10).collect(), 3);

        assert_eq!(groups, vec![vec![0, 1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]]);
    }

    #[test]
    fn test_split_evenly_sizes_differ_by_at_most_one() {
        for len in 0..40 {
            for k in 1..9 {
                let groups = split_evenly((0..len).collect::<Vec<_>>(), k);
                let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
                let max = sizes.iter().copied().max().unwrap();
                let min = sizes.iter().copied().min().unwrap();

                assert_eq!(groups.len(), k);
                assert!(max - min <= 1, "len {len} k {k}: {sizes:?}");
                assert_eq!(groups.concat(), (0..len).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn test_split_evenly_empty_input_yields_empty_groups() {
        let groups: Vec<Vec<u8>> = split_evenly(Vec::new(), 4);

        assert_eq!(groups, vec![Vec::<u8>::new(); 4]);
    }

    #[test]
    fn test_split_evenly_zero_groups_is_one_group() {
        assert_eq!(split_evenly(vec![1, 2], 0), vec![vec![1, 2]]);
    }

    #[test]
    fn test_small_write_is_not_packed() {
        let plan = plan(99, &config(100, 100, true)).unwrap();

        assert_eq!(plan, RecordPlan::Individual);
    }

    #[test]
    fn test_header_counts_against_the_budget() {
        let plan = plan(100, &config(100, 100, true)).unwrap();

        assert_eq!(plan, RecordPlan::Packed { packets: 1 });
    }

    #[test]
    fn test_large_write_is_packed_into_ceiling_of_packets() {
        let plan = plan(25, &config(5, 10, true)).unwrap();

        assert_eq!(plan, RecordPlan::Packed { packets: 3 });
    }

    #[test]
    fn test_oversized_write_without_packing_is_rejected() {
        match plan(5, &config(5, 10, false)) {
            Err(DomainError::EventPackingLimitExceeded { event_count, limit }) => {
                assert_eq!(event_count, 5);
                assert_eq!(limit, 4);
            }
            other => panic!("expected EventPackingLimitExceeded, got {other:?}"),
        }
    }

    #[test]
    fn test_write_too_large_even_when_packed_is_rejected() {
        match plan(41, &config(5, 10, true)) {
            Err(DomainError::EventPackingLimitExceeded { event_count, limit }) => {
                assert_eq!(event_count, 41);
                assert_eq!(limit, 40);
            }
            other => panic!("expected EventPackingLimitExceeded, got {other:?}"),
        }
    }
}
