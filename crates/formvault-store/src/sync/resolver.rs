// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic conflict resolution.
//!
//! Two records for the same logical credential under different sync ids
//! must converge to the same winner on every peer, regardless of arrival
//! order: newer last-modified wins, and an exact tie is broken by the
//! lexically larger sync id.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictWinner {
    Local,
    Incoming,
}

/// Decide which side survives a same-credential conflict.
pub fn resolve_conflict(
    local_modified: DateTime<Utc>,
    local_id: &str,
    incoming_modified: DateTime<Utc>,
    incoming_id: &str,
) -> ConflictWinner {
    match incoming_modified.cmp(&local_modified) {
        std::cmp::Ordering::Greater => ConflictWinner::Incoming,
        std::cmp::Ordering::Less => ConflictWinner::Local,
        std::cmp::Ordering::Equal => {
            if incoming_id > local_id {
                ConflictWinner::Incoming
            } else {
                ConflictWinner::Local
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn newer_timestamp_wins() {
        assert_eq!(
            resolve_conflict(at(100), "aaa", at(200), "bbb"),
            ConflictWinner::Incoming
        );
        assert_eq!(
            resolve_conflict(at(200), "aaa", at(100), "bbb"),
            ConflictWinner::Local
        );
    }

    #[test]
    fn tie_breaks_on_lexically_larger_id() {
        assert_eq!(
            resolve_conflict(at(100), "aaa", at(100), "bbb"),
            ConflictWinner::Incoming
        );
        assert_eq!(
            resolve_conflict(at(100), "zzz", at(100), "bbb"),
            ConflictWinner::Local
        );
    }

    #[test]
    fn resolution_is_symmetric_across_peers() {
        // Peer A holds (t1, "aaa") and receives (t1, "bbb");
        // peer B holds (t1, "bbb") and receives (t1, "aaa").
        // Both must keep "bbb".
        assert_eq!(
            resolve_conflict(at(7), "aaa", at(7), "bbb"),
            ConflictWinner::Incoming
        );
        assert_eq!(
            resolve_conflict(at(7), "bbb", at(7), "aaa"),
            ConflictWinner::Local
        );
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Whichever peer applies the other's record first, both must
            // end up keeping the same sync id.
            #[test]
            fn peers_converge_regardless_of_arrival_order(
                t_a in 0i64..1_000_000,
                t_b in 0i64..1_000_000,
                id_a in "[a-z0-9]{8}",
                id_b in "[a-z0-9]{8}",
            ) {
                prop_assume!(id_a != id_b);
                let a_keeps = match resolve_conflict(at(t_a), &id_a, at(t_b), &id_b) {
                    ConflictWinner::Local => &id_a,
                    ConflictWinner::Incoming => &id_b,
                };
                let b_keeps = match resolve_conflict(at(t_b), &id_b, at(t_a), &id_a) {
                    ConflictWinner::Local => &id_b,
                    ConflictWinner::Incoming => &id_a,
                };
                prop_assert_eq!(a_keeps, b_keeps);
            }
        }
    }
}
