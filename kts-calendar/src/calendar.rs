//! Append-only calendar of signed aggregation rounds
//!
//! Every round contributes one calendar leaf `H("cal" || root || time)`.
//! A publication fixes the root of the tree over all leaves up to a round,
//! and extension proves a round's leaf into such a tree.

use kts_core::{HashTree, PublicationsFileBuilder};
use kts_core::publications::PublicationRecord;
use kts_types::{
    messages::calendar_leaf_hash, CalendarChain, Digest, PublicKey, Timestamp,
};
use tracing::{debug, info};

use crate::error::{CalendarError, Result};
use crate::signer::Signer;

#[derive(Debug, Clone, Copy)]
struct Round {
    time: Timestamp,
    leaf: Digest,
}

#[derive(Debug)]
pub struct Calendar {
    started: Timestamp,
    rounds: Vec<Round>,
    publications: Vec<PublicationRecord>,
    /// Round signing keys and when they became trusted
    keys: Vec<(Timestamp, PublicKey)>,
}

impl Calendar {
    /// Empty calendar trusting `signing_key` from `started` onwards
    pub fn new(started: Timestamp, signing_key: PublicKey) -> Self {
        Self {
            started,
            rounds: Vec::new(),
            publications: Vec::new(),
            keys: vec![(started, signing_key)],
        }
    }

    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    pub fn head_time(&self) -> Option<Timestamp> {
        self.rounds.last().map(|r| r.time)
    }

    pub fn publications(&self) -> &[PublicationRecord] {
        &self.publications
    }

    /// Time for the next round: `now`, bumped past the previous round if needed
    pub fn next_round_time(&self, now: Timestamp) -> Timestamp {
        let floor = match self.head_time() {
            Some(last) => last.add_nanos(1),
            None => self.started,
        };
        now.max(floor)
    }

    /// Append a signed round root
    pub fn append(&mut self, time: Timestamp, round_root: &Digest) -> Result<()> {
        if let Some(last) = self.head_time() {
            if time <= last {
                return Err(CalendarError::RoundOrder {
                    last,
                    attempted: time,
                });
            }
        }
        self.rounds.push(Round {
            time,
            leaf: calendar_leaf_hash(round_root, &time),
        });
        debug!(round = self.rounds.len(), time = %time, "Appended calendar round");
        Ok(())
    }

    /// Publish the root over all rounds so far
    pub fn publish(&mut self) -> Result<PublicationRecord> {
        let head = self.rounds.len().checked_sub(1).ok_or(CalendarError::EmptyCalendar)?;
        let time = self.rounds[head].time;

        if let Some(existing) = self.publications.last() {
            if existing.time == time {
                return Ok(*existing);
            }
        }

        let record = PublicationRecord {
            time,
            root: self.tree_through(head).root(),
        };
        self.publications.push(record);
        info!(time = %time, root = %record.root, "Published calendar root");
        Ok(record)
    }

    /// Chain from the round at `registration_time` to a publication.
    ///
    /// The target is `publication_time` when given, otherwise the earliest
    /// publication at or after the round, otherwise the calendar head.
    pub fn extend(
        &self,
        registration_time: &Timestamp,
        publication_time: Option<&Timestamp>,
    ) -> Result<CalendarChain> {
        let round = self
            .round_index(registration_time)
            .ok_or(CalendarError::UnknownRound(*registration_time))?;

        let target_time = match publication_time {
            Some(requested) => {
                if requested < registration_time {
                    return Err(CalendarError::InvalidRequest(
                        "publication precedes registration".to_string(),
                    ));
                }
                self.publications
                    .iter()
                    .find(|p| p.time == *requested)
                    .map(|p| p.time)
                    .ok_or(CalendarError::UnknownPublication(*requested))?
            }
            None => {
                let i = self.publications.partition_point(|p| p.time < *registration_time);
                match self.publications.get(i) {
                    Some(p) => p.time,
                    None => self.head_time().ok_or(CalendarError::EmptyCalendar)?,
                }
            }
        };

        let target = self
            .round_index(&target_time)
            .ok_or(CalendarError::UnknownRound(target_time))?;
        let path = self
            .tree_through(target)
            .generate_path(round)
            .ok_or(CalendarError::UnknownRound(*registration_time))?;

        debug!(
            registration_time = %registration_time,
            publication_time = %target_time,
            depth = path.depth(),
            "Built calendar chain"
        );

        Ok(CalendarChain {
            publication_time: target_time,
            path,
        })
    }

    /// Encode and sign the publications file
    pub fn publications_file(&self, publisher: &dyn Signer) -> Result<Vec<u8>> {
        let mut builder = PublicationsFileBuilder::new();
        for (published_at, key) in &self.keys {
            builder.add_key(*published_at, key);
        }
        for p in &self.publications {
            builder.add_publication(p.time, p.root);
        }
        builder.encode(publisher.public_key(), |msg| publisher.sign(msg))
    }

    fn round_index(&self, time: &Timestamp) -> Option<usize> {
        self.rounds.binary_search_by(|r| r.time.cmp(time)).ok()
    }

    fn tree_through(&self, last: usize) -> HashTree {
        self.rounds[..=last].iter().map(|r| r.leaf).collect()
    }
}
