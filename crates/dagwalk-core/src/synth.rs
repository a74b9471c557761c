//! Deterministic synthetic DAGs.
//!
//! Each block adds a few events from random creators, every one with its
//! creator's previous event as self-parent plus some other creators' latest
//! events. The block closes with an atropos event that references every
//! creator's latest event, so a walk from the atropos reaches the whole
//! block. A new epoch starts with no cross-epoch parents.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventError, Role};
use crate::id::{BlockHeight, Epoch, EventId, ValidatorId};
use crate::source::MemorySource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthConfig {
    pub blocks: BlockHeight,
    pub creators: ValidatorId,
    pub events_per_block: usize,
    pub blocks_per_epoch: BlockHeight,
    /// Upper bound on parents of ordinary events, self-parent included.
    pub max_parents: usize,
    pub seed: u64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            blocks: 10,
            creators: 4,
            events_per_block: 6,
            blocks_per_epoch: 5,
            max_parents: 3,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SynthDag {
    events: Vec<Event>,
    blocks: Vec<(BlockHeight, EventId)>,
}

impl SynthDag {
    /// All events, parents before children.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// `(height, atropos)` per block, ascending.
    #[must_use]
    pub fn blocks(&self) -> &[(BlockHeight, EventId)] {
        &self.blocks
    }

    #[must_use]
    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    #[must_use]
    pub fn to_source(&self) -> MemorySource {
        MemorySource::from_events(self.events.iter().cloned())
    }
}

struct Generator {
    rng: StdRng,
    config: SynthConfig,
    heads: Vec<Option<EventId>>,
    epoch: Epoch,
    seq: u32,
}

impl Generator {
    fn event(
        &mut self,
        creator: ValidatorId,
        parents: Vec<EventId>,
        block: BlockHeight,
    ) -> Result<Event, EventError> {
        self.seq += 1;
        let mut content = Vec::with_capacity(16 + 32 * parents.len());
        content.extend_from_slice(&self.config.seed.to_be_bytes());
        content.extend_from_slice(&creator.to_be_bytes());
        for parent in &parents {
            content.extend_from_slice(&parent.to_bytes());
        }
        let id = EventId::from_content(self.epoch, self.seq, &content);
        self.heads[creator as usize] = Some(id);
        Ok(Event::new(id, creator, parents)?.with_block(block))
    }

    fn ordinary(&mut self, block: BlockHeight) -> Result<Event, EventError> {
        let creator = self.rng.gen_range(0..self.config.creators);
        let mut parents: Vec<EventId> = self.heads[creator as usize].into_iter().collect();
        let mut others: Vec<EventId> = self
            .heads
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != creator as usize)
            .filter_map(|(_, head)| *head)
            .collect();
        others.shuffle(&mut self.rng);
        let room = self.config.max_parents.saturating_sub(parents.len());
        let extra = self.rng.gen_range(0..=room.min(others.len()));
        parents.extend(others.into_iter().take(extra));
        self.event(creator, parents, block)
    }

    fn atropos(&mut self, block: BlockHeight) -> Result<Event, EventError> {
        let creator = self.rng.gen_range(0..self.config.creators);
        let parents: Vec<EventId> = self.heads.iter().filter_map(|head| *head).collect();
        Ok(self.event(creator, parents, block)?.with_role(Role::Atropos))
    }
}

/// Generate a DAG. The same config always yields the same DAG.
///
/// # Errors
///
/// Returns an [`EventError`] if two generated ids collide.
pub fn generate(config: &SynthConfig) -> Result<SynthDag, EventError> {
    let creators = config.creators.max(1);
    let config = SynthConfig {
        creators,
        blocks_per_epoch: config.blocks_per_epoch.max(1),
        max_parents: config.max_parents.max(1),
        ..*config
    };
    let mut generator = Generator {
        rng: StdRng::seed_from_u64(config.seed),
        config,
        heads: vec![None; creators as usize],
        epoch: 1,
        seq: 0,
    };
    let mut dag = SynthDag::default();

    for block in 1..=config.blocks {
        let epoch = Epoch::try_from(1 + (block - 1) / config.blocks_per_epoch).unwrap_or(Epoch::MAX);
        if epoch != generator.epoch {
            generator.epoch = epoch;
            generator.seq = 0;
            generator.heads.iter_mut().for_each(|head| *head = None);
        }
        for _ in 0..config.events_per_block {
            let event = generator.ordinary(block)?;
            dag.events.push(event);
        }
        let atropos = generator.atropos(block)?;
        dag.blocks.push((block, atropos.id()));
        dag.events.push(atropos);
    }
    Ok(dag)
}

/// A copy of `events` in a seeded random order.
#[must_use]
pub fn shuffled(events: &[Event], seed: u64) -> Vec<Event> {
    let mut out = events.to_vec();
    out.shuffle(&mut StdRng::seed_from_u64(seed));
    out
}
