//! Concurrent stream table.
//!
//! Streams are spread over a fixed set of shards keyed by id, each behind
//! its own lock, so frames for different streams rarely contend.
use std::sync::{Arc, Mutex, MutexGuard};

use nohash_hasher::{IntMap, IntSet};
use shroud_core::default::STREAM_TABLE_SHARDS;
use shroud_core::stream::StreamId;

use crate::stream::StreamShared;

/// A shard holds the ids congruent to its index modulo the shard count.
struct Shard {
    live: IntMap<StreamId, Arc<StreamShared>>,
    /// Every id of this shard below the mark is retired.
    retired_below: u32,
    /// Retired ids at or above the mark. Peers assign ids from a counter,
    /// so this only holds ids closed ahead of an earlier one.
    retired: IntSet<StreamId>,
}

impl Shard {
    fn new(index: u32, step: u32) -> Self {
        Self {
            live: IntMap::default(),
            // Id 0 is never assigned by either side.
            retired_below: if index == 0 { step } else { index },
            retired: IntSet::default(),
        }
    }

    fn is_retired(&self, id: StreamId) -> bool {
        id.0 < self.retired_below || self.retired.contains(&id)
    }

    fn retire(&mut self, id: StreamId, step: u32) {
        if self.is_retired(id) {
            return;
        }
        self.retired.insert(id);
        while self.retired.contains(&StreamId(self.retired_below)) {
            let Some(next) = self.retired_below.checked_add(step) else {
                break;
            };
            self.retired.remove(&StreamId(self.retired_below));
            self.retired_below = next;
        }
    }
}

/// Result of [`StreamTable::get_or_create`].
pub(crate) enum Lookup {
    Existing(Arc<StreamShared>),
    Created(Arc<StreamShared>),
    Refused,
}

pub(crate) struct StreamTable {
    shards: Box<[Mutex<Shard>]>,
}

impl StreamTable {
    pub fn new() -> Self {
        let step = STREAM_TABLE_SHARDS as u32;
        let shards = (0..step)
            .map(|index| Mutex::new(Shard::new(index, step)))
            .collect();
        Self { shards }
    }

    fn step(&self) -> u32 {
        self.shards.len() as u32
    }

    fn shard(&self, id: StreamId) -> MutexGuard<'_, Shard> {
        let shard = &self.shards[id.0 as usize % self.shards.len()];
        match shard.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.shard(id).live.contains_key(&id)
    }

    /// Insert a stream if `admit` agrees while the shard is locked.
    pub fn insert(&self, id: StreamId, stream: Arc<StreamShared>, admit: impl FnOnce() -> bool) -> bool {
        let mut shard = self.shard(id);
        if shard.live.contains_key(&id) || shard.is_retired(id) || !admit() {
            return false;
        }
        shard.live.insert(id, stream);
        true
    }

    /// Look up `id`, creating it with `create` if it was never seen.
    /// Retired ids and ids `create` declines are refused.
    pub fn get_or_create(
        &self,
        id: StreamId,
        create: impl FnOnce() -> Option<Arc<StreamShared>>,
    ) -> Lookup {
        let mut shard = self.shard(id);
        if let Some(stream) = shard.live.get(&id) {
            return Lookup::Existing(stream.clone());
        }
        if shard.is_retired(id) {
            return Lookup::Refused;
        }
        match create() {
            Some(stream) => {
                shard.live.insert(id, stream.clone());
                Lookup::Created(stream)
            }
            None => Lookup::Refused,
        }
    }

    /// Remove `id`. With `retire`, the id can never be created again.
    pub fn remove(&self, id: StreamId, retire: bool) -> Option<Arc<StreamShared>> {
        let step = self.step();
        let mut shard = self.shard(id);
        if retire {
            shard.retire(id, step);
        }
        shard.live.remove(&id)
    }

    /// Remove every live stream.
    pub fn drain(&self) -> Vec<Arc<StreamShared>> {
        let mut drained = Vec::new();
        for shard in self.shards.iter() {
            let mut shard = match shard.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            drained.extend(shard.live.drain().map(|(_, stream)| stream));
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| match shard.lock() {
                Ok(guard) => guard.live.len(),
                Err(poisoned) => poisoned.into_inner().live.len(),
            })
            .sum()
    }

    pub fn ids(&self) -> Vec<StreamId> {
        let mut ids = Vec::new();
        for shard in self.shards.iter() {
            let shard = match shard.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            ids.extend(shard.live.keys().copied());
        }
        ids.sort();
        ids
    }
}
