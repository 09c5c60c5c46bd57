// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::VecDeque;
use std::sync::Arc;

use crate::blocks::Tipset;

/// A bounded buffer of recent heads. A tipset is only released for indexing
/// once `size` heavier tipsets have landed beyond it, giving reverts within
/// the confidence window a chance to retract it first.
pub struct TipSetCache {
    buffer: VecDeque<Arc<Tipset>>,
    size: usize,
}

impl TipSetCache {
    pub fn new(size: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(size + 1),
            size,
        }
    }

    /// Pushes a new head, returning the tipset that fell out of the
    /// confidence window, if any. Heads must arrive in increasing height
    /// order.
    pub fn add(&mut self, ts: Arc<Tipset>) -> Result<Option<Arc<Tipset>>, String> {
        if let Some(head) = self.buffer.front() {
            if ts.epoch() <= head.epoch() {
                return Err(format!(
                    "out-of-order head: {} arrived after {}",
                    ts.epoch(),
                    head.epoch()
                ));
            }
        }
        self.buffer.push_front(ts);
        if self.buffer.len() > self.size {
            return Ok(self.buffer.pop_back());
        }
        Ok(None)
    }

    /// Retracts the current head on a revert event. Reverts reaching deeper
    /// than the buffered head are the caller's problem to log.
    pub fn revert(&mut self, ts: &Tipset) -> Result<(), String> {
        match self.buffer.front() {
            Some(head) if head.key() == ts.key() => {
                self.buffer.pop_front();
                Ok(())
            }
            Some(head) => Err(format!(
                "revert of {} does not match buffered head {}",
                ts.key(),
                head.key()
            )),
            None => Err("revert with empty cache".to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn head(&self) -> Option<&Arc<Tipset>> {
        self.buffer.front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ChainBuilder;

    #[test]
    fn releases_tail_after_confidence() {
        let mut builder = ChainBuilder::new();
        for _ in 0..5 {
            builder.extend();
        }
        let tipsets = builder.tipsets();

        let mut cache = TipSetCache::new(2);
        assert!(cache.add(tipsets[1].clone()).unwrap().is_none());
        assert!(cache.add(tipsets[2].clone()).unwrap().is_none());
        // Third head pushes the first past the confidence window.
        let released = cache.add(tipsets[3].clone()).unwrap().unwrap();
        assert_eq!(released.key(), tipsets[1].key());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_confidence_releases_immediately() {
        let mut builder = ChainBuilder::new();
        builder.extend();
        let ts = builder.tipsets()[1].clone();

        let mut cache = TipSetCache::new(0);
        let released = cache.add(ts.clone()).unwrap().unwrap();
        assert_eq!(released.key(), ts.key());
    }

    #[test]
    fn revert_retracts_head() {
        let mut builder = ChainBuilder::new();
        for _ in 0..3 {
            builder.extend();
        }
        let tipsets = builder.tipsets();

        let mut cache = TipSetCache::new(3);
        cache.add(tipsets[1].clone()).unwrap();
        cache.add(tipsets[2].clone()).unwrap();
        cache.revert(&tipsets[2]).unwrap();
        assert_eq!(cache.head().unwrap().key(), tipsets[1].key());

        // A deeper revert does not match the head.
        assert!(cache.revert(&tipsets[3]).is_err());
    }

    #[test]
    fn rejects_out_of_order_heads() {
        let mut builder = ChainBuilder::new();
        for _ in 0..2 {
            builder.extend();
        }
        let tipsets = builder.tipsets();

        let mut cache = TipSetCache::new(3);
        cache.add(tipsets[2].clone()).unwrap();
        assert!(cache.add(tipsets[1].clone()).is_err());
    }
}
