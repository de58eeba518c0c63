//! Duplicate suppression
//!
//! A bounded, insertion-ordered set of recently seen packet hashes, plus the
//! sliding nonce window used to reject replayed link packets.

use std::collections::{HashSet, VecDeque};

use crate::types::PacketHash;

/// Default number of packet hashes remembered
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Width of the link replay window in nonces
pub const REPLAY_WINDOW_SIZE: u64 = 64;

// ----------------------------------------------------------------------------
// Packet Cache
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct PacketCache {
    seen: HashSet<PacketHash>,
    order: VecDeque<PacketHash>,
    capacity: usize,
}

impl PacketCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `hash`; returns false if it was already present
    pub fn insert(&mut self, hash: PacketHash) -> bool {
        if !self.seen.insert(hash) {
            return false;
        }
        self.order.push_back(hash);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, hash: &PacketHash) -> bool {
        self.seen.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for PacketCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

// ----------------------------------------------------------------------------
// Replay Window
// ----------------------------------------------------------------------------

/// Sliding bitmap over the highest nonce seen on a link
#[derive(Debug, Default, Clone)]
pub struct ReplayWindow {
    highest: Option<u64>,
    bitmap: u64,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `nonce` once; replays and nonces older than the window are refused
    pub fn accept(&mut self, nonce: u64) -> bool {
        let Some(highest) = self.highest else {
            self.highest = Some(nonce);
            self.bitmap = 1;
            return true;
        };

        if nonce > highest {
            let shift = nonce - highest;
            self.bitmap = if shift >= REPLAY_WINDOW_SIZE {
                0
            } else {
                self.bitmap << shift
            };
            self.bitmap |= 1;
            self.highest = Some(nonce);
            return true;
        }

        let offset = highest - nonce;
        if offset >= REPLAY_WINDOW_SIZE {
            return false;
        }
        let mask = 1u64 << offset;
        if self.bitmap & mask != 0 {
            return false;
        }
        self.bitmap |= mask;
        true
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
