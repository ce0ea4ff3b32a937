//! Consistent hash ring with virtual nodes.
//!
//! Each member is placed on the ring `vnodes_per_member` times so ownership
//! spreads evenly; adding or removing a member only moves the keys that
//! fall in its arcs, roughly 1/N of the keyspace.

use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Virtual nodes per member
pub const DEFAULT_VNODES_PER_MEMBER: usize = 160;

#[derive(Debug, Clone)]
pub struct HashRing {
    /// Ring position -> every member hashed there; the smallest name owns it
    vnodes: BTreeMap<u64, BTreeSet<String>>,
    vnodes_per_member: usize,
    members: BTreeSet<String>,
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new()
    }
}

impl HashRing {
    pub fn new() -> Self {
        Self::with_vnodes(DEFAULT_VNODES_PER_MEMBER)
    }

    pub fn with_vnodes(vnodes_per_member: usize) -> Self {
        Self {
            vnodes: BTreeMap::new(),
            vnodes_per_member: vnodes_per_member.max(1),
            members: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, member: &str) -> bool {
        self.members.contains(member)
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    pub fn add(&mut self, member: &str) {
        if !self.members.insert(member.to_string()) {
            return;
        }
        for position in self.positions(member) {
            self.claim(position, member);
        }
    }

    pub fn remove(&mut self, member: &str) {
        if !self.members.remove(member) {
            return;
        }
        for position in self.positions(member) {
            self.release(position, member);
        }
    }

    pub fn clear(&mut self) {
        self.members.clear();
        self.vnodes.clear();
    }

    /// Owner of the first ring position at or after the hash of `key`
    pub fn owner(&self, key: &[u8]) -> Option<&str> {
        let position = hash(key);
        self.vnodes
            .range(position..)
            .next()
            .or_else(|| self.vnodes.iter().next())
            .and_then(|(_, claimants)| claimants.first())
            .map(String::as_str)
    }

    fn positions(&self, member: &str) -> Vec<u64> {
        (0..self.vnodes_per_member)
            .map(|i| hash(format!("{}#{}", member, i).as_bytes()))
            .collect()
    }

    fn claim(&mut self, position: u64, member: &str) {
        self.vnodes
            .entry(position)
            .or_default()
            .insert(member.to_string());
    }

    fn release(&mut self, position: u64, member: &str) {
        if let Some(claimants) = self.vnodes.get_mut(&position) {
            claimants.remove(member);
            if claimants.is_empty() {
                self.vnodes.remove(&position);
            }
        }
    }
}

fn hash(bytes: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(bytes);
    hasher.finish()
}

/// Ring key for a bucket, or for a key inside a bucket
pub(crate) fn routing_key(bucket: &str, key: Option<&str>) -> Vec<u8> {
    match key {
        Some(key) => {
            let mut bytes = Vec::with_capacity(bucket.len() + key.len() + 1);
            bytes.extend_from_slice(bucket.as_bytes());
            bytes.push(0);
            bytes.extend_from_slice(key.as_bytes());
            bytes
        }
        None => bucket.as_bytes().to_vec(),
    }
}
