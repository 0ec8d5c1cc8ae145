//! # Peer-Address Directory
//!
//! A thread-safe index of peers and named groups, optionally backed by a
//! persistent [`Table`]. This is the only shared mutable state in the core:
//! the discovery and broadcast subsystems consult and mutate it through the
//! [`PeerDirectory`] capability, never reaching into its internals.
//!
//! ## Consistency
//!
//! The backing table is written first; the in-memory index is updated only
//! after the table write succeeds, so a store failure leaves both views
//! agreeing. Address updates apply only when the incoming address carries a
//! higher nonce than the stored one.
//!
//! ## Locking
//!
//! Two independent reader-writer locks: one over the peer index, one over the
//! group table. No operation holds both at once, so lock ordering never
//! matters. Group resolution snapshots the member list before touching the
//! peer index.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::error::Error;
use crate::peer::{GroupID, PeerAddress, PeerID};
use crate::store::{MemTable, Table};

/// Directory operations available to the other subsystems.
///
/// Concurrency is the directory's responsibility; callers may invoke any
/// operation from any task.
pub trait PeerDirectory: Send + Sync {
    /// Self's address. Never fails.
    fn me(&self) -> PeerAddress;

    /// Count of non-self peers in the directory.
    fn num_peers(&self) -> usize;

    /// Stored address of the given peer.
    fn peer_address(&self, id: &PeerID) -> Result<PeerAddress, Error>;

    /// Snapshot of all stored peers. Ordering unspecified.
    fn peer_addresses(&self) -> Vec<PeerAddress>;

    /// Unconditionally store an address.
    fn add_peer_address(&self, addr: PeerAddress) -> Result<(), Error>;

    /// Store iff newer than what is held. Returns whether a write happened.
    fn update_peer_address(&self, addr: PeerAddress) -> Result<bool, Error>;

    /// Remove a peer. Missing peers are not an error.
    fn remove_peer_address(&self, id: &PeerID) -> Result<(), Error>;

    /// Create or atomically replace a named group.
    fn add_group(&self, id: GroupID, peers: Vec<PeerID>) -> Result<(), Error>;

    /// Member identifiers of a group; the nil group resolves to every known
    /// peer.
    fn group_ids(&self, id: &GroupID) -> Result<Vec<PeerID>, Error>;

    /// Member addresses of a group. Members with no known address are
    /// skipped; self is always included when listed.
    fn group_addresses(&self, id: &GroupID) -> Result<Vec<PeerAddress>, Error>;

    /// Uniform random sample without replacement of size `min(n, |group|)`.
    fn random_peer_addresses(&self, id: &GroupID, n: usize) -> Result<Vec<PeerAddress>, Error>;

    /// Remove a named group. Idempotent.
    fn remove_group(&self, id: &GroupID);
}

/// Directory implementation holding every peer address in memory, mirrored
/// into a backing [`Table`].
pub struct Dht {
    me: PeerAddress,
    store: Box<dyn Table>,
    peers: RwLock<HashMap<PeerID, PeerAddress>>,
    groups: RwLock<HashMap<GroupID, Vec<PeerID>>>,
}

impl Dht {
    /// Build a directory seeded from the backing table and the bootstrap
    /// addresses. Bootstrap entries go through the same newer-wins rule as
    /// live updates; self is never stored as a peer. Passing `None` for the
    /// store keeps everything in memory.
    pub fn new(
        me: PeerAddress,
        store: Option<Box<dyn Table>>,
        bootstrap: Vec<PeerAddress>,
    ) -> Result<Arc<Self>, Error> {
        let store = store.unwrap_or_else(|| Box::new(MemTable::new()));

        let dht = Arc::new(Self {
            me,
            store,
            peers: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
        });

        dht.fill_from_store()?;
        for addr in bootstrap {
            if addr.id == dht.me.id {
                continue;
            }
            dht.update_peer_address(addr)?;
        }
        Ok(dht)
    }

    fn fill_from_store(&self) -> Result<(), Error> {
        let mut peers = self.peers.write();
        for (key, value) in self.store.entries()? {
            let addr = PeerAddress::decode(&value)
                .map_err(|e| Error::DecodingPeerAddress(format!("store key {key}: {e}")))?;
            peers.insert(addr.id, addr);
        }
        Ok(())
    }

    /// Write-through insert. The caller holds the peer write lock.
    fn insert_locked(
        &self,
        peers: &mut HashMap<PeerID, PeerAddress>,
        addr: PeerAddress,
    ) -> Result<(), Error> {
        let encoded = addr.encode().map_err(|e| {
            Error::DecodingPeerAddress(format!("encoding peer address {addr}: {e}"))
        })?;
        self.store.insert(&addr.id.to_string(), &encoded)?;
        peers.insert(addr.id, addr);
        Ok(())
    }
}

impl PeerDirectory for Dht {
    fn me(&self) -> PeerAddress {
        self.me
    }

    fn num_peers(&self) -> usize {
        let peers = self.peers.read();
        peers.keys().filter(|id| **id != self.me.id).count()
    }

    fn peer_address(&self, id: &PeerID) -> Result<PeerAddress, Error> {
        let peers = self.peers.read();
        peers.get(id).copied().ok_or(Error::PeerNotFound(*id))
    }

    fn peer_addresses(&self) -> Vec<PeerAddress> {
        let peers = self.peers.read();
        peers.values().copied().collect()
    }

    fn add_peer_address(&self, addr: PeerAddress) -> Result<(), Error> {
        let mut peers = self.peers.write();
        self.insert_locked(&mut peers, addr)
    }

    fn update_peer_address(&self, addr: PeerAddress) -> Result<bool, Error> {
        let mut peers = self.peers.write();
        if !addr.is_newer(peers.get(&addr.id)) {
            return Ok(false);
        }
        self.insert_locked(&mut peers, addr)?;
        debug!(peer = %addr.id, nonce = addr.nonce, "directory updated peer address");
        Ok(true)
    }

    fn remove_peer_address(&self, id: &PeerID) -> Result<(), Error> {
        let mut peers = self.peers.write();
        self.store.delete(&id.to_string())?;
        peers.remove(id);
        Ok(())
    }

    fn add_group(&self, id: GroupID, members: Vec<PeerID>) -> Result<(), Error> {
        if id.is_nil() {
            return Err(Error::InvalidGroupId);
        }
        let mut groups = self.groups.write();
        groups.insert(id, members);
        Ok(())
    }

    fn group_ids(&self, id: &GroupID) -> Result<Vec<PeerID>, Error> {
        if id.is_nil() {
            return Ok(self.peer_addresses().iter().map(|a| a.id).collect());
        }
        let groups = self.groups.read();
        groups.get(id).cloned().ok_or(Error::GroupNotFound(*id))
    }

    fn group_addresses(&self, id: &GroupID) -> Result<Vec<PeerAddress>, Error> {
        if id.is_nil() {
            return Ok(self.peer_addresses());
        }

        // Snapshot membership first so the peer lock is taken alone.
        let members = self.group_ids(id)?;
        let peers = self.peers.read();
        let mut addrs = Vec::with_capacity(members.len());
        for member in members {
            if member == self.me.id {
                addrs.push(self.me);
                continue;
            }
            if let Some(addr) = peers.get(&member) {
                addrs.push(*addr);
            }
        }
        Ok(addrs)
    }

    fn random_peer_addresses(&self, id: &GroupID, n: usize) -> Result<Vec<PeerAddress>, Error> {
        let addrs = self.group_addresses(id)?;
        let sample = addrs
            .choose_multiple(&mut rand::thread_rng(), n.min(addrs.len()))
            .copied()
            .collect();
        Ok(sample)
    }

    fn remove_group(&self, id: &GroupID) {
        let mut groups = self.groups.write();
        groups.remove(id);
    }
}
