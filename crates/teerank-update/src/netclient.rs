//! Registry of every server and master the engine is tracking, bounded
//! at a fixed capacity. Slots are reused via an explicit free list
//! instead of the original's intrusive `nextfree` pointer threading
//! through a static C array.

use std::net::SocketAddr;

use teerank_common::model::MAX_NETCLIENTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetClientKind {
    Server,
    Master,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetClient {
    pub kind: NetClientKind,
    pub addr: SocketAddr,
}

#[derive(Default)]
pub struct NetClientRegistry {
    slots: Vec<Option<NetClient>>,
    free: Vec<usize>,
}

impl NetClientRegistry {
    pub fn new() -> Self {
        NetClientRegistry {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts a new entry, returning its slot id, or `None` if the
    /// registry is already at `MAX_NETCLIENTS`.
    pub fn add(&mut self, kind: NetClientKind, addr: SocketAddr) -> Option<usize> {
        let entry = NetClient { kind, addr };
        if let Some(id) = self.free.pop() {
            self.slots[id] = Some(entry);
            return Some(id);
        }
        if self.slots.len() >= MAX_NETCLIENTS {
            return None;
        }
        self.slots.push(Some(entry));
        Some(self.slots.len() - 1)
    }

    pub fn remove(&mut self, id: usize) {
        if let Some(slot) = self.slots.get_mut(id) {
            if slot.take().is_some() {
                self.free.push(id);
            }
        }
    }

    pub fn get(&self, id: usize) -> Option<&NetClient> {
        self.slots.get(id).and_then(|s| s.as_ref())
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| matches!(s, Some(nc) if nc.addr == addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn add_and_find() {
        let mut reg = NetClientRegistry::new();
        let id = reg.add(NetClientKind::Server, addr(1)).unwrap();
        assert_eq!(reg.find_by_addr(addr(1)), Some(id));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn removed_slot_is_reused() {
        let mut reg = NetClientRegistry::new();
        let id = reg.add(NetClientKind::Server, addr(1)).unwrap();
        reg.remove(id);
        assert!(reg.is_empty());
        let id2 = reg.add(NetClientKind::Master, addr(2)).unwrap();
        assert_eq!(id, id2);
        assert_eq!(reg.get(id2).unwrap().kind, NetClientKind::Master);
    }

    #[test]
    fn double_remove_is_harmless() {
        let mut reg = NetClientRegistry::new();
        let id = reg.add(NetClientKind::Server, addr(1)).unwrap();
        reg.remove(id);
        reg.remove(id);
        assert_eq!(reg.add(NetClientKind::Server, addr(3)).unwrap(), id);
    }
}
