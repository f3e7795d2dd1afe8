//! Participant identity and addressing

use rand::Rng;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

use crate::protocol::{ControlChunk, SdesItem};

/// One endpoint of a session.
///
/// The identifier is optional: a remote participant may be created without
/// one and learn it from the first packet it sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    id: Option<u32>,
    data_address: SocketAddr,
    control_address: SocketAddr,
    description: BTreeMap<SdesItem, String>,
}

impl Participant {
    /// Participant with a known identifier. A zero identifier is treated as unknown.
    pub fn new(data_address: SocketAddr, control_address: SocketAddr, id: u32) -> Self {
        Self {
            id: (id != 0).then_some(id),
            data_address,
            control_address,
            description: BTreeMap::new(),
        }
    }

    /// Participant whose identifier is not known yet
    pub fn anonymous(data_address: SocketAddr, control_address: SocketAddr) -> Self {
        Self {
            id: None,
            data_address,
            control_address,
            description: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.id
    }

    pub fn data_address(&self) -> SocketAddr {
        self.data_address
    }

    pub fn control_address(&self) -> SocketAddr {
        self.control_address
    }

    /// Session description items last advertised by this participant
    pub fn description(&self) -> &BTreeMap<SdesItem, String> {
        &self.description
    }

    /// Canonical name, if advertised
    pub fn cname(&self) -> Option<&str> {
        self.description.get(&SdesItem::Cname).map(String::as_str)
    }

    pub(crate) fn set_id(&mut self, id: u32) {
        self.id = Some(id);
    }

    /// Returns true if the address changed
    pub(crate) fn rebind_data(&mut self, address: SocketAddr) -> bool {
        if self.data_address == address {
            return false;
        }
        self.data_address = address;
        true
    }

    /// Returns true if the address changed
    pub(crate) fn rebind_control(&mut self, address: SocketAddr) -> bool {
        if self.control_address == address {
            return false;
        }
        self.control_address = address;
        true
    }

    pub(crate) fn set_description_item(&mut self, item: SdesItem, value: impl Into<String>) {
        self.description.insert(item, value.into());
    }

    /// Merge the items of a control chunk. Returns true if anything changed.
    pub(crate) fn merge_description(&mut self, chunk: &ControlChunk) -> bool {
        let mut changed = false;
        for (item, value) in &chunk.attributes {
            if self.description.get(item) != Some(value) {
                self.description.insert(*item, value.clone());
                changed = true;
            }
        }
        changed
    }

    /// Control chunk advertising this participant
    pub fn to_control_chunk(&self) -> Option<ControlChunk> {
        let id = self.id?;
        Some(ControlChunk {
            sender_id: id,
            attributes: self.description.clone(),
        })
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{:#010x}", id)?,
            None => f.write_str("<unknown>")?,
        }
        write!(f, " data={} control={}", self.data_address, self.control_address)
    }
}

/// Pick a random non-zero identifier that is not in `excluded`
pub fn generate_id(excluded: &[u32]) -> u32 {
    let mut rng = rand::thread_rng();
    loop {
        let candidate: u32 = rng.gen();
        if candidate != 0 && !excluded.contains(&candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_zero_id_is_unknown() {
        let participant = Participant::new(addr(6000), addr(6001), 0);
        assert_eq!(participant.id(), None);

        let participant = Participant::new(addr(6000), addr(6001), 42);
        assert_eq!(participant.id(), Some(42));
    }

    #[test]
    fn test_rebind_reports_changes_only() {
        let mut participant = Participant::anonymous(addr(7000), addr(7001));

        assert!(!participant.rebind_data(addr(7000)));
        assert!(participant.rebind_data(addr(9000)));
        assert_eq!(participant.data_address(), addr(9000));

        assert!(!participant.rebind_control(addr(7001)));
        assert!(participant.rebind_control(addr(9001)));
        assert_eq!(participant.control_address(), addr(9001));
    }

    #[test]
    fn test_merge_description() {
        let mut participant = Participant::new(addr(7000), addr(7001), 7);
        let mut chunk = ControlChunk::new(7);
        chunk.attributes.insert(SdesItem::Cname, "peer@host".to_string());

        assert!(participant.merge_description(&chunk));
        assert!(!participant.merge_description(&chunk));
        assert_eq!(participant.cname(), Some("peer@host"));

        chunk.attributes.insert(SdesItem::Tool, "rtp-duo".to_string());
        assert!(participant.merge_description(&chunk));
        assert_eq!(participant.description().len(), 2);
    }

    #[test]
    fn test_control_chunk_requires_id() {
        let mut participant = Participant::anonymous(addr(7000), addr(7001));
        assert!(participant.to_control_chunk().is_none());

        participant.set_id(5);
        participant.set_description_item(SdesItem::Cname, "local");
        let chunk = participant.to_control_chunk().unwrap();
        assert_eq!(chunk.sender_id, 5);
        assert_eq!(chunk.attributes.get(&SdesItem::Cname).unwrap(), "local");
    }

    #[test]
    fn test_generate_id_excludes() {
        for _ in 0..1000 {
            let id = generate_id(&[1, 2, 3]);
            assert_ne!(id, 0);
            assert!(![1, 2, 3].contains(&id));
        }
    }
}
