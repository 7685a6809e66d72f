use std::collections::VecDeque;

use camcore_protocol::MediaPacket;

/// The rolling, bounded sequence of packets a FrameStore retains (spec §3,
/// the "trunk"). Oldest packets are evicted once `max_packets` is reached.
pub struct Trunk {
    packets: VecDeque<MediaPacket>,
    max_packets: usize,
}

impl Trunk {
    pub fn new(max_packets: usize) -> Self {
        Self { packets: VecDeque::with_capacity(max_packets.min(4096)), max_packets }
    }

    /// Append a packet, then evict the oldest packet if over bound. Returns
    /// true if an eviction occurred.
    pub fn push(&mut self, packet: MediaPacket) -> bool {
        self.packets.push_back(packet);
        self.trim()
    }

    /// Apply the bound without pushing; used by the driver's per-tick trim
    /// step even when nothing new arrived this tick.
    pub fn trim(&mut self) -> bool {
        if self.packets.len() > self.max_packets {
            self.packets.pop_front();
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// A value-copy of the current contents, for seeding a record
    /// consumer's pending queue (spec §3: head-start semantics, snapshot
    /// unaffected by later trunk eviction).
    pub fn snapshot(&self) -> VecDeque<MediaPacket> {
        self.packets.clone()
    }
}
