//! The reliability layer: sequence numbers and an ack bitmask over a sliding
//!  window, duplicate suppression, sub-packet packing, ack-tag notifications
//!  and a smoothed latency estimate. Sits on top of any [`Connection`] and is
//!  one itself.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::connection::{AckListener, Connection, ConnectionStatus};
use crate::error::ProtocolError;
use crate::headers::{ReliableHeader, SubPacketHeader};
use crate::packet::{InboundPacket, OutboundPacket};

/// Number of sequence slots tracked on each side of the window. Fixed by the
///  wire contract: both peers index their ring buffers by `seq % 1024`.
const BUFFER_SIZE: usize = 1024;

/// Largest payload a single sub-packet may carry.
const MAX_SUB_PACKET_SIZE: usize = 2048;

/// Acks pointing further than this behind the send counter are nonsense.
const STALE_ACK_THRESHOLD: u16 = 512;

const RECEIVED_DIRECT: u8 = 1;
const RECEIVED_AS_RESEND: u8 = 2;

const LATENCY_SMOOTHING_FACTOR: f32 = 0.2;

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[derive(Clone, Copy)]
struct SentPacket {
    waiting: bool,
    tag: i32,
    timestamp: Instant,
}

struct ReliableConnectionInner {
    parent: Arc<dyn Connection>,
    sequence_sent: u16,
    highest_received: u16,
    received_seqs: Vec<u8>,
    sent_packets: Vec<SentPacket>,
    pending_packets: VecDeque<InboundPacket>,
    ack_listeners: Vec<Arc<dyn AckListener>>,
    lag: f32,
    last_send: Instant,
    last_receive: Instant,
}

impl ReliableConnectionInner {
    async fn process_received_packet(
        &mut self,
        packet: &mut InboundPacket,
    ) -> Result<(), ProtocolError> {
        let header = ReliableHeader::deser(packet)?;
        self.process_received_acks(header.ack, header.ack_bits);

        let mut seq = header.sequence;
        while packet.size() > 0 {
            let sub_header = SubPacketHeader::deser(packet)?;
            let size = sub_header.size as usize;
            if size > packet.size() {
                return Err(ProtocolError::SubPacketOverrun {
                    size,
                    remaining: packet.size(),
                });
            }
            if size > MAX_SUB_PACKET_SIZE {
                return Err(ProtocolError::OversizeSubPacket(size));
            }

            let mut payload = vec![0u8; size];
            packet.extract_header(&mut payload)?;

            let is_resend = sub_header.resend_of.is_some();
            let resend_of = sub_header.resend_of.unwrap_or(0);
            if self.on_seq_received(seq, is_resend, resend_of).await {
                self.pending_packets.push_back(InboundPacket::new(&payload));
            }

            // each sub-packet consumes one virtual sequence slot on this side
            seq = seq.wrapping_add(1);
        }

        Ok(())
    }

    fn process_received_acks(&mut self, ack: u16, ack_bits: u32) {
        // if it acks something too far back in the past, ignore the whole set
        let diff = self.sequence_sent.wrapping_sub(ack);
        if diff > STALE_ACK_THRESHOLD {
            debug!("ack {} is {} behind the send counter - ignoring", ack, diff);
            return;
        }

        for i in (0..32u16).rev() {
            if ack_bits & (1 << i) != 0 {
                self.on_ack_received(ack.wrapping_sub(i + 1));
            }
        }
        self.on_ack_received(ack);
    }

    async fn on_seq_received(&mut self, seq: u16, is_resend: bool, resend_of: u16) -> bool {
        let buffer_pos = seq as usize % BUFFER_SIZE;
        let resend_pos = resend_of as usize % BUFFER_SIZE;
        let diff = seq.wrapping_sub(self.highest_received);

        // seq newer than highest_received, with unsigned wrap-around
        if diff != 0 && diff < 0x8000 {
            if diff as usize > BUFFER_SIZE - 32 {
                warn!(
                    "sequence {} skips {} slots ahead of {} - window overrun, closing",
                    seq, diff, self.highest_received
                );
                self.parent.close().await;
                return false;
            }

            // pre-clear the slots half a buffer ahead of every sequence we
            // pass over, so they are fresh when sequence numbers reach them
            let mut i = self.highest_received as usize % BUFFER_SIZE;
            while i != buffer_pos {
                self.received_seqs[(i + BUFFER_SIZE / 2) % BUFFER_SIZE] = 0;
                i = (i + 1) % BUFFER_SIZE;
            }

            self.highest_received = seq;
        }

        if self.received_seqs[buffer_pos] != 0
            || (is_resend && self.received_seqs[resend_pos] != 0)
        {
            trace!("sequence {} already delivered - dropping duplicate", seq);
            return false;
        }

        self.received_seqs[buffer_pos] |= RECEIVED_DIRECT;
        if is_resend {
            self.received_seqs[resend_pos] |= RECEIVED_AS_RESEND;
        }

        true
    }

    fn on_ack_received(&mut self, sequence: u16) {
        let slot = &mut self.sent_packets[sequence as usize % BUFFER_SIZE];
        if !slot.waiting {
            return;
        }
        slot.waiting = false;
        let (tag, timestamp) = (slot.tag, slot.timestamp);

        if tag != -1 {
            for listener in &self.ack_listeners {
                listener.on_packet_acked(tag);
            }
        }

        let measured_lag = Instant::now().saturating_duration_since(timestamp).as_secs_f32();
        self.report_latency(measured_lag);
    }

    fn generate_ack_bits(&self) -> u32 {
        let mut result = 0u32;
        for i in 0..32u16 {
            let buffer_pos = self.highest_received.wrapping_sub(1 + i) as usize % BUFFER_SIZE;
            result |= u32::from(self.received_seqs[buffer_pos] & RECEIVED_DIRECT) << i;
        }
        result
    }

    fn report_latency(&mut self, measured_lag: f32) {
        if self.lag.abs() < 1e-5 {
            self.lag = measured_lag;
        } else {
            self.lag = lerp(self.lag, measured_lag, LATENCY_SMOOTHING_FACTOR);
        }
    }
}

/// Wraps a lower [`Connection`] with the reliability layer.
///
/// The parent is shared, so other components (a keepalive monitor, say) can
///  observe the same transport. Several sub-packets may share one outbound
///  datagram on the wire; this layer currently sends one per datagram and
///  decodes any packing the peer chooses.
pub struct ReliableConnection {
    inner: Arc<RwLock<ReliableConnectionInner>>,
}

impl ReliableConnection {
    pub fn new(parent: Arc<dyn Connection>) -> ReliableConnection {
        let now = Instant::now();
        ReliableConnection {
            inner: Arc::new(RwLock::new(ReliableConnectionInner {
                parent,
                sequence_sent: 0,
                highest_received: 0,
                received_seqs: vec![0; BUFFER_SIZE],
                sent_packets: vec![
                    SentPacket {
                        waiting: false,
                        tag: -1,
                        timestamp: now,
                    };
                    BUFFER_SIZE
                ],
                pending_packets: VecDeque::new(),
                ack_listeners: Vec::new(),
                lag: 0.0,
                last_send: now,
                last_receive: now,
            })),
        }
    }

    /// Sends a packet whose acknowledgement will be reported to the
    ///  registered [`AckListener`]s with `tag`. Tags are non-negative.
    pub async fn send_tagged(&self, packet: OutboundPacket, tag: i32) {
        assert!(tag >= 0, "ack tags must be non-negative");
        self.send_sub_packet(packet, tag, None).await;
    }

    /// Retransmits a payload, declaring the sequence number of its original
    ///  transmission so the receiver can suppress double delivery whichever
    ///  copy arrives first. Nothing in this layer drives retransmission; an
    ///  upper layer can, using ack tags and [`ReliableConnection::get_latency`].
    pub async fn send_resend_of(&self, packet: OutboundPacket, tag: i32, original_sequence: u16) {
        assert!(tag >= 0, "ack tags must be non-negative");
        self.send_sub_packet(packet, tag, Some(original_sequence)).await;
    }

    async fn send_sub_packet(&self, mut packet: OutboundPacket, tag: i32, resend_of: Option<u16>) {
        assert!(
            packet.size() <= SubPacketHeader::MAX_SIZE as usize,
            "sub-packet payload of {} bytes cannot be encoded",
            packet.size()
        );

        let mut inner = self.inner.write().await;

        let sub_header = SubPacketHeader {
            size: packet.size() as u16,
            resend_of,
        };
        let mut sub_buf = [0u8; 4];
        sub_header.ser(&mut &mut sub_buf[..]);
        packet.add_header(&sub_buf[..sub_header.serialized_len()]);

        let header = ReliableHeader {
            sequence: inner.sequence_sent,
            ack: inner.highest_received,
            ack_bits: inner.generate_ack_bits(),
        };
        inner.sequence_sent = inner.sequence_sent.wrapping_add(1);
        let mut header_buf = [0u8; ReliableHeader::SERIALIZED_LEN];
        header.ser(&mut &mut header_buf[..]);
        packet.add_header(&header_buf);

        trace!("sending sequence {} with tag {}", header.sequence, tag);
        inner.parent.send(packet).await;

        let now = Instant::now();
        inner.sent_packets[header.sequence as usize % BUFFER_SIZE] = SentPacket {
            waiting: true,
            tag,
            timestamp: now,
        };
        inner.last_send = now;
    }

    pub async fn add_ack_listener(&self, listener: Arc<dyn AckListener>) {
        self.inner.write().await.ack_listeners.push(listener);
    }

    /// Removes the first registered entry that is the same listener (by
    ///  identity, not equality).
    pub async fn remove_ack_listener(&self, listener: &Arc<dyn AckListener>) {
        let mut inner = self.inner.write().await;
        if let Some(idx) = inner
            .ack_listeners
            .iter()
            .position(|l| Arc::ptr_eq(l, listener))
        {
            inner.ack_listeners.remove(idx);
        }
    }

    /// Smoothed round-trip estimate in seconds, 0 until the first ack.
    pub async fn get_latency(&self) -> f32 {
        self.inner.read().await.lag
    }

    pub async fn get_time_since_last_send(&self) -> f32 {
        let inner = self.inner.read().await;
        Instant::now().saturating_duration_since(inner.last_send).as_secs_f32()
    }

    pub async fn get_time_since_last_receive(&self) -> f32 {
        let inner = self.inner.read().await;
        Instant::now().saturating_duration_since(inner.last_receive).as_secs_f32()
    }
}

#[async_trait]
impl Connection for ReliableConnection {
    async fn get_status(&self) -> ConnectionStatus {
        self.inner.read().await.parent.get_status().await
    }

    async fn close(&self) {
        self.inner.read().await.parent.close().await;
    }

    async fn send(&self, packet: OutboundPacket) {
        self.send_tagged(packet, 0).await;
    }

    async fn receive(&self) -> anyhow::Result<Option<InboundPacket>> {
        let mut inner = self.inner.write().await;

        // drain everything the parent has before yielding anything, so acks
        // keep getting processed even when the application polls slowly
        while let Some(mut packet) = inner.parent.receive().await? {
            inner.last_receive = Instant::now();
            inner.process_received_packet(&mut packet).await?;
        }

        Ok(inner.pending_packets.pop_front())
    }
}
