//! In-process fast-path channel table.
//!
//! Mirrors what XSKS_MAP does in the kernel: a fixed-capacity table from RX
//! queue to delivery channel, consulted by lookup only when a frame carries
//! the knock. Lets the full classify-then-redirect path run in userspace
//! over captured frames.

use aether_common::{classify, FrameMeta, Knock, RedirectTarget, XSKS_MAP_MAX_ENTRIES};
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Channel table errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("queue {queue_id} is outside the channel table (capacity {capacity})")]
    QueueOutOfRange { queue_id: u32, capacity: u32 },
}

/// Receiving end of a fast-path channel.
pub trait FrameSink {
    /// Hand a redirected frame to the channel. Returns false when the channel
    /// cannot take it (full or closed).
    fn deliver(&self, frame: &[u8]) -> bool;
}

impl FrameSink for mpsc::Sender<Bytes> {
    #[inline]
    fn deliver(&self, frame: &[u8]) -> bool {
        // Never wait on the receive path
        self.try_send(Bytes::copy_from_slice(frame)).is_ok()
    }
}

/// Where a dispatched frame ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Left for the normal network stack
    Stack,
    /// Delivered to the channel of this queue
    FastPath(u32),
    /// Knocked, but no channel on this queue took it
    Dropped(u32),
}

/// Fixed-capacity table from RX queue to fast-path channel.
pub struct ChannelTable<S> {
    slots: Box<[Option<S>]>,
}

impl<S> ChannelTable<S> {
    /// Table with the same capacity as XSKS_MAP.
    pub fn new() -> Self {
        Self::with_capacity(XSKS_MAP_MAX_ENTRIES)
    }

    /// Table holding queues `0..capacity`.
    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    /// Number of queue slots.
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// True when no channel is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Register `sink` for `queue_id`, returning the channel it replaced.
    pub fn register(&mut self, queue_id: u32, sink: S) -> Result<Option<S>, ChannelError> {
        let capacity = self.capacity();
        let slot = self
            .slots
            .get_mut(queue_id as usize)
            .ok_or(ChannelError::QueueOutOfRange { queue_id, capacity })?;
        Ok(slot.replace(sink))
    }

    /// Remove the channel for `queue_id`.
    pub fn unregister(&mut self, queue_id: u32) -> Option<S> {
        self.slots.get_mut(queue_id as usize)?.take()
    }

    /// Channel registered for `queue_id`.
    #[inline]
    pub fn get(&self, queue_id: u32) -> Option<&S> {
        self.slots.get(queue_id as usize)?.as_ref()
    }
}

impl<S> Default for ChannelTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Lookup only: a queue without a channel drops the frame, matching the
/// XDP_ABORTED outcome of a kernel redirect miss.
impl<S> RedirectTarget for ChannelTable<S> {
    type Action = Route;

    #[inline]
    fn pass(&self) -> Route {
        Route::Stack
    }

    #[inline]
    fn redirect(&self, queue_id: u32) -> Route {
        match self.get(queue_id) {
            Some(_) => Route::FastPath(queue_id),
            None => Route::Dropped(queue_id),
        }
    }
}

impl<S: FrameSink> ChannelTable<S> {
    /// Classify `frame` and deliver it to its fast-path channel if knocked.
    ///
    /// A knocked frame never returns to the stack: if its channel is missing
    /// or refuses it, the frame is [`Route::Dropped`].
    pub fn dispatch(&self, frame: &[u8], meta: FrameMeta, knock: Knock) -> Route {
        match classify(frame, meta, knock).apply(self) {
            Route::FastPath(queue_id) => match self.get(queue_id) {
                Some(sink) if sink.deliver(frame) => Route::FastPath(queue_id),
                _ => Route::Dropped(queue_id),
            },
            route => route,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knock::{build_udp_frame, knock_payload};
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn udp_frame(payload: &[u8]) -> Bytes {
        let src = SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 1), 40000);
        let dst = SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 2), 8443);
        build_udp_frame(src, dst, payload).unwrap()
    }

    fn knocked_frame() -> Bytes {
        udp_frame(&knock_payload(Knock::DEFAULT, b"payload"))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut table: ChannelTable<&str> = ChannelTable::new();
        assert_eq!(table.capacity(), 64);
        assert!(table.is_empty());

        assert_eq!(table.register(3, "three"), Ok(None));
        assert_eq!(table.register(3, "again"), Ok(Some("three")));
        assert_eq!(table.get(3), Some(&"again"));
        assert_eq!(table.get(4), None);
        assert_eq!(table.len(), 1);

        assert_eq!(table.unregister(3), Some("again"));
        assert_eq!(table.unregister(3), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_register_out_of_range() {
        let mut table: ChannelTable<()> = ChannelTable::with_capacity(4);
        assert_eq!(
            table.register(4, ()),
            Err(ChannelError::QueueOutOfRange {
                queue_id: 4,
                capacity: 4
            })
        );
        assert_eq!(table.unregister(u32::MAX), None);
        assert_eq!(table.get(u32::MAX), None);
    }

    #[tokio::test]
    async fn test_dispatch_delivers_knocked_frame() {
        let (tx, mut rx) = mpsc::channel::<Bytes>(4);
        let mut table = ChannelTable::new();
        table.register(2, tx).unwrap();

        let frame = knocked_frame();
        let route = table.dispatch(&frame, FrameMeta::for_slice(2, &frame), Knock::DEFAULT);
        assert_eq!(route, Route::FastPath(2));

        let delivered = rx.recv().await.unwrap();
        assert_eq!(&delivered[..], &frame[..]);
    }

    #[tokio::test]
    async fn test_dispatch_ordinary_frame_stays_on_stack() {
        let (tx, mut rx) = mpsc::channel::<Bytes>(4);
        let mut table = ChannelTable::new();
        table.register(0, tx).unwrap();

        let frame = udp_frame(b"GET / HTTP/1.1");
        let route = table.dispatch(&frame, FrameMeta::for_slice(0, &frame), Knock::DEFAULT);
        assert_eq!(route, Route::Stack);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_without_channel_drops_knocked_frame() {
        let table: ChannelTable<mpsc::Sender<Bytes>> = ChannelTable::new();
        let frame = knocked_frame();
        assert_eq!(frame.len(), 53);
        let route = table.dispatch(&frame, FrameMeta::for_slice(9, &frame), Knock::DEFAULT);
        assert_eq!(route, Route::Dropped(9));

        // Queue beyond the table behaves like an unregistered one
        let route = table.dispatch(&frame, FrameMeta::for_slice(500, &frame), Knock::DEFAULT);
        assert_eq!(route, Route::Dropped(500));
    }

    #[test]
    fn test_dispatch_without_channel_passes_ordinary_frame() {
        let table: ChannelTable<mpsc::Sender<Bytes>> = ChannelTable::new();
        let frame = udp_frame(b"\x00\x01\x02\x03");
        let route = table.dispatch(&frame, FrameMeta::for_slice(9, &frame), Knock::DEFAULT);
        assert_eq!(route, Route::Stack);
    }

    #[test]
    fn test_dispatch_full_channel_drops() {
        let (tx, _rx) = mpsc::channel::<Bytes>(1);
        let mut table = ChannelTable::new();
        table.register(0, tx).unwrap();

        let frame = knocked_frame();
        let meta = FrameMeta::for_slice(0, &frame);
        assert_eq!(table.dispatch(&frame, meta, Knock::DEFAULT), Route::FastPath(0));
        assert_eq!(table.dispatch(&frame, meta, Knock::DEFAULT), Route::Dropped(0));
    }

    #[test]
    fn test_redirect_target_is_lookup_only() {
        let mut table: ChannelTable<u8> = ChannelTable::new();
        table.register(7, 0).unwrap();
        assert_eq!(table.redirect(7), Route::FastPath(7));
        assert_eq!(table.redirect(8), Route::Dropped(8));
        assert_eq!(table.pass(), Route::Stack);
    }
}
