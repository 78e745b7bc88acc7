//! Receive and send: streaming a message's bytes in from a transport
//! delivery and out to an outbound link, splicing staged delivery
//! annotations on the way out.

use crate::buffer::{Buffer, BufferBytes};
use crate::decode::{ChainCursor, ChainPos};
use crate::message::{check_inner, Depth, Message};

/// One transport read on a delivery.
pub enum Recv {
    /// `n > 0` bytes were written into the destination.
    Bytes(usize),
    /// No bytes are staged right now; more will arrive on this delivery.
    Blocked,
    /// End of stream: the message is complete.
    End,
}

/// An incoming transport delivery. The transport drives one call per
/// staged chunk and one end-of-stream call; the message association rides
/// on the delivery between calls.
pub trait InboundDelivery {
    fn recv(&mut self, dst: &mut [u8]) -> Recv;
    fn message(&mut self) -> &mut Option<Message>;
}

/// An outbound link consuming wire bytes in order.
pub trait OutboundLink {
    fn send(&mut self, bytes: &[u8]);
}

/// Pulls staged bytes from `delivery` into its associated message,
/// allocating the message on the first byte and a fresh tail buffer
/// whenever one fills. Returns the completed message at end-of-stream,
/// clearing the association; `None` means the message is not complete yet
/// (or a buffer could not be allocated).
pub fn receive(delivery: &mut impl InboundDelivery) -> Option<Message> {
    let msg = delivery.message().get_or_insert_with(Message::new).clone();

    let completed = {
        let mut inner = msg.lock();
        loop {
            // Make sure the tail buffer has room before asking the
            // transport to fill it.
            let tail_full = inner.buffers.back().map_or(true, |b| b.free_capacity() == 0);
            if tail_full {
                let Some(fresh) = Buffer::alloc() else {
                    break false;
                };
                inner.buffers.push_back(fresh);
            }
            let Some(tail) = inner.buffers.back_mut() else {
                break false;
            };
            match delivery.recv(tail.free_space_mut()) {
                Recv::End => {
                    // An exact multiple of the buffer capacity leaves an
                    // empty tail; drop it.
                    let tail_empty = tail.size() == 0;
                    if tail_empty {
                        inner.buffers.pop_back();
                    }
                    break true;
                }
                Recv::Bytes(n) if n > 0 => tail.insert(n),
                Recv::Bytes(_) | Recv::Blocked => break false,
            }
        }
    };

    if completed {
        *delivery.message() = None;
        tracing::trace!("message receive complete");
        Some(msg)
    } else {
        None
    }
}

/// Streams the message to `link`. Without staged annotations every buffer
/// goes out verbatim. With staged annotations the output is: the header
/// section's bytes, the staged annotation buffers, then the remainder of
/// the chain with the original delivery-annotations section skipped —
/// bit-exact within each segment.
pub fn send(msg: &Message, link: &mut impl OutboundLink) {
    let mut inner = msg.lock();

    if inner.new_delivery_annotations.is_empty() {
        for buf in inner.buffers.iter() {
            link.send(buf.data());
        }
        return;
    }

    // The splice needs the header and annotation locations; abandon the
    // delivery quietly if the message cannot be parsed that far.
    if check_inner(&mut inner, Depth::DeliveryAnnotations).is_err() {
        tracing::debug!("cannot splice annotations into an unparseable message; dropping send");
        return;
    }

    let inner = &*inner;
    let mut cursor = ChainCursor::new(
        &inner.buffers,
        ChainPos {
            index: 0,
            offset: 0,
        },
    );

    // Header section, when present.
    if inner.section_header.length > 0 {
        cursor = ChainCursor::new(
            &inner.buffers,
            ChainPos {
                index: inner.section_header.buffer,
                offset: inner.section_header.offset,
            },
        );
        cursor.advance(
            inner.section_header.length + inner.section_header.hdr_length,
            |run| link.send(run),
        );
    }

    // The freshly composed annotations.
    for buf in inner.new_delivery_annotations.iter() {
        link.send(buf.data());
    }

    // Skip the original annotations that are being replaced.
    if inner.section_delivery_annotations.length > 0 {
        cursor.skip(
            inner.section_delivery_annotations.hdr_length
                + inner.section_delivery_annotations.length,
        );
    }

    // The rest of the buffer the cursor landed in...
    if let Some(pos) = cursor.pos() {
        if let Some(buf) = inner.buffers.get(pos.index) {
            let rest = buf.size() - pos.offset;
            cursor.advance(rest, |run| link.send(run));
        }
    }

    // ...and every whole buffer after it.
    if let Some(pos) = cursor.pos() {
        let mut index = pos.index;
        while let Some(buf) = inner.buffers.get(index) {
            link.send(buf.data());
            index += 1;
        }
    }
}
