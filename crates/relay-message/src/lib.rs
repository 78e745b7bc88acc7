//! relay-message — the in-memory message core of a lightweight AMQP 1.0
//! routing daemon.
//!
//! A received message is held exactly as it arrived: a FIFO chain of
//! fixed-capacity pooled buffers ([`BufferChain`]). Nothing is copied on
//! the way in, and routing decisions are made over the wire bytes in
//! place:
//!
//! - [`Message::check`] lazily validates section framing up to a requested
//!   depth, recording where each section (and selected properties-list
//!   fields) lives in the chain. Checks resume; nothing is scanned twice.
//! - [`FieldIterator`] walks a recorded field without copying, across
//!   buffer boundaries, and can re-interpret an address under a routing
//!   [`View`] — emitting the `L`/`R`/`A`/`M` scope prefix the router hashes
//!   on.
//! - [`receive`] streams transport chunks into the chain; [`send`] streams
//!   the chain to an outbound link, splicing in replacement delivery
//!   annotations staged with [`Message::set_delivery_annotations`].
//! - [`Composer`] builds canonical messages into fresh buffers
//!   ([`Message::compose_1`] / [`Message::compose_2`]).
//!
//! Handles are cheap: clones share the same reference-counted content, and
//! one content mutex orders parse-depth advances against concurrent
//! readers, so a message can be sent on many links at once.

mod buffer;
mod compose;
mod decode;
mod error;
mod iterator;
mod message;
mod parsed;
mod pipeline;

pub use buffer::{
    buffer_capacity, set_buffer_capacity, Buffer, BufferBytes, BufferChain,
};
pub use compose::{Composer, Performative};
pub use error::ParseError;
pub use iterator::{set_router_identity, FieldIterator, View};
pub use message::{ContentGuard, CopiedField, Depth, Field, Message};
pub use parsed::{parse as parse_value, ParsedField};
pub use pipeline::{receive, send, InboundDelivery, OutboundLink, Recv};
