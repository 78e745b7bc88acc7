//! Zero-copy field iterator with semantic views.
//!
//! An iterator yields the bytes of a field in order, from either a
//! contiguous span or a subrange of a buffer chain, without copying. A
//! *view*, applied at construction (or by [`FieldIterator::reset_view`]),
//! first skips an optional `scheme://host[:port]/` address header and may
//! then emit a synthetic one-byte scope prefix and terminate early at `/` —
//! this is how the router-address encodings (`L`/`R`/`A`/`M`) are produced
//! without rewriting the underlying bytes.

use crate::buffer::{BufferBytes, BufferChain};
use std::io::IoSlice;
use std::sync::{Arc, PoisonError, RwLock};

/// How a view re-interprets the span it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// The raw bytes, no header skip, no prefix.
    All,
    /// Skip the address header, then yield to the end.
    NoHost,
    /// Skip the address header, then yield the node id (up to `/`).
    NodeId,
    /// Skip the address header and the node id, then yield the rest.
    NodeSpecific,
    /// Router-address view: `L`/`R`/`A`/`M` scope prefix per the
    /// `_local`/`_topo` rules.
    AddressHash,
    /// Router-node view: `R` for this area, `A` otherwise.
    NodeHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    ToEnd,
    ToSlash,
}

struct RouterIdentity {
    area: String,
    router: String,
}

static IDENTITY: RwLock<Option<Arc<RouterIdentity>>> = RwLock::new(None);

/// Configures this router's area and router names for the hash views. A
/// trailing `/` is appended to each. Must be called before any hash view
/// is used; worker threads only ever read it.
pub fn set_router_identity(area: &str, router: &str) {
    let id = RouterIdentity {
        area: format!("{area}/"),
        router: format!("{router}/"),
    };
    *IDENTITY.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(id));
}

fn identity() -> Option<Arc<RouterIdentity>> {
    IDENTITY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Where the cursor sits: a shrinking raw span, or a position inside a
/// buffer chain.
#[derive(Clone, Copy)]
enum Place<'a> {
    Span(&'a [u8]),
    Chain {
        chain: &'a BufferChain,
        index: usize,
        offset: usize,
    },
}

#[derive(Clone, Copy)]
struct Pointer<'a> {
    place: Place<'a>,
    remaining: usize,
}

impl<'a> Pointer<'a> {
    fn current(&self) -> Option<u8> {
        if self.remaining == 0 {
            return None;
        }
        match self.place {
            Place::Span(s) => s.first().copied(),
            Place::Chain {
                chain,
                index,
                offset,
            } => chain.get(index)?.data().get(offset).copied(),
        }
    }

    fn bump(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
        let remaining = self.remaining;
        let mut exhausted = false;
        match &mut self.place {
            Place::Span(s) => {
                if !s.is_empty() {
                    *s = &s[1..];
                }
            }
            Place::Chain {
                chain,
                index,
                offset,
            } => {
                *offset += 1;
                if remaining > 0 {
                    // Roll over empty or exhausted buffers to the next
                    // payload byte.
                    loop {
                        match chain.get(*index) {
                            Some(buf) if *offset >= buf.size() => {
                                *index += 1;
                                *offset = 0;
                            }
                            Some(_) => break,
                            None => {
                                exhausted = true;
                                break;
                            }
                        }
                    }
                }
            }
        }
        if exhausted {
            self.remaining = 0;
        }
    }
}

/// States of the address-header skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipState {
    Start,
    SlashLeft,
    SkippingToNextSlash,
    Scanning,
    Colon,
    ColonSlash,
    AtNodeId,
}

/// Zero-copy cursor over a field's bytes under a [`View`].
pub struct FieldIterator<'a> {
    start: Pointer<'a>,
    view_start: Pointer<'a>,
    pointer: Pointer<'a>,
    view: View,
    mode: Mode,
    prefix: u8,
    at_prefix: bool,
    view_prefix: bool,
}

impl<'a> FieldIterator<'a> {
    /// Iterator over a string span.
    pub fn over_str(text: &'a str, view: View) -> Self {
        Self::over_bytes(text.as_bytes(), view)
    }

    /// Iterator over a raw byte span.
    pub fn over_bytes(data: &'a [u8], view: View) -> Self {
        let start = Pointer {
            place: Place::Span(data),
            remaining: data.len(),
        };
        Self::with_start(start, view)
    }

    /// Iterator over `length` bytes of a buffer chain, starting at
    /// `offset` within buffer `index`.
    pub fn over_chain(
        chain: &'a BufferChain,
        index: usize,
        offset: usize,
        length: usize,
        view: View,
    ) -> Self {
        let start = Pointer {
            place: Place::Chain {
                chain,
                index,
                offset,
            },
            remaining: length,
        };
        Self::with_start(start, view)
    }

    fn with_start(start: Pointer<'a>, view: View) -> Self {
        let mut iter = Self {
            start,
            view_start: start,
            pointer: start,
            view,
            mode: Mode::ToEnd,
            prefix: 0,
            at_prefix: false,
            view_prefix: false,
        };
        iter.reset_view(view);
        iter
    }

    /// Returns the cursor to the post-view-initialization state,
    /// re-enabling prefix emission if the view has one.
    pub fn reset(&mut self) {
        self.pointer = self.view_start;
        self.at_prefix = self.view_prefix;
    }

    /// Re-applies a (possibly different) view from the original start.
    pub fn reset_view(&mut self, view: View) {
        self.pointer = self.start;
        self.view = view;
        self.initialize_view();
        self.view_start = self.pointer;
    }

    /// True when no more octets will be yielded.
    pub fn at_end(&self) -> bool {
        self.pointer.remaining == 0
    }

    /// Octets left under the current position (excludes a pending prefix).
    pub fn remaining(&self) -> usize {
        self.pointer.remaining
    }

    /// Yields the next octet, or 0 past the end.
    pub fn octet(&mut self) -> u8 {
        if self.at_prefix {
            self.at_prefix = false;
            return self.prefix;
        }
        if self.pointer.remaining == 0 {
            return 0;
        }
        let result = self.pointer.current().unwrap_or(0);
        self.pointer.bump();

        // In slash mode the terminating slash is never yielded; seeing it
        // ahead ends the iteration immediately.
        if self.pointer.remaining > 0
            && self.mode == Mode::ToSlash
            && self.pointer.current() == Some(b'/')
        {
            self.pointer.remaining = 0;
        }
        result
    }

    /// Consumes up to `length` octets.
    pub fn advance(&mut self, length: usize) {
        for _ in 0..length {
            if self.at_end() {
                break;
            }
            self.octet();
        }
    }

    /// A fresh iterator over the next `length` octets at the current
    /// position, inheriting the view and mode but never a prefix.
    pub fn sub(&self, length: usize) -> FieldIterator<'a> {
        let mut start = self.pointer;
        start.remaining = length;
        if let Place::Span(s) = start.place {
            start.remaining = start.remaining.min(s.len());
        }
        FieldIterator {
            start,
            view_start: start,
            pointer: start,
            view: self.view,
            mode: self.mode,
            prefix: 0,
            at_prefix: false,
            view_prefix: false,
        }
    }

    /// Compares the full view (from reset) against `expected`.
    pub fn eq_bytes(&mut self, expected: &[u8]) -> bool {
        self.reset();
        let mut idx = 0;
        while !self.at_end() && idx < expected.len() {
            if expected[idx] != self.octet() {
                return false;
            }
            idx += 1;
        }
        self.at_end() && idx == expected.len()
    }

    /// Consumes `prefix` if the upcoming octets match it; restores the
    /// position otherwise.
    pub fn has_prefix(&mut self, prefix: &str) -> bool {
        let save_pointer = self.pointer;
        let save_at_prefix = self.at_prefix;
        for &expected in prefix.as_bytes() {
            if expected != self.octet() {
                self.pointer = save_pointer;
                self.at_prefix = save_at_prefix;
                return false;
            }
        }
        true
    }

    /// Copies the full view (from reset) into a fresh byte vector.
    pub fn to_vec(&mut self) -> Vec<u8> {
        self.reset();
        let mut copy = Vec::with_capacity(self.pointer.remaining + usize::from(self.at_prefix));
        while !self.at_end() || self.at_prefix {
            copy.push(self.octet());
        }
        copy
    }

    /// Scatter list over the view's bytes for vectored I/O. Not available
    /// for views that emit a synthetic prefix, or when the chain ends
    /// before the view does.
    pub fn io_slices(&self) -> Option<Vec<IoSlice<'a>>> {
        debug_assert!(
            !self.view_prefix,
            "scatter is not supported for prefix-emitting views"
        );
        if self.view_prefix {
            return None;
        }

        match self.view_start.place {
            Place::Span(s) => {
                let len = self.view_start.remaining.min(s.len());
                Some(vec![IoSlice::new(&s[..len])])
            }
            Place::Chain {
                chain,
                index,
                offset,
            } => {
                let mut slices = Vec::new();
                let mut remaining = self.view_start.remaining;
                let mut index = index;
                let mut offset = offset;
                while remaining > 0 {
                    let buf = chain.get(index)?;
                    let avail = buf.size().saturating_sub(offset);
                    if avail == 0 {
                        index += 1;
                        offset = 0;
                        continue;
                    }
                    let take = avail.min(remaining);
                    slices.push(IoSlice::new(&buf.data()[offset..offset + take]));
                    remaining -= take;
                    index += 1;
                    offset = 0;
                }
                Some(slices)
            }
        }
    }

    // -------------------------------------------------------------------
    // View initialization
    // -------------------------------------------------------------------

    fn set_prefix(&mut self, prefix: u8) {
        self.prefix = prefix;
        self.at_prefix = true;
        self.view_prefix = true;
    }

    fn initialize_view(&mut self) {
        // The default view has no prefix; one is added later if needed.
        self.at_prefix = false;
        self.view_prefix = false;
        self.prefix = 0;
        self.mode = Mode::ToEnd;

        if self.view == View::All {
            return;
        }

        // Advance to the node id, skipping `scheme://host[:port]/` or
        // `//host/` when present.
        let mut state = SkipState::Start;
        let mut save = self.pointer;

        while !self.at_end() && state != SkipState::AtNodeId {
            let octet = self.octet();
            state = match state {
                SkipState::Start => {
                    if octet == b'/' {
                        SkipState::SlashLeft
                    } else {
                        SkipState::Scanning
                    }
                }
                SkipState::SlashLeft => {
                    if octet == b'/' {
                        SkipState::SkippingToNextSlash
                    } else {
                        SkipState::AtNodeId
                    }
                }
                SkipState::SkippingToNextSlash => {
                    if octet == b'/' {
                        SkipState::AtNodeId
                    } else {
                        SkipState::SkippingToNextSlash
                    }
                }
                SkipState::Scanning => {
                    if octet == b':' {
                        SkipState::Colon
                    } else {
                        SkipState::Scanning
                    }
                }
                SkipState::Colon => {
                    if octet == b'/' {
                        save = self.pointer;
                        SkipState::ColonSlash
                    } else {
                        SkipState::Scanning
                    }
                }
                SkipState::ColonSlash => {
                    if octet == b'/' {
                        SkipState::SkippingToNextSlash
                    } else {
                        self.pointer = save;
                        SkipState::AtNodeId
                    }
                }
                SkipState::AtNodeId => SkipState::AtNodeId,
            };
        }

        if state != SkipState::AtNodeId {
            // Relative address: the node id is at the very beginning.
            self.pointer = self.start;
        }

        match self.view {
            View::All => {}
            View::NodeId => self.mode = Mode::ToSlash,
            View::NoHost => self.mode = Mode::ToEnd,
            View::AddressHash => {
                self.mode = Mode::ToEnd;
                self.address_hash_view();
            }
            View::NodeHash => {
                self.mode = Mode::ToEnd;
                self.node_hash_view();
            }
            View::NodeSpecific => {
                self.mode = Mode::ToEnd;
                while !self.at_end() {
                    if self.octet() == b'/' {
                        break;
                    }
                }
            }
        }
    }

    /// Refines a no-host view into the router-address encoding.
    fn address_hash_view(&mut self) {
        if self.has_prefix("_") {
            if self.has_prefix("local/") {
                self.set_prefix(b'L');
                return;
            }

            if self.has_prefix("topo/") {
                let id = identity();
                let (area, router) = id
                    .as_ref()
                    .map_or(("", ""), |i| (i.area.as_str(), i.router.as_str()));

                if self.has_prefix("all/") || self.has_prefix(area) {
                    if self.has_prefix("all/") || self.has_prefix(router) {
                        self.set_prefix(b'L');
                        return;
                    }
                    self.set_prefix(b'R');
                    self.mode = Mode::ToSlash;
                    return;
                }

                self.set_prefix(b'A');
                self.mode = Mode::ToSlash;
                return;
            }
        }

        self.set_prefix(b'M');
    }

    /// Refines a no-host view into the router-node encoding.
    fn node_hash_view(&mut self) {
        let id = identity();
        let area = id.as_ref().map_or("", |i| i.area.as_str());

        if self.has_prefix(area) {
            self.set_prefix(b'R');
            self.mode = Mode::ToEnd;
            return;
        }

        self.set_prefix(b'A');
        self.mode = Mode::ToSlash;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_slash_never_yields_the_slash() {
        let mut iter = FieldIterator::over_str("node/rest", View::NodeId);
        assert_eq!(iter.to_vec(), b"node");
    }

    #[test]
    fn sub_iterator_never_inherits_a_prefix() {
        set_router_identity("area1", "r1");
        let mut iter = FieldIterator::over_str("queue.a", View::AddressHash);
        assert_eq!(iter.octet(), b'M');
        let mut sub = iter.sub(3);
        assert_eq!(sub.to_vec(), b"que");
    }

    #[test]
    fn has_prefix_restores_on_mismatch() {
        let mut iter = FieldIterator::over_str("abcdef", View::All);
        assert!(!iter.has_prefix("abx"));
        assert!(iter.has_prefix("abc"));
        assert_eq!(iter.octet(), b'd');
    }
}
