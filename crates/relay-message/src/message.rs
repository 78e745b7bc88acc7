//! Message content: the shared buffer chain, the depth-wise section check,
//! and the by-reference field-location table.
//!
//! A message is parsed lazily and at most once. `check(depth)` validates
//! section framing up to `depth`, resuming from wherever the previous check
//! stopped; every matched section is recorded as a [`FieldLocation`]
//! covering its preamble and payload. Field accessors only ever read
//! locations that an earlier `check` (or a lazy properties-list walk)
//! recorded, so nothing is scanned twice.

use crate::buffer::BufferChain;
use crate::compose::{Composer, Performative};
use crate::decode::{ChainCursor, ChainPos, FieldLocation};
use crate::error::ParseError;
use crate::iterator::{FieldIterator, View};
use crate::parsed::{self, ParsedField};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// How deep a check has validated the section framing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Depth {
    #[default]
    None,
    Header,
    DeliveryAnnotations,
    MessageAnnotations,
    Properties,
    ApplicationProperties,
    Body,
    All,
}

/// Message sections and the properties-list fields the router reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Header,
    DeliveryAnnotations,
    MessageAnnotations,
    Properties,
    ApplicationProperties,
    Body,
    Footer,
    MessageId,
    UserId,
    To,
    Subject,
    ReplyTo,
    CorrelationId,
}

/// Result of [`ContentGuard::field_copy`]: total bytes appended and how
/// many of them were preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopiedField {
    pub length: usize,
    pub hdr_length: usize,
}

// -----------------------------------------------------------------------------
// Section framing tables
// -----------------------------------------------------------------------------

const fn long_pattern(code: u8) -> [u8; 10] {
    [0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, code]
}

const fn short_pattern(code: u8) -> [u8; 3] {
    [0x00, 0x53, code]
}

const TAGS_LIST: &[u8] = &[0x45, 0xC0, 0xD0];
const TAGS_MAP: &[u8] = &[0xC1, 0xD1];
const TAGS_BINARY: &[u8] = &[0xA0, 0xB0];
const TAGS_ANY: &[u8] = &[0x45, 0xC0, 0xD0, 0xC1, 0xD1, 0xA0, 0xB0];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum ParsePos {
    /// `check` has not run yet.
    #[default]
    Unstarted,
    /// Where the next unparsed section starts.
    At(ChainPos),
    /// The parse consumed the entire chain.
    End,
}

#[derive(Default)]
pub(crate) struct ContentInner {
    pub(crate) buffers: BufferChain,
    pub(crate) parse_pos: ParsePos,
    pub(crate) parse_depth: Depth,
    pub(crate) section_header: FieldLocation,
    pub(crate) section_delivery_annotations: FieldLocation,
    pub(crate) section_message_annotations: FieldLocation,
    pub(crate) section_properties: FieldLocation,
    pub(crate) section_application_properties: FieldLocation,
    pub(crate) section_body: FieldLocation,
    pub(crate) section_footer: FieldLocation,
    pub(crate) field_user_id: FieldLocation,
    pub(crate) field_to: FieldLocation,
    pub(crate) field_reply_to: FieldLocation,
    pub(crate) field_correlation_id: FieldLocation,
    pub(crate) parsed_delivery_annotations: Option<Arc<ParsedField>>,
    pub(crate) new_delivery_annotations: BufferChain,
}

pub(crate) struct MessageContent {
    inner: Mutex<ContentInner>,
}

/// Lightweight handle to shared, reference-counted message content. Clones
/// share the content; the content (and its buffers) is released when the
/// last handle drops.
#[derive(Clone)]
pub struct Message {
    content: Arc<MessageContent>,
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl Message {
    pub fn new() -> Self {
        Self {
            content: Arc::new(MessageContent {
                inner: Mutex::new(ContentInner::default()),
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ContentInner> {
        self.content
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the content for iterator-producing access.
    pub fn content(&self) -> ContentGuard<'_> {
        ContentGuard { inner: self.lock() }
    }

    /// Validates section framing up to `depth`. Returns `false` on
    /// malformed framing; the parse depth is not advanced past the failure.
    pub fn check(&self, depth: Depth) -> bool {
        self.content().check(depth)
    }

    /// Payload length of a field, or `None` when absent.
    pub fn field_length(&self, field: Field) -> Option<usize> {
        self.content().field_length(field)
    }

    /// Appends a field's preamble and payload to `dst`.
    pub fn field_copy(&self, field: Field, dst: &mut Vec<u8>) -> Option<CopiedField> {
        self.content().field_copy(field, dst)
    }

    /// The parsed delivery-annotations map, decoded once and cached.
    pub fn delivery_annotations(&self) -> Option<Arc<ParsedField>> {
        self.content().delivery_annotations()
    }

    /// Stages freshly composed delivery annotations to be spliced in on
    /// send, replacing the received ones.
    ///
    /// # Panics
    ///
    /// Panics if annotations are already staged; the splice list is written
    /// once, before any send.
    pub fn set_delivery_annotations(&self, composed: Composer) {
        let chain = composed.into_buffers();
        let mut inner = self.lock();
        assert!(
            inner.new_delivery_annotations.is_empty(),
            "delivery annotations already staged for this message"
        );
        inner.new_delivery_annotations = chain;
    }

    /// Builds a canonical minimal message: a header with `durable=false`, a
    /// properties list with null message-id, null user-id and a string
    /// `to`, plus an optional body-data section that takes ownership of the
    /// handed-over buffers. Returns `false` on heap exhaustion.
    pub fn compose_1(&self, to: &str, body: Option<BufferChain>) -> bool {
        let mut field = Composer::new();

        field.start_section(Performative::Header);
        field.start_list();
        field.insert_bool(false); // durable
        field.end_list();

        field.start_section(Performative::Properties);
        field.start_list();
        field.insert_null(); // message-id
        field.insert_null(); // user-id
        field.insert_string(to); // to
        field.end_list();

        if let Some(mut body) = body {
            field.start_section(Performative::BodyData);
            field.insert_binary_buffers(&mut body);
        }

        self.compose_2(field)
    }

    /// Moves a composed field's buffers in as the message's sole content.
    pub fn compose_2(&self, composed: Composer) -> bool {
        let ok = !composed.failed();
        let chain = composed.into_buffers();
        self.lock().buffers = chain;
        ok
    }
}

/// Locked view of a message's content; iterator-returning accessors borrow
/// from it so every read happens under the content lock.
pub struct ContentGuard<'a> {
    inner: MutexGuard<'a, ContentInner>,
}

impl ContentGuard<'_> {
    /// See [`Message::check`].
    pub fn check(&mut self, depth: Depth) -> bool {
        match check_inner(&mut self.inner, depth) {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!(%error, ?depth, "message check failed");
                false
            }
        }
    }

    /// Iterator over a field's payload, or `None` when the field is absent
    /// (including when no check has reached its section yet).
    pub fn field_iterator(&mut self, field: Field) -> Option<FieldIterator<'_>> {
        self.field_iterator_as(field, View::All)
    }

    /// Same as [`Self::field_iterator`] with a router view applied.
    pub fn field_iterator_as(&mut self, field: Field, view: View) -> Option<FieldIterator<'_>> {
        let loc = field_location(&mut self.inner, field)?;
        Some(iter_at(&self.inner.buffers, loc, true, view))
    }

    /// Iterator spanning a field's preamble and payload.
    pub fn field_iterator_typed(&mut self, field: Field) -> Option<FieldIterator<'_>> {
        let loc = field_location(&mut self.inner, field)?;
        Some(iter_at(&self.inner.buffers, loc, false, View::All))
    }

    pub fn field_length(&mut self, field: Field) -> Option<usize> {
        field_location(&mut self.inner, field).map(|loc| loc.length)
    }

    pub fn field_copy(&mut self, field: Field, dst: &mut Vec<u8>) -> Option<CopiedField> {
        let loc = field_location(&mut self.inner, field)?;
        let mut cursor = ChainCursor::new(
            &self.inner.buffers,
            ChainPos {
                index: loc.buffer,
                offset: loc.offset,
            },
        );
        let total = loc.length + loc.hdr_length;
        cursor.advance(total, |run| dst.extend_from_slice(run));
        Some(CopiedField {
            length: total,
            hdr_length: loc.hdr_length,
        })
    }

    /// See [`Message::delivery_annotations`].
    pub fn delivery_annotations(&mut self) -> Option<Arc<ParsedField>> {
        let inner = &mut *self.inner;
        if let Some(parsed) = &inner.parsed_delivery_annotations {
            return Some(Arc::clone(parsed));
        }
        let loc = field_location(inner, Field::DeliveryAnnotations)?;
        let tree = {
            let mut iter = iter_at(&inner.buffers, loc, true, View::All);
            parsed::parse(&mut iter).ok()?
        };
        if !tree.is_map() {
            return None;
        }
        let tree = Arc::new(tree);
        inner.parsed_delivery_annotations = Some(Arc::clone(&tree));
        Some(tree)
    }

    /// How deep checks have validated so far.
    pub fn parse_depth(&self) -> Depth {
        self.inner.parse_depth
    }

    /// The resume point of the section parse, as `(buffer index, offset)`.
    /// `None` until the first check, or once the parse consumed the chain.
    pub fn parse_position(&self) -> Option<(usize, usize)> {
        match self.inner.parse_pos {
            ParsePos::At(pos) => Some((pos.index, pos.offset)),
            ParsePos::Unstarted | ParsePos::End => None,
        }
    }

    /// Number of buffers currently on the chain.
    pub fn buffer_count(&self) -> usize {
        self.inner.buffers.len()
    }
}

// -----------------------------------------------------------------------------
// Depth-wise check
// -----------------------------------------------------------------------------

/// Matches one section preamble at the parse cursor. A clean mismatch (or
/// an already-exhausted cursor) is not an error; the section is simply
/// absent at this position. On a match the section is measured, recorded
/// into `location`, and the cursor advances past it.
fn check_and_advance(
    chain: &BufferChain,
    pos: &mut ParsePos,
    pattern: &[u8],
    tags: &[u8],
    location: &mut FieldLocation,
) -> Result<(), ParseError> {
    let start = match *pos {
        ParsePos::At(p) => p,
        ParsePos::Unstarted | ParsePos::End => return Ok(()),
    };

    let mut cursor = ChainCursor::new(chain, start);
    for &expected in pattern {
        match cursor.peek() {
            Some(byte) if byte == expected => {
                cursor.skip(1);
            }
            _ => return Ok(()), // no match; the cursor state is untouched
        }
    }

    let Some(tag) = cursor.peek() else {
        return Ok(()); // chain ends right at the preamble: no match
    };
    if !tags.contains(&tag) {
        return Err(ParseError::UnexpectedTag { tag });
    }
    if location.parsed {
        return Err(ParseError::DuplicateSection);
    }

    location.parsed = true;
    location.buffer = start.index;
    location.offset = start.offset;
    location.length = 0;
    location.hdr_length = pattern.len();

    // Measure the section: tag, optional size bytes, payload.
    let mut pre_consume = 1usize; // the tag itself
    let mut consume = 0usize;
    let Some(tag) = cursor.octet_then_live() else {
        return Err(ParseError::TruncatedFrame);
    };
    match tag {
        0x45 => {}
        0xD0 | 0xD1 | 0xB0 => {
            pre_consume += 4;
            for _ in 0..4 {
                let Some(byte) = cursor.octet_then_live() else {
                    return Err(ParseError::TruncatedFrame);
                };
                consume = (consume << 8) | byte as usize;
            }
        }
        0xC0 | 0xC1 | 0xA0 => {
            pre_consume += 1;
            let Some(byte) = cursor.octet_then_live() else {
                return Err(ParseError::TruncatedFrame);
            };
            consume = byte as usize;
        }
        _ => {}
    }

    location.length = pre_consume + consume;
    if consume > 0 {
        cursor.skip(consume);
    }
    *pos = match cursor.pos() {
        Some(p) => ParsePos::At(p),
        None => ParsePos::End,
    };
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn check_field(
    chain: &BufferChain,
    pos: &mut ParsePos,
    parse_depth: &mut Depth,
    section_depth: Depth,
    code: u8,
    tags: &'static [u8],
    location: &mut FieldLocation,
    more: bool,
) -> Result<(), ParseError> {
    if section_depth > *parse_depth {
        check_and_advance(chain, pos, &long_pattern(code), tags, location)?;
        check_and_advance(chain, pos, &short_pattern(code), tags, location)?;
        if !more {
            *parse_depth = section_depth;
        }
    }
    Ok(())
}

pub(crate) fn check_inner(inner: &mut ContentInner, depth: Depth) -> Result<(), ParseError> {
    if inner.buffers.is_empty() {
        return Err(ParseError::TruncatedFrame); // no data at all
    }
    if depth <= inner.parse_depth {
        return Ok(()); // already parsed at least this deep
    }
    if inner.parse_pos == ParsePos::Unstarted {
        inner.parse_pos = ParsePos::At(ChainPos {
            index: 0,
            offset: 0,
        });
    }

    let ContentInner {
        buffers,
        parse_pos,
        parse_depth,
        section_header,
        section_delivery_annotations,
        section_message_annotations,
        section_properties,
        section_application_properties,
        section_body,
        section_footer,
        ..
    } = inner;

    check_field(
        buffers, parse_pos, parse_depth,
        Depth::Header, 0x70, TAGS_LIST, section_header, false,
    )?;
    if depth == Depth::Header {
        return Ok(());
    }

    check_field(
        buffers, parse_pos, parse_depth,
        Depth::DeliveryAnnotations, 0x71, TAGS_MAP, section_delivery_annotations, false,
    )?;
    if depth == Depth::DeliveryAnnotations {
        return Ok(());
    }

    check_field(
        buffers, parse_pos, parse_depth,
        Depth::MessageAnnotations, 0x72, TAGS_MAP, section_message_annotations, false,
    )?;
    if depth == Depth::MessageAnnotations {
        return Ok(());
    }

    check_field(
        buffers, parse_pos, parse_depth,
        Depth::Properties, 0x73, TAGS_LIST, section_properties, false,
    )?;
    if depth == Depth::Properties {
        return Ok(());
    }

    check_field(
        buffers, parse_pos, parse_depth,
        Depth::ApplicationProperties, 0x74, TAGS_MAP, section_application_properties, false,
    )?;
    if depth == Depth::ApplicationProperties {
        return Ok(());
    }

    // Body: data or sequence may precede a value; only the first location
    // is recorded, and any further body sections are left for consumers to
    // re-walk from there.
    check_field(
        buffers, parse_pos, parse_depth,
        Depth::Body, 0x75, TAGS_BINARY, section_body, true,
    )?;
    check_field(
        buffers, parse_pos, parse_depth,
        Depth::Body, 0x76, TAGS_LIST, section_body, true,
    )?;
    check_field(
        buffers, parse_pos, parse_depth,
        Depth::Body, 0x77, TAGS_ANY, section_body, false,
    )?;
    if depth == Depth::Body {
        return Ok(());
    }

    check_field(
        buffers, parse_pos, parse_depth,
        Depth::All, 0x78, TAGS_MAP, section_footer, false,
    )?;

    Ok(())
}

// -----------------------------------------------------------------------------
// Field locations
// -----------------------------------------------------------------------------

/// Walks the properties list up to the wanted field, recording every field
/// location crossed on the way the first time it is seen.
fn properties_field(inner: &mut ContentInner, want: Field) -> Option<FieldLocation> {
    let (min_count, cached) = match want {
        Field::To => (3, inner.field_to),
        Field::ReplyTo => (5, inner.field_reply_to),
        Field::CorrelationId => (6, inner.field_correlation_id),
        _ => return None,
    };
    if cached.parsed {
        return Some(cached);
    }
    if !inner.section_properties.parsed {
        return None;
    }

    let ContentInner {
        buffers,
        section_properties,
        field_user_id,
        field_to,
        field_reply_to,
        field_correlation_id,
        ..
    } = inner;

    let mut cursor = ChainCursor::new(
        buffers,
        ChainPos {
            index: section_properties.buffer,
            offset: section_properties.offset,
        },
    );
    cursor.skip(section_properties.hdr_length);

    let count = cursor.read_list_header();
    if count < min_count {
        return None;
    }

    if !cursor.traverse_field(None) {
        return None; // message-id
    }
    if !cursor.traverse_field(Some(field_user_id)) {
        return None;
    }
    if !cursor.traverse_field(Some(field_to)) {
        return None;
    }
    if want == Field::To {
        return Some(*field_to);
    }

    if !cursor.traverse_field(None) {
        return None; // subject
    }
    if !cursor.traverse_field(Some(field_reply_to)) {
        return None;
    }
    if want == Field::ReplyTo {
        return Some(*field_reply_to);
    }

    if !cursor.traverse_field(Some(field_correlation_id)) {
        return None;
    }
    Some(*field_correlation_id)
}

pub(crate) fn field_location(inner: &mut ContentInner, field: Field) -> Option<FieldLocation> {
    match field {
        Field::To | Field::ReplyTo | Field::CorrelationId => properties_field(inner, field),
        Field::DeliveryAnnotations => inner
            .section_delivery_annotations
            .parsed
            .then_some(inner.section_delivery_annotations),
        Field::ApplicationProperties => inner
            .section_application_properties
            .parsed
            .then_some(inner.section_application_properties),
        Field::Body => inner.section_body.parsed.then_some(inner.section_body),
        _ => None,
    }
}

/// Builds an iterator scoped to a recorded location, optionally skipping
/// the preamble.
pub(crate) fn iter_at<'b>(
    buffers: &'b BufferChain,
    loc: FieldLocation,
    skip_hdr: bool,
    view: View,
) -> FieldIterator<'b> {
    if skip_hdr {
        let mut cursor = ChainCursor::new(
            buffers,
            ChainPos {
                index: loc.buffer,
                offset: loc.offset,
            },
        );
        cursor.skip(loc.hdr_length);
        match cursor.pos() {
            Some(pos) => FieldIterator::over_chain(buffers, pos.index, pos.offset, loc.length, view),
            None => FieldIterator::over_bytes(&[], view),
        }
    } else {
        FieldIterator::over_chain(
            buffers,
            loc.buffer,
            loc.offset,
            loc.length + loc.hdr_length,
            view,
        )
    }
}
