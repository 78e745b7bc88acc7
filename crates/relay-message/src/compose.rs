//! Composer for canonical message sections.
//!
//! Builds described sections into a fresh buffer chain, choosing the
//! smallest fitting encodings. Scalars and compound headers are staged in
//! scratch space until their enclosing compound closes (sizes are only
//! known then); body payload buffers are never copied, they are spliced
//! into the chain as-is.

use crate::buffer::BufferChain;

/// Section codes for the described-type preambles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Performative {
    Header,
    DeliveryAnnotations,
    MessageAnnotations,
    Properties,
    ApplicationProperties,
    BodyData,
    BodySequence,
    BodyValue,
    Footer,
}

impl Performative {
    fn code(self) -> u8 {
        match self {
            Performative::Header => 0x70,
            Performative::DeliveryAnnotations => 0x71,
            Performative::MessageAnnotations => 0x72,
            Performative::Properties => 0x73,
            Performative::ApplicationProperties => 0x74,
            Performative::BodyData => 0x75,
            Performative::BodySequence => 0x76,
            Performative::BodyValue => 0x77,
            Performative::Footer => 0x78,
        }
    }
}

enum FrameKind {
    List,
    Map,
}

struct Frame {
    kind: FrameKind,
    count: usize,
    bytes: Vec<u8>,
}

/// Serializes sections into buffers. Encoding failures (heap exhaustion)
/// latch [`Composer::failed`]; subsequent operations become no-ops.
pub struct Composer {
    chain: BufferChain,
    section: Option<u8>,
    element: Option<Vec<u8>>,
    frames: Vec<Frame>,
    failed: bool,
}

impl Default for Composer {
    fn default() -> Self {
        Self::new()
    }
}

impl Composer {
    pub fn new() -> Self {
        Self {
            chain: BufferChain::new(),
            section: None,
            element: None,
            frames: Vec::new(),
            failed: false,
        }
    }

    /// True once any append has failed for lack of memory.
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Opens a section, flushing the previous one to the chain.
    pub fn start_section(&mut self, performative: Performative) {
        self.close_section();
        self.section = Some(performative.code());
    }

    pub fn start_list(&mut self) {
        self.frames.push(Frame {
            kind: FrameKind::List,
            count: 0,
            bytes: Vec::new(),
        });
    }

    pub fn end_list(&mut self) {
        self.end_compound(FrameKind::List);
    }

    pub fn start_map(&mut self) {
        self.frames.push(Frame {
            kind: FrameKind::Map,
            count: 0,
            bytes: Vec::new(),
        });
    }

    pub fn end_map(&mut self) {
        self.end_compound(FrameKind::Map);
    }

    pub fn insert_null(&mut self) {
        self.sink(vec![0x40]);
    }

    pub fn insert_bool(&mut self, value: bool) {
        self.sink(vec![if value { 0x41 } else { 0x42 }]);
    }

    pub fn insert_uint(&mut self, value: u32) {
        let mut bytes = Vec::with_capacity(5);
        if value == 0 {
            bytes.push(0x43);
        } else if value <= u32::from(u8::MAX) {
            bytes.push(0x52);
            bytes.push(value as u8);
        } else {
            bytes.push(0x70);
            bytes.extend_from_slice(&value.to_be_bytes());
        }
        self.sink(bytes);
    }

    pub fn insert_string(&mut self, value: &str) {
        self.sink(variable(0xA1, 0xB1, value.as_bytes()));
    }

    pub fn insert_symbol(&mut self, value: &str) {
        self.sink(variable(0xA3, 0xB3, value.as_bytes()));
    }

    pub fn insert_binary(&mut self, value: &[u8]) {
        self.sink(variable(0xA0, 0xB0, value));
    }

    /// Emits a binary value whose payload is the handed-over buffer list,
    /// spliced into the chain without copying. `buffers` is left empty.
    /// Only valid as a section's sole element.
    pub fn insert_binary_buffers(&mut self, buffers: &mut BufferChain) {
        debug_assert!(
            self.frames.is_empty(),
            "buffer splices cannot nest inside a compound"
        );
        let Some(code) = self.section.take() else {
            return;
        };

        let len = buffers.total_size();
        let mut header = vec![0x00, 0x53, code];
        if len <= usize::from(u8::MAX) {
            header.push(0xA0);
            header.push(len as u8);
        } else {
            header.push(0xB0);
            header.extend_from_slice(&(len as u32).to_be_bytes());
        }
        self.append(&header);
        self.chain.splice_back(buffers);
    }

    /// Finishes the last section and hands over the buffers.
    pub fn into_buffers(mut self) -> BufferChain {
        self.close_section();
        self.chain.take()
    }

    fn end_compound(&mut self, expected: FrameKind) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        debug_assert!(
            matches!(
                (&frame.kind, &expected),
                (FrameKind::List, FrameKind::List) | (FrameKind::Map, FrameKind::Map)
            ),
            "mismatched compound close"
        );
        let encoded = encode_compound(&frame);
        self.sink(encoded);
    }

    /// Routes an encoded element into the open compound, or stages it as
    /// the section's element.
    fn sink(&mut self, bytes: Vec<u8>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.bytes.extend_from_slice(&bytes);
            frame.count += 1;
        } else {
            debug_assert!(self.element.is_none(), "a section holds one element");
            self.element = Some(bytes);
        }
    }

    fn close_section(&mut self) {
        let (Some(code), Some(element)) = (self.section.take(), self.element.take()) else {
            return;
        };
        self.append(&[0x00, 0x53, code]);
        self.append(&element);
    }

    fn append(&mut self, bytes: &[u8]) {
        if !self.failed && !self.chain.append_bytes(bytes) {
            self.failed = true;
        }
    }
}

fn variable(small_tag: u8, large_tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(payload.len() + 5);
    if payload.len() <= usize::from(u8::MAX) {
        bytes.push(small_tag);
        bytes.push(payload.len() as u8);
    } else {
        bytes.push(large_tag);
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    }
    bytes.extend_from_slice(payload);
    bytes
}

fn encode_compound(frame: &Frame) -> Vec<u8> {
    let is_list = matches!(frame.kind, FrameKind::List);
    if is_list && frame.count == 0 {
        return vec![0x45];
    }

    let body_len = frame.bytes.len();
    let mut bytes = Vec::with_capacity(body_len + 9);
    // The size field counts the count field plus the elements.
    if frame.count <= usize::from(u8::MAX) && body_len + 1 <= usize::from(u8::MAX) {
        bytes.push(if is_list { 0xC0 } else { 0xC1 });
        bytes.push((body_len + 1) as u8);
        bytes.push(frame.count as u8);
    } else {
        bytes.push(if is_list { 0xD0 } else { 0xD1 });
        bytes.extend_from_slice(&((body_len + 4) as u32).to_be_bytes());
        bytes.extend_from_slice(&(frame.count as u32).to_be_bytes());
    }
    bytes.extend_from_slice(&frame.bytes);
    bytes
}
