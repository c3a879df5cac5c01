//! Byte-level pieces of the HDF5 format: superblock v3, version 2 object
//! headers and the messages this crate reads and writes.
//!
//! Offsets and lengths are always 8 bytes wide and every number is
//! little-endian.

use anyhow::{bail, ensure, Context, Result};

use super::checksum::lookup3;

pub const SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'];
/// Address of storage that was never allocated.
pub const UNDEFINED: u64 = u64::MAX;
pub const SUPERBLOCK_SIZE: usize = 48;

pub const MSG_DATASPACE: u8 = 0x01;
pub const MSG_LINK_INFO: u8 = 0x02;
pub const MSG_DATATYPE: u8 = 0x03;
pub const MSG_FILL_VALUE: u8 = 0x05;
pub const MSG_LINK: u8 = 0x06;
pub const MSG_LAYOUT: u8 = 0x08;
pub const MSG_GROUP_INFO: u8 = 0x0a;
pub const MSG_FILTER_PIPELINE: u8 = 0x0b;
pub const MSG_ATTRIBUTE: u8 = 0x0c;
pub const MSG_CONTINUATION: u8 = 0x10;
pub const MSG_SYMBOL_TABLE: u8 = 0x11;

/// Message flag: the message never changes.
pub const MSG_CONSTANT: u8 = 0x01;
/// Message flag: the body is a reference to a shared message.
const MSG_SHARED: u8 = 0x02;

pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;

// ---------------------------------------------------------------------------
// Cursor – bounds-checked little-endian reads
// ---------------------------------------------------------------------------

pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .with_context(|| format!("truncated data: need {n} byte(s) at offset {}", self.pos))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b = self.bytes(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    /// Unsigned integer stored in `width` bytes.
    pub fn uint(&mut self, width: usize) -> Result<u64> {
        match width {
            1 => self.u8().map(u64::from),
            2 => self.u16().map(u64::from),
            4 => self.u32().map(u64::from),
            8 => self.u64(),
            _ => bail!("unsupported field width {width}"),
        }
    }

    /// A NUL-terminated string; the terminator is consumed.
    pub fn cstr(&mut self) -> Result<String> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .context("unterminated string")?;
        let text = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += len + 1;
        Ok(text)
    }
}

pub fn pad8(n: usize) -> usize {
    (n + 7) & !7
}

fn to_usize(v: u64) -> Result<usize> {
    usize::try_from(v).with_context(|| format!("value {v} does not fit in memory"))
}

// ---------------------------------------------------------------------------
// Datatype
// ---------------------------------------------------------------------------

/// Element types understood by this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datatype {
    Integer { size: u8, signed: bool },
    Float { size: u8 },
    /// Fixed-length string. `space_padded` strings are trimmed of trailing
    /// spaces, all others at the first NUL.
    String { size: u32, utf8: bool, space_padded: bool },
    /// h5py's boolean: a one-byte enumeration `FALSE = 0`, `TRUE = 1`.
    Bool,
    /// Object reference (an object header address).
    Reference,
    /// Variable-length sequence stored in the global heap.
    Sequence(Box<Datatype>),
}

impl Datatype {
    /// Bytes per element.
    pub fn size(&self) -> usize {
        match self {
            Datatype::Integer { size, .. } | Datatype::Float { size } => usize::from(*size),
            Datatype::String { size, .. } => *size as usize,
            Datatype::Bool => 1,
            Datatype::Reference => 8,
            Datatype::Sequence(_) => 16,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Datatype::Integer { size, signed } => {
                let bits = if *signed { 0x08 } else { 0x00 };
                let mut buf = type_header(0, 1, [bits, 0, 0], u32::from(*size));
                buf.extend_from_slice(&0u16.to_le_bytes());
                buf.extend_from_slice(&(u16::from(*size) * 8).to_le_bytes());
                buf
            }
            Datatype::Float { size } => {
                let (exp_loc, exp_size, mant_size, bias) = if *size == 4 {
                    (23u8, 8u8, 23u8, 127u32)
                } else {
                    (52, 11, 52, 1023)
                };
                let bits = u16::from(*size) * 8;
                // Implied leading mantissa bit; sign in the top bit.
                let mut buf = type_header(1, 1, [0x20, (bits - 1) as u8, 0], u32::from(*size));
                buf.extend_from_slice(&0u16.to_le_bytes());
                buf.extend_from_slice(&bits.to_le_bytes());
                buf.extend_from_slice(&[exp_loc, exp_size, 0, mant_size]);
                buf.extend_from_slice(&bias.to_le_bytes());
                buf
            }
            Datatype::String { size, utf8, space_padded } => {
                let padding = if *space_padded { 2 } else { 1 };
                let charset = if *utf8 { 1 } else { 0 };
                type_header(3, 1, [padding | (charset << 4), 0, 0], *size)
            }
            Datatype::Bool => {
                let mut buf = type_header(8, 3, [2, 0, 0], 1);
                buf.extend_from_slice(&Datatype::Integer { size: 1, signed: true }.encode());
                buf.extend_from_slice(b"FALSE\0TRUE\0");
                buf.extend_from_slice(&[0, 1]);
                buf
            }
            Datatype::Reference => type_header(7, 1, [0, 0, 0], 8),
            Datatype::Sequence(base) => {
                let mut buf = type_header(9, 1, [0, 0, 0], 16);
                buf.extend_from_slice(&base.encode());
                buf
            }
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::parse_at(&mut Cursor::new(data))
    }

    fn parse_at(cur: &mut Cursor<'_>) -> Result<Self> {
        let head = cur.u8()?;
        let (class, version) = (head & 0x0f, head >> 4);
        let bits = cur.bytes(3)?;
        let (b0, b1) = (bits[0], bits[1]);
        let size = cur.u32()?;

        let dt = match class {
            0 => {
                ensure!(b0 & 0x01 == 0, "big-endian integers are not supported");
                cur.skip(4)?;
                let size = match size {
                    1 | 2 | 4 | 8 => size as u8,
                    _ => bail!("unsupported integer size {size}"),
                };
                Datatype::Integer {
                    size,
                    signed: b0 & 0x08 != 0,
                }
            }
            1 => {
                ensure!(b0 & 0x41 == 0, "only little-endian IEEE floats are supported");
                cur.skip(12)?;
                match size {
                    4 | 8 => Datatype::Float { size: size as u8 },
                    _ => bail!("unsupported float size {size}"),
                }
            }
            3 => Datatype::String {
                size,
                utf8: (b0 >> 4) & 0x0f == 1,
                space_padded: b0 & 0x0f == 2,
            },
            7 => {
                ensure!(b0 & 0x0f == 0, "only object references are supported");
                Datatype::Reference
            }
            8 => {
                let count = usize::from(b0) | usize::from(b1) << 8;
                let base = Self::parse_at(cur)?;
                let mut names = Vec::with_capacity(count);
                for _ in 0..count {
                    let start = cur.pos();
                    names.push(cur.cstr()?);
                    if version < 3 {
                        let used = cur.pos() - start;
                        cur.skip(pad8(used) - used)?;
                    }
                }
                let values = cur.bytes(count * base.size())?;
                let is_bool = base == (Datatype::Integer { size: 1, signed: true })
                    && names.len() == 2
                    && names.iter().zip(values).all(|(name, &v)| {
                        (name == "FALSE" && v == 0) || (name == "TRUE" && v == 1)
                    });
                ensure!(is_bool, "enumerations other than booleans are not supported");
                Datatype::Bool
            }
            9 => {
                ensure!(b0 & 0x0f == 0, "variable-length strings are not supported");
                Datatype::Sequence(Box::new(Self::parse_at(cur)?))
            }
            _ => bail!("unsupported datatype class {class}"),
        };
        Ok(dt)
    }
}

fn type_header(class: u8, version: u8, bits: [u8; 3], size: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.push(class | (version << 4));
    buf.extend_from_slice(&bits);
    buf.extend_from_slice(&size.to_le_bytes());
    buf
}

// ---------------------------------------------------------------------------
// Dataspace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dataspace {
    Scalar,
    Simple(Vec<u64>),
    /// No elements at all; used for empty attributes.
    Null,
}

impl Dataspace {
    pub fn of_shape(shape: &[usize]) -> Self {
        if shape.is_empty() {
            Dataspace::Scalar
        } else {
            Dataspace::Simple(shape.iter().map(|&n| n as u64).collect())
        }
    }

    pub fn shape(&self) -> Result<Vec<usize>> {
        match self {
            Dataspace::Simple(dims) => dims.iter().map(|&d| to_usize(d)).collect(),
            _ => Ok(Vec::new()),
        }
    }

    pub fn len(&self) -> Result<usize> {
        match self {
            Dataspace::Scalar => Ok(1),
            Dataspace::Null => Ok(0),
            Dataspace::Simple(dims) => dims
                .iter()
                .try_fold(1usize, |n, &d| n.checked_mul(to_usize(d)?).context("dataspace too large")),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let (kind, dims): (u8, &[u64]) = match self {
            Dataspace::Scalar => (0, &[]),
            Dataspace::Simple(dims) => (1, dims),
            Dataspace::Null => (2, &[]),
        };
        let mut buf = vec![2, dims.len() as u8, 0, kind];
        for d in dims {
            buf.extend_from_slice(&d.to_le_bytes());
        }
        buf
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(data);
        let version = cur.u8()?;
        let rank = usize::from(cur.u8()?);
        // Flags only announce trailing maximum dimensions, which are unused.
        cur.skip(1)?;
        let kind = match version {
            1 => {
                cur.skip(5)?;
                if rank == 0 {
                    0
                } else {
                    1
                }
            }
            2 => cur.u8()?,
            _ => bail!("unsupported dataspace version {version}"),
        };
        let dims = (0..rank).map(|_| cur.u64()).collect::<Result<Vec<_>>>()?;
        match kind {
            0 => Ok(Dataspace::Scalar),
            1 => Ok(Dataspace::Simple(dims)),
            2 => Ok(Dataspace::Null),
            _ => bail!("unknown dataspace type {kind}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Object headers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: u8,
    pub flags: u8,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(kind: u8, body: Vec<u8>) -> Self {
        Self { kind, flags: 0, body }
    }

    pub fn constant(kind: u8, body: Vec<u8>) -> Self {
        Self {
            kind,
            flags: MSG_CONSTANT,
            body,
        }
    }
}

/// Serialize a version 2 object header holding `messages` in one chunk.
pub fn encode_object_header(messages: &[Message]) -> Result<Vec<u8>> {
    let mut chunk = Vec::new();
    for msg in messages {
        let size = u16::try_from(msg.body.len())
            .with_context(|| format!("header message of {} bytes is too large", msg.body.len()))?;
        chunk.push(msg.kind);
        chunk.extend_from_slice(&size.to_le_bytes());
        chunk.push(msg.flags);
        chunk.extend_from_slice(&msg.body);
    }

    let mut buf = Vec::with_capacity(chunk.len() + 16);
    buf.extend_from_slice(b"OHDR");
    buf.push(2);
    let len = chunk.len() as u64;
    match len {
        0..=0xff => {
            buf.push(0x00);
            buf.push(len as u8);
        }
        0x100..=0xffff => {
            buf.push(0x01);
            buf.extend_from_slice(&(len as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(0x02);
            buf.extend_from_slice(&(len as u32).to_le_bytes());
        }
        _ => {
            buf.push(0x03);
            buf.extend_from_slice(&len.to_le_bytes());
        }
    }
    buf.extend_from_slice(&chunk);
    let sum = lookup3(&buf);
    buf.extend_from_slice(&sum.to_le_bytes());
    Ok(buf)
}

/// Every message of the object header at `address`, continuation blocks
/// included.
pub fn parse_object_header(file: &[u8], address: u64) -> Result<Vec<Message>> {
    let start = to_usize(address)?;
    let mut cur = Cursor::at(file, start);
    ensure!(
        cur.bytes(4)? == b"OHDR",
        "no version 2 object header at {address:#x} (older header layouts are not supported)"
    );
    let version = cur.u8()?;
    ensure!(version == 2, "unsupported object header version {version}");
    let flags = cur.u8()?;
    if flags & 0x20 != 0 {
        cur.skip(16)?;
    }
    if flags & 0x10 != 0 {
        cur.skip(4)?;
    }
    let chunk_len = to_usize(cur.uint(1 << (flags & 0x03))?)?;
    let tracks_order = flags & 0x04 != 0;

    let body_start = cur.pos();
    let body = cur.bytes(chunk_len)?;
    verify_checksum(&file[start..body_start + chunk_len], cur.u32()?, "object header")?;

    let mut messages = Vec::new();
    let mut pending = read_messages(body, tracks_order, &mut messages)?;
    while let Some((addr, len)) = pending.pop() {
        let (addr, len) = (to_usize(addr)?, to_usize(len)?);
        ensure!(len >= 8, "continuation block of {len} bytes is too short");
        let mut cur = Cursor::at(file, addr);
        let block = cur.bytes(len)?;
        ensure!(&block[..4] == b"OCHK", "missing continuation block at {addr:#x}");
        let stored = u32::from_le_bytes([block[len - 4], block[len - 3], block[len - 2], block[len - 1]]);
        verify_checksum(&block[..len - 4], stored, "continuation block")?;
        pending.extend(read_messages(&block[4..len - 4], tracks_order, &mut messages)?);
    }
    Ok(messages)
}

/// Collect messages from one header chunk; returns continuation targets.
fn read_messages(chunk: &[u8], tracks_order: bool, out: &mut Vec<Message>) -> Result<Vec<(u64, u64)>> {
    let prefix = if tracks_order { 6 } else { 4 };
    let mut continuations = Vec::new();
    let mut cur = Cursor::new(chunk);
    // Fewer bytes than a message prefix is a gap.
    while cur.remaining() >= prefix {
        let kind = cur.u8()?;
        let size = usize::from(cur.u16()?);
        let flags = cur.u8()?;
        if tracks_order {
            cur.skip(2)?;
        }
        let body = cur.bytes(size)?;
        if flags & MSG_SHARED != 0 {
            bail!("shared header messages are not supported");
        }
        if kind == MSG_CONTINUATION {
            let mut c = Cursor::new(body);
            continuations.push((c.u64()?, c.u64()?));
        } else {
            out.push(Message {
                kind,
                flags,
                body: body.to_vec(),
            });
        }
    }
    Ok(continuations)
}

fn verify_checksum(data: &[u8], stored: u32, what: &str) -> Result<()> {
    let computed = lookup3(data);
    ensure!(
        computed == stored,
        "{what} checksum mismatch (stored {stored:#010x}, computed {computed:#010x})"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Superblock
// ---------------------------------------------------------------------------

pub fn encode_superblock(root: u64, eof: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SUPERBLOCK_SIZE);
    buf.extend_from_slice(&SIGNATURE);
    buf.extend_from_slice(&[3, 8, 8, 0]);
    buf.extend_from_slice(&0u64.to_le_bytes());
    buf.extend_from_slice(&UNDEFINED.to_le_bytes());
    buf.extend_from_slice(&eof.to_le_bytes());
    buf.extend_from_slice(&root.to_le_bytes());
    let sum = lookup3(&buf);
    buf.extend_from_slice(&sum.to_le_bytes());
    buf
}

/// Root group address from a version 2 or 3 superblock at the start of
/// the file.
pub fn parse_superblock(file: &[u8]) -> Result<u64> {
    let mut cur = Cursor::new(file);
    ensure!(cur.bytes(8)? == SIGNATURE, "not an HDF5 file (bad signature)");
    let version = cur.u8()?;
    ensure!(
        matches!(version, 2 | 3),
        "superblock version {version} is not supported (only versions 2 and 3 are)"
    );
    let (offsets, lengths) = (cur.u8()?, cur.u8()?);
    ensure!(
        offsets == 8 && lengths == 8,
        "only 8-byte offsets and lengths are supported"
    );
    cur.skip(1)?;
    let base = cur.u64()?;
    ensure!(base == 0, "files with a user block are not supported");
    cur.skip(16)?;
    let root = cur.u64()?;
    let end = cur.pos();
    verify_checksum(&file[..end], cur.u32()?, "superblock")?;
    Ok(root)
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

pub fn link_info_message() -> Message {
    let mut body = vec![0, 0];
    body.extend_from_slice(&UNDEFINED.to_le_bytes());
    body.extend_from_slice(&UNDEFINED.to_le_bytes());
    Message::new(MSG_LINK_INFO, body)
}

pub fn group_info_message() -> Message {
    Message::new(MSG_GROUP_INFO, vec![0, 0])
}

/// Whether a link info message points at dense (fractal heap) storage.
pub fn has_dense_links(body: &[u8]) -> Result<bool> {
    let mut cur = Cursor::new(body);
    cur.skip(1)?;
    let flags = cur.u8()?;
    if flags & 0x01 != 0 {
        cur.skip(8)?;
    }
    Ok(cur.u64()? != UNDEFINED)
}

/// Hard link to the object header at `address`.
pub fn link_message(name: &str, address: u64) -> Message {
    let name = name.as_bytes();
    let mut body = vec![1];
    let (width, width_bits) = match name.len() {
        0..=0xff => (1, 0u8),
        0x100..=0xffff => (2, 1),
        _ => (4, 2),
    };
    let utf8 = !name.is_ascii();
    body.push(width_bits | if utf8 { 0x10 } else { 0 });
    if utf8 {
        body.push(1);
    }
    body.extend_from_slice(&(name.len() as u32).to_le_bytes()[..width]);
    body.extend_from_slice(name);
    body.extend_from_slice(&address.to_le_bytes());
    Message::new(MSG_LINK, body)
}

/// Name and target of a hard link; `None` for soft and external links.
pub fn parse_link(body: &[u8]) -> Result<Option<(String, u64)>> {
    let mut cur = Cursor::new(body);
    let version = cur.u8()?;
    ensure!(version == 1, "unsupported link message version {version}");
    let flags = cur.u8()?;
    let kind = if flags & 0x08 != 0 { cur.u8()? } else { 0 };
    if flags & 0x04 != 0 {
        cur.skip(8)?;
    }
    if flags & 0x10 != 0 {
        cur.skip(1)?;
    }
    let len = to_usize(cur.uint(1 << (flags & 0x03))?)?;
    let name = String::from_utf8_lossy(cur.bytes(len)?).into_owned();
    if kind != 0 {
        return Ok(None);
    }
    Ok(Some((name, cur.u64()?)))
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// One attribute as stored: name, type, shape and raw value bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub datatype: Datatype,
    pub space: Dataspace,
    pub raw: Vec<u8>,
}

impl Attribute {
    pub fn encode(&self) -> Message {
        let mut name = self.name.as_bytes().to_vec();
        name.push(0);
        let datatype = self.datatype.encode();
        let space = self.space.encode();

        let mut body = vec![3, 0];
        body.extend_from_slice(&(name.len() as u16).to_le_bytes());
        body.extend_from_slice(&(datatype.len() as u16).to_le_bytes());
        body.extend_from_slice(&(space.len() as u16).to_le_bytes());
        body.push(if self.name.is_ascii() { 0 } else { 1 });
        body.extend_from_slice(&name);
        body.extend_from_slice(&datatype);
        body.extend_from_slice(&space);
        body.extend_from_slice(&self.raw);
        Message::new(MSG_ATTRIBUTE, body)
    }

    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(body);
        let version = cur.u8()?;
        ensure!(
            (1..=3).contains(&version),
            "unsupported attribute message version {version}"
        );
        let flags = cur.u8()?;
        ensure!(flags & 0x03 == 0, "shared attribute types are not supported");
        let name_len = usize::from(cur.u16()?);
        let type_len = usize::from(cur.u16()?);
        let space_len = usize::from(cur.u16()?);
        if version == 3 {
            cur.skip(1)?;
        }
        let padded = |n: usize| if version == 1 { pad8(n) } else { n };

        let name_bytes = cur.bytes(padded(name_len))?;
        let name_end = name_bytes[..name_len.min(name_bytes.len())]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(name_len);
        let name = String::from_utf8_lossy(&name_bytes[..name_end]).into_owned();
        let datatype = Datatype::parse(cur.bytes(padded(type_len))?)
            .with_context(|| format!("attribute '{name}'"))?;
        let space = Dataspace::parse(cur.bytes(padded(space_len))?)?;
        let size = space.len()? * datatype.size();
        let raw = cur.bytes(size)?.to_vec();
        Ok(Self {
            name,
            datatype,
            space,
            raw,
        })
    }
}

// ---------------------------------------------------------------------------
// Data layout and filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    Compact(Vec<u8>),
    Contiguous { address: u64, size: u64 },
    /// Chunked storage whose only chunk covers the whole dataset.
    SingleChunk { address: u64, filtered_size: Option<u64> },
}

impl Layout {
    pub fn contiguous(address: u64, size: u64) -> Message {
        let mut body = vec![4, 1];
        body.extend_from_slice(&address.to_le_bytes());
        body.extend_from_slice(&size.to_le_bytes());
        Message::constant(MSG_LAYOUT, body)
    }

    /// Version 4 chunked layout with the single-chunk index.
    pub fn single_chunk(shape: &[u64], element: usize, address: u64, filtered_size: u64) -> Message {
        let widest = shape.iter().copied().chain([element as u64]).max().unwrap_or(1);
        let width: usize = match widest {
            0..=0xff => 1,
            0x100..=0xffff => 2,
            0x1_0000..=0xffff_ffff => 4,
            _ => 8,
        };
        let mut body = vec![4, 2, 0x02, shape.len() as u8 + 1, width as u8];
        for d in shape.iter().copied().chain([element as u64]) {
            body.extend_from_slice(&d.to_le_bytes()[..width]);
        }
        body.push(1);
        body.extend_from_slice(&filtered_size.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&address.to_le_bytes());
        Message::constant(MSG_LAYOUT, body)
    }

    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(body);
        let version = cur.u8()?;
        ensure!(
            matches!(version, 3 | 4),
            "unsupported data layout version {version}"
        );
        match cur.u8()? {
            0 => {
                let size = usize::from(cur.u16()?);
                Ok(Layout::Compact(cur.bytes(size)?.to_vec()))
            }
            1 => Ok(Layout::Contiguous {
                address: cur.u64()?,
                size: cur.u64()?,
            }),
            2 if version == 4 => {
                let flags = cur.u8()?;
                let ndims = usize::from(cur.u8()?);
                let width = usize::from(cur.u8()?);
                cur.skip(ndims * width)?;
                let index = cur.u8()?;
                ensure!(index == 1, "chunk index type {index} is not supported");
                let filtered_size = if flags & 0x02 != 0 {
                    let size = cur.u64()?;
                    let mask = cur.u32()?;
                    ensure!(mask == 0, "partially filtered chunks are not supported");
                    Some(size)
                } else {
                    None
                };
                Ok(Layout::SingleChunk {
                    address: cur.u64()?,
                    filtered_size,
                })
            }
            2 => bail!("B-tree indexed chunked datasets are not supported"),
            class => bail!("unsupported data layout class {class}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub id: u16,
    pub params: Vec<u32>,
}

pub fn deflate_pipeline(level: u32) -> Message {
    let mut body = vec![2, 1];
    body.extend_from_slice(&FILTER_DEFLATE.to_le_bytes());
    // Optional filter with one parameter.
    body.extend_from_slice(&1u16.to_le_bytes());
    body.extend_from_slice(&1u16.to_le_bytes());
    body.extend_from_slice(&level.to_le_bytes());
    Message::constant(MSG_FILTER_PIPELINE, body)
}

pub fn parse_pipeline(body: &[u8]) -> Result<Vec<Filter>> {
    let mut cur = Cursor::new(body);
    let version = cur.u8()?;
    let count = cur.u8()?;
    match version {
        1 => cur.skip(6)?,
        2 => {}
        _ => bail!("unsupported filter pipeline version {version}"),
    }
    let mut filters = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let id = cur.u16()?;
        let name_len = if version == 1 || id >= 256 {
            usize::from(cur.u16()?)
        } else {
            0
        };
        cur.skip(2)?;
        let nparams = usize::from(cur.u16()?);
        let name_len = if version == 1 { pad8(name_len) } else { name_len };
        cur.skip(name_len)?;
        let params = (0..nparams).map(|_| cur.u32()).collect::<Result<Vec<_>>>()?;
        if version == 1 && nparams % 2 == 1 {
            cur.skip(4)?;
        }
        filters.push(Filter { id, params });
    }
    Ok(filters)
}

// ---------------------------------------------------------------------------
// Global heap
// ---------------------------------------------------------------------------

const HEAP_MIN_SIZE: usize = 4096;

/// A global heap collection holding `objects` as objects 1..=n.
pub fn encode_global_heap(objects: &[Vec<u8>]) -> Result<Vec<u8>> {
    ensure!(objects.len() < usize::from(u16::MAX), "too many heap objects");
    let used = 16 + objects.iter().map(|o| 16 + pad8(o.len())).sum::<usize>();
    let total = used.max(HEAP_MIN_SIZE);

    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(b"GCOL");
    buf.extend_from_slice(&[1, 0, 0, 0]);
    buf.extend_from_slice(&(total as u64).to_le_bytes());
    for (i, object) in objects.iter().enumerate() {
        buf.extend_from_slice(&(i as u16 + 1).to_le_bytes());
        buf.extend_from_slice(&[0; 6]);
        buf.extend_from_slice(&(object.len() as u64).to_le_bytes());
        buf.extend_from_slice(object);
        buf.resize(buf.len() + pad8(object.len()) - object.len(), 0);
    }
    // Free space is heap object 0 and its size counts its own header.
    if total - used >= 16 {
        buf.extend_from_slice(&[0; 8]);
        buf.extend_from_slice(&((total - used) as u64).to_le_bytes());
    }
    buf.resize(total, 0);
    Ok(buf)
}

/// Bytes of object `index` in the collection at `address`.
pub fn global_heap_object(file: &[u8], address: u64, index: u32) -> Result<&[u8]> {
    let start = to_usize(address)?;
    let mut cur = Cursor::at(file, start);
    ensure!(cur.bytes(4)? == b"GCOL", "no global heap collection at {address:#x}");
    cur.skip(4)?;
    let end = start + to_usize(cur.u64()?)?;
    while cur.pos() + 16 <= end {
        let id = cur.u16()?;
        cur.skip(6)?;
        let size = to_usize(cur.u64()?)?;
        if id == 0 {
            break;
        }
        let data = cur.bytes(size)?;
        if u32::from(id) == index {
            return Ok(data);
        }
        cur.skip(pad8(size) - size)?;
    }
    bail!("global heap object {index} not found at {address:#x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datatypes_parse_back() {
        let types = [
            Datatype::Integer { size: 2, signed: false },
            Datatype::Integer { size: 8, signed: true },
            Datatype::Float { size: 4 },
            Datatype::Float { size: 8 },
            Datatype::String {
                size: 7,
                utf8: true,
                space_padded: false,
            },
            Datatype::Bool,
            Datatype::Sequence(Box::new(Datatype::Reference)),
        ];
        for dt in types {
            assert_eq!(Datatype::parse(&dt.encode()).unwrap(), dt);
        }
    }

    #[test]
    fn object_header_survives_checksum_and_detects_damage() {
        let messages = vec![
            link_info_message(),
            group_info_message(),
            link_message("flux", 0x1234),
        ];
        let mut file = encode_object_header(&messages).unwrap();
        assert_eq!(parse_object_header(&file, 0).unwrap(), messages);

        file[10] ^= 0xff;
        let err = parse_object_header(&file, 0).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn long_link_names_use_wider_length_fields() {
        let name = "n".repeat(300);
        let msg = link_message(&name, 99);
        assert_eq!(parse_link(&msg.body).unwrap(), Some((name, 99)));
        let msg = link_message("λ", 7);
        assert_eq!(parse_link(&msg.body).unwrap(), Some(("λ".to_string(), 7)));
    }

    #[test]
    fn superblock_points_at_root() {
        let sb = encode_superblock(48, 1024);
        assert_eq!(sb.len(), SUPERBLOCK_SIZE);
        assert_eq!(&sb[..8], &SIGNATURE);
        assert_eq!(parse_superblock(&sb).unwrap(), 48);
    }

    #[test]
    fn heap_objects_are_found_by_index() {
        let heap = encode_global_heap(&[vec![1, 2, 3], 42u64.to_le_bytes().to_vec()]).unwrap();
        assert_eq!(heap.len(), HEAP_MIN_SIZE);
        assert_eq!(global_heap_object(&heap, 0, 1).unwrap(), &[1, 2, 3]);
        assert_eq!(global_heap_object(&heap, 0, 2).unwrap(), &42u64.to_le_bytes());
        assert!(global_heap_object(&heap, 0, 3).is_err());
    }

    #[test]
    fn layouts_parse_back() {
        let msg = Layout::single_chunk(&[3, 400], 8, 4096, 77);
        assert_eq!(
            Layout::parse(&msg.body).unwrap(),
            Layout::SingleChunk {
                address: 4096,
                filtered_size: Some(77)
            }
        );
        let msg = Layout::contiguous(UNDEFINED, 0);
        assert_eq!(
            Layout::parse(&msg.body).unwrap(),
            Layout::Contiguous {
                address: UNDEFINED,
                size: 0
            }
        );
        let filters = parse_pipeline(&deflate_pipeline(6).body).unwrap();
        assert_eq!(filters, [Filter { id: FILTER_DEFLATE, params: vec![6] }]);
    }
}
