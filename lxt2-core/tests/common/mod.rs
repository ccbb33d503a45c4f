//! Structural reader for LXT2 files written by the tests
//!
//! Walks the header, the directory and every section, decoding each gzip
//! member with `flate2`. Malformed input panics, which fails the test.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Read;

use flate2::read::GzDecoder;

use lxt2_core::delta;
use lxt2_core::format::{Encoding, DICT_START};

pub const ALIAS_FLAG: u32 = 0x8;

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> &'a [u8] {
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        slice
    }

    fn u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_be_bytes(self.take(2).try_into().unwrap())
    }

    fn u32(&mut self) -> u32 {
        u32::from_be_bytes(self.take(4).try_into().unwrap())
    }

    fn u64(&mut self) -> u64 {
        u64::from_be_bytes(self.take(8).try_into().unwrap())
    }

    /// Big-endian unsigned of `width` bytes
    fn be(&mut self, width: u8) -> u32 {
        self.take(width as usize)
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
    }

    fn cstr(&mut self) -> &'a [u8] {
        let rest = &self.bytes[self.pos..];
        let end = rest.iter().position(|&b| b == 0).unwrap();
        self.pos += end + 1;
        &rest[..end]
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

pub fn gunzip(member: &[u8]) -> Vec<u8> {
    let mut plain = Vec::new();
    GzDecoder::new(member).read_to_end(&mut plain).unwrap();
    plain
}

#[derive(Debug, Clone)]
pub struct Directory {
    pub numfacs: u32,
    pub timezero: Option<u64>,
    pub numfacbytes: u32,
    pub longestname: u32,
    pub timescale: i8,
    pub names: Vec<String>,
    /// rows (or root facnum), msb, lsb, flags
    pub geometry: Vec<[u32; 4]>,
    /// Offset just past the geometry member
    pub header_len: usize,
}

impl Directory {
    pub fn roots(&self) -> usize {
        self.geometry.iter().filter(|g| g[3] & ALIAS_FLAG == 0).count()
    }

    pub fn facnum(&self, name: &str) -> Option<u32> {
        self.names.iter().position(|n| n == name).map(|i| i as u32)
    }
}

#[derive(Debug, Clone)]
pub struct Granule {
    /// First facnum covered
    pub lo: u32,
    /// Signals covered
    pub count: usize,
    pub times: Vec<u64>,
    pub map_nbytes: u8,
    pub idx_nbytes: u8,
    pub partial_length: Option<u32>,
    /// Raw sub-range header (compressed, uncompressed) in partial-zip mode
    pub subrange: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Default)]
pub struct Section {
    pub offset: usize,
    pub uncompressed: u32,
    pub compressed: u32,
    pub first_time: u64,
    pub last_time: u64,
    pub granules: Vec<Granule>,
    pub strings: Vec<Vec<u8>>,
    pub dict_bytes: u32,
    pub maps: Vec<u64>,
    /// Trailer written as its own control block
    pub control_block: bool,
    /// Sum of the decompressed lengths actually found
    pub plain_len: usize,
    /// (time, code) per facnum
    pub changes: BTreeMap<u32, Vec<(u64, u32)>>,
}

impl Section {
    /// Values of `facnum` across the section, starting from `initial`
    pub fn replay(&self, facnum: u32, initial: &[u8]) -> Vec<(u64, Vec<u8>)> {
        let width = initial.len();
        let mut value = initial.to_vec();
        let mut out = Vec::new();
        for &(time, code) in self.changes.get(&facnum).into_iter().flatten() {
            if code == Encoding::Blackout.code() {
                out.push((time, b"<blackout>".to_vec()));
                continue;
            }
            value = self.decode(code, &value, width);
            out.push((time, value.clone()));
        }
        out
    }

    pub fn decode(&self, code: u32, previous: &[u8], width: usize) -> Vec<u8> {
        if code >= DICT_START {
            let entry = &self.strings[(code - DICT_START) as usize];
            if width == 0 {
                entry.clone()
            } else {
                delta::justify(entry, width)
            }
        } else {
            let encoding = Encoding::from_code(code).unwrap();
            delta::reconstruct(previous, encoding).unwrap()
        }
    }

    pub fn codes(&self, facnum: u32) -> Vec<u32> {
        self.changes
            .get(&facnum)
            .map(|c| c.iter().map(|&(_, code)| code).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct TraceFile {
    pub header: [u8; 5],
    pub directory: Option<Directory>,
    pub sections: Vec<Section>,
}

/// Parse a part; `partial_size` must match the writer's partial setting
pub fn parse(bytes: &[u8], partial_size: Option<usize>) -> TraceFile {
    let mut cur = Cursor::new(bytes);
    let header: [u8; 5] = cur.take(5).try_into().unwrap();
    if cur.remaining() == 0 {
        return TraceFile {
            header,
            directory: None,
            sections: Vec::new(),
        };
    }

    let directory = parse_directory(&mut cur);
    let roots = directory.roots();

    let mut sections = Vec::new();
    while cur.remaining() >= 24 {
        sections.push(parse_section(&mut cur, roots, partial_size));
    }
    assert_eq!(cur.remaining(), 0, "trailing bytes after last section");

    TraceFile {
        header,
        directory: Some(directory),
        sections,
    }
}

fn parse_directory(cur: &mut Cursor<'_>) -> Directory {
    let mut numfacs = cur.u32();
    let mut timezero = None;
    if numfacs == 0 {
        assert_eq!(cur.u32(), 8);
        numfacs = cur.u32();
        timezero = Some(cur.u64());
    }
    let numfacbytes = cur.u32();
    let longestname = cur.u32();
    let names_compressed = cur.u32() as usize;
    let names_uncompressed = cur.u32() as usize;
    let geometry_compressed = cur.u32() as usize;
    let timescale = cur.u8() as i8;

    let names_plain = gunzip(cur.take(names_compressed));
    assert_eq!(names_plain.len(), names_uncompressed);
    let mut names = Vec::new();
    let mut prev: Vec<u8> = Vec::new();
    let mut nc = Cursor::new(&names_plain);
    for _ in 0..numfacs {
        let shared = nc.u16() as usize;
        let mut name = prev[..shared].to_vec();
        name.extend_from_slice(nc.cstr());
        names.push(String::from_utf8(name.clone()).unwrap());
        prev = name;
    }

    let geometry_plain = gunzip(cur.take(geometry_compressed));
    assert_eq!(geometry_plain.len(), numfacs as usize * 16);
    let mut gc = Cursor::new(&geometry_plain);
    let geometry = (0..numfacs)
        .map(|_| [gc.u32(), gc.u32(), gc.u32(), gc.u32()])
        .collect();

    Directory {
        numfacs,
        timezero,
        numfacbytes,
        longestname,
        timescale,
        names,
        geometry,
        header_len: cur.pos,
    }
}

/// Block bytes waiting for the trailer's map dictionary
struct PendingBlock {
    plain: Vec<u8>,
    subrange: Option<(u32, u32)>,
}

fn parse_section(cur: &mut Cursor<'_>, roots: usize, partial_size: Option<usize>) -> Section {
    let offset = cur.pos;
    let mut section = Section {
        offset,
        uncompressed: cur.u32(),
        compressed: cur.u32(),
        first_time: cur.u64(),
        last_time: cur.u64(),
        ..Section::default()
    };
    let body = cur.take(section.compressed as usize);

    let mut blocks: Vec<PendingBlock> = Vec::new();
    let trailer: Vec<u8>;
    if body.starts_with(&[0x1f, 0x8b]) {
        let plain = gunzip(body);
        section.plain_len = plain.len();
        let start = trailer_start(&plain);
        trailer = plain[start..].to_vec();
        blocks.push(PendingBlock {
            plain: plain[..start].to_vec(),
            subrange: None,
        });
    } else {
        let mut bc = Cursor::new(body);
        let mut control = None;
        while bc.remaining() > 0 {
            let clen = bc.u32();
            let ulen = bc.u32();
            let marker = bc.u32();
            let plain = gunzip(bc.take(clen as usize));
            section.plain_len += plain.len();
            if marker == u32::MAX {
                assert_eq!(plain.len() as u32, ulen);
                control = Some(plain);
            } else {
                assert_eq!(plain.len() as u32, ulen);
                blocks.push(PendingBlock {
                    plain,
                    subrange: Some((clen, ulen)),
                });
            }
        }
        section.control_block = true;
        trailer = control.expect("section without control block");
    }

    parse_trailer(&trailer, &mut section);
    for block in blocks {
        let mut bc = Cursor::new(&block.plain);
        while bc.remaining() > 0 {
            parse_block(&mut bc, &mut section, roots, partial_size, block.subrange);
        }
    }
    section
}

/// Offset of the dictionary trailer, found from the counts at the end
fn trailer_start(plain: &[u8]) -> usize {
    let n = plain.len();
    let mut tail = Cursor::new(&plain[n - 12..]);
    let _num_dict = tail.u32();
    let dict_bytes = tail.u32() as usize;
    let num_map = tail.u32() as usize;
    let start = n - 12 - num_map * 8 - dict_bytes - 1;
    assert_eq!(plain[start], 1, "dictionary tag");
    start
}

fn parse_trailer(trailer: &[u8], section: &mut Section) {
    let n = trailer.len();
    let mut tail = Cursor::new(&trailer[n - 12..]);
    let num_dict = tail.u32() as usize;
    section.dict_bytes = tail.u32();
    let num_map = tail.u32() as usize;

    let mut tc = Cursor::new(&trailer[..n - 12]);
    assert_eq!(tc.u8(), 1);
    for _ in 0..num_dict {
        section.strings.push(tc.cstr().to_vec());
    }
    assert_eq!(tc.pos - 1, section.dict_bytes as usize);
    for _ in 0..num_map {
        section.maps.push(tc.u64());
    }
    assert_eq!(tc.remaining(), 0);
}

fn parse_block(
    bc: &mut Cursor<'_>,
    section: &mut Section,
    roots: usize,
    partial_size: Option<usize>,
    subrange: Option<(u32, u32)>,
) {
    let block_start = bc.pos;
    let tag = bc.u8();
    let (lo, count, partial_length) = match tag {
        0 => (0u32, roots, None),
        2 => {
            let lo = bc.u32();
            let partial_length = bc.u32();
            let size = partial_size.expect("partial block in non-partial parse");
            let count = size.min(roots - lo as usize);
            (lo, count, Some(partial_length))
        }
        other => panic!("unexpected block tag {}", other),
    };

    let timepos = bc.u8() as usize;
    let times: Vec<u64> = (0..timepos).map(|_| bc.u64()).collect();
    let map_nbytes = bc.u8();
    let map_indices: Vec<u32> = (0..count).map(|_| bc.be(map_nbytes)).collect();
    let idx_nbytes = bc.u8();

    for (offset, &idx) in map_indices.iter().enumerate() {
        let msk = section.maps[idx as usize];
        let facnum = lo + offset as u32;
        for slot in 0..64 {
            if msk & (1u64 << slot) != 0 {
                let code = bc.be(idx_nbytes);
                section
                    .changes
                    .entry(facnum)
                    .or_default()
                    .push((times[slot], code));
            }
        }
    }

    if let Some(partial_length) = partial_length {
        assert_eq!((bc.pos - block_start - 9) as u32, partial_length);
    }
    section.granules.push(Granule {
        lo,
        count,
        times,
        map_nbytes,
        idx_nbytes,
        partial_length,
        subrange,
    });
}
