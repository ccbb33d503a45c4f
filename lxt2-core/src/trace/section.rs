//! Granule blocks, section trailers and break files

use crate::format::{
    index_width, BlockTag, CONTROL_BLOCK_MARKER, DICT_START, SECTION_HEADER_LEN, SUBRANGE_HEADER_LEN,
};
use crate::output::span;
use crate::signal::SignalId;

use super::Trace;

/// How the roots of one granule are split up
#[derive(Debug, Clone, Copy)]
struct Layout {
    /// Roots per granule block
    range: usize,
    partial: bool,
    /// Each block and the trailer get their own gzip member
    zip: bool,
}

impl Trace {
    fn layout(&self) -> Layout {
        let roots = self.table.roots().len();
        match self.config.partial {
            Some(mode) if roots > mode.size.max(1) as usize => Layout {
                range: mode.size.max(1) as usize,
                partial: true,
                zip: mode.zip,
            },
            _ => Layout {
                range: roots.max(1),
                partial: false,
                zip: false,
            },
        }
    }

    /// Write the open granule; close the section when it is full, when
    /// `finalize` is set, or once the part has grown past the break size.
    pub(crate) fn flush_granule(&mut self, finalize: bool) {
        if self.clock.flush_valid {
            if self.clock.flushtime == self.clock.lasttime {
                return;
            }
            self.clock.flush_valid = false;
        }
        self.clock.granule_dirty = false;
        self.ensure_frozen();

        let layout = self.layout();
        if self.clock.timegranule == 0 {
            self.open_section(layout);
        }

        let roots = self.table.roots().to_vec();
        for (chunk, range) in roots.chunks(layout.range).enumerate() {
            let lo = self
                .facnum_of(range[0])
                .unwrap_or((chunk * layout.range) as u32);
            self.write_granule_block(range, lo, layout);
        }

        self.clock.timepos = 0;
        self.clock.timegranule += 1;
        self.stats.granules_flushed += 1;

        let early_flush =
            self.config.break_size > 0 && self.out.position() >= self.config.break_size;
        if self.clock.timegranule >= self.config.granule_limit() || finalize || early_flush {
            self.close_section(layout);
        }

        if finalize {
            self.clock.flush_valid = true;
            self.clock.flushtime = self.clock.lasttime;
        }
    }

    fn facnum_of(&self, id: SignalId) -> Option<u32> {
        self.table.get(id).and_then(|signal| signal.facnum())
    }

    fn open_section(&mut self, layout: Layout) {
        let mut position = self.out.seek_end();
        let break_size = self.config.break_size;
        if let Some(offset) = position {
            if break_size > 0 && offset >= break_size && position != self.break_header_size {
                self.break_file();
                position = self.out.seek_end();
            }
        }

        self.section_start = position;
        self.out.put_u32(0);
        self.out.put_u32(0);
        self.out.put_u64(0);
        self.out.put_u64(0);

        if layout.zip {
            self.zcount_cumulative = 0;
        } else {
            self.out.begin_member(self.config.compression_depth);
        }
    }

    fn write_granule_block(&mut self, range: &[SignalId], lo: u32, layout: Layout) {
        let mut map_indices = Vec::with_capacity(range.len());
        for &root in range {
            let msk = self
                .table
                .get(root)
                .and_then(|signal| signal.channel())
                .map_or(0, |channel| channel.msk);
            let (idx, _) = self.maps.intern(&msk);
            map_indices.push(idx);
        }

        let map_nbytes = index_width(self.maps.len() as u64);
        let idx_nbytes = index_width(self.strings.len() as u64 + u64::from(DICT_START));
        let timepos = self.clock.timepos;

        let mut subrange_start = None;
        if layout.partial {
            let changes: usize = range
                .iter()
                .filter_map(|&root| self.table.get(root).and_then(|signal| signal.channel()))
                .map(|channel| channel.codes.len())
                .sum();
            let partial_length = 1
                + 8 * timepos
                + 1
                + range.len() * usize::from(map_nbytes)
                + 1
                + changes * usize::from(idx_nbytes);
            // The length field is 32 bits wide; a block this large cannot
            // be described, so readers see a saturated length instead.
            let partial_length = u32::try_from(partial_length).unwrap_or_else(|_| {
                tracing::warn!(lo, partial_length, "partial block too large for its length field");
                u32::MAX - 9
            });

            if layout.zip {
                subrange_start = self.out.seek_end();
                self.out.put_u32(0);
                self.out.put_u32(partial_length + 9);
                self.out.put_u32(lo);
                self.out.begin_member(self.config.compression_depth);
            }

            self.out.zput_u8(BlockTag::TimePartial as u8);
            self.out.zput_u32(lo);
            self.out.zput_u32(partial_length);
        } else {
            self.out.zput_u8(BlockTag::Time as u8);
        }

        self.out.zput_u8(timepos as u8);
        for &time in &self.clock.timetable[..timepos] {
            self.out.zput_u64(time);
        }
        self.out.sync_flush();

        self.out.zput_u8(map_nbytes);
        for &idx in &map_indices {
            self.out.zput_be(idx, map_nbytes);
        }

        self.out.zput_u8(idx_nbytes);
        self.out.sync_flush();
        for &root in range {
            let signal = self.table.signal_mut(root);
            let Some(channel) = signal.channel_mut() else {
                continue;
            };
            let codes = std::mem::take(&mut channel.codes);
            channel.reset_granule();
            for code in codes {
                self.out.zput_be(code, idx_nbytes);
            }
        }

        if layout.zip {
            self.out.end_member();
            self.zcount_cumulative += self.out.zcount();
            let end = self.out.seek_end();
            match (subrange_start, span(subrange_start, SUBRANGE_HEADER_LEN, end)) {
                (Some(start), Some(compressed)) => {
                    self.out.backpatch(start, |out| out.put_u32(compressed as u32));
                }
                _ => self.skip_backpatch("sub-range"),
            }
        } else {
            self.out.sync_flush();
        }
    }

    fn close_section(&mut self, layout: Layout) {
        let mut control_start = None;
        if layout.zip {
            control_start = self.out.seek_end();
            self.out.put_u32(0);
            self.out.put_u32(0);
            self.out.put_u32(CONTROL_BLOCK_MARKER);
            self.out.begin_member(self.config.compression_depth);
        }

        self.out.zput_u8(BlockTag::Dict as u8);

        let string_bytes = self.strings.byte_size();
        let strings = self.strings.drain();
        self.out.sync_flush();
        for entry in &strings {
            self.out.zput_cstr(entry);
        }

        let maps = self.maps.drain();
        self.out.sync_flush();
        for &msk in &maps {
            self.out.zput_u64(msk);
        }

        self.out.zput_u32(strings.len() as u32);
        self.out.zput_u32(string_bytes as u32);
        self.out.zput_u32(maps.len() as u32);

        self.out.end_member();
        let uncompressed = if layout.zip {
            let control_len = self.out.zcount();
            self.zcount_cumulative += control_len;
            let end = self.out.seek_end();
            match (control_start, span(control_start, SUBRANGE_HEADER_LEN, end)) {
                (Some(start), Some(compressed)) => self.out.backpatch(start, |out| {
                    out.put_u32(compressed as u32);
                    out.put_u32(control_len as u32);
                }),
                _ => self.skip_backpatch("control block"),
            }
            self.zcount_cumulative
        } else {
            self.out.zcount()
        };

        let end = self.out.seek_end();
        let compressed = span(self.section_start, SECTION_HEADER_LEN, end);
        let (firsttime, lasttime) = (self.clock.firsttime, self.clock.lasttime);
        match (self.section_start, compressed) {
            (Some(start), Some(compressed)) => self.out.backpatch(start, |out| {
                out.put_u32(uncompressed as u32);
                out.put_u32(compressed as u32);
                out.put_u64(firsttime);
                out.put_u64(lasttime);
            }),
            _ => self.skip_backpatch("section header"),
        }

        self.clock.timegranule = 0;
        self.stats.sections_closed += 1;
        self.stats.dictionary_entries += strings.len() as u64;
        self.stats.map_entries += maps.len() as u64;

        tracing::debug!(
            section = self.stats.sections_closed,
            firsttime,
            lasttime,
            uncompressed,
            compressed,
            dictionary = strings.len(),
            maps = maps.len(),
            "section closed"
        );
    }

    /// A size field whose offsets were lost to a write failure stays zero
    fn skip_backpatch(&mut self, field: &'static str) {
        self.stats.unpatched_fields += 1;
        tracing::warn!(field, "offset unknown after a write failure; size left unpatched");
    }

    /// Continue the trace in the next numbered part.
    ///
    /// The part starts with a copy of the primary header and directory.
    /// On failure the trace keeps writing to the current part.
    fn break_file(&mut self) {
        self.break_number += 1;
        let part = self.break_number;

        let Some(header_size) = self.break_header_size else {
            tracing::warn!(part, "header length unknown; continuing in current part");
            return;
        };
        let header = match self.storage.read_header(header_size) {
            Ok(header) => header,
            Err(err) => {
                tracing::warn!(error = %err, part, "cannot read header for break file");
                return;
            }
        };
        let stream = match self.storage.create(part) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    part = %self.storage.part_name(part),
                    "cannot create break file; continuing in current part"
                );
                return;
            }
        };

        self.out.replace_stream(stream);
        self.out.put(&header);
        self.stats.file_parts += 1;
        tracing::info!(part = %self.storage.part_name(part), "trace continued in break file");
    }
}
