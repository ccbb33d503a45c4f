//! Signal directory
//!
//! Written once, when the first value is emitted: counts, then the
//! prefix-compressed name list and the geometry table, each in its own
//! level-9 gzip member with sizes patched in afterwards.

use crate::config::TraceConfig;
use crate::format::{SignalFlags, DIRECTORY_COMPRESSION, MAX_SHARED_PREFIX};
use crate::output::{span, Output};
use crate::table::SignalTable;

/// Byte count shared by the front of `prev` and `name`, capped at 65535
pub fn shared_prefix(prev: &[u8], name: &[u8]) -> usize {
    prev.iter()
        .zip(name)
        .take(MAX_SHARED_PREFIX)
        .take_while(|(a, b)| a == b)
        .count()
}

/// Write the directory of a frozen table; returns the offset just past
/// it, which is also the length of the header copied into break files.
///
/// The offset is `None` when the stream failed while the directory was
/// written; the size fields are then left as zeros.
pub(crate) fn write_directory(
    out: &mut Output,
    table: &SignalTable,
    config: &TraceConfig,
) -> Option<u64> {
    let numfacs = table.len() as u32;

    if config.timezero == 0 {
        out.put_u32(numfacs);
    } else {
        out.put_u32(0);
        out.put_u32(8);
        out.put_u32(numfacs);
        out.put_u64(config.timezero as u64);
    }
    out.put_u32(table.name_bytes() as u32);
    out.put_u32(table.longest_name());

    let sizes_offset = out.seek_end();
    out.put_u32(0);
    out.put_u32(0);
    out.put_u32(0);
    out.put_u8(config.timescale as u8);

    let names_start = out.seek_end();
    out.begin_member(DIRECTORY_COMPRESSION);
    let mut prev: &[u8] = &[];
    for &id in table.order() {
        let name = table.directory_name(id, config.strip_brackets).as_bytes();
        let shared = shared_prefix(prev, name);
        out.zput_u16(shared as u16);
        out.zput_cstr(&name[shared..]);
        prev = name;
    }
    out.end_member();
    let names_uncompressed = out.zcount();
    let geometry_start = out.seek_end();
    let names_compressed = span(names_start, 0, geometry_start);

    out.begin_member(DIRECTORY_COMPRESSION);
    for &id in table.order() {
        let Some(signal) = table.get(id) else {
            continue;
        };
        match signal.alias_of() {
            None => {
                out.zput_u32(signal.rows());
                out.zput_u32(signal.msb() as u32);
                out.zput_u32(signal.lsb() as u32);
                out.zput_u32(signal.flags().bits());
            }
            Some(root) => {
                let root_facnum = table.get(root).and_then(|s| s.facnum()).unwrap_or(0);
                out.zput_u32(root_facnum);
                out.zput_u32(signal.msb() as u32);
                out.zput_u32(signal.lsb() as u32);
                out.zput_u32(SignalFlags::ALIAS.bits());
            }
        }
    }
    out.end_member();
    let header_end = out.seek_end();
    let geometry_compressed = span(geometry_start, 0, header_end);

    match (sizes_offset, names_compressed, geometry_compressed) {
        (Some(offset), Some(names), Some(geometry)) => out.backpatch(offset, |out| {
            out.put_u32(names as u32);
            out.put_u32(names_uncompressed as u32);
            out.put_u32(geometry as u32);
        }),
        _ => tracing::warn!("directory offsets lost to a write failure; sizes left unpatched"),
    }

    tracing::debug!(
        signals = numfacs,
        aliases = table.alias_count(),
        names_compressed,
        geometry_compressed,
        "directory written"
    );
    header_end
}
