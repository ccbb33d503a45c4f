//! Vertical partial layout and break file tests

mod common;

use std::io;

use lxt2_core::storage::{FileStorage, MemoryStorage, StorageBackend, TraceStream};
use lxt2_core::{Lxt2Error, PartialMode, Result, SignalFlags, SignalId, Trace, TraceConfig};

fn partial_config(zip: bool, size: u32) -> TraceConfig {
    TraceConfig {
        partial: Some(PartialMode { zip, size }),
        ..TraceConfig::default()
    }
}

fn bits8(time: u64) -> Vec<u8> {
    format!("{:08b}", time & 0xff).into_bytes()
}

/// Five one-bit roots; a and e toggle at time 1
fn five_wires(storage: &MemoryStorage, config: TraceConfig) {
    let mut trace = Trace::with_storage(storage.clone(), config).unwrap();
    let ids: Vec<SignalId> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|name| trace.add(name, 0, 0, 0, SignalFlags::BITS).unwrap())
        .collect();

    trace.set_time(0).unwrap();
    for &id in &ids {
        trace.emit_bits(id, "0");
    }
    trace.set_time(1).unwrap();
    trace.emit_bits(ids[0], "1");
    trace.emit_bits(ids[4], "1");
    trace.close().unwrap();
}

/// A counter on one eight-bit signal for `0..end`
fn counter(trace: &mut Trace, end: u64) {
    let a = trace.add("a", 0, 7, 0, SignalFlags::BITS).unwrap();
    for t in 0..end {
        trace.set_time64(t).unwrap();
        trace.emit_int(a, t as i32);
    }
}

fn assert_counter_section(section: &common::Section) {
    let values = section.replay(0, b"????????");
    assert!(!values.is_empty());
    for (time, value) in values {
        assert_eq!(value, bits8(time), "value at time {}", time);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Partial layout
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_partial_blocks_cover_sub_ranges() {
    let storage = MemoryStorage::new();
    five_wires(&storage, partial_config(false, 2));

    let file = common::parse(&storage.primary(), Some(2));
    assert_eq!(file.sections.len(), 1);
    let section = &file.sections[0];
    assert!(!section.control_block);
    assert_eq!(section.uncompressed as usize, section.plain_len);

    let ranges: Vec<(u32, usize)> = section.granules.iter().map(|g| (g.lo, g.count)).collect();
    assert_eq!(ranges, vec![(0, 2), (2, 2), (4, 1)]);
    assert!(section.granules.iter().all(|g| g.partial_length.is_some()));
    assert!(section.granules.iter().all(|g| g.times == vec![0, 1]));

    assert_eq!(
        section.replay(4, b"x"),
        vec![(0, b"0".to_vec()), (1, b"1".to_vec())]
    );
    assert_eq!(section.replay(2, b"x"), vec![(0, b"0".to_vec())]);
}

#[test]
fn test_partial_zip_gives_each_range_a_member() {
    let storage = MemoryStorage::new();
    five_wires(&storage, partial_config(true, 2));

    let file = common::parse(&storage.primary(), Some(2));
    let section = &file.sections[0];
    assert!(section.control_block);
    assert_eq!(section.granules.len(), 3);

    for granule in &section.granules {
        let (_, ulen) = granule.subrange.unwrap();
        assert_eq!(ulen, granule.partial_length.unwrap() + 9);
    }
    // cumulative over every member, the control block included
    assert_eq!(section.uncompressed as usize, section.plain_len);

    assert_eq!(
        section.replay(0, b"x"),
        vec![(0, b"0".to_vec()), (1, b"1".to_vec())]
    );
}

#[test]
fn test_partial_needs_more_roots_than_range() {
    let storage = MemoryStorage::new();
    five_wires(&storage, partial_config(true, 8));

    // five roots fit one range, so the plain layout is used
    let file = common::parse(&storage.primary(), None);
    let section = &file.sections[0];
    assert!(!section.control_block);
    assert_eq!(section.granules[0].partial_length, None);
}

#[test]
fn test_partial_zip_across_sections() {
    let storage = MemoryStorage::new();
    let mut config = partial_config(true, 1);
    config.max_granule = 1;
    let mut trace = Trace::with_storage(storage.clone(), config).unwrap();
    trace.add("z", 0, 0, 0, SignalFlags::BITS).unwrap();
    counter(&mut trace, 130);
    trace.close().unwrap();

    let file = common::parse(&storage.primary(), Some(1));
    assert_eq!(file.sections.len(), 3);
    for section in &file.sections {
        assert!(section.control_block);
        assert_eq!(section.uncompressed as usize, section.plain_len);
        assert_counter_section(section);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Break files
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_break_parts_start_with_primary_header() {
    let storage = MemoryStorage::new();
    let config = TraceConfig::default().with_break_size(1);
    let mut trace = Trace::with_storage(storage.clone(), config).unwrap();
    counter(&mut trace, 200);
    let stats = trace.close().unwrap();

    assert_eq!(stats.file_parts, 4);
    assert_eq!(storage.part_count(), 4);

    let primary = storage.primary();
    let header_len = common::parse(&primary, None)
        .directory
        .unwrap()
        .header_len;

    let mut first_times = Vec::new();
    for part in 0..4 {
        let bytes = storage.part(part).unwrap();
        assert_eq!(&bytes[..header_len], &primary[..header_len]);

        let file = common::parse(&bytes, None);
        assert_eq!(file.sections.len(), 1);
        first_times.push(file.sections[0].first_time);
        assert_counter_section(&file.sections[0]);
    }
    assert_eq!(first_times, vec![0, 64, 128, 192]);
}

#[test]
fn test_break_files_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.lx2");
    let config = TraceConfig::default().with_break_size(1);

    let mut trace = Trace::create_with_config(&path, config).unwrap();
    counter(&mut trace, 130);
    trace.close().unwrap();

    let storage = FileStorage::new(&path);
    assert_eq!(storage.part_path(1), dir.path().join("run_001.lxt"));
    assert!(dir.path().join("run_001.lxt").exists());
    assert!(dir.path().join("run_002.lxt").exists());
    assert!(!dir.path().join("run_003.lxt").exists());

    let primary = std::fs::read(&path).unwrap();
    let second = std::fs::read(dir.path().join("run_002.lxt")).unwrap();
    let header_len = common::parse(&primary, None).directory.unwrap().header_len;
    assert_eq!(&second[..header_len], &primary[..header_len]);

    let file = common::parse(&second, None);
    assert_eq!(file.sections[0].first_time, 128);
    assert_counter_section(&file.sections[0]);
}

/// Memory storage that refuses every part after the primary
#[derive(Clone, Default)]
struct NoBreakStorage {
    inner: MemoryStorage,
}

impl StorageBackend for NoBreakStorage {
    fn create(&self, part: u32) -> Result<Box<dyn TraceStream>> {
        if part > 0 {
            return Err(Lxt2Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "read-only volume",
            )));
        }
        self.inner.create(part)
    }

    fn read_header(&self, len: u64) -> Result<Vec<u8>> {
        self.inner.read_header(len)
    }

    fn part_name(&self, part: u32) -> String {
        self.inner.part_name(part)
    }

    fn name(&self) -> &'static str {
        "no-break"
    }
}

#[test]
fn test_failed_break_keeps_writing_current_part() {
    let storage = NoBreakStorage::default();
    let config = TraceConfig::default().with_break_size(1);
    let mut trace = Trace::with_storage(storage.clone(), config).unwrap();
    counter(&mut trace, 200);
    let stats = trace.close().unwrap();

    assert_eq!(stats.file_parts, 1);
    assert_eq!(stats.io_errors, 0);

    let file = common::parse(&storage.inner.primary(), None);
    assert_eq!(file.sections.len(), 4);
    for section in &file.sections {
        assert_counter_section(section);
    }
}
