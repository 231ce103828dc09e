/// End-to-end document tests.
///
/// These open real temporary files as documents and let the real aerial and
/// statistics workers scan them through their own private handles, checking
/// the results the foreground sees: published histograms, finished flags,
/// bitmap pixels and completion notices. Edits, data files, option changes
/// and missing files are exercised the same way.
use hexscan_core::aerial::CLEAR_BYTE;
use hexscan_core::colour::{ColourTable, Rgb};
use hexscan_core::platform::{DriveType, FileClass};
use hexscan_core::stats::ByteHistogram;
use hexscan_core::{DocNotice, Document, ScanError, ScanOptions};
use std::io::Write;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn temp_file(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

/// Options that allow statistics wherever the temp directory lives.
fn options() -> ScanOptions {
    ScanOptions {
        exclude_removable: false,
        exclude_network: false,
        exclude_optical: false,
        exclude_device: false,
        lower_worker_priority: false,
        stats_chunk: 1024,
        aerial_chunk: 4096,
        ..ScanOptions::default()
    }
}

fn without_stats() -> ScanOptions {
    ScanOptions {
        bg_stats: false,
        ..options()
    }
}

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 7) % 256) as u8).collect()
}

/// Poll `cond` until it holds, panicking after 30 seconds.
fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn wait_for_counts(doc: &Document) -> ByteHistogram {
    wait_until("statistics", || doc.stats_finished());
    doc.stats_counts().expect("finished statistics must publish counts")
}

fn contents(doc: &mut Document) -> Vec<u8> {
    let mut buf = vec![0u8; doc.len() as usize];
    let got = doc.read(&mut buf, 0);
    buf.truncate(got);
    buf
}

// ── Statistics ───────────────────────────────────────────────────────────────

#[test]
fn statistics_match_file_content() {
    let data = sample(200_000);
    let file = temp_file(&data);
    let doc = Document::open(file.path(), options()).unwrap();
    assert!(doc.has_stats());

    assert_eq!(wait_for_counts(&doc), ByteHistogram::of(&data));
    let progress = doc.stats_progress().unwrap();
    assert_eq!(progress.scanned, 200_000);
    assert_eq!(progress.percent(), 100);
}

#[test]
fn empty_file_has_all_zero_counts() {
    let file = temp_file(&[]);
    let doc = Document::open(file.path(), options()).unwrap();
    let counts = wait_for_counts(&doc);
    assert_eq!(counts.total(), 0);
    assert!(counts.counts().iter().all(|&n| n == 0));
}

#[test]
fn edits_restart_statistics() {
    let file = temp_file(b"aaaa");
    let mut doc = Document::open(file.path(), options()).unwrap();
    assert_eq!(wait_for_counts(&doc).count(b'a'), 4);

    doc.insert(2, b"bb").unwrap();
    let counts = wait_for_counts(&doc);
    assert_eq!(counts.count(b'a'), 4);
    assert_eq!(counts.count(b'b'), 2);

    doc.delete(0, 3).unwrap();
    doc.replace(0, b"c").unwrap();
    // "aabbaa" less its first three bytes, then overwritten at 0.
    assert_eq!(contents(&mut doc), b"caa");
    let counts = wait_for_counts(&doc);
    assert_eq!(counts, ByteHistogram::of(b"caa"));
}

/// The gate creates and destroys the worker as options and file class change.
#[test]
fn statistics_follow_policy() {
    let file = temp_file(b"policy");
    let mut doc = Document::open(file.path(), without_stats()).unwrap();
    assert!(!doc.has_stats());
    assert!(!doc.stats_finished());
    assert_eq!(doc.stats_counts(), None);

    doc.set_options(options()).unwrap();
    assert!(doc.has_stats());
    assert_eq!(wait_for_counts(&doc).total(), 6);

    let mut excluding = options();
    excluding.exclude_removable = true;
    doc.set_options(excluding).unwrap();
    doc.set_file_class(FileClass {
        drive: DriveType::Removable,
        is_device: false,
    });
    assert!(!doc.has_stats());

    doc.set_file_class(FileClass {
        drive: DriveType::Fixed,
        is_device: false,
    });
    assert!(doc.has_stats());
    assert_eq!(wait_for_counts(&doc).total(), 6);
}

#[test]
fn stop_and_start_statistics() {
    let data = sample(50_000);
    let file = temp_file(&data);
    let mut doc = Document::open(file.path(), options()).unwrap();

    doc.stop_stats().unwrap();
    assert!(!doc.stats_active());

    doc.start_stats().unwrap();
    assert_eq!(wait_for_counts(&doc), ByteHistogram::of(&data));
}

/// Statistics need a working private handle; without one there is no worker.
#[test]
fn statistics_absent_when_file_is_gone() {
    let file = temp_file(b"short lived");
    let path = file.path().to_path_buf();
    let mut doc = Document::open(&path, without_stats()).unwrap();
    file.close().unwrap();

    doc.set_options(options()).unwrap();
    assert!(!doc.has_stats());
    assert!(doc.start_stats().is_ok());
    assert!(!doc.has_stats());
}

// ── Aerial view ──────────────────────────────────────────────────────────────

#[test]
fn aerial_view_finishes_and_notifies() {
    let data = vec![0x40u8; 10_000];
    let file = temp_file(&data);
    let mut doc = Document::open(file.path(), without_stats()).unwrap();
    let notices = doc.notices();

    doc.add_aerial_view(ColourTable::greyscale()).unwrap();
    assert_eq!(
        notices.recv_timeout(Duration::from_secs(30)),
        Ok(DocNotice::AerialFinished)
    );
    assert!(doc.aerial_finished());
    assert!(!doc.aerial_scanning());

    let geometry = doc.aerial_geometry().unwrap();
    assert_eq!(geometry.bpe, 1);
    let bitmap = doc.aerial_bitmap().unwrap();
    let bitmap = bitmap.read();
    let pixels = geometry.pixels_for(doc.len());
    assert_eq!(pixels, 10_000);
    assert_eq!(bitmap.pixel(0), Some(Rgb::new(0x40, 0x40, 0x40)));
    assert_eq!(bitmap.pixel(pixels - 1), Some(Rgb::new(0x40, 0x40, 0x40)));
    assert_eq!(
        bitmap.pixel(pixels),
        Some(Rgb::new(CLEAR_BYTE, CLEAR_BYTE, CLEAR_BYTE))
    );
}

/// A small budget forces downsampling; each pixel averages its group.
#[test]
fn aerial_view_downsamples_large_documents() {
    // Pairs of 0x00, 0xFF average to 0x7F.
    let data: Vec<u8> = (0..8192).map(|i| if i % 2 == 0 { 0x00 } else { 0xFF }).collect();
    let file = temp_file(&data);
    let opts = ScanOptions {
        max_bitmap_bytes: 3 * 4096,
        bitmap_width: 64,
        ..without_stats()
    };
    let mut doc = Document::open(file.path(), opts).unwrap();
    doc.add_aerial_view(ColourTable::greyscale()).unwrap();
    wait_until("aerial view", || doc.aerial_finished());

    let geometry = doc.aerial_geometry().unwrap();
    assert_eq!(geometry.bpe, 2);
    let bitmap = doc.aerial_bitmap().unwrap();
    let bitmap = bitmap.read();
    for index in [0u64, 1000, 4095] {
        assert_eq!(bitmap.pixel(index), Some(Rgb::new(0x7F, 0x7F, 0x7F)));
    }
}

#[test]
fn edit_that_grows_the_document_reshapes_the_bitmap() {
    let file = temp_file(&[1u8; 4096]);
    let opts = ScanOptions {
        max_bitmap_bytes: 3 * 4096,
        bitmap_width: 64,
        ..without_stats()
    };
    let mut doc = Document::open(file.path(), opts).unwrap();
    doc.add_aerial_view(ColourTable::greyscale()).unwrap();
    wait_until("first aerial pass", || doc.aerial_finished());
    assert_eq!(doc.aerial_geometry().unwrap().bpe, 1);

    doc.insert(4096, &[9u8; 4096]).unwrap();
    assert_eq!(doc.aerial_geometry().unwrap().bpe, 2);
    wait_until("second aerial pass", || doc.aerial_finished());

    let bitmap = doc.aerial_bitmap().unwrap();
    let bitmap = bitmap.read();
    assert_eq!(bitmap.geometry().bpe, 2);
    assert_eq!(bitmap.pixel(0), Some(Rgb::new(1, 1, 1)));
    assert_eq!(bitmap.pixel(4095), Some(Rgb::new(9, 9, 9)));
}

#[test]
fn new_colours_rebuild_the_view() {
    let file = temp_file(&[0x10u8; 256]);
    let mut doc = Document::open(file.path(), without_stats()).unwrap();
    doc.add_aerial_view(ColourTable::greyscale()).unwrap();
    wait_until("greyscale pass", || doc.aerial_finished());

    let red = ColourTable::from_fn(|_| Rgb::new(0xFF, 0, 0));
    doc.set_aerial_colours(red).unwrap();
    wait_until("red pass", || doc.aerial_finished());
    let bitmap = doc.aerial_bitmap().unwrap();
    assert_eq!(bitmap.read().pixel(0), Some(Rgb::new(0xFF, 0, 0)));
}

/// An aerial worker whose private handle cannot be opened still exists; its
/// pass simply never finishes.
#[test]
fn aerial_view_degrades_when_file_is_gone() {
    let file = temp_file(&[7u8; 1024]);
    let path = file.path().to_path_buf();
    let mut doc = Document::open(&path, without_stats()).unwrap();
    file.close().unwrap();

    doc.add_aerial_view(ColourTable::greyscale()).unwrap();
    assert!(doc.aerial_bitmap().is_some());
    wait_until("aerial worker to give up", || !doc.aerial_scanning());
    assert!(!doc.aerial_finished());

    // Edits that only touch memory are still drawn.
    doc.delete(0, 1024).unwrap();
    doc.insert(0, &[0x20u8; 16]).unwrap();
    wait_until("in-memory pass", || doc.aerial_finished());
}

#[test]
fn last_view_removed_tears_down_the_worker() {
    let file = temp_file(&[3u8; 64]);
    let mut doc = Document::open(file.path(), without_stats()).unwrap();
    doc.add_aerial_view(ColourTable::default()).unwrap();
    doc.add_aerial_view(ColourTable::default()).unwrap();

    doc.remove_aerial_view();
    assert!(doc.aerial_bitmap().is_some());
    doc.remove_aerial_view();
    assert!(doc.aerial_bitmap().is_none());
    assert_eq!(doc.aerial_progress(), None);
}

// ── Slow workers ─────────────────────────────────────────────────────────────

/// An edit must restart both scans even when the aerial worker is too deep in
/// one huge chunk to answer within the handshake timeout.
#[test]
fn edits_during_a_slow_aerial_chunk_restart_both_scans() {
    const LEN: u64 = 64 << 20;
    let opts = ScanOptions {
        ack_timeout_ms: 50,
        aerial_chunk: LEN as usize,
        ..options()
    };
    let mut doc = Document::from_bytes(vec![b'a'; LEN as usize], opts).unwrap();
    assert_eq!(wait_for_counts(&doc).count(b'a'), LEN);

    doc.add_aerial_view(ColourTable::greyscale()).unwrap();
    assert_eq!(doc.aerial_geometry().unwrap().bpe, 16);

    // Same length, same geometry: only restarts are issued.
    match doc.replace(0, b"zzzz") {
        Ok(()) | Err(ScanError::Unresponsive { .. }) => {}
        Err(e) => panic!("unexpected error: {e}"),
    }
    assert!(!doc.stats_finished());
    assert_eq!(doc.stats_counts(), None);
    let counts = wait_for_counts(&doc);
    assert_eq!(counts.count(b'z'), 4);
    assert_eq!(counts.count(b'a'), LEN - 4);

    // Halving the document changes the geometry while the worker may still
    // be converting its chunk for the old one.
    match doc.delete(0, LEN / 2) {
        Ok(()) | Err(ScanError::Unresponsive { .. }) => {}
        Err(e) => panic!("unexpected error: {e}"),
    }
    assert_eq!(doc.aerial_geometry().unwrap().bpe, 8);
    assert!(!doc.aerial_finished());
    assert_eq!(doc.stats_counts(), None);

    wait_until("aerial view of the halved document", || doc.aerial_finished());
    let bitmap = doc.aerial_bitmap().unwrap();
    let bitmap = bitmap.read();
    assert_eq!(bitmap.geometry().bpe, 8);
    let grey = Rgb::new(b'a', b'a', b'a');
    for index in [0u64, LEN / 2 / 8 / 2, LEN / 2 / 8 - 1] {
        assert_eq!(bitmap.pixel(index), Some(grey));
    }
    drop(bitmap);

    let counts = wait_for_counts(&doc);
    assert_eq!(counts.count(b'z'), 0);
    assert_eq!(counts.total(), LEN / 2);
}

// ── Data files ───────────────────────────────────────────────────────────────

#[test]
fn data_file_bytes_are_scanned() {
    let file = temp_file(b"[]");
    let data = temp_file(b"0123456789");
    let mut doc = Document::open(file.path(), options()).unwrap();
    doc.add_aerial_view(ColourTable::greyscale()).unwrap();
    wait_for_counts(&doc);

    let index = doc.attach_data_file(data.path()).unwrap();
    assert_eq!(index, 0);
    doc.insert_data_file(1, index, 2, 3).unwrap();
    assert_eq!(contents(&mut doc), b"[234]");

    assert_eq!(wait_for_counts(&doc), ByteHistogram::of(b"[234]"));
    wait_until("aerial pass over the data file", || doc.aerial_finished());
    let bitmap = doc.aerial_bitmap().unwrap();
    assert_eq!(bitmap.read().pixel(1), Some(Rgb::new(b'2', b'2', b'2')));
}

#[test]
fn dropping_the_document_stops_both_workers() {
    let file = temp_file(&sample(1 << 20));
    let mut doc = Document::open(file.path(), options()).unwrap();
    doc.add_aerial_view(ColourTable::default()).unwrap();
    // Drop mid-scan; terminate joins both threads before returning.
    drop(doc);
}
