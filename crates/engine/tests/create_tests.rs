use archive_engine::{
    ArchiveEngine, ArchiveOperation, EngineConfig, EngineError, ErrorKind, MemorySource,
    OperationKind, PathSource, ProgressCallback, MIN_SPLIT_SIZE,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Deterministic bytes that DEFLATE cannot shrink
fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

fn engine_in(dir: &TempDir) -> (ArchiveEngine, PathBuf) {
    let scratch = dir.path().join("scratch");
    let engine = ArchiveEngine::new(EngineConfig::default().with_scratch_dir(&scratch));
    (engine, scratch)
}

fn scratch_entries(dir: &Path) -> usize {
    fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

fn no_progress() -> Box<ProgressCallback<'static>> {
    Box::new(|_| {})
}

fn recorder() -> (Arc<Mutex<Vec<f32>>>, Box<ProgressCallback<'static>>) {
    let samples = Arc::new(Mutex::new(Vec::new()));
    let sink = samples.clone();
    let cb: Box<ProgressCallback<'static>> =
        Box::new(move |p: f32| sink.lock().unwrap().push(p));
    (samples, cb)
}

fn not_cancelled() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

fn create(
    engine: &ArchiveEngine,
    sources: &[(&str, &[u8])],
    output: &Path,
    password: Option<&str>,
    split_size: u64,
) -> Result<archive_engine::CreateSummary, EngineError> {
    let op = ArchiveOperation::builder(OperationKind::Create)
        .inputs(
            sources
                .iter()
                .map(|(name, data)| MemorySource::shared(*name, data.to_vec())),
        )
        .output(output)
        .password(password.map(str::to_string))
        .split_size(split_size)
        .build()?;
    engine.create(&op, no_progress().as_ref(), not_cancelled())
}

fn extract_paths(
    engine: &ArchiveEngine,
    volumes: &[PathBuf],
    destination: &Path,
    password: Option<&str>,
) -> Result<archive_engine::ExtractStats, EngineError> {
    let op = ArchiveOperation::builder(OperationKind::Extract)
        .inputs(volumes.iter().map(|p| PathSource::shared(p.clone())))
        .output(destination)
        .password(password.map(str::to_string))
        .build()?;
    engine.extract(&op, no_progress().as_ref(), not_cancelled())
}

fn assert_tree(destination: &Path, sources: &[(&str, &[u8])]) {
    for (name, data) in sources {
        let extracted = fs::read(destination.join(name)).unwrap();
        assert_eq!(&extracted[..], *data, "content mismatch for {}", name);
    }
}

#[test]
fn test_zip_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let (engine, _) = engine_in(&temp_dir);
    let archive = temp_dir.path().join("out.zip");
    let sources: &[(&str, &[u8])] = &[
        ("readme.txt", &b"Hello, World!"[..]),
        ("data.json", &b"{\"key\": \"value\"}"[..]),
    ];

    let summary = create(&engine, sources, &archive, None, 0).unwrap();
    assert_eq!(summary.outputs, vec![archive.clone()]);
    assert_eq!(summary.entries.len(), 2);
    assert_eq!(summary.bytes_read, 13 + 16);

    let output_dir = temp_dir.path().join("output");
    let stats = extract_paths(&engine, &[archive], &output_dir, None).unwrap();
    assert_eq!(stats.files_extracted, 2);
    assert_tree(&output_dir, sources);
}

#[test]
fn test_zip_password_scenario() {
    let temp_dir = TempDir::new().unwrap();
    let (engine, _) = engine_in(&temp_dir);
    let archive = temp_dir.path().join("secret.zip");

    let ten_kb = noise(10 * 1024, 1);
    let one_mb = noise(1024 * 1024, 2);
    let sources: &[(&str, &[u8])] = &[
        ("ten.bin", ten_kb.as_slice()),
        ("empty.bin", &b""[..]),
        ("mega.bin", one_mb.as_slice()),
    ];
    create(&engine, sources, &archive, Some("p4ss"), 0).unwrap();

    let output_dir = temp_dir.path().join("output");
    let stats =
        extract_paths(&engine, &[archive.clone()], &output_dir, Some("p4ss")).unwrap();
    assert_eq!(stats.files_extracted, 3);
    assert_tree(&output_dir, sources);

    let wrong_dir = temp_dir.path().join("wrong");
    let err = extract_paths(&engine, &[archive.clone()], &wrong_dir, Some("nope")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DecryptionFailed);

    let missing_dir = temp_dir.path().join("missing");
    let err = extract_paths(&engine, &[archive], &missing_dir, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DecryptionFailed);
}

#[test]
fn test_zip_entries_are_encrypted() {
    let temp_dir = TempDir::new().unwrap();
    let (engine, _) = engine_in(&temp_dir);
    let archive = temp_dir.path().join("secret.zip");
    let sources: &[(&str, &[u8])] = &[("a.txt", &b"alpha"[..]), ("b.txt", &b"beta"[..])];
    create(&engine, sources, &archive, Some("pw"), 0).unwrap();

    let mut zip = zip::ZipArchive::new(fs::File::open(&archive).unwrap()).unwrap();
    for index in 0..zip.len() {
        assert!(zip.by_index_raw(index).unwrap().encrypted());
    }
}

#[test]
fn test_zip_split_scenario() {
    let temp_dir = TempDir::new().unwrap();
    let (engine, _) = engine_in(&temp_dir);
    let archive = temp_dir.path().join("big.zip");
    let volume_size = 1024 * 1024;

    let first = noise(1024 * 1024, 3);
    let second = noise(1024 * 1024, 4);
    let third = noise(1024 * 1024, 5);
    let sources: &[(&str, &[u8])] = &[
        ("one.bin", first.as_slice()),
        ("two.bin", second.as_slice()),
        ("three.bin", third.as_slice()),
    ];

    let summary = create(&engine, sources, &archive, None, volume_size).unwrap();
    assert!(summary.outputs.len() >= 3);
    assert!(!archive.exists());
    for (index, volume) in summary.outputs.iter().enumerate() {
        let expected_name = format!("big.zip.{:03}", index + 1);
        assert_eq!(volume.file_name().unwrap().to_string_lossy(), expected_name);
        let len = fs::metadata(volume).unwrap().len();
        if index + 1 < summary.outputs.len() {
            assert_eq!(len, volume_size);
        } else {
            assert!(len > 0 && len <= volume_size);
        }
    }

    // the whole ordered list
    let listed_dir = temp_dir.path().join("listed");
    extract_paths(&engine, &summary.outputs, &listed_dir, None).unwrap();
    assert_tree(&listed_dir, sources);

    // discovery from the first volume
    let discovered_dir = temp_dir.path().join("discovered");
    extract_paths(&engine, &summary.outputs[..1], &discovered_dir, None).unwrap();
    assert_tree(&discovered_dir, sources);
}

#[test]
fn test_zip_split_with_password() {
    let temp_dir = TempDir::new().unwrap();
    let (engine, _) = engine_in(&temp_dir);
    let archive = temp_dir.path().join("both.zip");
    let data = noise(300 * 1024, 6);
    let sources: &[(&str, &[u8])] = &[("payload.bin", data.as_slice())];

    let summary = create(&engine, sources, &archive, Some("p4ss"), MIN_SPLIT_SIZE).unwrap();
    assert!(summary.outputs.len() >= 4);

    let output_dir = temp_dir.path().join("output");
    extract_paths(&engine, &summary.outputs, &output_dir, Some("p4ss")).unwrap();
    assert_tree(&output_dir, sources);
}

#[test]
fn test_zip_level_zero_stores_entries() {
    let temp_dir = TempDir::new().unwrap();
    let (engine, _) = engine_in(&temp_dir);
    let archive = temp_dir.path().join("stored.zip");

    let op = ArchiveOperation::builder(OperationKind::Create)
        .input(MemorySource::shared("plain.txt", b"aaaaaaaaaaaaaaaaaaaaaaaa".to_vec()))
        .output(&archive)
        .compression_level(0)
        .build()
        .unwrap();
    engine.create(&op, no_progress().as_ref(), not_cancelled()).unwrap();

    let mut zip = zip::ZipArchive::new(fs::File::open(&archive).unwrap()).unwrap();
    let entry = zip.by_index(0).unwrap();
    assert_eq!(entry.compression(), zip::CompressionMethod::Stored);
    assert_eq!(entry.compressed_size(), entry.size());
}

#[test]
fn test_tar_family_round_trip() {
    let long_name = format!("{}.txt", "n".repeat(120));
    let sources: Vec<(&str, &[u8])> = vec![
        ("notes.txt", &b"tar content"[..]),
        ("empty.dat", &b""[..]),
        (long_name.as_str(), &b"long names survive"[..]),
    ];

    for name in ["out.tar", "out.tar.gz", "out.tgz", "out.tar.xz"] {
        let temp_dir = TempDir::new().unwrap();
        let (engine, _) = engine_in(&temp_dir);
        let archive = temp_dir.path().join(name);

        let summary = create(&engine, &sources, &archive, None, 0).unwrap();
        assert_eq!(summary.outputs, vec![archive.clone()]);

        let output_dir = temp_dir.path().join("output");
        let stats = extract_paths(&engine, &[archive], &output_dir, None).unwrap();
        assert_eq!(stats.files_extracted, 3, "{}", name);
        assert_tree(&output_dir, &sources);
    }
}

#[test]
fn test_tar_gz_is_readable_by_other_tools() {
    use flate2::read::GzDecoder;

    let temp_dir = TempDir::new().unwrap();
    let (engine, _) = engine_in(&temp_dir);
    let archive = temp_dir.path().join("out.tar.gz");
    create(&engine, &[("hello.txt", &b"Hello from TAR!"[..])], &archive, None, 0).unwrap();

    let mut tar = tar::Archive::new(GzDecoder::new(fs::File::open(&archive).unwrap()));
    let names: Vec<String> = tar
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["hello.txt".to_string()]);
}

#[test]
fn test_tar_rejects_password_and_split() {
    let temp_dir = TempDir::new().unwrap();
    let (engine, scratch) = engine_in(&temp_dir);
    let archive = temp_dir.path().join("out.tar.gz");

    let err = create(&engine, &[("a.txt", &b"a"[..])], &archive, Some("pw"), 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    let err = create(&engine, &[("a.txt", &b"a"[..])], &archive, None, MIN_SPLIT_SIZE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);

    assert!(!archive.exists());
    assert_eq!(scratch_entries(&scratch), 0);
}

#[test]
fn test_read_only_formats_cannot_be_created() {
    let temp_dir = TempDir::new().unwrap();
    let (engine, scratch) = engine_in(&temp_dir);

    for name in ["out.rar", "out.7z"] {
        let archive = temp_dir.path().join(name);
        let err = create(&engine, &[("a.txt", &b"a"[..])], &archive, None, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
        assert!(!archive.exists());
    }
    assert_eq!(scratch_entries(&scratch), 0);
}

#[test]
fn test_unsupported_output_name() {
    let temp_dir = TempDir::new().unwrap();
    let result = ArchiveOperation::builder(OperationKind::Create)
        .input(MemorySource::shared("a.txt", b"a".to_vec()))
        .output(temp_dir.path().join("out.docx"))
        .build();
    assert!(matches!(result, Err(EngineError::UnsupportedFormat(_))));
}

#[test]
fn test_invalid_split_size_touches_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let target_dir = temp_dir.path().join("never-created");
    let (_, scratch) = engine_in(&temp_dir);

    for size in [1, 1024, MIN_SPLIT_SIZE - 1] {
        let result = ArchiveOperation::builder(OperationKind::Create)
            .input(MemorySource::shared("a.txt", b"a".to_vec()))
            .output(target_dir.join("out.zip"))
            .split_size(size)
            .build();
        match result {
            Err(EngineError::InvalidSplitSize { size: got, minimum }) => {
                assert_eq!(got, size);
                assert_eq!(minimum, MIN_SPLIT_SIZE);
            }
            other => panic!("Expected InvalidSplitSize, got: {:?}", other),
        }
    }

    assert!(!target_dir.exists());
    assert!(!scratch.exists());
}

#[test]
fn test_progress_is_monotonic_and_ends_at_one() {
    let temp_dir = TempDir::new().unwrap();
    let (engine, _) = engine_in(&temp_dir);
    let first = noise(200 * 1024, 7);
    let second = noise(50 * 1024, 8);

    for name in ["out.zip", "out.tar.xz"] {
        let (samples, cb) = recorder();
        let op = ArchiveOperation::builder(OperationKind::Create)
            .input(MemorySource::shared("first.bin", first.clone()))
            .input(MemorySource::shared("second.bin", second.clone()))
            .output(temp_dir.path().join(name))
            .build()
            .unwrap();
        engine.create(&op, cb.as_ref(), not_cancelled()).unwrap();

        let (extract_samples, extract_cb) = recorder();
        let extract_op = ArchiveOperation::builder(OperationKind::Extract)
            .input(PathSource::shared(temp_dir.path().join(name)))
            .output(temp_dir.path().join(format!("{}-out", name)))
            .build()
            .unwrap();
        engine
            .extract(&extract_op, extract_cb.as_ref(), not_cancelled())
            .unwrap();

        for samples in [samples, extract_samples] {
            let samples = samples.lock().unwrap();
            assert!(!samples.is_empty());
            assert!(samples.windows(2).all(|w| w[0] <= w[1]), "{:?}", samples);
            assert!(samples.iter().all(|p| (0.0..=1.0).contains(p)));
            assert_eq!(*samples.last().unwrap(), 1.0);
            assert_eq!(samples.iter().filter(|p| **p == 1.0).count(), 1);
        }
    }
}

#[test]
fn test_materialized_sources_are_released() {
    let temp_dir = TempDir::new().unwrap();
    let (engine, scratch) = engine_in(&temp_dir);

    // success
    create(&engine, &[("a.txt", &b"a"[..])], &temp_dir.path().join("ok.zip"), None, 0).unwrap();
    assert_eq!(scratch_entries(&scratch), 0);

    // failure after materialization
    let err = create(
        &engine,
        &[("a.txt", &b"a"[..])],
        &temp_dir.path().join("bad.tar.xz"),
        Some("pw"),
        0,
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    assert_eq!(scratch_entries(&scratch), 0);

    // extraction of a non-local archive
    let bytes = fs::read(temp_dir.path().join("ok.zip")).unwrap();
    let op = ArchiveOperation::builder(OperationKind::Extract)
        .input(MemorySource::shared("ok.zip", bytes))
        .output(temp_dir.path().join("from-memory"))
        .build()
        .unwrap();
    engine.extract(&op, no_progress().as_ref(), not_cancelled()).unwrap();
    assert_eq!(fs::read(temp_dir.path().join("from-memory/a.txt")).unwrap(), b"a");
    assert_eq!(scratch_entries(&scratch), 0);
}

#[test]
fn test_cancellation_leaves_no_output() {
    let temp_dir = TempDir::new().unwrap();
    let (engine, scratch) = engine_in(&temp_dir);
    let out_dir = temp_dir.path().join("out");
    fs::create_dir_all(&out_dir).unwrap();
    let archive = out_dir.join("cancelled.zip");

    let cancel_flag = not_cancelled();
    let trigger = cancel_flag.clone();
    let cb: Box<ProgressCallback<'static>> =
        Box::new(move |_p: f32| trigger.store(true, Ordering::Relaxed));

    let op = ArchiveOperation::builder(OperationKind::Create)
        .input(MemorySource::shared("one.bin", noise(64 * 1024, 9)))
        .input(MemorySource::shared("two.bin", noise(64 * 1024, 10)))
        .input(MemorySource::shared("three.bin", noise(64 * 1024, 11)))
        .output(&archive)
        .build()
        .unwrap();
    let result = engine.create(&op, cb.as_ref(), cancel_flag);

    match result {
        Err(EngineError::Cancelled) => {}
        other => panic!("Expected Cancelled error, got: {:?}", other),
    }
    assert!(!archive.exists());
    assert_eq!(fs::read_dir(&out_dir).unwrap().count(), 0);
    assert_eq!(scratch_entries(&scratch), 0);
}

#[test]
fn test_unavailable_source() {
    let temp_dir = TempDir::new().unwrap();
    let (engine, scratch) = engine_in(&temp_dir);
    let archive = temp_dir.path().join("out.zip");

    let op = ArchiveOperation::builder(OperationKind::Create)
        .input(MemorySource::shared("fine.txt", b"fine".to_vec()))
        .input(PathSource::shared(temp_dir.path().join("missing.txt")))
        .output(&archive)
        .build()
        .unwrap();
    let err = engine
        .create(&op, no_progress().as_ref(), not_cancelled())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
    assert!(!archive.exists());
    assert_eq!(scratch_entries(&scratch), 0);
}

#[test]
fn test_entry_names_are_sanitized_and_unique() {
    let temp_dir = TempDir::new().unwrap();
    let (engine, _) = engine_in(&temp_dir);
    let archive = temp_dir.path().join("names.zip");

    let summary = create(
        &engine,
        &[
            ("photos/holiday.jpg", &b"1"[..]),
            ("other/holiday.jpg", &b"2"[..]),
            ("r\u{e9}sum\u{e9}?.txt", &b"3"[..]),
        ],
        &archive,
        None,
        0,
    )
    .unwrap();

    let names: Vec<&str> = summary.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["holiday.jpg", "holiday (1).jpg", "r_sum__.txt"]);
}
