use oxigraph::io::RdfFormat;
use quadlog::{
    ClientError, Config, ExportRequest, ImportRequest, JobErrorKind, JobInfo, PersistenceMode,
    QuadLog, SnapshotRequest, TransactionUpdate,
};
use std::collections::BTreeSet;
use std::path::Path;
use tempfile::tempdir;

fn open(root: &Path) -> QuadLog {
    let config = Config::builder()
        .root(root.to_path_buf())
        .sync_writes(false)
        .build()
        .expect("build config");
    QuadLog::open(config).expect("open catalog")
}

fn transact(db: &QuadLog, store: &str, insert: &str, delete: Option<&str>) -> JobInfo {
    let mut builder = TransactionUpdate::builder();
    builder.insert_data(insert);
    if let Some(delete) = delete {
        builder.delete_patterns(delete);
    }
    let info = db
        .execute_transaction(store, builder.build().unwrap(), None)
        .expect("submit")
        .wait();
    assert!(info.job_completed_ok(), "{:?}", info.status_message);
    info
}

fn person(i: usize) -> String {
    format!(
        "<http://example.org/person/{i}> <http://www.w3.org/2000/01/rdf-schema#label> \"Person {i}\" <http://example.org/g{g}> .",
        i = i,
        g = i % 2
    )
}

/// Every quad of the store rendered as sorted N-Quads lines.
fn contents(db: &QuadLog, store: &str) -> BTreeSet<String> {
    let file = format!("{}-contents.nq", store.replace('/', "_"));
    let info = db
        .start_export(store, ExportRequest::new(&file), None)
        .unwrap()
        .wait();
    assert!(info.job_completed_ok(), "{:?}", info.status_message);
    read_lines(&db.config().import_dir().join(file))
}

fn read_lines(path: &Path) -> BTreeSet<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| l.to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

#[test]
fn test_snapshots_equal_source_commit() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());
    db.create_store("source").unwrap();
    for i in 0..4 {
        transact(&db, "source", &person(i), None);
    }
    let at_commit_4 = contents(&db, "source");

    // mutate the source past the chosen commit
    transact(&db, "source", &person(10), Some(&person(0)));
    assert_ne!(contents(&db, "source"), at_commit_4);

    for (target, mode) in [
        ("append", PersistenceMode::AppendOnly),
        ("rewrite", PersistenceMode::Rewrite),
    ] {
        let request = SnapshotRequest::new(target, mode).at_commit(4);
        let info = db.create_snapshot("source", request, None).unwrap().wait();
        assert!(info.job_completed_ok(), "{:?}", info.status_message);
        assert_eq!(info.commit_id, Some(4));
        assert_eq!(contents(&db, target), at_commit_4);
    }
    assert_eq!(db.store_info("append").unwrap().commit_points, 5);
    assert_eq!(db.store_info("rewrite").unwrap().commit_points, 1);

    // the targets evolve independently of the source
    transact(&db, "append", &person(20), None);
    assert_eq!(db.store_info("append").unwrap().commit_id, 5);
    assert_eq!(db.store_info("source").unwrap().quad_count, 4);

    // and survive a restart
    drop(db);
    let db = open(dir.path());
    assert_eq!(db.store_info("append").unwrap().quad_count, 5);
    assert_eq!(contents(&db, "rewrite"), at_commit_4);
}

#[test]
fn test_snapshot_defaults_and_errors() {
    let db = QuadLog::temporary().unwrap();
    db.create_store("source").unwrap();
    transact(&db, "source", &person(1), None);
    db.create_store("taken").unwrap();

    let err = db
        .create_snapshot(
            "source",
            SnapshotRequest::new("taken", PersistenceMode::Rewrite),
            None,
        )
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ClientError>(),
        Some(ClientError::StoreExists(_))
    ));

    let info = db
        .create_snapshot(
            "source",
            SnapshotRequest::new("missing-commit", PersistenceMode::AppendOnly).at_commit(7),
            None,
        )
        .unwrap()
        .wait();
    assert!(info.job_completed_with_errors());
    assert_eq!(info.exception_info.unwrap().kind, JobErrorKind::NotFound);
    assert!(!db.does_store_exist("missing-commit").unwrap());

    let info = db
        .create_snapshot(
            "source",
            SnapshotRequest::new("latest", PersistenceMode::AppendOnly),
            None,
        )
        .unwrap()
        .wait();
    assert!(info.job_completed_ok());
    assert_eq!(db.store_info("latest").unwrap().commit_id, 1);
}

#[test]
fn test_consolidation_preserves_counts() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());
    db.create_store("empty").unwrap();
    let info = db.consolidate_store("empty", None).unwrap().wait();
    assert!(info.job_completed_ok());
    assert_eq!(db.store_info("empty").unwrap().commit_id, 0);

    db.create_store("s").unwrap();
    for i in 0..6 {
        transact(&db, "s", &person(i), None);
    }
    transact(&db, "s", &person(7), Some(&person(2)));
    db.update_statistics("s", None).unwrap().wait();
    let before = db.get_statistics("s").unwrap().unwrap();
    let size_before = db.store_info("s").unwrap().size_on_disk.unwrap();

    let info = db.consolidate_store("s", None).unwrap().wait();
    assert!(info.job_completed_ok());
    let after_info = db.store_info("s").unwrap();
    assert_eq!(after_info.commit_id, 7);
    assert_eq!(after_info.commit_points, 1);
    assert!(after_info.size_on_disk.unwrap() < size_before);

    db.update_statistics("s", None).unwrap().wait();
    let after = db.get_statistics("s").unwrap().unwrap();
    assert_eq!(after.total_triple_count, before.total_triple_count);
    assert_eq!(after.predicate_triple_counts, before.predicate_triple_counts);
    assert_eq!(after.commit_id, before.commit_id);

    // commit ids keep increasing after consolidation
    let info = transact(&db, "s", &person(30), None);
    assert_eq!(info.commit_id, Some(8));
}

#[test]
fn test_export_observes_pinned_commit() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());
    db.create_store("s").unwrap();
    for i in 0..3 {
        transact(&db, "s", &person(i), None);
    }
    let expected = contents(&db, "s");

    let export = db
        .start_export("s", ExportRequest::new("pinned.nq"), Some("pinned"))
        .unwrap();
    for i in 3..6 {
        transact(&db, "s", &person(i), None);
    }
    db.consolidate_store("s", None).unwrap().wait();
    assert_eq!(db.store_info("s").unwrap().commit_id, 6);

    let info = export.wait();
    assert!(info.job_completed_ok());
    assert_eq!(info.commit_id, Some(3));
    assert_eq!(read_lines(&dir.path().join("import").join("pinned.nq")), expected);
}

#[test]
fn test_export_single_graph_as_ntriples() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());
    db.create_store("s").unwrap();
    for i in 0..5 {
        transact(&db, "s", &person(i), None);
    }
    let request = ExportRequest::new("g1.nt").with_graph("http://example.org/g1");
    let info = db.start_export("s", request, None).unwrap().wait();
    assert!(info.job_completed_ok());
    let lines = read_lines(&dir.path().join("import").join("g1.nt"));
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| !l.contains("example.org/g1")));
}

#[test]
fn test_import_from_file_and_text() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());
    db.create_store("s").unwrap();

    let import_dir = db.config().import_dir();
    std::fs::create_dir_all(&import_dir).unwrap();
    std::fs::write(
        import_dir.join("people.ttl"),
        "@prefix ex: <http://example.org/> .\n\
         ex:alice ex:knows ex:bob .\n\
         ex:bob ex:knows ex:carol .\n",
    )
    .unwrap();

    let request = ImportRequest::file("people.ttl").with_default_graph("http://example.org/people");
    let info = db.start_import("s", request, None).unwrap().wait();
    assert!(info.job_completed_ok(), "{:?}", info.status_message);
    assert_eq!(info.commit_id, Some(1));

    let request = ImportRequest::text(
        "<http://example.org/dave> <http://example.org/knows> <http://example.org/alice> .",
        RdfFormat::NTriples,
    );
    assert!(db.start_import("s", request, None).unwrap().wait().job_completed_ok());
    assert_eq!(db.store_info("s").unwrap().quad_count, 3);

    let lines = contents(&db, "s");
    assert_eq!(
        lines
            .iter()
            .filter(|l| l.ends_with("<http://example.org/people> ."))
            .count(),
        2
    );

    let info = db
        .start_import("s", ImportRequest::file("missing.ttl"), None)
        .unwrap()
        .wait();
    assert!(info.job_completed_with_errors());
    assert_eq!(info.exception_info.unwrap().kind, JobErrorKind::NotFound);

    let info = db
        .start_import(
            "s",
            ImportRequest::text("this is not turtle", RdfFormat::Turtle),
            None,
        )
        .unwrap()
        .wait();
    assert!(info.job_completed_with_errors());
    assert_eq!(info.exception_info.unwrap().kind, JobErrorKind::InvalidData);
    assert_eq!(db.store_info("s").unwrap().commit_id, 2);
}
