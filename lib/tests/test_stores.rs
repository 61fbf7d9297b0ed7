use quadlog::{
    ArgumentError, ArgumentErrorKind, ClientError, Config, QuadLog, QueryRequest,
    TransactionUpdate,
};
use std::path::Path;
use tempfile::tempdir;

/// Open a persistent catalog rooted at `root`.
fn open(root: &Path) -> QuadLog {
    let config = Config::builder()
        .root(root.to_path_buf())
        .sync_writes(false)
        .build()
        .expect("build config");
    QuadLog::open(config).expect("open catalog")
}

fn insert(db: &QuadLog, store: &str, data: &str) {
    let update = TransactionUpdate::builder()
        .insert_data(data)
        .build()
        .expect("build update");
    let info = db
        .execute_transaction(store, update, None)
        .expect("submit transaction")
        .wait();
    assert!(info.job_completed_ok(), "{:?}", info.status_message);
}

fn argument_kind(err: anyhow::Error) -> ArgumentErrorKind {
    err.downcast::<ArgumentError>()
        .expect("argument error")
        .kind
}

#[test]
fn test_create_exists_delete() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    for name in ["people", "a/b/c", "with space", "ünïcode"] {
        assert!(!db.does_store_exist(name).unwrap());
        db.create_store(name).unwrap();
        assert!(db.does_store_exist(name).unwrap());
    }
    assert_eq!(db.list_stores().len(), 4);

    let err = db.create_store("people").unwrap_err();
    assert_eq!(
        err.downcast_ref::<ClientError>(),
        Some(&ClientError::StoreExists("people".to_string()))
    );

    db.delete_store("people").unwrap();
    assert!(!db.does_store_exist("people").unwrap());
    let err = db.delete_store("people").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ClientError>(),
        Some(ClientError::StoreNotFound(_))
    ));

    // the name can be reused after deletion, starting from an empty store
    db.create_store("people").unwrap();
    assert_eq!(db.store_info("people").unwrap().quad_count, 0);
}

#[test]
fn test_store_name_validation() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());

    assert_eq!(
        argument_kind(db.create_store("").unwrap_err()),
        ArgumentErrorKind::Empty
    );
    assert_eq!(
        argument_kind(db.create_store("bad\\name").unwrap_err()),
        ArgumentErrorKind::InvalidCharacter('\\')
    );
    assert!(matches!(
        argument_kind(db.create_store(&"n".repeat(1025)).unwrap_err()),
        ArgumentErrorKind::TooLong { .. }
    ));
    assert_eq!(
        argument_kind(quadlog::validate_store_name(None).unwrap_err()),
        ArgumentErrorKind::Null
    );
    assert!(db.list_stores().is_empty());
}

#[test]
fn test_unknown_store_is_a_client_error() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());
    let err = db
        .execute_transaction("missing", TransactionUpdate::default(), None)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ClientError>(),
        Some(ClientError::StoreNotFound(name)) if name == "missing"
    ));
    assert!(db.get_statistics("missing").is_err());
    assert!(db.get_commit_points("missing", 0, 10).is_err());
    assert!(db.get_jobs("missing", 0, 10).is_err());
}

#[test]
fn test_stores_survive_reopen() {
    let dir = tempdir().unwrap();
    {
        let db = open(dir.path());
        db.create_store("people").unwrap();
        insert(
            &db,
            "people",
            "<http://example.org/alice> <http://xmlns.com/foaf/0.1/name> \"Alice\" .",
        );
        insert(
            &db,
            "people",
            "<http://example.org/bob> <http://xmlns.com/foaf/0.1/name> \"Bob\" <http://example.org/g> .",
        );
    }
    let db = open(dir.path());
    assert_eq!(db.list_stores(), vec!["people".to_string()]);
    let info = db.store_info("people").unwrap();
    assert_eq!(info.commit_id, 2);
    assert_eq!(info.quad_count, 2);
    assert_eq!(info.commit_points, 3);
    assert!(info.size_on_disk.unwrap() > 0);

    let outcome = db
        .execute_query(
            "people",
            &QueryRequest::new("SELECT ?s WHERE { ?s ?p ?o }"),
        )
        .unwrap();
    assert_eq!(outcome.commit_id, 2);
    assert_eq!(outcome.result.len(), 1);
}

#[test]
fn test_root_is_locked_while_open() {
    let dir = tempdir().unwrap();
    let db = open(dir.path());
    let config = Config::builder()
        .root(dir.path().to_path_buf())
        .build()
        .unwrap();
    assert!(QuadLog::open(config.clone()).is_err());
    drop(db);
    assert!(QuadLog::open(config).is_ok());
}

#[test]
fn test_temporary_catalog_writes_nothing() {
    let dir = tempdir().unwrap();
    let config = Config::builder()
        .root(dir.path().join("unused"))
        .temporary(true)
        .build()
        .unwrap();
    let db = QuadLog::open(config).unwrap();
    db.create_store("scratch").unwrap();
    insert(
        &db,
        "scratch",
        "<http://example.org/s> <http://example.org/p> <http://example.org/o> .",
    );
    assert_eq!(db.store_info("scratch").unwrap().quad_count, 1);
    assert_eq!(db.store_info("scratch").unwrap().size_on_disk, None);
    assert!(!dir.path().join("unused").exists());
}

#[test]
fn test_delete_fails_queued_jobs_and_rejects_new_ones() {
    let db = QuadLog::temporary().unwrap();
    db.create_store("busy").unwrap();
    let handles: Vec<_> = (0..20)
        .map(|i| {
            let update = TransactionUpdate::builder()
                .insert_data(format!(
                    "<http://example.org/s{}> <http://example.org/p> \"{}\" .",
                    i, i
                ))
                .build()
                .unwrap();
            db.execute_transaction("busy", update, None).unwrap()
        })
        .collect();
    db.delete_store("busy").unwrap();

    for handle in handles {
        let info = handle.wait();
        assert!(info.is_terminal());
        if info.job_completed_with_errors() {
            assert_eq!(info.status_message.as_deref(), Some("Store deleted"));
        }
    }
    assert!(db
        .execute_transaction("busy", TransactionUpdate::default(), None)
        .is_err());
}

#[test]
fn test_concurrent_submissions_keep_job_ids_consistent() {
    let db = QuadLog::temporary().unwrap();
    db.create_store("s").unwrap();

    let handles: Vec<_> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|t| {
                let db = &db;
                scope.spawn(move || {
                    (0..25)
                        .map(|i| {
                            let label = format!("{}-{}", t, i);
                            db.consolidate_store("s", Some(&label)).unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect()
    });
    assert_eq!(handles.len(), 200);

    for handle in &handles {
        let info = db.get_job_info("s", handle.job_id()).unwrap();
        assert_eq!(info.job_id, handle.job_id());
        assert_eq!(info.label, handle.info().label);
        assert!(handle.wait().job_completed_ok());
    }

    let listed: Vec<u64> = db
        .get_jobs("s", 0, 500)
        .unwrap()
        .iter()
        .map(|j| j.job_id)
        .collect();
    let expected: Vec<u64> = (1..=200).rev().collect();
    assert_eq!(listed, expected);
}
