use accolade::core::config::{Config, LogFormat};
use accolade::core::db;
use accolade::core::deadline::{DEFAULT_OP_TIMEOUT, Deadline};
use accolade::core::error::AccoladeError;
use accolade::core::pool::SqlitePool;
use accolade::core::store::Store;
use std::fs;
use std::sync::{Arc, Barrier, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn test_pool() -> &'static SqlitePool {
    static POOL: OnceLock<SqlitePool> = OnceLock::new();
    POOL.get_or_init(SqlitePool::new)
}

#[test]
fn default_deadline_is_ten_seconds() {
    let ctx = Deadline::default();
    assert_eq!(ctx.budget(), DEFAULT_OP_TIMEOUT);
    assert_eq!(DEFAULT_OP_TIMEOUT, Duration::from_secs(10));
    assert!(!ctx.is_expired());
}

#[test]
fn detached_deadline_outlives_an_expired_parent() {
    let parent = Deadline::new(Duration::ZERO);
    assert!(matches!(parent.remaining("deadline.check"), Err(AccoladeError::Timeout(_))));
    let child = parent.detached(Duration::from_secs(5));
    assert!(child.remaining("deadline.check").is_ok());
}

#[test]
fn write_gate_wait_is_bounded_by_the_deadline() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("gate.db");
    let pool = test_pool();
    let entered = Arc::new(Barrier::new(2));

    thread::scope(|s| {
        let holder_entered = Arc::clone(&entered);
        let path_a = path.clone();
        s.spawn(move || {
            pool.with_write(&path_a, &Deadline::default(), "holder", |_conn| {
                holder_entered.wait();
                thread::sleep(Duration::from_millis(400));
                Ok(())
            })
            .unwrap();
        });

        entered.wait();
        let started = Instant::now();
        let err = pool
            .with_write(&path, &Deadline::new(Duration::from_millis(60)), "waiter", |_conn| Ok(()))
            .unwrap_err();
        assert!(matches!(err, AccoladeError::Timeout(ref m) if m.contains("waiter")));
        assert!(started.elapsed() < Duration::from_millis(400));
    });
}

#[test]
fn busy_database_past_the_deadline_is_a_timeout() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("busy.db");
    let blocker = db::db_connect(&path, Duration::from_secs(1)).unwrap();
    blocker
        .execute("CREATE TABLE probe (id INTEGER PRIMARY KEY)", [])
        .unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

    // A second pool instance: the write gate must not be what blocks us here.
    let other_pool: &'static SqlitePool = Box::leak(Box::new(SqlitePool::new()));
    let err = other_pool
        .with_write(&path, &Deadline::new(Duration::from_millis(150)), "insert", |conn| {
            conn.execute("INSERT INTO probe DEFAULT VALUES", [])?;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, AccoladeError::Timeout(_)), "got {:?}", err);

    blocker.execute_batch("ROLLBACK").unwrap();
}

#[test]
fn reads_run_while_a_writer_holds_the_gate() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("wal.db");
    let pool = test_pool();
    pool.with_write(&path, &Deadline::default(), "setup", |conn| {
        conn.execute("CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT)", [])?;
        conn.execute("INSERT INTO kv VALUES ('a', '1')", [])?;
        Ok(())
    })
    .unwrap();

    pool.with_write(&path, &Deadline::default(), "outer", |_conn| {
        let v: String = pool.with_read(&path, &Deadline::default(), "inner", |conn| {
            Ok(conn.query_row("SELECT v FROM kv WHERE k = 'a'", [], |r| r.get(0))?)
        })?;
        assert_eq!(v, "1");
        Ok(())
    })
    .unwrap();
}

#[test]
fn config_file_layers_under_overrides() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("accolade.toml");
    fs::write(
        &path,
        r#"
data_dir = "from-file"

[coordinator]
op_timeout_secs = 7

[logging]
format = "json"
"#,
    )
    .unwrap();

    let config = Config::load(Some(path.as_path())).unwrap();
    assert_eq!(config.op_timeout(), Duration::from_secs(7));
    assert_eq!(config.logging.format, LogFormat::Json);

    let config = config
        .with_overrides(Some(tmp.path().join("from-flag")), None)
        .unwrap();
    assert_eq!(config.data_dir, tmp.path().join("from-flag"));
    assert_eq!(config.op_timeout(), Duration::from_secs(7));

    let store = Store::new(&config.data_dir);
    assert!(store.reference_db_path().starts_with(tmp.path().join("from-flag")));
}

#[test]
fn missing_explicit_config_is_a_config_error() {
    let tmp = tempdir().unwrap();
    let err = Config::load(Some(tmp.path().join("absent.toml").as_path())).unwrap_err();
    assert!(matches!(err, AccoladeError::ConfigError(_)));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn exit_codes_separate_error_kinds() {
    let cases = [
        (AccoladeError::NotFound("x".into()), 3),
        (AccoladeError::NotOwner("x".into()), 4),
        (AccoladeError::Unauthorized("x".into()), 4),
        (
            AccoladeError::InvalidTransition {
                from: "verified".into(),
                to: "submitted".into(),
            },
            5,
        ),
        (AccoladeError::MalformedReference("x".into()), 6),
        (AccoladeError::Timeout("x".into()), 7),
        (AccoladeError::ValidationError("x".into()), 2),
        (AccoladeError::DuplicateKey("x".into()), 1),
    ];
    for (err, code) in cases {
        assert_eq!(err.exit_code(), code, "{}", err);
    }
}
