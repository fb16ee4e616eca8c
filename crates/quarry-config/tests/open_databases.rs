//! Database bootstrap tests for quarry-config.
// crates/quarry-config/tests/open_databases.rs
// =============================================================================
// Module: Config Bootstrap Tests
// Description: Open configured databases with tags and engine tunables.
// Purpose: Ensure a loaded config produces ready-to-use databases.
// =============================================================================

use quarry_config::QuarryConfig;
use quarry_store_sqlite::Core;

type TestResult = Result<(), String>;

#[test]
fn configured_databases_open_with_tags() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let path = dir.path().join("quarry.toml");
    let content = "[engine]\nmax_readers = 2\n\n[[databases]]\npath = \"main.db\"\ntag = \
                   7\n\n[[databases]]\npath = \"cache.db\"\n";
    std::fs::write(&path, content).map_err(|err| err.to_string())?;
    let config = QuarryConfig::load(Some(&path)).map_err(|err| err.to_string())?;

    let core = Core::new();
    let databases = config.open_databases(&core).map_err(|err| err.to_string())?;
    let [main, cache] = databases.as_slice() else {
        return Err("expected two databases".to_string());
    };
    if main.tag() != 7 || cache.tag() != 0 {
        return Err("tags were not applied".to_string());
    }
    if main.path() != dir.path().join("main.db") {
        return Err("database path was not resolved".to_string());
    }
    if core.live_databases() != 2 {
        return Err("expected two registered databases".to_string());
    }
    main.execute("CREATE TABLE t (x INTEGER)").map_err(|err| err.to_string())?;
    if !dir.path().join("main.db").exists() {
        return Err("database file was not created".to_string());
    }
    Ok(())
}

#[test]
fn background_drivers_start_when_requested() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let path = dir.path().join("quarry.toml");
    let content = "[[databases]]\npath = \"main.db\"\nauto_backup = true\nauto_migration = true\n";
    std::fs::write(&path, content).map_err(|err| err.to_string())?;
    let config = QuarryConfig::load(Some(&path)).map_err(|err| err.to_string())?;

    let core = Core::new();
    let databases = config.open_databases(&core).map_err(|err| err.to_string())?;
    let Some(main) = databases.first() else {
        return Err("expected one database".to_string());
    };
    main.enable_auto_backup(false).map_err(|err| err.to_string())?;
    main.enable_auto_migration(false).map_err(|err| err.to_string())?;
    Ok(())
}
