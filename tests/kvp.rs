use std::sync::Arc;

use anyhow::Result;
use sqlite_util::{
    DataType, FieldDef, KeyValueStore, Record, SqliteError, SqliteKvp, SqliteUtil, WhereClause,
};
use tempfile::NamedTempFile;

fn create_temp_util() -> Result<(Arc<SqliteUtil>, NamedTempFile)> {
    let temp_file = NamedTempFile::new()?;
    let util = Arc::new(SqliteUtil::new(temp_file.path()));
    Ok((util, temp_file))
}

#[test]
fn add_persists_and_reopen_reloads() -> Result<()> {
    let (util, _file) = create_temp_util()?;
    let mut store = SqliteKvp::open(util.clone(), "my app - seen")?;
    assert_eq!(store.group(), "MY APP - SEEN");
    assert_eq!(store.table(), "KVP");
    assert_eq!(store.file(), util.file());

    assert!(store.add("k1", "v1", Some("first"))?);
    assert!(!store.add("k1", "other", None)?);
    assert_eq!(store.value("k1"), Some("v1"));
    assert!(store.contains_key("k1"));
    assert!(!store.contains_key(""));

    let reopened = SqliteKvp::open(util.clone(), "MY APP - SEEN")?;
    assert_eq!(reopened.value("k1"), Some("v1"));
    assert_eq!(reopened.keys().count(), 1);
    Ok(())
}

#[test]
fn groups_are_isolated_within_one_table() -> Result<()> {
    let (util, _file) = create_temp_util()?;
    let mut first = SqliteKvp::open(util.clone(), "first")?;
    let second = SqliteKvp::open(util.clone(), "second")?;

    first.add("shared", "1", None)?;
    let second_reloaded = SqliteKvp::open(util.clone(), "second")?;
    assert!(!second.contains_key("shared"));
    assert!(!second_reloaded.contains_key("shared"));
    Ok(())
}

#[test]
fn remove_deletes_only_this_group() -> Result<()> {
    let (util, _file) = create_temp_util()?;
    let mut a = SqliteKvp::open(util.clone(), "a")?;
    let mut b = SqliteKvp::open(util.clone(), "b")?;
    a.add("k", "from a", None)?;
    b.add("k", "from b", None)?;

    a.remove("k")?;
    assert!(!a.contains_key("k"));
    assert!(!util.record_exists(
        "KVP",
        &[WhereClause::eq("KEY_ID", "k"), WhereClause::eq("GROUP_C", "A")]
    )?);
    assert!(util.record_exists(
        "KVP",
        &[WhereClause::eq("KEY_ID", "k"), WhereClause::eq("GROUP_C", "B")]
    )?);
    Ok(())
}

#[test]
fn stale_stores_see_rows_added_by_others() -> Result<()> {
    let (util, _file) = create_temp_util()?;
    let mut early = SqliteKvp::open(util.clone(), "dedup")?;
    let mut late = SqliteKvp::open(util.clone(), "dedup")?;

    assert!(late.add("item", "item", None)?);
    assert!(!early.add("item", "item", None)?);
    assert!(early.contains_key("item"));
    Ok(())
}

#[test]
fn empty_keys_and_values_are_rejected() -> Result<()> {
    let (util, _file) = create_temp_util()?;
    let mut store = SqliteKvp::open_table(util, "g", "settings")?;
    assert_eq!(store.table(), "SETTINGS");
    assert!(matches!(
        store.add("", "v", None),
        Err(SqliteError::InvalidArgument(_))
    ));
    assert!(matches!(
        store.add("k", "", None),
        Err(SqliteError::InvalidArgument(_))
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_util_serializes_insert_if_absent() -> Result<()> {
    let (util, _file) = create_temp_util()?;
    util.register_field(FieldDef::new("EVENT", "ID", DataType::Text))?;
    util.register_field(FieldDef::new("EVENT", "WORKER", DataType::Integer))?;

    let mut handles = Vec::new();
    for worker in 0..8i64 {
        let util = util.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let record = Record::new()
                .with_field("ID", "same")
                .with_field("WORKER", worker);
            util.insert_record_if_absent("EVENT", &[WhereClause::eq("ID", "same")], &record)
        }));
    }

    let mut inserted = 0;
    for handle in handles {
        if handle.await?? {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 1);
    assert_eq!(util.select_records("SELECT * FROM EVENT")?.len(), 1);
    Ok(())
}
