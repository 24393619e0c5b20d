use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::{Duration, TimeZone, Utc};
use keygate::{
    database::Database,
    models::{ApiKey, KeyStatus},
    security::KeyCodec,
    store::KeyStore,
    ApiError,
};

fn cheap_codec() -> KeyCodec {
    KeyCodec::test()
        .with_cost(8, 1)
        .expect("Failed to build codec")
}

fn test_db(name: &str) -> Database {
    let test_db_dir = "tests/test_db";
    if !Path::new(test_db_dir).exists() {
        fs::create_dir_all(test_db_dir).expect("Failed to create test_db directory");
    }

    let db_path = format!("{}/{}.sqlite", test_db_dir, name);
    for suffix in ["", "-wal", "-shm"] {
        let _ = fs::remove_file(format!("{}{}", db_path, suffix));
    }

    Database::new(&db_path).expect("Failed to create test database")
}

fn stored_key(id: &str, prefix: &str, owner: &str) -> ApiKey {
    ApiKey {
        id: id.to_string(),
        name: format!("{} key", id),
        digest: "$argon2id$placeholder".to_string(),
        prefix: prefix.to_string(),
        status: KeyStatus::Active,
        rate_limit: 10,
        expires_at: None,
        last_used_at: None,
        owner_id: owner.to_string(),
        project_id: None,
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

#[test]
fn test_round_trip_and_single_character_mutation() {
    let codec = cheap_codec();

    for _ in 0..3 {
        let key = codec.generate().expect("Failed to generate key");
        assert!(codec.verify(&key.plaintext, &key.digest));

        for (index, original) in key.plaintext.char_indices() {
            let replacement = if original == 'A' { 'B' } else { 'A' };
            let mut mutated = key.plaintext.clone();
            mutated.replace_range(index..index + original.len_utf8(), &replacement.to_string());

            assert!(
                !codec.verify(&mutated, &key.digest),
                "mutation at {} verified",
                index
            );
        }
    }
}

#[test]
fn test_prefix_uniqueness_over_large_sample() {
    let codec = cheap_codec();
    let mut prefixes = HashSet::new();

    for _ in 0..2000 {
        let key = codec.generate().expect("Failed to generate key");
        assert_eq!(
            KeyCodec::extract_prefix(&key.plaintext).unwrap(),
            key.prefix
        );
        assert!(prefixes.insert(key.prefix), "duplicate prefix generated");
    }
}

#[test]
fn test_live_environment_tag() {
    let key = KeyCodec::live()
        .with_cost(8, 1)
        .unwrap()
        .generate()
        .unwrap();
    assert!(key.plaintext.starts_with("sk_live_"));
    assert!(KeyCodec::mask(&key.plaintext).starts_with("sk_live_"));
    assert!(KeyCodec::mask(&key.plaintext).contains("..."));
}

#[test]
fn test_database_api_key_operations() {
    let db = test_db("test_api_key_ops");

    let key = stored_key("key-1", "sk_test_AAAAAAAA", "owner-1");
    db.insert_key(&key).expect("Failed to create API key");

    let found = db
        .find_by_prefix("sk_test_AAAAAAAA")
        .expect("Failed to get API key")
        .expect("API key missing");
    assert_eq!(found.id, "key-1");
    assert_eq!(found.owner_id, "owner-1");
    assert_eq!(found.status, KeyStatus::Active);
    assert_eq!(found.rate_limit, 10);
    assert_eq!(found.created_at, key.created_at);

    assert!(db.find_by_prefix("sk_test_BBBBBBBB").unwrap().is_none());
    assert!(db.find_by_id("key-1").unwrap().is_some());
    assert!(db.find_by_id("missing").unwrap().is_none());
}

#[test]
fn test_duplicate_prefix_is_a_conflict() {
    let db = Database::open_in_memory().unwrap();

    db.insert_key(&stored_key("key-1", "sk_test_AAAAAAAA", "owner-1"))
        .unwrap();
    let result = db.insert_key(&stored_key("key-2", "sk_test_AAAAAAAA", "owner-1"));

    assert!(matches!(result, Err(ApiError::Conflict(_))));
}

#[test]
fn test_status_only_moves_out_of_active() {
    let db = Database::open_in_memory().unwrap();
    db.insert_key(&stored_key("key-1", "sk_test_AAAAAAAA", "owner-1"))
        .unwrap();

    assert!(db.set_status("key-1", KeyStatus::Revoked).unwrap());
    assert!(!db.set_status("key-1", KeyStatus::Expired).unwrap());
    assert!(matches!(
        db.set_status("key-1", KeyStatus::Active),
        Err(ApiError::InvalidRequest(_))
    ));

    let key = db.find_by_id("key-1").unwrap().unwrap();
    assert_eq!(key.status, KeyStatus::Revoked);
}

#[test]
fn test_touch_last_used_and_owner_listing() {
    let db = Database::open_in_memory().unwrap();

    let mut older = stored_key("key-1", "sk_test_AAAAAAAA", "owner-1");
    older.created_at = older.created_at - Duration::days(1);
    db.insert_key(&older).unwrap();
    db.insert_key(&stored_key("key-2", "sk_test_BBBBBBBB", "owner-1"))
        .unwrap();
    db.insert_key(&stored_key("key-3", "sk_test_CCCCCCCC", "owner-2"))
        .unwrap();

    let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap();
    db.touch_last_used("key-1", at).unwrap();
    assert_eq!(
        db.find_by_id("key-1").unwrap().unwrap().last_used_at,
        Some(at)
    );

    let ids: Vec<String> = db
        .list_by_owner("owner-1")
        .unwrap()
        .into_iter()
        .map(|key| key.id)
        .collect();
    assert_eq!(ids, vec!["key-2".to_string(), "key-1".to_string()]);
}
