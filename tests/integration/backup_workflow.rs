use crate::fixture::Pair;

#[test]
fn restore_brings_back_overwritten_edits() {
    let pair = Pair::new();
    pair.alice.write_skill("alpha", "Alpha v1");
    assert_eq!(pair.alice.robot(&["push"])["status"], "ok");
    assert_eq!(pair.bob.robot(&["pull"])["status"], "ok");

    pair.bob.write_skill("alpha", "Bob's precious edit");
    pair.alice.write_skill("alpha", "Alpha v2");
    assert_eq!(pair.alice.robot(&["push"])["status"], "ok");
    let pull = pair.bob.robot(&["pull"]);
    let backup_id = pull["data"]["units"][0]["backup_id"]
        .as_str()
        .unwrap()
        .to_string();

    let dry = pair.bob.robot(&["backup", "restore", &backup_id, "--dry-run"]);
    assert_eq!(dry["data"]["dry_run"], true);
    assert!(pair.bob.read_skill("alpha").contains("Alpha v2"));

    let restored = pair.bob.robot(&["backup", "restore", &backup_id]);
    assert_eq!(restored["status"], "ok", "{restored}");
    assert!(pair.bob.read_skill("alpha").contains("Bob's precious edit"));
}

#[test]
fn no_backup_flag_skips_snapshot() {
    let pair = Pair::new();
    pair.alice.write_skill("alpha", "Alpha v1");
    assert_eq!(pair.alice.robot(&["push"])["status"], "ok");
    assert_eq!(pair.bob.robot(&["pull"])["status"], "ok");

    pair.alice.write_skill("alpha", "Alpha v2");
    assert_eq!(pair.alice.robot(&["push"])["status"], "ok");
    let pull = pair.bob.robot(&["pull", "--no-backup"]);
    assert!(pull["data"]["units"][0].get("backup_id").is_none());

    let backups = pair.bob.robot(&["backup", "list"]);
    assert_eq!(backups["data"]["count"], 0);
}

#[test]
fn restoring_unknown_backup_fails() {
    let pair = Pair::new();
    let restored = pair.bob.robot(&["backup", "restore", "alpha-20000101T000000Z"]);
    assert_eq!(restored["status"]["error"]["code"], "BACKUP_NOT_FOUND");
}
