use crate::fixture::{Pair, outcome_of, outcomes};

#[test]
fn push_then_pull_installs_units() {
    let pair = Pair::new();
    pair.alice.write_skill("alpha", "Alpha v1");
    pair.alice.write_skill("beta", "Beta v1");

    let push = pair.alice.robot(&["push"]);
    assert_eq!(push["status"], "ok", "{push}");
    assert_eq!(push["data"]["verdict"], "success");
    assert_eq!(push["data"]["published"], true);
    assert_eq!(outcome_of(&push, "alpha"), "created");
    assert_eq!(outcome_of(&push, "beta"), "created");

    let pull = pair.bob.robot(&["pull"]);
    assert_eq!(pull["status"], "ok", "{pull}");
    assert_eq!(outcome_of(&pull, "alpha"), "created");
    assert_eq!(pair.bob.read_skill("alpha"), pair.alice.read_skill("alpha"));
    assert_eq!(pair.bob.read_skill("beta"), pair.alice.read_skill("beta"));
}

#[test]
fn repeated_runs_are_no_ops() {
    let pair = Pair::new();
    pair.alice.write_skill("alpha", "Alpha v1");
    assert_eq!(pair.alice.robot(&["push"])["status"], "ok");
    assert_eq!(pair.bob.robot(&["pull"])["status"], "ok");

    let push = pair.alice.robot(&["push"]);
    assert_eq!(outcomes(&push), vec![("alpha".to_string(), "no-op".to_string())]);
    assert!(push["data"].get("revision").is_none());

    let pull = pair.bob.robot(&["pull"]);
    assert_eq!(outcomes(&pull), vec![("alpha".to_string(), "no-op".to_string())]);
}

#[test]
fn dry_run_push_publishes_nothing() {
    let pair = Pair::new();
    pair.alice.write_skill("alpha", "Alpha v1");

    let push = pair.alice.robot(&["push", "--dry-run"]);
    assert_eq!(push["data"]["dry_run"], true);
    assert_eq!(outcome_of(&push, "alpha"), "would-create");

    let pull = pair.bob.robot(&["pull"]);
    assert_eq!(pull["status"], "ok");
    assert!(outcomes(&pull).is_empty());
    assert!(!pair.bob.skills().join("alpha").exists());
}

#[test]
fn dry_run_pull_leaves_workspace_untouched() {
    let pair = Pair::new();
    pair.alice.write_skill("alpha", "Alpha v1");
    assert_eq!(pair.alice.robot(&["push"])["status"], "ok");

    let pull = pair.bob.robot(&["pull", "--dry-run"]);
    assert_eq!(outcome_of(&pull, "alpha"), "would-create");
    assert!(!pair.bob.skills().join("alpha").exists());
}

#[test]
fn update_overwrites_with_backup() {
    let pair = Pair::new();
    pair.alice.write_skill("alpha", "Alpha v1");
    assert_eq!(pair.alice.robot(&["push"])["status"], "ok");
    assert_eq!(pair.bob.robot(&["pull"])["status"], "ok");

    pair.bob.write_skill("alpha", "Alpha edited by bob");
    pair.alice.write_skill("alpha", "Alpha v2 from alice");
    let push = pair.alice.robot(&["push"]);
    assert_eq!(outcome_of(&push, "alpha"), "updated");

    let pull = pair.bob.robot(&["pull"]);
    assert_eq!(outcome_of(&pull, "alpha"), "updated");
    let unit = &pull["data"]["units"][0];
    assert!(unit["backup_id"].as_str().is_some(), "{pull}");
    assert!(pair.bob.read_skill("alpha").contains("Alpha v2 from alice"));

    let backups = pair.bob.robot(&["backup", "list", "--unit", "alpha"]);
    assert_eq!(backups["data"]["count"], 1);
}

#[test]
fn local_edits_survive_when_store_is_unchanged() {
    let pair = Pair::new();
    pair.alice.write_skill("alpha", "Alpha v1");
    assert_eq!(pair.alice.robot(&["push"])["status"], "ok");
    assert_eq!(pair.bob.robot(&["pull"])["status"], "ok");

    pair.bob.write_skill("alpha", "Alpha with bob's local notes");
    let pull = pair.bob.robot(&["pull"]);
    assert_eq!(pull["data"]["units"][0]["decision"], "keep-local");
    assert_eq!(outcome_of(&pull, "alpha"), "no-op");
    assert!(pair.bob.read_skill("alpha").contains("bob's local notes"));

    let status = pair.bob.robot(&["status"]);
    assert_eq!(status["data"]["status"]["units"][0]["status"], "local-drift");
}

#[test]
fn explicit_selection_limits_push() {
    let pair = Pair::new();
    pair.alice.write_skill("alpha", "Alpha v1");
    pair.alice.write_skill("beta", "Beta v1");

    let push = pair.alice.robot(&["push", "--skills", "beta,ghost"]);
    assert_eq!(outcomes(&push), vec![("beta".to_string(), "created".to_string())]);
    let warnings = push["warnings"].as_array().unwrap();
    assert!(warnings.iter().any(|w| w.as_str().unwrap().contains("ghost")));

    let pull = pair.bob.robot(&["pull"]);
    assert_eq!(outcomes(&pull), vec![("beta".to_string(), "created".to_string())]);
}

#[test]
fn unknown_selection_is_an_error() {
    let pair = Pair::new();
    pair.alice.write_skill("alpha", "Alpha v1");

    let push = pair.alice.robot(&["push", "--skills", "ghost"]);
    assert_eq!(push["status"]["error"]["code"], "NO_MATCHING_UNITS");
}

#[test]
fn remote_status_shows_partner_units() {
    let pair = Pair::new();
    pair.alice.write_skill("alpha", "Alpha v1");
    assert_eq!(pair.alice.robot(&["push"])["status"], "ok");

    let status = pair.bob.robot(&["status", "--remote"]);
    let row = &status["data"]["status"]["units"][0];
    assert_eq!(row["name"], "alpha");
    assert_eq!(row["status"], "remote-only");
    assert_eq!(row["pushed_by"], "alice");
}

#[test]
fn history_lists_journal_events() {
    let pair = Pair::new();
    pair.alice.write_skill("alpha", "Alpha v1");
    assert_eq!(pair.alice.robot(&["push"])["status"], "ok");
    assert_eq!(pair.alice.robot(&["push"])["status"], "ok");

    let status = pair.alice.robot(&["status", "--history", "5"]);
    assert_eq!(status["data"]["history"].as_array().unwrap().len(), 2);
}

#[test]
fn human_push_exits_zero_and_summarises() {
    let pair = Pair::new();
    pair.alice.write_skill("alpha", "Alpha v1");
    pair.alice
        .command()
        .arg("push")
        .assert()
        .success()
        .stdout(predicates::str::contains("1 created"));
    assert!(pair.remote.is_dir());
    assert!(pair.cache.is_dir());
}

#[test]
fn pull_with_a_bad_unit_installs_the_rest_and_exits_non_zero() {
    let pair = Pair::new();
    pair.alice.write_skill("alpha", "Alpha v1");
    pair.alice.write_skill("beta", "Beta v1");
    assert_eq!(pair.alice.robot(&["push"])["status"], "ok");
    pair.commit_to_store("Skills/beta/SKILL.md", "rewritten outside substrate\n");

    let (succeeded, pull) = pair.bob.robot_exit(&["pull"]);
    assert!(!succeeded, "{pull}");
    assert_eq!(pull["status"]["partial"]["completed"], 1, "{pull}");
    assert_eq!(pull["status"]["partial"]["failed"], 1);
    assert_eq!(pull["data"]["verdict"], "partial-failure");
    assert_eq!(outcome_of(&pull, "alpha"), "created");
    assert_eq!(outcome_of(&pull, "beta"), "failed");
    assert_eq!(pair.bob.read_skill("alpha"), pair.alice.read_skill("alpha"));
    assert!(!pair.bob.skills().join("beta").exists());

    pair.bob
        .command()
        .arg("pull")
        .assert()
        .failure()
        .stdout(predicates::str::contains("beta"));
}

#[test]
fn push_after_failed_publish_publishes_the_commit() {
    let pair = Pair::new();
    pair.alice.write_skill("alpha", "Alpha v1");
    let lock = pair.lock_remote_branch();

    let (succeeded, failed) = pair.alice.robot_exit(&["push"]);
    assert!(!succeeded, "{failed}");
    assert_eq!(failed["status"]["error"]["code"], "PUBLISH_FAILED", "{failed}");
    assert_eq!(failed["data"]["published"], false);
    assert_eq!(outcome_of(&failed, "alpha"), "created");
    let committed = failed["data"]["revision"].as_str().unwrap().to_string();
    std::fs::remove_file(lock).unwrap();
    assert!(outcomes(&pair.bob.robot(&["pull"])).is_empty());

    let (succeeded, push) = pair.alice.robot_exit(&["push"]);
    assert!(succeeded, "{push}");
    assert_eq!(push["status"], "ok");
    assert_eq!(push["data"]["verdict"], "success");
    assert_eq!(push["data"]["published"], true);
    assert_eq!(push["data"]["revision"], committed.as_str());
    assert_eq!(outcome_of(&push, "alpha"), "no-op");
    let warnings = push["warnings"].as_array().unwrap();
    assert!(warnings.iter().any(|w| w.as_str().unwrap().contains("never published")));

    let pull = pair.bob.robot(&["pull"]);
    assert_eq!(outcome_of(&pull, "alpha"), "created");
    assert_eq!(pair.bob.read_skill("alpha"), pair.alice.read_skill("alpha"));

    let status = pair.alice.robot(&["status"]);
    assert_eq!(status["data"]["status"]["units"][0]["status"], "in-sync", "{status}");
}
