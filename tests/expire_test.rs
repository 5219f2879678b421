//! Integration tests for the expiration engine
//!
//! Covers thread rescue along References chains, watermark recomputation,
//! directory pruning and the Message-ID store sweep.

mod common;

use common::*;
use newspool::{RelayConfig, StoreOutcome, expire, store};
use std::fs;
use tempfile::TempDir;

/// Age in seconds safely past the default 20-day retention
const ANCIENT: u64 = 40 * 86_400;

fn stored_number(outcome: StoreOutcome) -> u64 {
    match outcome {
        StoreOutcome::Stored { xref, .. } => xref[0].1,
        other => panic!("expected Stored, got {other:?}"),
    }
}

#[test]
fn thread_rescue_keeps_referenced_ancestor() {
    let dir = TempDir::new().unwrap();
    let mut spool = open_spool(&dir);
    add_group(&mut spool, "alt.test");
    let group_dir = spool.group_dir("alt.test").unwrap();

    // Old article A, fresh article B referencing A, old unrelated C
    let a = stored_number(store_text(
        &mut spool,
        &article_text("<a@test>", "alt.test", "thread root", ""),
    ));
    let b = stored_number(store_text(
        &mut spool,
        &article_text("<b@test>", "alt.test", "Re: thread root", "<a@test>"),
    ));
    let c = stored_number(store_text(
        &mut spool,
        &article_text("<c@test>", "alt.test", "unrelated", ""),
    ));

    age_file(&group_dir.join(a.to_string()), ANCIENT);
    age_file(&group_dir.join(c.to_string()), ANCIENT);

    let summary = expire::run(&mut spool).unwrap();

    // A survives because live B references it; C is gone
    assert!(group_dir.join(a.to_string()).is_file(), "A was rescued");
    assert!(group_dir.join(b.to_string()).is_file(), "B is fresh");
    assert!(!group_dir.join(c.to_string()).is_file(), "C expired");
    assert!(store::exists(&spool, "<a@test>"));
    assert!(!store::exists(&spool, "<c@test>"), "C swept from the store");

    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.kept, 2);
    assert_eq!(summary.rescued, 1);
    assert_eq!(summary.swept, 1);

    spool.close().unwrap();
}

#[test]
fn expire_recomputes_low_watermark() {
    let dir = TempDir::new().unwrap();
    let mut spool = open_spool(&dir);
    add_group(&mut spool, "alt.test");
    let group_dir = spool.group_dir("alt.test").unwrap();

    let first = stored_number(store_text(
        &mut spool,
        &article_text("<w1@test>", "alt.test", "s", ""),
    ));
    let second = stored_number(store_text(
        &mut spool,
        &article_text("<w2@test>", "alt.test", "s", ""),
    ));
    assert_eq!(second, first + 1);

    age_file(&group_dir.join(first.to_string()), ANCIENT);
    expire::run(&mut spool).unwrap();

    let entry = spool.active.find("alt.test").unwrap();
    assert_eq!(entry.first, second, "low watermark is the first survivor");
    assert_eq!(entry.last, second);

    spool.close().unwrap();
}

#[test]
fn emptied_group_signals_no_articles() {
    let dir = TempDir::new().unwrap();
    let mut spool = open_spool(&dir);
    add_group(&mut spool, "alt.test");
    let group_dir = spool.group_dir("alt.test").unwrap();

    let n = stored_number(store_text(
        &mut spool,
        &article_text("<only@test>", "alt.test", "s", ""),
    ));
    age_file(&group_dir.join(n.to_string()), ANCIENT);

    expire::run(&mut spool).unwrap();

    let entry = spool.active.find("alt.test").unwrap();
    assert_eq!(entry.first, entry.last + 1, "first = last+1 marks empty");
    assert_eq!(entry.count(), 0);
    // Still subscribed, so the directory chain stays
    assert!(group_dir.is_dir());

    spool.close().unwrap();
}

#[test]
fn uninteresting_empty_group_is_pruned() {
    let dir = TempDir::new().unwrap();
    let mut spool = open_spool(&dir);
    add_group(&mut spool, "alt.dead.group");
    let group_dir = spool.group_dir("alt.dead.group").unwrap();

    let n = stored_number(store_text(
        &mut spool,
        &article_text("<prune@test>", "alt.dead.group", "s", ""),
    ));
    age_file(&group_dir.join(n.to_string()), ANCIENT);

    // Unsubscribe before the sweep
    spool.unmark_interesting("alt.dead.group").unwrap();
    expire::run(&mut spool).unwrap();

    // The whole emptied chain is gone, including the parent that held
    // nothing else
    assert!(!group_dir.exists());
    assert!(!dir.path().join("alt").join("dead").exists());
    assert!(!dir.path().join("alt").exists());

    spool.close().unwrap();
}

#[test]
fn per_group_override_shortens_retention() {
    let dir = TempDir::new().unwrap();
    let mut config = relay_config();
    config.expire_days = 365;
    config.expire_overrides = vec![newspool::ExpireOverride {
        prefix: "alt.shortlived".to_string(),
        days: 1,
    }];
    let mut spool = open_spool_with(&dir, config);
    add_group(&mut spool, "alt.shortlived.chat");
    add_group(&mut spool, "alt.keep");

    let short_dir = spool.group_dir("alt.shortlived.chat").unwrap();
    let keep_dir = spool.group_dir("alt.keep").unwrap();

    let s = stored_number(store_text(
        &mut spool,
        &article_text("<s@test>", "alt.shortlived.chat", "s", ""),
    ));
    let k = stored_number(store_text(
        &mut spool,
        &article_text("<k@test>", "alt.keep", "s", ""),
    ));

    // Both are three days old; only the override group expires
    age_file(&short_dir.join(s.to_string()), 3 * 86_400);
    age_file(&keep_dir.join(k.to_string()), 3 * 86_400);

    expire::run(&mut spool).unwrap();

    assert!(!short_dir.join(s.to_string()).is_file());
    assert!(keep_dir.join(k.to_string()).is_file());

    spool.close().unwrap();
}

#[cfg(unix)]
#[test]
fn sweep_reclaims_only_unreferenced_store_entries() {
    let dir = TempDir::new().unwrap();
    let mut spool = open_spool(&dir);
    add_group(&mut spool, "alt.test");

    store_text(
        &mut spool,
        &article_text("<linked@test>", "alt.test", "s", ""),
    );

    // An orphan store entry with no group link
    let orphan_dir = spool.message_id_root().join("042");
    fs::create_dir_all(&orphan_dir).unwrap();
    fs::write(orphan_dir.join("<orphan@test>"), "abandoned").unwrap();

    let summary = expire::run(&mut spool).unwrap();

    assert_eq!(summary.swept, 1);
    assert!(!orphan_dir.join("<orphan@test>").exists());
    assert!(store::exists(&spool, "<linked@test>"), "referenced entry kept");

    spool.close().unwrap();
}

#[test]
fn self_heal_relinks_missing_store_entry() {
    let dir = TempDir::new().unwrap();
    let mut spool = open_spool(&dir);
    add_group(&mut spool, "alt.test");

    store_text(
        &mut spool,
        &article_text("<heal@test>", "alt.test", "s", ""),
    );

    // The store entry vanishes (disk accident); the group link survives
    let canonical = store::lookup(&spool, "<heal@test>").unwrap();
    fs::remove_file(&canonical).unwrap();
    assert!(!store::exists(&spool, "<heal@test>"));

    expire::run(&mut spool).unwrap();

    assert!(store::exists(&spool, "<heal@test>"), "entry relinked");

    spool.close().unwrap();
}

#[test]
fn expire_on_empty_spool_is_clean() {
    let dir = TempDir::new().unwrap();
    let mut spool = open_spool(&dir);

    let summary = expire::run(&mut spool).unwrap();
    assert_eq!(summary, expire::ExpireSummary::default());

    spool.close().unwrap();
}

#[test]
fn moderation_flag_does_not_block_expiry() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("local.groups"), "local.mod m Moderated\n").unwrap();
    let mut spool = open_spool_with(&dir, RelayConfig::new("relay.example.com"));
    spool.mark_interesting("local.mod").unwrap();

    let group_dir = spool.group_dir("local.mod").unwrap();
    let n = stored_number(store_text(
        &mut spool,
        &article_text("<mod@test>", "local.mod", "s", ""),
    ));
    age_file(&group_dir.join(n.to_string()), ANCIENT);

    expire::run(&mut spool).unwrap();
    assert!(!group_dir.join(n.to_string()).is_file());

    spool.close().unwrap();
}
