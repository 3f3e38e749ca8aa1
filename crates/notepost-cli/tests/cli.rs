use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::Builder::new()
            .prefix("notepost-cli")
            .tempdir()
            .expect("create temp dir");
        std::fs::create_dir_all(dir.path().join("vault")).expect("create vault");
        Self { dir }
    }

    fn vault(&self) -> PathBuf {
        self.dir.path().join("vault")
    }

    fn state_path(&self) -> PathBuf {
        self.dir.path().join("state").join("state.json")
    }

    fn write_note(&self, path: &str, content: &str) {
        let full = self.vault().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("create note dir");
        }
        std::fs::write(full, content).expect("write note");
    }

    fn state(&self) -> serde_json::Value {
        let raw = std::fs::read_to_string(self.state_path()).expect("read state");
        serde_json::from_str(&raw).expect("parse state")
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_notepost"))
            .arg("--vault")
            .arg(self.vault())
            .arg("--state")
            .arg(self.state_path())
            .args(args)
            // nothing here should reach the network
            .env("NOTEPOST_API_URL", "http://127.0.0.1:9")
            .env("RUST_LOG", "off")
            .env("NO_COLOR", "1")
            .output()
            .expect("run notepost")
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "notepost failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn exists(path: &Path) -> bool {
    path.try_exists().unwrap_or(false)
}

#[test]
fn reconcile_adopts_notes_with_a_published_link() {
    let ws = Workspace::new();
    ws.write_note(
        "a.md",
        "---\nshare_link: https://notepost.test/abc\nshare_expires: never\n---\nA",
    );
    ws.write_note("b.md", "no header");

    let output = ws.run(&["reconcile"]);
    assert_success(&output);
    assert_eq!(stdout(&output), "a.md\n");

    let records = ws.run(&["records"]);
    assert_success(&records);
    assert_eq!(stdout(&records), "a.md\thttps://notepost.test/abc\taccount\n");
}

#[test]
fn moving_a_note_keeps_its_record() {
    let ws = Workspace::new();
    ws.write_note("a.md", "---\nshare_link: https://notepost.test/abc\n---\nA");

    let output = ws.run(&["mv", "a.md", "notes/b.md"]);
    assert_success(&output);
    assert!(exists(&ws.vault().join("notes").join("b.md")));
    assert!(!exists(&ws.vault().join("a.md")));

    let records = ws.run(&["records"]);
    assert_eq!(
        stdout(&records),
        "notes/b.md\thttps://notepost.test/abc\taccount\n"
    );
    let state = ws.state();
    assert!(state["publishedNotes"]["a.md"].is_null());
    assert_eq!(state["publishedNotes"]["notes/b.md"]["slug"], "abc");
}

#[test]
fn removing_a_note_drops_its_record() {
    let ws = Workspace::new();
    ws.write_note("a.md", "---\nshare_link: https://notepost.test/abc\n---\nA");
    ws.write_note("keep.md", "---\nshare_link: https://notepost.test/keep\n---\nK");

    assert_success(&ws.run(&["rm", "a.md"]));
    assert!(!exists(&ws.vault().join("a.md")));
    assert_eq!(
        stdout(&ws.run(&["records"])),
        "keep.md\thttps://notepost.test/keep\taccount\n"
    );
}

#[test]
fn settings_are_persisted() {
    let ws = Workspace::new();
    let output = ws.run(&["settings", "--strip-tags", "true", "--auto-copy", "false"]);
    assert_success(&output);
    assert_eq!(
        stdout(&output),
        "strip-tags: true\nauto-copy: false\nmirror-metadata: true\naccount: anonymous\n"
    );

    let state = ws.state();
    assert_eq!(state["settings"]["stripTags"], true);
    assert_eq!(state["settings"]["autoCopy"], false);
    assert!(state["deviceFingerprint"].is_string());
}

#[test]
fn disabled_mirroring_skips_reconciliation() {
    let ws = Workspace::new();
    assert_success(&ws.run(&["settings", "--mirror-metadata", "false"]));
    ws.write_note("a.md", "---\nshare_link: https://notepost.test/abc\n---\nA");

    let output = ws.run(&["reconcile"]);
    assert_success(&output);
    assert_eq!(stdout(&output), "");
    assert_eq!(stdout(&ws.run(&["records"])), "");
}

#[test]
fn invalid_api_key_is_rejected() {
    let ws = Workspace::new();
    let output = ws.run(&["login", "short"]);
    assert!(!output.status.success());
    assert!(ws.state()["settings"]["apiKey"].is_null());
}

#[test]
fn status_without_key_stays_offline() {
    let ws = Workspace::new();
    let output = ws.run(&["status"]);
    assert_success(&output);
    assert_eq!(
        stdout(&output),
        "account: anonymous\nlinks: expiring\ntracked notes: 0\n"
    );
}

#[test]
fn unpublishing_an_untracked_note_is_a_no_op() {
    let ws = Workspace::new();
    ws.write_note("a.md", "A");
    let output = ws.run(&["unpublish", "a.md", "--yes"]);
    assert_success(&output);
    assert!(String::from_utf8_lossy(&output.stderr).contains("a.md is not published"));
}

#[test]
fn account_commands_need_a_key() {
    let ws = Workspace::new();
    assert!(!ws.run(&["portal"]).status.success());
    assert!(!ws.run(&["list"]).status.success());
}

#[test]
fn missing_vault_fails() {
    let ws = Workspace::new();
    let output = Command::new(env!("CARGO_BIN_EXE_notepost"))
        .arg("--vault")
        .arg(ws.dir.path().join("nope"))
        .arg("--state")
        .arg(ws.state_path())
        .arg("records")
        .env("RUST_LOG", "off")
        .output()
        .expect("run notepost");
    assert!(!output.status.success());
    assert!(!exists(&ws.state_path()));
}
