use std::fs::File;
use std::io::Write;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::{
    Arg, Cmd, Error, Item, NullFile, Result, SharedWrite, Stage, cmd, items, list, map,
    shared_list,
};

fn captured() -> (Arc<Mutex<Vec<u8>>>, Stage) {
    let buf = Arc::new(Mutex::new(Vec::<u8>::new()));
    let sink: SharedWrite = buf.clone();
    (buf, Stage::Write(sink))
}

#[test]
fn macro_maps_underscores_to_dashes() {
    let cmd = cmd!(git_status);
    assert_eq!(cmd.args, vec![Arg::Str("git-status".into())]);
}

#[test]
fn builder_is_curried() {
    let base = Cmd::new("grep").arg("-n");
    let derived = base.clone().arg("pattern").error_level(2);
    assert_eq!(base.args.len(), 2);
    assert_eq!(derived.args.len(), 3);
}

#[test]
fn call_returns_exit_code() {
    assert_eq!(Cmd::new("true").call().unwrap(), 0);
    assert_eq!(Cmd::new("false").call().unwrap(), 1);
}

#[test]
fn echo_writes_exact_bytes() {
    let (buf, sink) = captured();
    (cmd!(echo, "Hello, World!") >> sink).unwrap();
    assert_eq!(&*buf.lock().unwrap(), b"Hello, World!\n");
}

#[test]
fn echo_through_rev() {
    let (buf, sink) = captured();
    (cmd!(echo, "Hello, World!") / cmd!(rev) >> sink).unwrap();
    assert_eq!(&*buf.lock().unwrap(), b"!dlroW ,olleH\n");
}

#[test]
fn integers_flow_through_rev_as_floats() {
    let to_float = map(|x| Item::Float(x.to_string().trim().parse().unwrap()));
    let out = (items([128, 129, 130, 131]) / cmd!(rev) / to_float)
        .collect_items()
        .unwrap();
    assert_eq!(
        out,
        vec![
            Item::Float(821.0),
            Item::Float(921.0),
            Item::Float(31.0),
            Item::Float(131.0),
        ]
    );
}

#[test]
fn shell_lines_through_closure_into_list() {
    let target = shared_list();
    target.lock().unwrap().push(Item::from("stale"));
    let tag = map(|x| Item::Text(format!("@{}", x)));
    (cmd!(sh, "-c", "echo aaa; echo bbb; echo ccc") / tag >> list(&target)).unwrap();
    assert_eq!(
        *target.lock().unwrap(),
        vec![
            Item::from("@aaa\n"),
            Item::from("@bbb\n"),
            Item::from("@ccc\n"),
        ]
    );
}

#[test]
fn error_level_converts_exit_codes() {
    let err = Cmd::new("false").error_level(1).call().unwrap_err();
    match err {
        Error::ChildFailed { code, cmd } => {
            assert_eq!(code, 1);
            assert_eq!(cmd, "false");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    // Below the threshold nothing happens.
    assert_eq!(Cmd::new("true").error_level(1).call().unwrap(), 0);
}

#[test]
fn producer_yields_lines_with_newlines() {
    let lines: Vec<Item> = cmd!(sh, "-c", "echo a; echo b")
        .producer()
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(lines, vec![Item::from("a\n"), Item::from("b\n")]);
}

#[test]
fn producer_rejects_overridden_stdout() {
    let err = cmd!(echo, "x").stdout(NullFile).producer().unwrap_err();
    assert!(matches!(err, Error::StdoutOverridden));
}

#[test]
fn consumer_rejects_overridden_stdin() {
    let err = cmd!(cat).stdin("data").consumer().unwrap_err();
    assert!(matches!(err, Error::StdinOverridden));
}

#[test]
fn consumer_feeds_child_stdin() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("out");
    let mut consumer = cmd!(cat)
        .stdout(File::create(&path).unwrap())
        .consumer()
        .unwrap();
    consumer.write_all(b"fed through a pipe\n").unwrap();
    let status = consumer.close().unwrap();
    assert!(status.success());
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "fed through a pipe\n"
    );
}

#[test]
fn string_stdin_is_pumped_as_one_item() {
    let lines: Vec<Item> = cmd!(cat)
        .stdin("no trailing newline")
        .producer()
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(lines, vec![Item::from("no trailing newline")]);
}

#[test]
fn env_is_passed_through() {
    let lines: Vec<Item> = cmd!(sh, "-c", "echo $CMDFLOW_TEST")
        .env("CMDFLOW_TEST", "marker")
        .producer()
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(lines, vec![Item::from("marker\n")]);
}

#[test]
fn env_remove_hides_variable() {
    // SAFETY: test-local mutation; no other thread reads this variable.
    unsafe { std::env::set_var("CMDFLOW_GONE", "present") };
    let lines: Vec<Item> = cmd!(sh, "-c", "echo x$CMDFLOW_GONE")
        .env_remove("CMDFLOW_GONE")
        .producer()
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(lines, vec![Item::from("x\n")]);
}

#[test]
fn cwd_changes_working_directory() {
    let tmp = TempDir::new().unwrap();
    let lines: Vec<Item> = cmd!(pwd).cwd(tmp.path()).producer().unwrap()
        .collect::<Result<_>>()
        .unwrap();
    let expected = format!("{}\n", tmp.path().canonicalize().unwrap().display());
    assert_eq!(lines, vec![Item::Text(expected)]);
}

#[test]
fn shell_builder_runs_through_sh() {
    let lines: Vec<Item> = Cmd::shell("echo via shell")
        .producer()
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(lines, vec![Item::from("via shell\n")]);
}

#[test]
fn byte_mode_yields_raw_lines() {
    let lines: Vec<Item> = cmd!(echo, "raw")
        .universal_newlines(false)
        .producer()
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(lines, vec![Item::Bytes(b"raw\n".to_vec())]);
}

#[test]
fn cmd_as_sink_consumes_upstream() {
    // `wc -l` inherits stdout; discard it via the null device to keep
    // test output clean, and rely on the exit status.
    let quiet = cmd!(wc, "-l").stdout(NullFile).error_level(1);
    (items(["a\n", "b\n"]) >> quiet).unwrap();
}
