//! Subprocess backend tests against `/bin/sh`.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
#![cfg(unix)]

use fall_audit::{
    BatchRunner, CancellationToken, Error, InferenceBackend, InferenceSettings, InvocationError,
    NoProgress, Note, ProcessInvoker, PromptBuilder, PromptChannel, PromptRequest, RowState,
    Verdict,
};
use std::time::{Duration, Instant};

const BUDGET: Duration = Duration::from_secs(10);

fn shell(script: &str) -> InferenceSettings {
    InferenceSettings::new("/bin/sh").with_args(["-c", script, "sh", "{prompt}"])
}

fn run(settings: InferenceSettings, prompt: &str) -> Result<String, InvocationError> {
    ProcessInvoker::new(settings)
        .run(&PromptRequest::new(prompt, false), BUDGET)
        .map(|r| r.as_str().to_string())
}

#[test]
fn test_prompt_passed_as_argument() {
    let output = run(shell("printf '%s' \"$1\" | tr a-z A-Z"), "did they fall").unwrap();
    assert_eq!(output, "DID THEY FALL");
}

#[test]
fn test_echoed_prompt_is_stripped() {
    let output = run(shell("printf '%s\\ntrue\\n' \"$1\""), "PROMPT").unwrap();
    assert_eq!(output, "\ntrue\n");

    let kept = run(
        shell("printf '%s\\ntrue\\n' \"$1\"").with_strip_prompt_echo(false),
        "PROMPT",
    )
    .unwrap();
    assert_eq!(kept, "PROMPT\ntrue\n");
}

#[test]
fn test_prompt_written_to_stdin() {
    let settings = InferenceSettings::new("/bin/sh")
        .with_args(["-c", "tr a-z A-Z"])
        .with_prompt_channel(PromptChannel::Stdin)
        .with_strip_prompt_echo(false);
    assert_eq!(run(settings, "no fall").unwrap(), "NO FALL");
}

#[test]
fn test_large_stdin_prompt_does_not_deadlock() {
    let prompt = "resident ".repeat(50_000);
    let settings = InferenceSettings::new("/bin/sh")
        .with_args(["-c", "cat"])
        .with_prompt_channel(PromptChannel::Stdin)
        .with_strip_prompt_echo(false);
    assert_eq!(run(settings, &prompt).unwrap().len(), prompt.len());
}

#[test]
fn test_child_ignoring_stdin_still_succeeds() {
    let prompt = "x".repeat(1_000_000);
    let settings = InferenceSettings::new("/bin/sh")
        .with_args(["-c", "echo false"])
        .with_prompt_channel(PromptChannel::Stdin);
    assert_eq!(run(settings, &prompt).unwrap(), "false\n");
}

#[test]
fn test_empty_output_is_success() {
    assert_eq!(run(shell("true"), "note").unwrap(), "");
}

#[test]
fn test_non_zero_exit_carries_code_and_stderr() {
    let err = run(shell("echo 'model load failed' >&2; exit 3"), "note").unwrap_err();
    let InvocationError::ProcessFailure(message) = err else {
        panic!("expected process failure, got {err:?}");
    };
    assert!(message.contains("exited with code 3"), "{message}");
    assert!(message.contains("model load failed"), "{message}");
}

#[test]
fn test_missing_executable_is_process_failure() {
    let settings = InferenceSettings::new("/nonexistent/fall-audit/llamafile")
        .with_args(["{prompt}"]);
    let err = run(settings, "note").unwrap_err();
    assert!(err.to_string().starts_with("process failure: failed to start"));
}

#[test]
fn test_timeout_kills_process() {
    let invoker = ProcessInvoker::new(shell("exec sleep 30"));
    let started = Instant::now();

    let err = invoker
        .run(&PromptRequest::new("note", false), Duration::from_millis(200))
        .unwrap_err();

    assert_eq!(err, InvocationError::Timeout(Duration::from_millis(200)));
    assert!(err.to_string().starts_with("timeout"));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_preflight() {
    let ok = ProcessInvoker::new(shell("true"));
    assert!(ok.preflight().is_ok());

    let missing = ProcessInvoker::new(
        InferenceSettings::new("/nonexistent/fall-audit/llamafile").with_args(["{prompt}"]),
    );
    assert!(matches!(missing.preflight(), Err(Error::Setup(_))));
}

#[test]
fn test_batch_over_real_processes() {
    // Answers "true" only for notes mentioning a fall; row 2 times out.
    let script = r#"case "$1" in
        *sleep*) exec sleep 30 ;;
        *fell*) echo true ;;
        *) echo false ;;
    esac"#;
    let runner = BatchRunner::new(
        ProcessInvoker::new(shell(script).with_strip_prompt_echo(false)),
        PromptBuilder::new(500).with_template("{note}").unwrap(),
        Duration::from_millis(300),
    );
    let notes = [
        Note::new("Resident fell in bathroom at 3pm"),
        Note::new("Resident wanted to sleep early"),
        Note::new("Resident slept well"),
        Note::new(""),
    ];

    let report = runner
        .process(&notes, &mut NoProgress, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.rows.len(), 4);
    assert_eq!(report.rows[0].verdict, Verdict::Fall);
    assert_eq!(report.rows[1].state, RowState::Errored);
    assert!(report.rows[1].verdict.reason().unwrap().starts_with("timeout"));
    assert_eq!(report.rows[2].verdict, Verdict::NoFall);
    assert_eq!(report.rows[3].verdict, Verdict::NoFall);
}

#[test]
fn test_background_helper_holding_output_times_out() {
    // The shell exits at once but its background job keeps stdout open
    let invoker = ProcessInvoker::new(shell("sleep 5 & echo true"));
    let started = Instant::now();

    let err = invoker
        .run(&PromptRequest::new("note", false), Duration::from_millis(300))
        .unwrap_err();

    assert_eq!(err, InvocationError::Timeout(Duration::from_millis(300)));
    assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
}

#[test]
fn test_timeout_kills_descendants() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("still-running");
    let script = format!("(sleep 1; touch '{}') & wait", marker.display());
    let invoker = ProcessInvoker::new(shell(&script));

    let err = invoker
        .run(&PromptRequest::new("note", false), Duration::from_millis(200))
        .unwrap_err();
    assert!(matches!(err, InvocationError::Timeout(_)));

    std::thread::sleep(Duration::from_millis(1_500));
    assert!(!marker.exists(), "descendant outlived the timed-out call");
}

#[cfg(target_os = "linux")]
#[test]
fn test_child_leads_its_own_process_group() {
    // Field 5 of /proc/<pid>/stat is the process group id
    let script = r#"pgrp=$(cut -d' ' -f5 /proc/$$/stat)
        if [ "$pgrp" = "$$" ]; then echo true; else echo false; fi"#;
    let output = run(shell(script).with_strip_prompt_echo(false), "note").unwrap();
    assert_eq!(output.trim(), "true");
}

#[test]
fn test_inexact_echo_of_default_prompt_is_stripped() {
    // Echo carries a leading space, so it is not a byte-exact prefix
    let runner = BatchRunner::new(
        ProcessInvoker::new(shell("printf ' %s\\ntrue\\n' \"$1\"")),
        PromptBuilder::new(500),
        BUDGET,
    );
    let notes = [Note::new("Resident found on floor beside bed")];

    let report = runner
        .process(&notes, &mut NoProgress, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.rows[0].state, RowState::Classified);
    assert_eq!(report.rows[0].verdict, Verdict::Fall);
}
