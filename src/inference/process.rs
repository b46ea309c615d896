//! Subprocess inference backend.
//!
//! One OS process per call. On unix the child leads its own process group,
//! so a terminal Ctrl-C reaches only fall-audit and a kill reaches every
//! helper the child started. The child is wrapped in a guard that kills the
//! group and reaps the child on every exit path.

use super::{InferenceBackend, InvocationError};
use crate::config::{InferenceSettings, PromptChannel};
use crate::models::{PromptRequest, RawResponse};
use crate::{Error, Result};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// How often the child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Maximum number of stderr characters carried in a failure message.
const STDERR_TAIL_CHARS: usize = 500;

/// `CREATE_NO_WINDOW`: keeps a console window from flashing up per row.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Runs a `llamafile`-style executable once per prompt.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    settings: InferenceSettings,
}

/// Kills the child's process group and reaps the child when dropped.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    const fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        let status = self.child.try_wait()?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status)
    }

    fn terminate(&mut self) {
        self.kill_group();
        if self.reaped {
            return;
        }
        if let Err(e) = self.child.wait() {
            warn!(pid = self.child.id(), error = %e, "Failed to reap inference process");
        }
        self.reaped = true;
    }

    /// Sends `SIGKILL` to the group the child leads.
    ///
    /// The group outlives an exited leader while any member remains, so this
    /// still reaches descendants after the child itself has been reaped.
    #[cfg(unix)]
    fn kill_group(&mut self) {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let Ok(pgid) = i32::try_from(self.child.id()) else {
            self.kill_child();
            return;
        };
        match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {},
            Err(e) => {
                warn!(pgid, error = %e, "Failed to kill inference process group");
                self.kill_child();
            },
        }
    }

    #[cfg(not(unix))]
    fn kill_group(&mut self) {
        self.kill_child();
    }

    fn kill_child(&mut self) {
        if self.reaped {
            return;
        }
        if let Err(e) = self.child.kill() {
            warn!(pid = self.child.id(), error = %e, "Failed to kill inference process");
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl ProcessInvoker {
    /// Creates an invoker for the given settings.
    #[must_use]
    pub const fn new(settings: InferenceSettings) -> Self {
        Self { settings }
    }

    /// Returns the settings.
    #[must_use]
    pub const fn settings(&self) -> &InferenceSettings {
        &self.settings
    }

    /// Renders the argument template for one prompt.
    #[must_use]
    pub fn render_args(&self, prompt: &str) -> Vec<String> {
        let model = self
            .settings
            .model
            .as_ref()
            .map(|m| m.display().to_string())
            .unwrap_or_default();
        let temperature = self.settings.temperature.to_string();
        let values = [
            ("{model}", model.as_str()),
            ("{prompt}", prompt),
            ("{temperature}", temperature.as_str()),
        ];
        self.settings
            .args
            .iter()
            .map(|arg| substitute(arg, &values))
            .collect()
    }

    fn command(&self, prompt: &str) -> Command {
        let mut command = Command::new(&self.settings.executable);
        command
            .args(self.render_args(prompt))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        match self.settings.prompt_channel {
            PromptChannel::Stdin => command.stdin(Stdio::piped()),
            PromptChannel::Argument => command.stdin(Stdio::null()),
        };
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(CREATE_NO_WINDOW);
        }
        command
    }

    fn failure_message(&self, status: ExitStatus, stderr: &str) -> String {
        let exit = status
            .code()
            .map_or_else(|| "was terminated by a signal".to_string(), |code| {
                format!("exited with code {code}")
            });
        let executable = self.settings.executable.display();
        let tail = tail_chars(stderr.trim(), STDERR_TAIL_CHARS);
        if tail.is_empty() {
            format!("{executable} {exit}")
        } else {
            format!("{executable} {exit}: {tail}")
        }
    }

    /// Removes a prompt echoed ahead of the answer.
    ///
    /// An exact echo is cut off directly. Otherwise everything up to the last
    /// occurrence of the request's answer marker is dropped, which covers
    /// echoes that differ in whitespace or in how special tokens render.
    fn strip_echo<'a>(&self, stdout: &'a str, request: &PromptRequest) -> &'a str {
        if !self.settings.strip_prompt_echo {
            return stdout;
        }
        if let Some(answer) = stdout.strip_prefix(request.text()) {
            return answer;
        }
        request
            .answer_marker()
            .and_then(|marker| {
                stdout
                    .rfind(marker)
                    .map(|pos| &stdout[pos + marker.len()..])
            })
            .unwrap_or(stdout)
    }
}

impl InferenceBackend for ProcessInvoker {
    fn name(&self) -> &'static str {
        "process"
    }

    fn preflight(&self) -> Result<()> {
        let executable = &self.settings.executable;
        if locate_executable(executable).is_none() {
            return Err(Error::Setup(format!(
                "inference executable not found: {}",
                executable.display()
            )));
        }
        if let Some(model) = &self.settings.model
            && !model.is_file()
        {
            return Err(Error::Setup(format!(
                "model weights not found: {}",
                model.display()
            )));
        }
        Ok(())
    }

    fn run(
        &self,
        request: &PromptRequest,
        timeout: Duration,
    ) -> std::result::Result<RawResponse, InvocationError> {
        let span = tracing::info_span!(
            "inference.invoke",
            executable = %self.settings.executable.display(),
            timeout_ms = millis(timeout),
            truncated = request.was_truncated(),
        );
        let _enter = span.enter();
        let started = Instant::now();

        let child = self.command(request.text()).spawn().map_err(|e| {
            error!(error = %e, "Failed to start inference process");
            InvocationError::ProcessFailure(format!(
                "failed to start {}: {e}",
                self.settings.executable.display()
            ))
        })?;
        let mut guard = ChildGuard::new(child);
        debug!(pid = guard.child.id(), "Inference process started");

        if let Some(stdin) = guard.child.stdin.take() {
            spawn_writer(stdin, request.text().to_owned());
        }
        let stdout = guard.child.stdout.take().map(spawn_reader);
        let stderr = guard.child.stderr.take().map(spawn_reader);
        let deadline = deadline_after(started, timeout);

        let status = loop {
            match guard.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    guard.terminate();
                    warn!(
                        elapsed_ms = millis(started.elapsed()),
                        "Inference process timed out and was killed"
                    );
                    return Err(InvocationError::Timeout(timeout));
                },
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    error!(error = %e, "Failed to poll inference process");
                    return Err(InvocationError::ProcessFailure(format!(
                        "failed to wait for {}: {e}",
                        self.settings.executable.display()
                    )));
                },
            }
        };

        // A descendant can keep the pipes open after the child exits.
        let (Ok(stdout), Ok(stderr)) = (
            receive_output(stdout, deadline),
            receive_output(stderr, deadline),
        ) else {
            guard.terminate();
            warn!(
                elapsed_ms = millis(started.elapsed()),
                "Inference output still open at deadline; process group killed"
            );
            return Err(InvocationError::Timeout(timeout));
        };
        let elapsed_ms = millis(started.elapsed());

        if !status.success() {
            error!(
                exit_code = status.code(),
                elapsed_ms,
                "Inference process failed"
            );
            return Err(InvocationError::ProcessFailure(
                self.failure_message(status, &stderr),
            ));
        }

        debug!(elapsed_ms, stdout_bytes = stdout.len(), "Inference process finished");
        Ok(RawResponse::new(self.strip_echo(&stdout, request)))
    }
}

/// Replaces each placeholder in one pass, so substituted text is never rescanned.
fn substitute(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    'scan: while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        for (placeholder, value) in values {
            if let Some(after) = tail.strip_prefix(placeholder) {
                out.push_str(value);
                rest = after;
                continue 'scan;
            }
        }
        out.push('{');
        rest = &tail[1..];
    }
    out.push_str(rest);
    out
}

/// Resolves an executable path, searching `PATH` for bare names.
fn locate_executable(executable: &Path) -> Option<PathBuf> {
    if executable.is_file() {
        return Some(executable.to_path_buf());
    }
    if executable.components().count() != 1 {
        return None;
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(executable))
        .find(|candidate| candidate.is_file())
}

/// Writes the prompt on a detached thread; it ends once the pipe closes.
fn spawn_writer(mut stdin: std::process::ChildStdin, text: String) {
    thread::spawn(move || {
        // A child that exits without reading closes the pipe; that is not an error here.
        if let Err(e) = stdin.write_all(text.as_bytes()) {
            debug!(error = %e, "Prompt write to inference stdin ended early");
        }
    });
}

fn spawn_reader<R: Read + Send + 'static>(pipe: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone once the call has timed out.
        let _ = tx.send(read_all(pipe));
    });
    rx
}

fn read_all(mut pipe: impl Read) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf) {
        debug!(error = %e, "Inference output stream closed with error");
    }
    buf
}

/// Waits for a reader's output until `deadline`.
fn receive_output(
    output: Option<Receiver<Vec<u8>>>,
    deadline: Instant,
) -> std::result::Result<String, RecvTimeoutError> {
    let Some(rx) = output else {
        return Ok(String::new());
    };
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(RecvTimeoutError::Disconnected) => Ok(String::new()),
        Err(e) => Err(e),
    }
}

/// `start + budget`, capped for budgets too large to represent.
fn deadline_after(start: Instant, budget: Duration) -> Instant {
    start
        .checked_add(budget)
        .or_else(|| start.checked_add(Duration::from_secs(u64::from(u32::MAX))))
        .unwrap_or(start)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Returns at most the last `max_chars` characters of `s`.
fn tail_chars(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    let skip = count - max_chars;
    s.char_indices().nth(skip).map_or(s, |(idx, _)| &s[idx..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoker(args: &[&str]) -> ProcessInvoker {
        ProcessInvoker::new(
            InferenceSettings::new("/usr/bin/llm")
                .with_model("/models/qwen.gguf")
                .with_args(args.iter().copied()),
        )
    }

    #[test]
    fn test_render_default_args() {
        let invoker = ProcessInvoker::new(
            InferenceSettings::new("/usr/bin/llm").with_model("/models/qwen.gguf"),
        );
        let args = invoker.render_args("Did the resident fall?");
        assert_eq!(
            args,
            vec![
                "-m",
                "/models/qwen.gguf",
                "-p",
                "Did the resident fall?",
                "--temp",
                "0.03",
                "--no-display-prompt",
                "--log-disable",
            ]
        );
    }

    #[test]
    fn test_prompt_text_is_not_rescanned() {
        let args = invoker(&["--prompt={prompt}"]).render_args("note says {model}");
        assert_eq!(args, vec!["--prompt=note says {model}"]);
    }

    #[test]
    fn test_unknown_braces_left_alone() {
        assert_eq!(substitute("{x}{", &[("{model}", "m")]), "{x}{");
        assert_eq!(substitute("a{model}b", &[("{model}", "m")]), "amb");
    }

    #[test]
    fn test_tail_chars() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("abc", 10), "abc");
        assert_eq!(tail_chars("ééé", 2), "éé");
    }

    #[test]
    fn test_strip_echo() {
        let invoker = invoker(&["{prompt}"]);
        let request = PromptRequest::new("PROMPT", false);
        assert_eq!(invoker.strip_echo("PROMPT true", &request), " true");
        assert_eq!(invoker.strip_echo("true", &request), "true");

        let keep = ProcessInvoker::new(
            InferenceSettings::new("/usr/bin/llm").with_strip_prompt_echo(false),
        );
        assert_eq!(keep.strip_echo("PROMPT true", &request), "PROMPT true");
    }

    #[test]
    fn test_strip_inexact_echo_at_answer_marker() {
        let invoker = invoker(&["{prompt}"]);
        let request =
            PromptRequest::new("Q: true or false?\nA:\n", false).with_answer_marker("A:");

        // Rendered with different whitespace, so the exact prefix does not match
        assert_eq!(
            invoker.strip_echo("  Q: true or false?\r\nA:\r\nfalse", &request),
            "\r\nfalse"
        );
        // Only the last marker counts
        assert_eq!(invoker.strip_echo("A: A: true", &request), " true");
        // No marker: left alone
        assert_eq!(invoker.strip_echo("false", &request), "false");
        assert_eq!(
            invoker.strip_echo(" Q: true or false?", &PromptRequest::new("Q:", false)),
            " Q: true or false?"
        );
    }

    #[test]
    fn test_deadline_after_huge_budget() {
        let start = Instant::now();
        assert!(deadline_after(start, Duration::MAX) > start);
        assert_eq!(
            deadline_after(start, Duration::from_millis(5)),
            start + Duration::from_millis(5)
        );
    }

    #[test]
    fn test_preflight_rejects_missing_executable() {
        let invoker = ProcessInvoker::new(InferenceSettings::new(
            "/nonexistent/fall-audit/llamafile",
        ));
        assert!(matches!(invoker.preflight(), Err(Error::Setup(_))));
    }

    #[test]
    fn test_preflight_rejects_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("llm");
        std::fs::write(&exe, b"").unwrap();

        let invoker = ProcessInvoker::new(
            InferenceSettings::new(&exe).with_model(dir.path().join("missing.gguf")),
        );
        let err = invoker.preflight().unwrap_err();
        assert!(err.to_string().contains("model weights not found"));
    }
}
