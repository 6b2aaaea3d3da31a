//! Process wrapper for `cryptsetup` invocations.
//!
//! Output is echoed to the operator's terminal as it arrives and captured
//! in full, so callers can parse the transcript afterwards.

use log::debug;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use vluks_core::error::{VluksError, VluksResult};

#[derive(Debug, Clone)]
pub(crate) struct CryptsetupCommand {
    binary: PathBuf,
    timeout: Duration,
}

#[derive(Debug)]
struct Output {
    stdout: String,
    stderr: String,
    status: i32,
}

impl Output {
    fn transcript(&self) -> String {
        let mut combined = self.stdout.clone();
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&self.stderr);
        combined
    }

    fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            stderr.to_string()
        } else {
            self.stdout.trim().to_string()
        }
    }
}

/// Where the child's stdin comes from.
enum Input<'a> {
    /// The operator's terminal, for the existing-passphrase prompt.
    Inherit,
    Bytes(&'a [u8]),
}

#[derive(Clone, Copy)]
enum Echo {
    Stdout,
    Stderr,
}

impl Echo {
    fn write(self, chunk: &[u8]) {
        let result = match self {
            Echo::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(chunk).and_then(|_| out.flush())
            }
            Echo::Stderr => {
                let mut err = io::stderr().lock();
                err.write_all(chunk).and_then(|_| err.flush())
            }
        };
        if let Err(err) = result {
            debug!("unable to echo cryptsetup output: {err}");
        }
    }
}

impl CryptsetupCommand {
    pub(crate) fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self { binary, timeout }
    }

    pub(crate) fn binary(&self) -> &Path {
        &self.binary
    }

    /// `cryptsetup -v luksAddKey <device> <keyfile>`; returns the combined transcript.
    pub(crate) fn add_key(&self, device: &str, keyfile: &Path) -> VluksResult<String> {
        let key_arg = keyfile.to_string_lossy().into_owned();
        let out = self.run(&["-v", "luksAddKey", device, &key_arg], Input::Inherit)?;
        if out.status == 0 {
            return Ok(out.transcript());
        }

        let message = classify_addkey_failure(device, &out.diagnostic());
        Err(VluksError::Tool(format!(
            "{message} (exit code {})",
            out.status
        )))
    }

    /// `cryptsetup -v token import <device>` with `token_json` on stdin.
    pub(crate) fn import_token(&self, device: &str, token_json: &[u8]) -> VluksResult<()> {
        let out = self.run(
            &["-v", "token", "import", device],
            Input::Bytes(token_json),
        )?;
        if out.status == 0 {
            return Ok(());
        }

        let message = classify_import_failure(device, &out.diagnostic());
        Err(VluksError::Tool(format!(
            "{message} (exit code {})",
            out.status
        )))
    }

    fn run(&self, args: &[&str], input: Input<'_>) -> VluksResult<Output> {
        debug!("running {} {}", self.binary.display(), args.join(" "));
        let mut command = Command::new(&self.binary);
        command.args(args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(match input {
            Input::Inherit => Stdio::inherit(),
            Input::Bytes(_) => Stdio::piped(),
        });

        let mut child = command.spawn().map_err(|err| {
            VluksError::Tool(format!(
                "unable to launch {}: {err}",
                self.binary.display()
            ))
        })?;

        let stdout_handle = spawn_tee_reader(child.stdout.take(), Echo::Stdout);
        let stderr_handle = spawn_tee_reader(child.stderr.take(), Echo::Stderr);
        let stdin_handle = match input {
            Input::Bytes(payload) => spawn_stdin_writer(child.stdin.take(), payload.to_vec()),
            Input::Inherit => None,
        };

        let exit_status = match self.wait_with_timeout(&mut child) {
            Ok(status) => status,
            Err(err) => {
                // Killing the child closes its stdin, which unblocks the writer.
                let _ = child.kill();
                let _ = child.wait();
                if let Some(handle) = stdin_handle {
                    let _ = handle.join();
                }
                return Err(match err {
                    WaitError::Io(err) => VluksError::Io(err),
                    WaitError::Expired => VluksError::Timeout(format!(
                        "{} {} (limit {}s)",
                        self.binary.display(),
                        args.iter()
                            .find(|arg| !arg.starts_with('-'))
                            .copied()
                            .unwrap_or_default(),
                        self.timeout.as_secs()
                    )),
                });
            }
        };

        if let Some(handle) = stdin_handle {
            handle
                .join()
                .map_err(|_| VluksError::Tool("stdin writer thread panicked".into()))??;
        }
        let stdout = stdout_handle
            .join()
            .map_err(|_| VluksError::Tool("stdout reader thread panicked".into()))??;
        let stderr = stderr_handle
            .join()
            .map_err(|_| VluksError::Tool("stderr reader thread panicked".into()))??;

        Ok(Output {
            stdout,
            stderr,
            status: exit_status.code().unwrap_or(-1),
        })
    }

    fn wait_with_timeout(&self, child: &mut Child) -> Result<ExitStatus, WaitError> {
        let start = Instant::now();
        while start.elapsed() <= self.timeout {
            if let Some(status) = child.try_wait().map_err(WaitError::Io)? {
                return Ok(status);
            }
            thread::sleep(Duration::from_millis(25));
        }
        Err(WaitError::Expired)
    }
}

enum WaitError {
    Io(io::Error),
    Expired,
}

/// Feed `payload` to the child from a separate thread so a child that never
/// reads stdin is still bounded by the timeout.
fn spawn_stdin_writer(
    stdin: Option<ChildStdin>,
    payload: Vec<u8>,
) -> Option<thread::JoinHandle<VluksResult<()>>> {
    let mut stdin = stdin?;
    Some(thread::spawn(move || -> VluksResult<()> {
        match stdin.write_all(&payload).and_then(|_| stdin.flush()) {
            Ok(()) => Ok(()),
            // The exit status explains why the child stopped reading.
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
            Err(err) => Err(VluksError::Io(err)),
        }
    }))
}

fn spawn_tee_reader<R>(pipe: Option<R>, echo: Echo) -> thread::JoinHandle<VluksResult<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || -> VluksResult<String> {
        let Some(mut reader) = pipe else {
            return Ok(String::new());
        };
        let mut captured = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            echo.write(&chunk[..read]);
            captured.extend_from_slice(&chunk[..read]);
        }
        Ok(String::from_utf8_lossy(&captured).into_owned())
    })
}

fn or_placeholder(diagnostic: &str) -> String {
    let trimmed = diagnostic.trim();
    if trimmed.is_empty() {
        "no additional output".to_string()
    } else {
        trimmed.to_string()
    }
}

fn mentions_permission(lower: &str) -> bool {
    lower.contains("permission denied")
        || lower.contains("operation not permitted")
        || lower.contains("not permitted")
}

fn mentions_missing_device(lower: &str) -> bool {
    lower.contains("no such file")
        || lower.contains("does not exist")
        || lower.contains("not found")
        || lower.contains("cannot open device")
}

fn classify_addkey_failure(device: &str, diagnostic: &str) -> String {
    let lower = diagnostic.to_ascii_lowercase();
    let diagnostic = or_placeholder(diagnostic);

    if lower.contains("no key available")
        || lower.contains("wrong key")
        || lower.contains("passphrase is incorrect")
        || lower.contains("invalid passphrase")
    {
        return format!(
            "cryptsetup rejected the existing passphrase for `{device}`: {diagnostic}. Re-enter a current LUKS passphrase and retry"
        );
    }

    if lower.contains("not a valid luks device") || lower.contains("is not a luks device") {
        return format!("`{device}` is not a LUKS device: {diagnostic}");
    }

    if lower.contains("no remaining keyslot")
        || lower.contains("no free key slot")
        || lower.contains("no free keyslot")
        || lower.contains("all key slots full")
    {
        return format!(
            "`{device}` has no free key slots: {diagnostic}. Remove an unused key slot before retrying"
        );
    }

    if mentions_permission(&lower) {
        return format!(
            "cryptsetup could not add a key slot to `{device}`: {diagnostic}. This usually requires root"
        );
    }

    if mentions_missing_device(&lower) {
        return format!(
            "cryptsetup could not access `{device}`: {diagnostic}. Confirm the device path is correct and present"
        );
    }

    format!("cryptsetup failed to add a key slot to `{device}`: {diagnostic}")
}

fn classify_import_failure(device: &str, diagnostic: &str) -> String {
    let lower = diagnostic.to_ascii_lowercase();
    let diagnostic = or_placeholder(diagnostic);

    if lower.contains("luks2") || lower.contains("not a valid luks device") {
        return format!(
            "`{device}` does not support tokens (LUKS2 header required): {diagnostic}"
        );
    }

    if lower.contains("token") && (lower.contains("in use") || lower.contains("already")) {
        return format!("`{device}` refused the token because its slot is taken: {diagnostic}");
    }

    if mentions_permission(&lower) {
        return format!(
            "cryptsetup could not write a token to `{device}`: {diagnostic}. This usually requires root"
        );
    }

    format!("cryptsetup failed to import the vluks token into `{device}`: {diagnostic}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_joins_both_streams() {
        let out = Output {
            stdout: "Key slot 1 created.".into(),
            stderr: "Command successful.\n".into(),
            status: 0,
        };
        assert_eq!(out.transcript(), "Key slot 1 created.\nCommand successful.\n");
    }

    #[test]
    fn diagnostic_prefers_stderr() {
        let out = Output {
            stdout: "verbose chatter".into(),
            stderr: "  Device /dev/sdz does not exist.\n".into(),
            status: 4,
        };
        assert_eq!(out.diagnostic(), "Device /dev/sdz does not exist.");
    }

    #[test]
    fn addkey_failures_are_classified() {
        assert!(classify_addkey_failure("/dev/sdz", "No key available with this passphrase.")
            .contains("rejected the existing passphrase"));
        assert!(classify_addkey_failure("/dev/sdz", "All key slots full.")
            .contains("no free key slots"));
        assert!(classify_addkey_failure("/dev/sdz", "Device /dev/sdz does not exist.")
            .contains("could not access"));
        assert!(classify_addkey_failure("/dev/sdz", "")
            .ends_with("no additional output"));
    }

    #[test]
    fn import_failures_are_classified() {
        assert!(classify_import_failure("/dev/sdz", "Device /dev/sdz is not a valid LUKS device.")
            .contains("LUKS2 header required"));
        assert!(classify_import_failure("/dev/sdz", "Token 0 is already in use.")
            .contains("slot is taken"));
        assert!(classify_import_failure("/dev/sdz", "Operation not permitted")
            .contains("requires root"));
    }
}
