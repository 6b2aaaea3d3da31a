use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};
use vluks_core::config::VluksConfig;
use vluks_core::error::{VluksError, VluksResult};
use vluks_core::{parse_slot_confirmation, VluksToken};
use vluks_luks::SystemLuksTool;
use vluks_provider::LuksTool;

fn write_executable(path: &Path, contents: &str) -> VluksResult<()> {
    fs::write(path, contents)?;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)?;
    Ok(())
}

struct FakeHost {
    _dir: TempDir,
    log: PathBuf,
    token_capture: PathBuf,
    config: VluksConfig,
}

/// Install a fake `cryptsetup` whose behaviour is the given `body`.
///
/// `$LOG` receives each invocation's arguments; `$CAPTURE` is a scratch file
/// for stdin payloads.
fn fake_host(body: &str, timeout_secs: u64) -> VluksResult<FakeHost> {
    let dir = tempdir()?;
    let log = dir.path().join("cryptsetup.log");
    let token_capture = dir.path().join("token.json");
    let binary = dir.path().join("cryptsetup");
    write_executable(
        &binary,
        &format!(
            "#!/bin/sh\nLOG=\"{log}\"\nCAPTURE=\"{capture}\"\necho \"$*\" >> \"$LOG\"\n{body}\n",
            log = log.display(),
            capture = token_capture.display(),
        ),
    )?;

    let mut config = VluksConfig::default();
    config.luks.cryptsetup_path = Some(binary.to_string_lossy().into_owned());
    config.luks.timeout_secs = timeout_secs;
    Ok(FakeHost {
        _dir: dir,
        log,
        token_capture,
        config,
    })
}

#[test]
fn add_key_returns_verbose_transcript() -> VluksResult<()> {
    let host = fake_host(
        r#"echo "Key slot 3 created."
echo "Command successful." 1>&2
exit 0"#,
        10,
    )?;
    let tool = SystemLuksTool::from_config(&host.config)?;

    let transcript = tool.add_key("/dev/sdz", Path::new("/tmp/vluks-key"))?;
    assert_eq!(parse_slot_confirmation(&transcript), Some("3".to_string()));
    assert!(transcript.contains("Command successful."));
    assert_eq!(
        fs::read_to_string(&host.log)?.trim(),
        "-v luksAddKey /dev/sdz /tmp/vluks-key"
    );
    Ok(())
}

#[test]
fn add_key_failure_is_classified() -> VluksResult<()> {
    let host = fake_host(
        r#"echo "No key available with this passphrase." 1>&2
exit 2"#,
        10,
    )?;
    let tool = SystemLuksTool::from_config(&host.config)?;

    match tool.add_key("/dev/sdz", Path::new("/tmp/vluks-key")) {
        Err(VluksError::Tool(message)) => {
            assert!(message.contains("rejected the existing passphrase"), "{message}");
            assert!(message.ends_with("(exit code 2)"), "{message}");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    Ok(())
}

#[test]
fn token_document_is_fed_on_stdin() -> VluksResult<()> {
    let host = fake_host(r#"cat > "$CAPTURE"
exit 0"#, 10)?;
    let tool = SystemLuksTool::from_config(&host.config)?;
    let token = VluksToken::new("3", "vault:v1:W").to_json()?;

    tool.import_token("/dev/sdz", &token)?;

    assert_eq!(
        fs::read_to_string(&host.log)?.trim(),
        "-v token import /dev/sdz"
    );
    let imported: serde_json::Value = serde_json::from_slice(&fs::read(&host.token_capture)?)?;
    assert_eq!(
        imported,
        serde_json::json!({
            "type": "vluks",
            "keyslots": ["3"],
            "ciphertext": "vault:v1:W"
        })
    );
    Ok(())
}

#[test]
fn token_import_failure_is_a_tool_error() -> VluksResult<()> {
    let host = fake_host(
        r#"cat > /dev/null
echo "Device /dev/sdz is not a valid LUKS device." 1>&2
exit 1"#,
        10,
    )?;
    let tool = SystemLuksTool::from_config(&host.config)?;

    let err = tool.import_token("/dev/sdz", b"{}\n").unwrap_err();
    assert!(matches!(err, VluksError::Tool(ref m) if m.contains("LUKS2 header required")));
    Ok(())
}

#[test]
fn hung_cryptsetup_is_killed_after_timeout() -> VluksResult<()> {
    let host = fake_host("sleep 10\nexit 0", 1)?;
    let tool = SystemLuksTool::from_config(&host.config)?;

    let err = tool.add_key("/dev/sdz", Path::new("/tmp/vluks-key")).unwrap_err();
    assert!(matches!(err, VluksError::Timeout(_)), "{err:?}");
    Ok(())
}

#[test]
fn token_import_that_never_reads_stdin_times_out() -> VluksResult<()> {
    let host = fake_host("exec sleep 10", 1)?;
    let tool = SystemLuksTool::from_config(&host.config)?;
    // Larger than a pipe buffer, so the write cannot complete on its own.
    let payload = vec![b' '; 1 << 20];

    let started = Instant::now();
    let err = tool.import_token("/dev/sdz", &payload).unwrap_err();
    assert!(matches!(err, VluksError::Timeout(_)), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(8));
    Ok(())
}

#[test]
fn configured_binary_must_exist() {
    let mut config = VluksConfig::default();
    config.luks.cryptsetup_path = Some("/nonexistent/cryptsetup".into());
    assert!(matches!(
        SystemLuksTool::from_config(&config),
        Err(VluksError::InvalidConfig(_))
    ));
}
