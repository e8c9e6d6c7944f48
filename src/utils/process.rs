use std::{
    io::Read,
    process::{Command, ExitStatus, Stdio},
    thread::JoinHandle,
    time::{Duration, Instant},
};

pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

fn spawn_reader(stream: Option<impl Read + Send + 'static>) -> Option<JoinHandle<String>> {
    let mut stream = stream?;
    Some(std::thread::spawn(move || {
        let mut bytes = Vec::new();
        _ = stream.read_to_end(&mut bytes);
        String::from_utf8_lossy(&bytes).into_owned()
    }))
}

fn join_reader(reader: Option<JoinHandle<String>>) -> String {
    reader
        .and_then(|reader| reader.join().ok())
        .unwrap_or_default()
}

/// Runs `cmd` capturing stdout and stderr. Both pipes are drained by
/// reader threads while the process runs so a process with big output
/// never blocks on a full pipe. Process is killed after `timeout`
pub fn run_with_timeout(
    mut cmd:     Command,
    timeout:     Duration,
    poll_period: Duration,
) -> anyhow::Result<ProcessOutput> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd.spawn().map_err(|e|
        anyhow::format_err!("{} when trying to execute {}", e, program)
    )?;

    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let start_time = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(err) => {
                _ = child.kill();
                _ = child.wait();
                anyhow::bail!("Waiting for {} failed: {}", program, err);
            }
        }
        if start_time.elapsed() > timeout {
            _ = child.kill();
            _ = child.wait();
            // readers are not joined: children of killed process
            // may still hold the pipes open
            anyhow::bail!("{} timed out after {:?}", program, timeout);
        }
        std::thread::sleep(poll_period);
    };

    Ok(ProcessOutput {
        status,
        stdout: join_reader(stdout_reader),
        stderr: join_reader(stderr_reader),
    })
}

#[cfg(unix)]
#[test]
fn test_run_with_big_output() {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg("yes 'Mount 1.CONNECTION.CONNECT=On' | head -n 8000; echo done >&2");
    let start = Instant::now();
    let output = run_with_timeout(cmd, Duration::from_secs(10), Duration::from_millis(10)).unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(output.status.success());
    assert_eq!(output.stdout.lines().count(), 8000);
    assert_eq!(output.stderr.trim(), "done");
}

#[cfg(unix)]
#[test]
fn test_run_with_timeout_kills() {
    let mut cmd = Command::new("sleep");
    cmd.arg("5");
    let start = Instant::now();
    let result = run_with_timeout(cmd, Duration::from_millis(100), Duration::from_millis(10));
    assert!(result.is_err());
    assert!(start.elapsed() < Duration::from_secs(3));

    let cmd = Command::new("mount_fleet_no_such_program");
    assert!(run_with_timeout(cmd, Duration::from_secs(1), Duration::from_millis(10)).is_err());
}
