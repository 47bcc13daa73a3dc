//! Resource measurement wrapper: run one external process under the memory
//! probe, with a timeout, and report wall time and peak RSS.

use std::ffi::{OsStr, OsString};
use std::io::{self, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use caret_bench_core::{BenchError, BenchResult, UNKNOWN_RSS_MB};

use crate::probe::{self, MemoryProbe};

/// How long to keep reading output after the process exits, when the
/// deadline is already closer than this.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub wall_secs: f64,
    /// Peak RSS in MB, or [`UNKNOWN_RSS_MB`] if the probe reported nothing.
    pub peak_rss_mb: f64,
}

pub struct ResourceMeter {
    probe: Box<dyn MemoryProbe>,
}

impl ResourceMeter {
    pub fn new(probe: Box<dyn MemoryProbe>) -> Self {
        Self { probe }
    }

    pub fn detect() -> Self {
        Self::new(probe::detect())
    }

    pub fn probe(&self) -> &dyn MemoryProbe {
        self.probe.as_ref()
    }

    /// Run `program args` to completion or until `timeout`.
    ///
    /// A nonzero exit is not an error: the output and timings are returned
    /// and the caller decides. Exceeding `timeout` kills the process group
    /// and returns [`BenchError::Timeout`]. Anything the process left running
    /// in its group is killed once it exits.
    pub fn run(
        &self,
        program: &OsStr,
        args: &[OsString],
        timeout: Duration,
    ) -> BenchResult<ProcessOutput> {
        let mut cmd = self.probe.command(program, args);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate(&mut cmd);

        debug!(program = %program.to_string_lossy(), probe = self.probe.name(), "spawning");
        let start = Instant::now();
        let mut child = cmd.spawn()?;
        let pid = child.id();
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let (tx, rx) = mpsc::channel::<(io::Result<ExitStatus>, Instant)>();
        thread::spawn(move || {
            let status = child.wait();
            let _ = tx.send((status, Instant::now()));
        });

        let (status, finished) = match rx.recv_timeout(timeout) {
            Ok((status, finished)) => (status?, finished),
            Err(RecvTimeoutError::Timeout) => {
                kill_group(pid);
                warn!(
                    program = %program.to_string_lossy(),
                    "killed after {}s timeout",
                    timeout.as_secs_f64()
                );
                return Err(BenchError::Timeout {
                    program: program.to_string_lossy().into_owned(),
                    secs: timeout.as_secs(),
                });
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(io::Error::other("process waiter exited without a status").into());
            }
        };
        let wall_secs = finished.duration_since(start).as_secs_f64();

        // Background children would otherwise keep the pipes open and run
        // into the next measurement.
        #[cfg(unix)]
        kill_group(pid);

        let drain = (start + timeout)
            .saturating_duration_since(Instant::now())
            .max(DRAIN_GRACE);
        let stdout = collect(&stdout, drain, "stdout");
        let stderr = collect(&stderr, drain, "stderr");
        let peak_rss_mb = self
            .probe
            .parse_peak_mb(&stderr)
            .unwrap_or(UNKNOWN_RSS_MB);

        debug!(
            code = ?status.code(),
            wall_secs,
            peak_rss_mb,
            "process finished"
        );
        Ok(ProcessOutput {
            exit_code: status.code(),
            success: status.success(),
            stdout,
            stderr,
            wall_secs,
            peak_rss_mb,
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

fn collect(rx: &Receiver<String>, wait: Duration, stream: &str) -> String {
    match rx.recv_timeout(wait) {
        Ok(text) => text,
        Err(_) => {
            warn!("{stream} still open {}s after exit, dropping it", wait.as_secs_f64());
            String::new()
        }
    }
}

/// Own process group, so a timeout can take down the probe and everything
/// it started.
#[cfg(unix)]
fn isolate(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate(_cmd: &mut Command) {}

#[cfg(unix)]
fn kill_group(pid: u32) {
    // SAFETY: plain syscall on the process group `isolate` created. ESRCH
    // once the group is empty is expected and ignored.
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(pid: u32) {
    let _ = Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::probe::{parse_gnu_time, NoProbe};

    /// Runs the command as-is but reads a GNU-style report the command prints itself.
    struct EchoProbe;

    impl MemoryProbe for EchoProbe {
        fn name(&self) -> &str {
            "echo"
        }

        fn command(&self, program: &OsStr, args: &[OsString]) -> Command {
            let mut cmd = Command::new(program);
            cmd.args(args);
            cmd
        }

        fn parse_peak_mb(&self, stderr: &str) -> Option<f64> {
            parse_gnu_time(stderr)
        }
    }

    fn sh(script: &str) -> Vec<OsString> {
        vec!["-c".into(), script.into()]
    }

    #[test]
    fn test_sleep_wall_time_and_unknown_memory() {
        let meter = ResourceMeter::new(Box::new(NoProbe));
        let out = meter
            .run(OsStr::new("/bin/sh"), &sh("sleep 0.3"), Duration::from_secs(10))
            .unwrap();
        assert!(out.success);
        assert!(out.wall_secs >= 0.3, "wall = {}", out.wall_secs);
        assert!(out.wall_secs < 1.5, "wall = {}", out.wall_secs);
        assert_eq!(out.peak_rss_mb, UNKNOWN_RSS_MB);
    }

    #[test]
    fn test_nonzero_exit_still_reports() {
        let meter = ResourceMeter::new(Box::new(NoProbe));
        let out = meter
            .run(
                OsStr::new("/bin/sh"),
                &sh("echo partial; echo oops >&2; exit 3"),
                Duration::from_secs(10),
            )
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout, "partial\n");
        assert_eq!(out.stderr, "oops\n");
        assert!(out.wall_secs > 0.0);
    }

    #[test]
    fn test_probe_report_parsed() {
        let meter = ResourceMeter::new(Box::new(EchoProbe));
        let out = meter
            .run(
                OsStr::new("/bin/sh"),
                &sh("echo 'Maximum resident set size (kbytes): 2048' >&2"),
                Duration::from_secs(10),
            )
            .unwrap();
        assert_eq!(out.peak_rss_mb, 2.0);
    }

    #[test]
    fn test_timeout_kills_process() {
        let meter = ResourceMeter::new(Box::new(NoProbe));
        let start = Instant::now();
        let err = meter
            .run(
                OsStr::new("/bin/sh"),
                &sh("sleep 30"),
                Duration::from_millis(200),
            )
            .unwrap_err();
        assert!(matches!(err, BenchError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_missing_program_is_io_error() {
        let meter = ResourceMeter::new(Box::new(NoProbe));
        let err = meter
            .run(
                OsStr::new("/nonexistent/caret"),
                &[],
                Duration::from_secs(1),
            )
            .unwrap_err();
        assert!(matches!(err, BenchError::Io(_)));
    }

    #[test]
    fn test_large_output_does_not_block() {
        let meter = ResourceMeter::new(Box::new(NoProbe));
        let out = meter
            .run(
                OsStr::new("/bin/sh"),
                &sh("i=0; while [ $i -lt 20000 ]; do echo line-$i; i=$((i+1)); done"),
                Duration::from_secs(30),
            )
            .unwrap();
        assert_eq!(out.stdout.lines().count(), 20000);
    }

    #[test]
    fn test_background_child_does_not_outlive_timeout() {
        let meter = ResourceMeter::new(Box::new(NoProbe));
        let start = Instant::now();
        let result = meter.run(
            OsStr::new("/bin/sh"),
            &sh("sleep 8 & echo started"),
            Duration::from_secs(1),
        );
        assert!(
            start.elapsed() < Duration::from_secs(4),
            "took {:?}",
            start.elapsed()
        );
        let out = result.unwrap();
        assert!(out.success);
        assert_eq!(out.stdout, "started\n");
        assert!(out.wall_secs < 1.0, "wall = {}", out.wall_secs);
    }

    #[test]
    fn test_wall_time_tracks_exit_closely() {
        let meter = ResourceMeter::new(Box::new(NoProbe));
        let overshoot = (0..3)
            .map(|_| {
                let out = meter
                    .run(OsStr::new("/bin/sh"), &sh("sleep 0.03"), Duration::from_secs(10))
                    .unwrap();
                assert!(out.wall_secs >= 0.03, "wall = {}", out.wall_secs);
                out.wall_secs - 0.03
            })
            .fold(f64::INFINITY, f64::min);
        assert!(overshoot < 0.015, "best overshoot = {overshoot}");
    }

    #[test]
    fn test_real_time_reports_allocated_memory() {
        let real = probe::detect();
        if !real.is_available() {
            return;
        }
        let meter = ResourceMeter::new(real);
        // 64 MiB held in a shell variable for the life of the process
        let out = meter
            .run(
                OsStr::new("/bin/sh"),
                &sh("x=$(head -c 67108864 /dev/zero | tr '\\0' a); sleep 0.2; echo ${#x}"),
                Duration::from_secs(60),
            )
            .unwrap();
        assert!(out.success, "stderr: {}", out.stderr);
        assert_eq!(out.stdout.trim(), "67108864");
        assert!(out.peak_rss_mb >= 64.0, "peak = {} MB", out.peak_rss_mb);
        assert!(out.wall_secs >= 0.2, "wall = {}", out.wall_secs);
    }
}
