//! Boundary to the `rtl_power` binary.
//!
//! `rtl_power` does the actual tuning, FFT and averaging and writes one CSV
//! row per frequency hop. We only start it, wait for it and kill it when asked
//! to stop.

use std::{
    ffi::OsString,
    fmt::Display,
    path::{
        Path,
        PathBuf,
    },
    process::Stdio,
    str::FromStr,
    time::Duration,
};

use tokio::{
    io::{
        AsyncBufReadExt,
        BufReader,
    },
    process::{
        ChildStderr,
        Command,
    },
};
use tokio_util::sync::CancellationToken;

use crate::Error;

/// Frequency range argument for `rtl_power -f`: `low:high:bin_width`, in Hz.
///
/// Values can be given with `k`, `M` or `G` suffixes like `rtl_power`
/// accepts them, e.g. `88M:108M:125k`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrequencyRange {
    pub low: u64,
    pub high: u64,
    pub bin_width: u64,
}

impl Display for FrequencyRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.low, self.high, self.bin_width)
    }
}

impl FromStr for FrequencyRange {
    type Err = FrequencyRangeFromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || {
            FrequencyRangeFromStrError {
                input: s.to_owned(),
            }
        };

        let mut parts = s.split(':');
        let mut next = || parts.next().and_then(parse_frequency).ok_or_else(err);
        let low = next()?;
        let high = next()?;
        let bin_width = next()?;
        if parts.next().is_some() || low >= high || bin_width == 0 {
            return Err(err());
        }

        Ok(Self {
            low,
            high,
            bin_width,
        })
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("Invalid frequency range: {input} (expected low:high:bin_width, e.g. 88M:108M:125k)")]
pub struct FrequencyRangeFromStrError {
    pub input: String,
}

fn parse_frequency(s: &str) -> Option<u64> {
    let s = s.trim();
    let (number, multiplier) = match s.char_indices().last()? {
        (i, 'k' | 'K') => (&s[..i], 1e3),
        (i, 'M' | 'm') => (&s[..i], 1e6),
        (i, 'G' | 'g') => (&s[..i], 1e9),
        _ => (s, 1.0),
    };
    let value: f64 = number.parse().ok()?;
    let value = value * multiplier;
    (value.is_finite() && value >= 0.0).then(|| value.round() as u64)
}

#[derive(Clone, Debug)]
pub struct SweepConfig {
    pub frequency_range: FrequencyRange,
    pub integration_interval: Duration,
    /// Stop after one sweep pass (`-1`).
    pub single_shot: bool,
    /// Stop after this much time (`-e`).
    pub exit_timer: Option<Duration>,
    /// Tuner gain in dB. Automatic gain if not set.
    pub gain: Option<f32>,
    pub device_index: Option<u32>,
}

/// Runs one sweep, writing the CSV to `output`.
#[allow(async_fn_in_trait)]
pub trait SweepRunner {
    async fn run(&self, output: &Path, cancel: &CancellationToken) -> Result<(), Error>;
}

/// Spawns `rtl_power` and waits for it to exit.
#[derive(Clone, Debug)]
pub struct RtlPower {
    program: PathBuf,
    config: SweepConfig,
}

impl RtlPower {
    pub fn new(program: impl Into<PathBuf>, config: SweepConfig) -> Self {
        Self {
            program: program.into(),
            config,
        }
    }

    pub fn args(&self, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-f".into(),
            self.config.frequency_range.to_string().into(),
            "-i".into(),
            whole_seconds(self.config.integration_interval).to_string().into(),
        ];

        if self.config.single_shot {
            args.push("-1".into());
        }
        if let Some(exit_timer) = self.config.exit_timer {
            args.push("-e".into());
            args.push(whole_seconds(exit_timer).to_string().into());
        }
        if let Some(gain) = self.config.gain {
            args.push("-g".into());
            args.push(gain.to_string().into());
        }
        if let Some(device_index) = self.config.device_index {
            args.push("-d".into());
            args.push(device_index.to_string().into());
        }

        args.push(output.into());
        args
    }
}

impl SweepRunner for RtlPower {
    async fn run(&self, output: &Path, cancel: &CancellationToken) -> Result<(), Error> {
        let args = self.args(output);
        tracing::info!(program = %self.program.display(), ?args, "starting sweep");

        let mut process = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                Error::SpawnSweep {
                    program: self.program.clone(),
                    source,
                }
            })?;

        if let Some(stderr) = process.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("stopping sweep");
                process.kill().await?;
                Err(Error::Cancelled)
            }
            result = process.wait() => {
                let status = result?;
                if status.success() {
                    tracing::info!(output = %output.display(), "sweep finished");
                    Ok(())
                }
                else {
                    Err(Error::SweepFailed { status })
                }
            }
        }
    }
}

/// `rtl_power` reports progress and tuner details on stderr.
async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "rtl_power", "{line}");
    }
}

/// `rtl_power` only takes whole seconds. Rounds up so a sub-second interval
/// doesn't turn into 0.
fn whole_seconds(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        time::Duration,
    };

    use tokio_util::sync::CancellationToken;

    use crate::{
        Error,
        rtl_power::{
            FrequencyRange,
            RtlPower,
            SweepConfig,
            SweepRunner,
        },
    };

    fn config() -> SweepConfig {
        SweepConfig {
            frequency_range: "88M:108M:125k".parse().unwrap(),
            integration_interval: Duration::from_secs(10),
            single_shot: true,
            exit_timer: None,
            gain: None,
            device_index: None,
        }
    }

    #[test]
    fn it_parses_frequency_ranges() {
        assert_eq!(
            "88M:108M:125k".parse::<FrequencyRange>().unwrap(),
            FrequencyRange {
                low: 88_000_000,
                high: 108_000_000,
                bin_width: 125_000,
            }
        );
        assert_eq!(
            "1000M:1.7G:1M".parse::<FrequencyRange>().unwrap(),
            FrequencyRange {
                low: 1_000_000_000,
                high: 1_700_000_000,
                bin_width: 1_000_000,
            }
        );
        assert_eq!(
            "24000000:25000000:10000"
                .parse::<FrequencyRange>()
                .unwrap()
                .to_string(),
            "24000000:25000000:10000"
        );
    }

    #[test]
    fn it_rejects_bad_frequency_ranges() {
        for input in ["", "88M", "88M:108M", "108M:88M:1k", "88M:108M:0", "a:b:c", "1:2:3:4"] {
            assert!(
                input.parse::<FrequencyRange>().is_err(),
                "{input:?} was accepted"
            );
        }
    }

    #[test]
    fn it_builds_rtl_power_arguments() {
        let rtl_power = RtlPower::new("rtl_power", config());
        let args = rtl_power.args(Path::new("/data/20200101-120000.csv"));
        assert_eq!(
            args,
            [
                "-f",
                "88000000:108000000:125000",
                "-i",
                "10",
                "-1",
                "/data/20200101-120000.csv"
            ]
        );

        let rtl_power = RtlPower::new(
            "rtl_power",
            SweepConfig {
                single_shot: false,
                exit_timer: Some(Duration::from_secs(300)),
                gain: Some(29.7),
                device_index: Some(1),
                integration_interval: Duration::from_millis(500),
                ..config()
            },
        );
        let args = rtl_power.args(Path::new("out.csv"));
        assert_eq!(
            args,
            [
                "-f",
                "88000000:108000000:125000",
                "-i",
                "1",
                "-e",
                "300",
                "-g",
                "29.7",
                "-d",
                "1",
                "out.csv"
            ]
        );
    }

    #[tokio::test]
    async fn it_reports_a_missing_binary() {
        let rtl_power = RtlPower::new("/nonexistent/rtl_power", config());
        let result = rtl_power
            .run(Path::new("out.csv"), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::SpawnSweep { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn it_reports_the_exit_status() {
        let rtl_power = RtlPower::new("true", config());
        rtl_power
            .run(Path::new("out.csv"), &CancellationToken::new())
            .await
            .unwrap();

        let rtl_power = RtlPower::new("false", config());
        let result = rtl_power
            .run(Path::new("out.csv"), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::SweepFailed { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn it_kills_the_sweep_when_cancelled() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow_rtl_power");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cancel = CancellationToken::new();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cancel.cancel();
            }
        });

        let start = std::time::Instant::now();
        let result = RtlPower::new(&script, config())
            .run(Path::new("out.csv"), &cancel)
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
