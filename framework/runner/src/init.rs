use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Local};
use clap::Parser;

use crate::cli::StressCli;

/// Everything the binary needs to start a run.
#[derive(Debug)]
pub struct Invocation {
    pub cli: StressCli,
    pub started_at: DateTime<Local>,
    pub log_path: PathBuf,
}

/// Initialise the CLI and logging for the stress runner.
///
/// Log lines go to stderr and are appended to `async-stress-<start time>.log` in the output
/// directory.
pub fn init() -> anyhow::Result<Invocation> {
    let cli = StressCli::parse();
    let started_at = Local::now();

    std::fs::create_dir_all(&cli.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            cli.output_dir.display()
        )
    })?;
    let log_path = cli
        .output_dir
        .join(format!("{}.log", run_file_stem(&started_at)));
    init_logging(&log_path)?;

    Ok(Invocation {
        cli,
        started_at,
        log_path,
    })
}

/// The file name, without extension, shared by the log and the report of a run.
pub fn run_file_stem(started_at: &DateTime<Local>) -> String {
    format!("async-stress-{}", started_at.format("%Y%m%d-%H%M%S"))
}

fn init_logging(log_path: &Path) -> anyhow::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {:<5} {}",
                Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(TeeWriter { file })))
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(())
}

/// Writes everything to stderr and to the log file.
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()?;
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn file_stem_embeds_start_time() {
        let started_at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!("async-stress-20240309-070501", run_file_stem(&started_at));
    }

    #[test]
    fn tee_writes_the_whole_buffer_to_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tee.log");
        let mut tee = TeeWriter {
            file: File::create(&path).unwrap(),
        };

        tee.write_all(b"[12:00:00.000] INFO  hello\n").unwrap();
        tee.flush().unwrap();

        assert_eq!(
            "[12:00:00.000] INFO  hello\n",
            std::fs::read_to_string(&path).unwrap()
        );
    }
}
