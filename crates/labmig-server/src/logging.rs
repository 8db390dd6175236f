//! Tracing setup: console output plus a size-rotated log file.

use labmig_core::config::LoggingOptions;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE_STEM: &str = "labmig";

/// Install the global subscriber described by `options`.
///
/// `RUST_LOG` wins over the configured minimum level; `--debug` wins over both.
/// The returned guard must be held until exit.
pub fn init(options: &LoggingOptions, debug: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(options.minimum_level.filter_directive()))
    };

    let console = options.log_to_console.then(|| {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .compact()
    });

    let (file, guard) = if options.log_to_file {
        let writer = SizeRotatingWriter::new(
            &options.log_directory,
            options.max_log_file_size_mb,
            options.max_log_files,
        )?;
        let (non_blocking, guard) = tracing_appender::non_blocking(writer);
        let layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_thread_ids(true);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()?;
    Ok(guard)
}

/// Appends to `labmig.log`, rolling it to `labmig.1.log`, `labmig.2.log`, ...
/// once it reaches the size limit. At most `max_files` files are kept.
pub struct SizeRotatingWriter {
    dir: PathBuf,
    max_bytes: u64,
    max_files: usize,
    file: File,
    written: u64,
}

impl SizeRotatingWriter {
    pub fn new(dir: impl AsRef<Path>, max_size_mb: i32, max_files: i32) -> io::Result<Self> {
        let max_bytes = u64::try_from(max_size_mb.max(1)).unwrap_or(1) * 1024 * 1024;
        Self::with_limit(dir, max_bytes, max_files.max(1) as usize)
    }

    fn with_limit(dir: impl AsRef<Path>, max_bytes: u64, max_files: usize) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let file = open_append(&dir.join(format!("{LOG_FILE_STEM}.log")))?;
        let written = file.metadata()?.len();
        Ok(Self {
            dir,
            max_bytes,
            max_files,
            file,
            written,
        })
    }

    fn path(&self, index: usize) -> PathBuf {
        if index == 0 {
            self.dir.join(format!("{LOG_FILE_STEM}.log"))
        } else {
            self.dir.join(format!("{LOG_FILE_STEM}.{index}.log"))
        }
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let oldest = self.max_files - 1;
        if oldest == 0 {
            remove_if_present(&self.path(0))?;
        } else {
            remove_if_present(&self.path(oldest))?;
            for index in (0..oldest).rev() {
                let from = self.path(index);
                if from.exists() {
                    fs::rename(&from, self.path(index + 1))?;
                }
            }
        }
        self.file = open_append(&self.path(0))?;
        self.written = 0;
        Ok(())
    }
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rotates_at_size_limit() {
        let dir = TempDir::new().unwrap();
        let mut writer = SizeRotatingWriter::with_limit(dir.path(), 10, 3).unwrap();

        writer.write_all(b"first-8\n").unwrap();
        writer.write_all(b"second-8").unwrap();
        writer.write_all(b"third-8\n").unwrap();
        writer.flush().unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("labmig.log")).unwrap(), "third-8\n");
        assert_eq!(fs::read_to_string(dir.path().join("labmig.1.log")).unwrap(), "second-8");
        assert_eq!(fs::read_to_string(dir.path().join("labmig.2.log")).unwrap(), "first-8\n");
    }

    #[test]
    fn test_keeps_at_most_max_files() {
        let dir = TempDir::new().unwrap();
        let mut writer = SizeRotatingWriter::with_limit(dir.path(), 4, 2).unwrap();
        for chunk in [b"aaaa", b"bbbb", b"cccc", b"dddd"] {
            writer.write_all(chunk).unwrap();
        }
        writer.flush().unwrap();

        let count = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 2);
        assert_eq!(fs::read_to_string(dir.path().join("labmig.1.log")).unwrap(), "cccc");
    }

    #[test]
    fn test_resumes_existing_file_size() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("labmig.log"), "12345678").unwrap();
        let mut writer = SizeRotatingWriter::with_limit(dir.path(), 10, 2).unwrap();
        writer.write_all(b"abc").unwrap();
        writer.flush().unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("labmig.1.log")).unwrap(), "12345678");
    }
}
