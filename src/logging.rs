//! Logger setup: `env_logger` on stderr, plus a copy of every line in the current run's
//! log file once one is attached.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::error::Result;

static RUN_LOG: Mutex<Option<File>> = Mutex::new(None);

struct TeeWriter;

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Some(file) = RUN_LOG.lock().unwrap().as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        if let Some(file) = RUN_LOG.lock().unwrap().as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Initialize the global logger from `RUST_LOG`, falling back to `default_level`.
/// Calling it twice is harmless.
pub fn init(default_level: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", default_level))
        .target(env_logger::Target::Pipe(Box::new(TeeWriter)))
        .try_init();
}

/// Append all further log lines to `path` as well, replacing any previous run log.
///
/// The run log is process-wide: a process drives one run at a time, and lines logged
/// by concurrent runs in the same process would all land in the last attached file.
pub fn attach_run_log(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    *RUN_LOG.lock().unwrap() = Some(file);
    Ok(())
}

pub fn detach_run_log() {
    if let Some(mut file) = RUN_LOG.lock().unwrap().take() {
        let _ = file.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn tee_copies_into_attached_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("run.log");
        attach_run_log(&path).unwrap();
        TeeWriter.write_all(b"first line\n").unwrap();
        detach_run_log();
        TeeWriter.write_all(b"not captured\n").unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "first line\n");
    }
}
