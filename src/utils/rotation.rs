use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_BACKUP_COUNT: usize = 5;

/// Append-only log file that rolls over once it would grow past `max_bytes`.
///
/// Backups are named `<file>.1` (newest) through `<file>.<backup_count>` (oldest);
/// the oldest one is dropped on every rollover.
#[derive(Debug)]
pub struct SizeRotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    file: File,
    written: u64,
}

impl SizeRotatingFile {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, backup_count: usize) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();

        Ok(Self {
            path,
            max_bytes,
            backup_count,
            file,
            written,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.backup_count > 0 {
            for index in (1..self.backup_count).rev() {
                let source = self.backup_path(index);
                if source.exists() {
                    fs::rename(&source, self.backup_path(index + 1))?;
                }
            }
            fs::rename(&self.path, self.backup_path(1))?;
        }

        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for SizeRotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.max_bytes > 0 && self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }

        let written = self.file.write(buf)?;
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rotates_when_size_exceeded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let mut file = SizeRotatingFile::open(&path, 10, 2).unwrap();

        file.write_all(b"12345678\n").unwrap();
        file.write_all(b"abcdefgh\n").unwrap();
        file.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "abcdefgh\n");
        assert_eq!(fs::read_to_string(dir.path().join("app.log.1")).unwrap(), "12345678\n");
    }

    #[test]
    fn test_keeps_at_most_backup_count_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let mut file = SizeRotatingFile::open(&path, 4, 2).unwrap();

        for line in ["aaa\n", "bbb\n", "ccc\n", "ddd\n"] {
            file.write_all(line.as_bytes()).unwrap();
        }
        file.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "ddd\n");
        assert_eq!(fs::read_to_string(dir.path().join("app.log.1")).unwrap(), "ccc\n");
        assert_eq!(fs::read_to_string(dir.path().join("app.log.2")).unwrap(), "bbb\n");
        assert!(!dir.path().join("app.log.3").exists());
    }

    #[test]
    fn test_reopen_continues_counting_existing_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "0123456789").unwrap();

        let mut file = SizeRotatingFile::open(&path, 12, 1).unwrap();
        file.write_all(b"xyz").unwrap();
        file.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "xyz");
        assert_eq!(fs::read_to_string(dir.path().join("app.log.1")).unwrap(), "0123456789");
    }
}
