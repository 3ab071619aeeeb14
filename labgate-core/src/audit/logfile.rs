use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::Utc;

/// Append-only plaintext security log with size-based rotation.
///
/// Rotated generations are named `<path>.<YYYY-mm-dd_HHMMSS>`; the timestamp
/// format sorts lexicographically, so pruning keeps the newest generations.
pub struct SecurityLogFile {
    path: PathBuf,
    max_size: u64,
    max_generations: usize,
}

impl SecurityLogFile {
    pub fn new(path: impl Into<PathBuf>, max_size: u64, max_generations: usize) -> Self {
        Self {
            path: path.into(),
            max_size,
            max_generations,
        }
    }

    pub fn append(&mut self, line: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        if let Ok(meta) = fs::metadata(&self.path) {
            if meta.len() > self.max_size {
                self.rotate()?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    fn rotate(&self) -> io::Result<()> {
        let suffix = Utc::now().format("%Y-%m-%d_%H%M%S");
        let rotated = PathBuf::from(format!("{}.{}", self.path.display(), suffix));
        fs::rename(&self.path, rotated)?;
        self.prune()
    }

    fn prune(&self) -> io::Result<()> {
        let Some(parent) = self.path.parent() else {
            return Ok(());
        };
        let Some(file_name) = self.path.file_name().and_then(|n| n.to_str()) else {
            return Ok(());
        };
        let prefix = format!("{file_name}.");

        let mut generations: Vec<PathBuf> = fs::read_dir(parent)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&prefix))
                    .unwrap_or(false)
            })
            .collect();
        generations.sort();

        while generations.len() > self.max_generations {
            let oldest = generations.remove(0);
            let _ = fs::remove_file(oldest);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("labgate-logfile-{tag}-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_append_creates_file() {
        let dir = temp_dir("append");
        let path = dir.join("security.log");
        let mut log = SecurityLogFile::new(&path, 1024, 3);
        log.append("[TEST] hello").unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "[TEST] hello\n");
    }

    #[test]
    fn test_rotation_at_size_threshold() {
        let dir = temp_dir("rotate");
        let path = dir.join("security.log");
        let mut log = SecurityLogFile::new(&path, 16, 3);
        log.append("0123456789abcdef0123456789abcdef").unwrap();
        // Second append sees the oversized file and rotates first
        log.append("next").unwrap();

        let rotated: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("security.log."))
            .collect();
        assert_eq!(rotated.len(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "next\n");
    }

    #[test]
    fn test_prune_keeps_newest_generations() {
        let dir = temp_dir("prune");
        let path = dir.join("security.log");
        for i in 0..5 {
            fs::write(dir.join(format!("security.log.2026-01-0{}_000000", i + 1)), "x").unwrap();
        }
        let log = SecurityLogFile::new(&path, 16, 2);
        log.prune().unwrap();

        let mut remaining: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        remaining.sort();
        assert_eq!(
            remaining,
            vec![
                "security.log.2026-01-04_000000".to_string(),
                "security.log.2026-01-05_000000".to_string(),
            ]
        );
    }
}
