//! Crash-safe whole-file replacement.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Write `bytes` to `path` atomically.
///
/// Writes a sibling temp file, fsyncs it, renames it over `path`, then syncs
/// the directory so the rename itself is durable. A crash leaves either the
/// old file or the new one, never a mix.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = parent_dir(path);
    fs::create_dir_all(parent)?;

    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = parent.join(temp_name);
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path)?;

    #[cfg(unix)]
    File::open(parent)?.sync_all()?;

    Ok(())
}

/// Directory holding `path`. A bare file name lives in the current directory.
fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_replaces_contents_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_bare_file_name_uses_current_dir() {
        assert_eq!(parent_dir(Path::new("kill_switch.json")), Path::new("."));
        assert_eq!(parent_dir(Path::new("data/ks.json")), Path::new("data"));
        assert_eq!(parent_dir(Path::new("/ks.json")), Path::new("/"));
    }

    #[test]
    fn test_writes_bare_relative_path() {
        let dir = TempDir::new().unwrap();
        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let result = write_atomic(Path::new("state.json"), b"active");
        std::env::set_current_dir(previous).unwrap();

        result.unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("state.json")).unwrap(),
            "active"
        );
    }
}
