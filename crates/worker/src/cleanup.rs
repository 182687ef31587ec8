//! Pre-submission cleanup of the engine's scratch directories.
//!
//! The engine's `input`, `output`, and `temp` areas are shared state
//! across sequential jobs; clearing them before each submission keeps
//! a previous job's artifacts out of the current job's collection.
//! Errors here degrade to warnings -- a failed deletion never aborts
//! the job.

use std::path::{Path, PathBuf};

/// Scratch areas cleared before each submission, relative to the
/// engine root.
const SCRATCH_DIRS: [&str; 3] = ["input", "output", "temp"];

/// Clear stale entries from the engine's scratch directories,
/// skipping the allow-listed paths. Missing directories are ignored.
pub async fn clean_scratch_dirs(root: &Path, preserve: &[PathBuf]) {
    for dir in SCRATCH_DIRS {
        let dir_path = root.join(dir);
        let mut entries = match tokio::fs::read_dir(&dir_path).await {
            Ok(entries) => entries,
            Err(_) => continue,
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(dir = %dir_path.display(), error = %e, "Cleanup read error");
                    break;
                }
            };

            let path = entry.path();
            if preserve.iter().any(|keep| *keep == path) {
                continue;
            }

            let removed = match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => tokio::fs::remove_dir_all(&path).await,
                Ok(_) => tokio::fs::remove_file(&path).await,
                Err(e) => Err(e),
            };

            if let Err(e) = removed {
                tracing::warn!(path = %path.display(), error = %e, "Cleanup warning");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn touch(path: &Path) {
        tokio::fs::write(path, b"stale").await.unwrap();
    }

    #[tokio::test]
    async fn clears_scratch_dirs_but_keeps_preserved_paths() {
        let root = tempfile::tempdir().unwrap();
        let root_path = root.path();

        for dir in ["input", "output", "temp"] {
            tokio::fs::create_dir(root_path.join(dir)).await.unwrap();
        }
        tokio::fs::create_dir(root_path.join("input/demo")).await.unwrap();
        touch(&root_path.join("input/demo/sample.png")).await;
        touch(&root_path.join("input/stale.png")).await;
        touch(&root_path.join("output/old.mp4")).await;
        tokio::fs::create_dir(root_path.join("temp/scratch")).await.unwrap();
        touch(&root_path.join("temp/scratch/frame.png")).await;

        let preserve = vec![root_path.join("input").join("demo")];
        clean_scratch_dirs(root_path, &preserve).await;

        assert!(root_path.join("input/demo/sample.png").exists());
        assert!(!root_path.join("input/stale.png").exists());
        assert!(!root_path.join("output/old.mp4").exists());
        assert!(!root_path.join("temp/scratch").exists());
    }

    #[tokio::test]
    async fn missing_scratch_dirs_are_ignored() {
        let root = tempfile::tempdir().unwrap();
        // No input/output/temp at all -- must not error or create them.
        clean_scratch_dirs(root.path(), &[]).await;
        assert!(!root.path().join("input").exists());
    }

    #[tokio::test]
    async fn non_scratch_siblings_are_untouched() {
        let root = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(root.path().join("models")).await.unwrap();
        touch(&root.path().join("models/checkpoint.safetensors")).await;
        tokio::fs::create_dir(root.path().join("output")).await.unwrap();
        touch(&root.path().join("output/old.png")).await;

        clean_scratch_dirs(root.path(), &[]).await;

        assert!(root.path().join("models/checkpoint.safetensors").exists());
        assert!(!root.path().join("output/old.png").exists());
    }
}
