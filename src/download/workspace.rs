//! Per-attempt workspace directories.
//!
//! Every orchestration call owns exactly one uniquely-named directory under a
//! persistent per-chat root (`<data_dir>/chat_<id>/<uuid>`). The call's
//! cleanup removes only its own directory; the chat root survives across
//! calls.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Create (idempotently) the persistent per-chat directory that workspaces
/// nest under.
pub fn ensure_session_root(data_dir: &Path, chat_id: i64) -> io::Result<PathBuf> {
    let root = data_dir.join(format!("chat_{}", chat_id));
    fs::create_dir_all(&root)?;
    Ok(root)
}

/// A filesystem directory exclusively owned by one orchestration call.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    /// Allocate a fresh uniquely-named subdirectory under the session root.
    pub fn acquire(session_root: &Path) -> io::Result<Self> {
        let dir = session_root.join(Uuid::new_v4().simple().to_string());
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn video_path(&self) -> PathBuf {
        self.dir.join("video.mp4")
    }

    pub fn audio_path(&self) -> PathBuf {
        self.dir.join("audio.mp3")
    }

    pub fn gif_path(&self) -> PathBuf {
        self.dir.join("animation.gif")
    }

    pub fn image_path(&self) -> PathBuf {
        self.dir.join("image.jpg")
    }

    /// Explicitly reclaim the workspace. Dropping it has the same effect;
    /// this method just marks the point where the artifacts are no longer
    /// needed.
    pub fn release(self) {}
}

/// Cleanup runs on drop so no early return can leak a populated workspace.
/// Best-effort: a failed cleanup must never mask the orchestration result,
/// so errors are logged and swallowed. The parent session root is left
/// untouched.
impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!("Failed to clean up workspace {}: {}", self.dir.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_session_root_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let a = ensure_session_root(tmp.path(), 42).unwrap();
        let b = ensure_session_root(tmp.path(), 42).unwrap();
        assert_eq!(a, b);
        assert!(a.ends_with("chat_42"));
        assert!(a.is_dir());
    }

    #[test]
    fn test_concurrent_workspaces_are_distinct() {
        let tmp = TempDir::new().unwrap();
        let root = ensure_session_root(tmp.path(), 1).unwrap();
        let ws_a = Workspace::acquire(&root).unwrap();
        let ws_b = Workspace::acquire(&root).unwrap();
        assert_ne!(ws_a.dir(), ws_b.dir());

        // releasing one must not touch the other or the session root
        std::fs::write(ws_b.dir().join("video.mp4"), b"data").unwrap();
        let b_dir = ws_b.dir().to_path_buf();
        ws_a.release();
        assert!(b_dir.join("video.mp4").exists());
        assert!(root.is_dir());
    }

    #[test]
    fn test_release_removes_only_own_dir() {
        let tmp = TempDir::new().unwrap();
        let root = ensure_session_root(tmp.path(), 7).unwrap();
        let ws = Workspace::acquire(&root).unwrap();
        let dir = ws.dir().to_path_buf();
        std::fs::write(dir.join("audio.mp3"), b"data").unwrap();
        ws.release();
        assert!(!dir.exists());
        assert!(root.is_dir());
    }

    #[test]
    fn test_drop_removes_dir() {
        let tmp = TempDir::new().unwrap();
        let root = ensure_session_root(tmp.path(), 3).unwrap();
        let dir = {
            let ws = Workspace::acquire(&root).unwrap();
            std::fs::write(ws.dir().join("video.mp4"), b"data").unwrap();
            ws.dir().to_path_buf()
        };
        // going out of scope cleans up even without an explicit release
        assert!(!dir.exists());
        assert!(root.is_dir());
    }

    #[test]
    fn test_release_tolerates_already_gone() {
        let tmp = TempDir::new().unwrap();
        let root = ensure_session_root(tmp.path(), 9).unwrap();
        let ws = Workspace::acquire(&root).unwrap();
        std::fs::remove_dir_all(ws.dir()).unwrap();
        ws.release(); // must not panic
    }
}
