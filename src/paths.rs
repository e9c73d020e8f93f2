//! Path resolution that creates missing files and folders with private
//! permissions.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Resolve `path` to its canonical form, creating it (and any missing
/// parents) if it does not exist yet.
///
/// Created folders get mode `0o700` and created files `0o600` on unix.
/// With `folder` set, the leaf is created as a directory instead of a file.
pub fn resolve_path_with_links(path: &Path, folder: bool) -> io::Result<PathBuf> {
    match path.canonicalize() {
        Ok(resolved) => Ok(resolved),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let parent = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => resolve_path_with_links(p, true)?,
                _ => std::env::current_dir()?,
            };
            let name = path
                .file_name()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
            let target = parent.join(name);
            if folder {
                create_private_dir(&target)?;
            } else {
                create_private_file(&target)?;
            }
            target.canonicalize()
        }
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().mode(0o700).create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> io::Result<()> {
    fs::create_dir(path)
}

#[cfg(unix)]
fn create_private_file(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new().write(true).create_new(true).mode(0o600).open(path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_file(path: &Path) -> io::Result<()> {
    fs::OpenOptions::new().write(true).create_new(true).open(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_path_is_canonicalised() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_path_with_links(dir.path(), true).unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn creates_missing_parents_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a").join("b").join("data.db");
        let resolved = resolve_path_with_links(&target, false).unwrap();
        assert!(resolved.is_file());
        assert!(resolved.parent().unwrap().is_dir());
        assert_eq!(fs::metadata(&resolved).unwrap().len(), 0);
    }

    #[test]
    fn creates_folder_leaf_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cache");
        let resolved = resolve_path_with_links(&target, true).unwrap();
        assert!(resolved.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn created_entries_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("tree.hash");
        let resolved = resolve_path_with_links(&target, false).unwrap();
        let file_mode = fs::metadata(&resolved).unwrap().permissions().mode() & 0o777;
        let dir_mode = fs::metadata(resolved.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        // The process umask can only remove bits.
        assert_eq!(file_mode & !0o600, 0);
        assert_eq!(dir_mode & !0o700, 0);
    }
}
