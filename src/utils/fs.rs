//! Filesystem utilities.
//!
//! Helper functions for file operations shared by the codec, the manifest
//! store and the backup manager.

use std::io::Write;
use std::path::Path;

use walkdir::WalkDir;

use crate::bundler::hash::STAGING_PREFIX;
use crate::error::{Result, SubstrateError};

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Read a file to string, returning None if it doesn't exist.
pub fn read_optional(path: impl AsRef<Path>) -> Result<Option<String>> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Write `content` to `path` through a temporary sibling file and a rename.
///
/// The temporary file lives in the destination directory so the rename never
/// crosses a filesystem boundary. Readers observe either the old or the new
/// content, never a prefix.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    ensure_dir(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|err| SubstrateError::Config(format!("create temp for {}: {err}", path.display())))?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path)
        .map_err(|err| SubstrateError::Io(err.error))?;
    Ok(())
}

/// Recursively copy `src` into `dst`, returning the number of bytes copied.
///
/// Symlinks are not followed. Copied files are made writable so that a copy
/// taken from a read-only snapshot can be edited again.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<u64> {
    let mut total = 0u64;
    ensure_dir(dst)?;
    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|err| SubstrateError::Config(format!("strip prefix: {err}")))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            ensure_dir(&target)?;
        } else if file_type.is_file() {
            total += copy_file(entry.path(), &target)?;
        }
    }
    Ok(total)
}

/// Copy a single file, creating parent directories as needed.
pub fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    let bytes = std::fs::copy(src, dst).map_err(|err| {
        SubstrateError::Io(std::io::Error::new(
            err.kind(),
            format!("copy {}: {err}", src.display()),
        ))
    })?;
    make_writable(dst)?;
    Ok(bytes)
}

/// Mark every regular file under `root` read-only.
pub fn set_tree_readonly(root: &Path) -> Result<()> {
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() {
            let mut perms = entry.metadata().map_err(std::io::Error::from)?.permissions();
            perms.set_readonly(true);
            std::fs::set_permissions(entry.path(), perms)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn make_writable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = std::fs::metadata(path)?.permissions();
    if perms.readonly() {
        perms.set_mode(perms.mode() | 0o200);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
#[allow(clippy::permissions_set_readonly_false)]
fn make_writable(path: &Path) -> Result<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    if perms.readonly() {
        perms.set_readonly(false);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

/// Create an empty staging directory beside `dest`, on the same filesystem.
pub fn staging_dir_for(dest: &Path) -> Result<tempfile::TempDir> {
    let parent = dest
        .parent()
        .ok_or_else(|| SubstrateError::Config(format!("no parent for {}", dest.display())))?;
    ensure_dir(parent)?;
    let staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(parent)?;
    Ok(staged)
}

/// Replace `dest` with a fully written staging directory.
pub fn swap_into_place(staged: tempfile::TempDir, dest: &Path) -> Result<()> {
    let staged = staged.keep();
    let swapped = remove_dir_if_exists(dest)
        .and_then(|()| std::fs::rename(&staged, dest).map_err(SubstrateError::from));
    if swapped.is_err() {
        let _ = std::fs::remove_dir_all(&staged);
    }
    swapped
}

/// Remove a directory tree if it exists.
pub fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn ensure_dir_creates_nested_directories() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("a").join("b").join("c");
        ensure_dir(&dir).unwrap();
        assert!(dir.is_dir());
        ensure_dir(&dir).unwrap();
    }

    #[test]
    fn read_optional_missing_is_none() {
        let temp = TempDir::new().unwrap();
        assert!(read_optional(temp.path().join("nope")).unwrap().is_none());
        std::fs::write(temp.path().join("yes"), "hi").unwrap();
        assert_eq!(read_optional(temp.path().join("yes")).unwrap().as_deref(), Some("hi"));
    }

    #[test]
    fn write_atomic_replaces_content_without_leftovers() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");

        let leftovers: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn copy_dir_recursive_copies_nested_files() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("scripts")).unwrap();
        std::fs::write(src.join("SKILL.md"), "# skill").unwrap();
        std::fs::write(src.join("scripts/run.sh"), "echo hi").unwrap();

        let dst = temp.path().join("dst");
        let bytes = copy_dir_recursive(&src, &dst).unwrap();
        assert_eq!(bytes, 14);
        assert_eq!(std::fs::read_to_string(dst.join("scripts/run.sh")).unwrap(), "echo hi");
    }

    #[test]
    fn copies_of_readonly_trees_are_writable() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.txt"), "a").unwrap();
        set_tree_readonly(&src).unwrap();
        assert!(std::fs::metadata(src.join("a.txt")).unwrap().permissions().readonly());

        let dst = temp.path().join("dst");
        copy_dir_recursive(&src, &dst).unwrap();
        assert!(!std::fs::metadata(dst.join("a.txt")).unwrap().permissions().readonly());
    }

    #[test]
    fn remove_dir_if_exists_tolerates_missing() {
        let temp = TempDir::new().unwrap();
        remove_dir_if_exists(&temp.path().join("missing")).unwrap();
    }

    #[test]
    fn swap_replaces_destination() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("unit");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("old.txt"), "old").unwrap();

        let staged = staging_dir_for(&dest).unwrap();
        assert!(
            staged
                .path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(STAGING_PREFIX)
        );
        std::fs::write(staged.path().join("new.txt"), "new").unwrap();
        swap_into_place(staged, &dest).unwrap();

        assert!(!dest.join("old.txt").exists());
        assert_eq!(std::fs::read_to_string(dest.join("new.txt")).unwrap(), "new");
        let names: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }
}
