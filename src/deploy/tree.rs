//! Directory tree copy and removal helpers.

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::Path;

/// Recursively copy the contents of `src` into `dst`.
///
/// `dst` is created if missing. `exclude` receives each entry's path
/// relative to `src` and whether it is a directory; excluded directories are
/// not descended into. Symlinks are recreated, not followed. Returns the
/// number of entries written. `src` is never modified.
pub fn copy_tree<F>(src: &Path, dst: &Path, exclude: &F) -> io::Result<u64>
where
    F: Fn(&Path, bool) -> bool,
{
    fs::create_dir_all(dst)?;
    copy_dir_contents(src, dst, Path::new(""), exclude)
}

fn copy_dir_contents<F>(src_root: &Path, dst_root: &Path, rel: &Path, exclude: &F) -> io::Result<u64>
where
    F: Fn(&Path, bool) -> bool,
{
    let mut written = 0u64;
    let mut entries: Vec<_> = fs::read_dir(src_root.join(rel))?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let rel_path = rel.join(entry.file_name());
        let src_path = src_root.join(&rel_path);
        let dst_path = dst_root.join(&rel_path);
        let meta = fs::symlink_metadata(&src_path)?;
        let file_type = meta.file_type();

        if exclude(&rel_path, file_type.is_dir()) {
            continue;
        }

        if file_type.is_symlink() {
            let target = fs::read_link(&src_path)?;
            symlink(&target, &dst_path)?;
        } else if file_type.is_dir() {
            fs::create_dir_all(&dst_path)?;
            written += copy_dir_contents(src_root, dst_root, &rel_path, exclude)?;
            fs::set_permissions(&dst_path, meta.permissions())?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
        written += 1;
    }

    Ok(written)
}

/// Remove a file, symlink or directory tree. A missing path is not an error.
///
/// Read-only entries (git marks its object files read-only) are made
/// writable and the removal is retried once.
pub fn remove_path(path: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if !meta.is_dir() {
        return fs::remove_file(path);
    }

    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            make_writable(path)?;
            fs::remove_dir_all(path)
        }
        Err(e) => Err(e),
    }
}

/// Remove every entry inside `dir`, keeping `dir` itself.
pub fn remove_dir_contents(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        remove_path(&entry?.path())?;
    }
    Ok(())
}

/// True if `dir` exists and has at least one entry.
pub fn is_non_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Recursively add owner write permission. Symlinks are left alone.
pub fn make_writable(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }

    let mut perms = meta.permissions();
    if perms.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        fs::set_permissions(path, perms)?;
    }

    if meta.is_dir() {
        for entry in fs::read_dir(path)? {
            make_writable(&entry?.path())?;
        }
    }
    Ok(())
}
