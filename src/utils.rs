use std::env;
use std::ffi::OsString;
use std::fs::{self, create_dir_all};
use std::io::Result;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Creates `dirname` (and its parents) when it does not exist yet.
pub fn create_dir<P: AsRef<Path>>(dirname: P) -> Result<()> {
    let dirname = dirname.as_ref();
    if !dirname.exists() {
        create_dir_all(dirname)?;
    }
    Ok(())
}

/// Splits `a, b,,c` into `["a", "b", "c"]`.
pub fn parse_comma_separated_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Recursively copies the *contents* of `src` into `dst` (like `cp -r src/. dst`).
///
/// Existing files in `dst` are overwritten. Returns the number of files copied.
pub fn copy_dir_contents<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dst: Q) -> Result<usize> {
    let src = src.as_ref();
    let dst = dst.as_ref();
    create_dir(dst)?;

    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let relative = match entry.path().strip_prefix(src) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            create_dir(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                create_dir(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Builds a `PATH` value with `bin_dirs` in front of `base`, skipping
/// directories that are already listed.
pub fn prepend_to_path(bin_dirs: &[PathBuf], base: Option<OsString>) -> OsString {
    let existing: Vec<PathBuf> = base
        .as_ref()
        .map(|p| env::split_paths(p).collect())
        .unwrap_or_default();

    let mut paths: Vec<PathBuf> = bin_dirs
        .iter()
        .filter(|dir| !existing.contains(dir))
        .cloned()
        .collect();
    paths.extend(existing);
    // join only fails on a separator inside a component, which split_paths can't yield
    env::join_paths(paths).unwrap_or_else(|_| base.unwrap_or_default())
}

/// Returns the first executable called `program` on `search_path`.
pub fn find_in_path(program: &str, search_path: &OsString) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    env::split_paths(search_path)
        .map(|dir| dir.join(program))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
