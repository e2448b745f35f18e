use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::error::{IoContext, Result};

/// What a helper did, or under simulation would have done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsAction {
    Done,
    WouldDo,
    /// Already in the requested state, nothing to do.
    Unchanged,
}

/// Create `path` and all missing parents.
pub fn ensure_directory(path: &Path, simulate: bool) -> Result<FsAction> {
    if simulate {
        return Ok(FsAction::WouldDo);
    }
    fs::create_dir_all(path).io_context(|| format!("creating directory {}", path.display()))?;
    Ok(FsAction::Done)
}

/// Move `src` to `dest`, or copy it when `keep_source` is set. Parent directories are created.
pub fn move_or_copy(src: &Path, dest: &Path, simulate: bool, keep_source: bool) -> Result<FsAction> {
    if simulate {
        return Ok(FsAction::WouldDo);
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .io_context(|| format!("creating destination directory {}", parent.display()))?;
    }

    if keep_source {
        copy_file(src, dest)?;
    } else {
        fs::rename(src, dest)
            .io_context(|| format!("moving {} to {}", src.display(), dest.display()))?;
    }
    Ok(FsAction::Done)
}

/// Byte copy that also carries over permission bits.
fn copy_file(src: &Path, dest: &Path) -> Result<()> {
    let mut reader = File::open(src).io_context(|| format!("opening source file {}", src.display()))?;
    let mut writer =
        File::create(dest).io_context(|| format!("creating destination file {}", dest.display()))?;
    io::copy(&mut reader, &mut writer)
        .io_context(|| format!("copying {} to {}", src.display(), dest.display()))?;

    let perms = reader
        .metadata()
        .io_context(|| format!("reading permissions of {}", src.display()))?
        .permissions();
    fs::set_permissions(dest, perms)
        .io_context(|| format!("setting permissions on {}", dest.display()))?;
    Ok(())
}

/// Make `link` a symlink to `target`. A correct link is left alone; anything else at
/// `link` is replaced.
pub fn create_symlink(target: &Path, link: &Path, simulate: bool) -> Result<FsAction> {
    if let Ok(meta) = fs::symlink_metadata(link) {
        if meta.file_type().is_symlink() {
            if let Ok(existing) = fs::read_link(link) {
                if existing == target {
                    return Ok(FsAction::Unchanged);
                }
            }
        }
        if simulate {
            return Ok(FsAction::WouldDo);
        }
        // A real directory is only removed when empty.
        let removed = if meta.is_dir() {
            fs::remove_dir(link)
        } else {
            fs::remove_file(link)
        };
        removed.io_context(|| format!("removing existing {}", link.display()))?;
    } else if simulate {
        return Ok(FsAction::WouldDo);
    }

    symlink(target, link)
        .io_context(|| format!("linking {} -> {}", link.display(), target.display()))?;
    Ok(FsAction::Done)
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// Delete a file.
pub fn remove_file(path: &Path, simulate: bool) -> Result<FsAction> {
    if simulate {
        return Ok(FsAction::WouldDo);
    }
    fs::remove_file(path).io_context(|| format!("removing {}", path.display()))?;
    Ok(FsAction::Done)
}

/// True when both files have identical contents. Sizes are compared before any bytes are read.
pub fn files_identical(a: &Path, b: &Path) -> Result<bool> {
    let meta_a = fs::metadata(a).io_context(|| format!("reading metadata of {}", a.display()))?;
    let meta_b = fs::metadata(b).io_context(|| format!("reading metadata of {}", b.display()))?;
    if meta_a.len() != meta_b.len() {
        return Ok(false);
    }

    let mut ra = BufReader::new(File::open(a).io_context(|| format!("opening {}", a.display()))?);
    let mut rb = BufReader::new(File::open(b).io_context(|| format!("opening {}", b.display()))?);
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];
    loop {
        let n = read_full(&mut ra, &mut buf_a).io_context(|| format!("reading {}", a.display()))?;
        let m = read_full(&mut rb, &mut buf_b).io_context(|| format!("reading {}", b.display()))?;
        if n != m || buf_a[..n] != buf_b[..m] {
            return Ok(false);
        }
        if n == 0 {
            return Ok(true);
        }
    }
}

/// Fill `buf` as far as the reader allows, so chunk boundaries line up between two readers.
fn read_full(r: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::tempdir;

    /// Every path under `root` with its kind and contents, for before/after comparison.
    fn snapshot(root: &Path) -> Vec<(PathBuf, String)> {
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
            let entry = entry.unwrap();
            let p = entry.path().to_path_buf();
            let desc = if entry.path_is_symlink() {
                format!("link:{}", fs::read_link(&p).unwrap().display())
            } else if entry.file_type().is_dir() {
                "dir".to_string()
            } else {
                format!("file:{}", String::from_utf8_lossy(&fs::read(&p).unwrap()))
            };
            out.push((p, desc));
        }
        out
    }

    #[test]
    fn test_ensure_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("test/nested/directory");
        assert_eq!(ensure_directory(&nested, false).unwrap(), FsAction::Done);
        assert!(nested.is_dir());

        let dry = dir.path().join("dry/run");
        assert_eq!(ensure_directory(&dry, true).unwrap(), FsAction::WouldDo);
        assert!(!dry.exists());
    }

    #[test]
    fn test_move_file() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("source.txt");
        let dest = dir.path().join("dest/moved.txt");
        fs::write(&src, b"test content").unwrap();

        move_or_copy(&src, &dest, false, false).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"test content");
    }

    #[test]
    fn test_copy_keeps_source_and_mode() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("source.txt");
        let dest = dir.path().join("dest2/copied.txt");
        fs::write(&src, b"copy me").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).unwrap();

        move_or_copy(&src, &dest, false, true).unwrap();
        assert!(src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"copy me");
        assert_eq!(fs::metadata(&dest).unwrap().permissions().mode() & 0o777, 0o640);
    }

    #[test]
    fn test_symlink_idempotent() {
        let dir = tempdir().unwrap();
        let target = PathBuf::from("../ALL_PHOTOS/2023/01/01/a.jpg");
        let link = dir.path().join("a.jpg");

        assert_eq!(create_symlink(&target, &link, false).unwrap(), FsAction::Done);
        let before = snapshot(dir.path());
        assert_eq!(create_symlink(&target, &link, false).unwrap(), FsAction::Unchanged);
        assert_eq!(snapshot(dir.path()), before);
        assert_eq!(fs::read_link(&link).unwrap(), target);
    }

    #[test]
    fn test_symlink_replaces_wrong_target_and_files() {
        let dir = tempdir().unwrap();
        let link = dir.path().join("a.jpg");
        std::os::unix::fs::symlink("elsewhere.jpg", &link).unwrap();
        create_symlink(Path::new("right.jpg"), &link, false).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("right.jpg"));

        let plain = dir.path().join("b.jpg");
        fs::write(&plain, b"x").unwrap();
        create_symlink(Path::new("right.jpg"), &plain, false).unwrap();
        assert!(fs::symlink_metadata(&plain).unwrap().file_type().is_symlink());
    }

    #[test]
    fn test_symlink_simulate() {
        let dir = tempdir().unwrap();
        let link = dir.path().join("a.jpg");
        std::os::unix::fs::symlink("correct.jpg", &link).unwrap();

        assert_eq!(create_symlink(Path::new("correct.jpg"), &link, true).unwrap(), FsAction::Unchanged);
        assert_eq!(create_symlink(Path::new("other.jpg"), &link, true).unwrap(), FsAction::WouldDo);
        assert_eq!(
            create_symlink(Path::new("x.jpg"), &dir.path().join("new.jpg"), true).unwrap(),
            FsAction::WouldDo
        );
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("correct.jpg"));
        assert!(!dir.path().join("new.jpg").exists());
    }

    #[test]
    fn test_simulate_is_noop() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("a.jpg"), b"a").unwrap();
        fs::write(root.join("b.jpg"), b"b").unwrap();
        std::os::unix::fs::symlink("a.jpg", root.join("link.jpg")).unwrap();
        let before = snapshot(root);

        ensure_directory(&root.join("new/dir"), true).unwrap();
        move_or_copy(&root.join("a.jpg"), &root.join("x/a.jpg"), true, false).unwrap();
        move_or_copy(&root.join("b.jpg"), &root.join("y/b.jpg"), true, true).unwrap();
        create_symlink(Path::new("b.jpg"), &root.join("link.jpg"), true).unwrap();
        create_symlink(Path::new("b.jpg"), &root.join("b.jpg"), true).unwrap();
        remove_file(&root.join("a.jpg"), true).unwrap();

        assert_eq!(snapshot(root), before);
    }

    #[test]
    fn test_files_identical() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let c = dir.path().join("c");
        let big: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&a, &big).unwrap();
        fs::write(&b, &big).unwrap();
        let mut other = big.clone();
        other[19_999] ^= 1;
        fs::write(&c, &other).unwrap();

        assert!(files_identical(&a, &b).unwrap());
        assert!(!files_identical(&a, &c).unwrap());
        fs::write(&c, b"short").unwrap();
        assert!(!files_identical(&a, &c).unwrap());
    }
}
