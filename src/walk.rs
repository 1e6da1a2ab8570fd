//! Sender-side file enumeration (spec Component E, §3 "Transfer Descriptor").
//!
//! Grounded in `original_source/ndrop/netdrop.py`'s `NetDropClient.send_files`:
//! each positional argument is resolved against its own parent directory so
//! the argument's basename becomes the first path component even when the
//! argument was given as an absolute path, then directories are walked
//! recursively with parents enumerated before their children (§8
//! "Directory precedence").

use std::io;
use std::path::{Path, PathBuf};

/// One file or directory record destined for the wire. `size == -1` marks a
/// directory marker; `size >= 0` is a regular file's byte length.
#[derive(Debug, Clone)]
pub struct Entry {
    pub absolute_path: PathBuf,
    pub relative_path: String,
    pub size: i64,
}

fn relative_to(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn walk_dir(dir: &Path, base: &Path, entries: &mut Vec<Entry>, total_size: &mut i64) -> io::Result<()> {
    let mut children: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    children.sort_by_key(|e| e.file_name());

    for child in children {
        let path = child.path();
        let relative_path = relative_to(&path, base);
        if path.is_dir() {
            entries.push(Entry { absolute_path: path.clone(), relative_path, size: -1 });
            walk_dir(&path, base, entries, total_size)?;
        } else {
            let size = child.metadata()?.len() as i64;
            *total_size += size;
            entries.push(Entry { absolute_path: path, relative_path, size });
        }
    }
    Ok(())
}

/// Builds the ordered entry list and `total_size` for a set of command-line
/// arguments, in the sender's "parent precedes children" order (§3, §8).
pub fn enumerate_paths(paths: &[PathBuf]) -> io::Result<(Vec<Entry>, i64)> {
    let mut entries = Vec::new();
    let mut total_size = 0i64;

    for arg in paths {
        let absolute_path = std::fs::canonicalize(arg)?;
        let base = absolute_path.parent().map(Path::to_path_buf).unwrap_or_else(|| absolute_path.clone());
        let relative_path = relative_to(&absolute_path, &base);

        if absolute_path.is_dir() {
            entries.push(Entry { absolute_path: absolute_path.clone(), relative_path, size: -1 });
            walk_dir(&absolute_path, &base, &mut entries, &mut total_size)?;
        } else {
            let size = std::fs::metadata(&absolute_path)?.len() as i64;
            total_size += size;
            entries.push(Entry { absolute_path, relative_path, size });
        }
    }

    Ok((entries, total_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn directory_precedes_its_children() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("photos");
        fs::create_dir(&root).unwrap();
        fs::create_dir(root.join("2020")).unwrap();
        fs::write(root.join("2020").join("a.jpg"), b"x").unwrap();
        fs::write(root.join("readme.txt"), b"hi").unwrap();

        let (entries, total_size) = enumerate_paths(&[root.clone()]).unwrap();
        assert_eq!(total_size, 3);

        let index_of = |needle: &str| entries.iter().position(|e| e.relative_path == needle).unwrap();
        assert!(index_of("photos") < index_of("photos/2020"));
        assert!(index_of("photos/2020") < index_of("photos/2020/a.jpg"));
        assert!(index_of("photos") < index_of("photos/readme.txt"));
    }

    #[test]
    fn single_file_keeps_its_basename_as_relative_path() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("note.txt");
        fs::write(&file, b"hello").unwrap();

        let (entries, total_size) = enumerate_paths(&[file]).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].relative_path, "note.txt");
        assert_eq!(entries[0].size, 5);
        assert_eq!(total_size, 5);
    }

    #[test]
    fn empty_directory_has_zero_size_and_no_children() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("empty");
        fs::create_dir(&dir).unwrap();

        let (entries, total_size) = enumerate_paths(&[dir]).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].size, -1);
        assert_eq!(total_size, 0);
    }
}
