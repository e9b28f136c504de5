//! On-disk size scanning for installed kegs and casks.
use crate::models::{EntityKind, PartialFields};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// The directory holding every installed version of `name`.
pub fn keg_dir(prefix: &Path, name: &str, kind: EntityKind) -> PathBuf {
    let root = match kind {
        EntityKind::Formula => "Cellar",
        EntityKind::Cask => "Caskroom",
    };
    prefix.join(root).join(name)
}

/// Total size of a directory tree in bytes. Symlinks are counted as links,
/// never followed.
fn tree_size(path: &Path) -> io::Result<u64> {
    let meta = fs::symlink_metadata(path)?;
    if !meta.is_dir() {
        return Ok(meta.len());
    }
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        match tree_size(&entry.path()) {
            Ok(size) => total += size,
            Err(e) => log::debug!("Skipping {}: {}", entry.path().display(), e),
        }
    }
    Ok(total)
}

/// Size of `path` in KiB (rounded up), or `None` if it does not exist.
pub fn dir_size_kb(path: &Path) -> Option<u64> {
    match tree_size(path) {
        Ok(bytes) => Some(bytes.div_ceil(1024)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            log::warn!("Could not measure {}: {}", path.display(), e);
            None
        }
    }
}

/// Measures every named entity in parallel. Entities without a keg directory
/// are left out of the map so their current size stays untouched.
pub fn keg_sizes(prefix: &Path, names: &[(String, EntityKind)]) -> HashMap<String, PartialFields> {
    names
        .par_iter()
        .filter_map(|(name, kind)| {
            dir_size_kb(&keg_dir(prefix, name, *kind)).map(|kb| (name.clone(), PartialFields::size(kb)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn write_bytes(path: &Path, len: usize) {
        let mut f = File::create(path).unwrap();
        f.write_all(&vec![0u8; len]).unwrap();
    }

    #[test]
    fn sizes_cover_nested_files() {
        let prefix = tempfile::tempdir().unwrap();
        let keg = keg_dir(prefix.path(), "wget", EntityKind::Formula).join("1.24.5");
        fs::create_dir_all(keg.join("bin")).unwrap();
        write_bytes(&keg.join("bin").join("wget"), 2048);
        write_bytes(&keg.join("README"), 100);

        let sizes = keg_sizes(
            prefix.path(),
            &[
                ("wget".to_string(), EntityKind::Formula),
                ("curl".to_string(), EntityKind::Formula),
            ],
        );
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes["wget"].size_kb, Some(3));
    }

    #[test]
    fn casks_live_in_caskroom() {
        let prefix = tempfile::tempdir().unwrap();
        let dir = keg_dir(prefix.path(), "firefox", EntityKind::Cask);
        fs::create_dir_all(&dir).unwrap();
        write_bytes(&dir.join("Firefox.dmg"), 1024);
        assert_eq!(dir_size_kb(&dir), Some(1));
        assert!(dir.ends_with("Caskroom/firefox"));
    }
}
