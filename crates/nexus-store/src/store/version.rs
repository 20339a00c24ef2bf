//! Store version marker
//!
//! Every store keeps `"<type descriptor> <version>"` in a version file next
//! to the store file, prefixed with a one byte length. The file is mapped
//! through the page cache like the store itself and is written last during
//! creation, so its presence means creation completed. Keeping it outside
//! the store file leaves record slot `n` at id `n` for stores without a
//! header.

use crate::page_cache::{PageCache, PageCursor, PageIntent, PagedFile};
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Longest marker the one byte length prefix can describe
pub(crate) const MAX_MARKER_LEN: usize = u8::MAX as usize;

/// Page size the version file is mapped with; one page holds any marker
pub(crate) const MARKER_PAGE_SIZE: usize = MAX_MARKER_LEN + 1;

pub(crate) fn marker(type_descriptor: &str, version: &str) -> Result<String> {
    let marker = format!("{} {}", type_descriptor, version);
    if marker.len() > MAX_MARKER_LEN {
        return Err(Error::layout(format!(
            "Version marker '{}' is longer than {} bytes",
            marker, MAX_MARKER_LEN
        )));
    }
    Ok(marker)
}

/// Path of the version file kept next to a store file
pub fn version_file_path(store_path: &Path) -> PathBuf {
    let mut name = store_path.as_os_str().to_owned();
    name.push(".version");
    PathBuf::from(name)
}

/// Read the marker persisted at `path`
///
/// `None` when the file is missing or holds no marker, which is what an
/// interrupted creation leaves behind.
pub(crate) fn read_marker_file(page_cache: &dyn PageCache, path: &Path) -> Result<Option<String>> {
    let file = match page_cache.map(path, MARKER_PAGE_SIZE, false) {
        Ok(file) => file,
        Err(Error::StoreNotFound { .. }) => return Ok(None),
        Err(e) => return Err(e),
    };
    let found = read_first_page(file.as_ref());
    let closed = file.close();
    let found = found?;
    closed?;
    Ok(found)
}

fn read_first_page(file: &dyn PagedFile) -> Result<Option<String>> {
    let mut cursor = file.io(0, PageIntent::SharedRead)?;
    if !cursor.next()? {
        return Ok(None);
    }
    let found = loop {
        let found = read_marker(&mut *cursor, 0);
        if !cursor.should_retry()? {
            break found?;
        }
    };
    cursor.close();
    Ok(if found.is_empty() { None } else { Some(found) })
}

/// Persist `marker` at `path`, replacing any previous marker
pub(crate) fn write_marker_file(page_cache: &dyn PageCache, path: &Path, marker: &str) -> Result<()> {
    let file = page_cache.map(path, MARKER_PAGE_SIZE, true)?;
    let written = write_first_page(file.as_ref(), marker);
    let closed = file.close();
    written?;
    closed
}

fn write_first_page(file: &dyn PagedFile, marker: &str) -> Result<()> {
    let mut cursor = file.io(0, PageIntent::ExclusiveWrite)?;
    if !cursor.next()? {
        return Err(Error::page_cache(format!(
            "Cannot pin the version page of {}",
            file.path().display()
        )));
    }
    write_marker(&mut *cursor, 0, marker)?;
    cursor.close();
    file.flush()
}

fn write_marker(cursor: &mut dyn PageCursor, offset: usize, marker: &str) -> Result<()> {
    cursor.put_u8(offset, marker.len() as u8)?;
    cursor.put_bytes(offset + 1, marker.as_bytes())
}

/// Read the marker at `offset`; unreadable markers come back as a
/// description so they can be reported in a version mismatch
fn read_marker(cursor: &mut dyn PageCursor, offset: usize) -> Result<String> {
    let len = cursor.get_u8(offset)? as usize;
    if offset + 1 + len > cursor.page_size() {
        return Ok(format!("<{} byte marker past page end>", len));
    }
    let mut bytes = vec![0u8; len];
    cursor.get_bytes(offset + 1, &mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CallLog, MockPageCache};

    #[test]
    fn test_marker_format() {
        assert_eq!(
            marker("StringStore", "v0.A.1").unwrap(),
            "StringStore v0.A.1"
        );
        assert!(marker(&"x".repeat(300), "v1").is_err());
    }

    #[test]
    fn test_version_file_path() {
        assert_eq!(
            version_file_path(Path::new("/data/neostore.nodestore.db")),
            PathBuf::from("/data/neostore.nodestore.db.version")
        );
    }

    #[test]
    fn test_marker_file_round_trip() {
        let page_cache = MockPageCache::new(CallLog::new());
        let path = Path::new("/db/nodes.store.version");

        assert_eq!(read_marker_file(&page_cache, path).unwrap(), None);

        write_marker_file(&page_cache, path, "NodeStore v1").unwrap();
        write_marker_file(&page_cache, path, "NodeStore v2").unwrap();
        assert_eq!(
            read_marker_file(&page_cache, path).unwrap().as_deref(),
            Some("NodeStore v2")
        );
    }

    #[test]
    fn test_empty_marker_file_reads_as_absent() {
        let page_cache = MockPageCache::new(CallLog::new());
        let path = Path::new("/db/nodes.store.version");
        page_cache
            .map(path, MARKER_PAGE_SIZE, true)
            .unwrap()
            .close()
            .unwrap();

        assert!(page_cache.contains(path));
        assert_eq!(read_marker_file(&page_cache, path).unwrap(), None);
    }
}
