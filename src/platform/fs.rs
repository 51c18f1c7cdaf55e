// MrcSleuth - platform/fs.rs
//
// Console source probing: decide whether a path is a finished log file or a
// live serial console before anything is opened for reading.

use crate::util::error::SourceError;
use std::io;
use std::path::Path;

/// What kind of line source a path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A regular file captured earlier. Finite.
    LogFile,
    /// A character device such as `/dev/ttyUSB0`. Unbounded.
    SerialConsole,
}

impl SourceKind {
    pub fn is_live(self) -> bool {
        matches!(self, SourceKind::SerialConsole)
    }
}

#[cfg(unix)]
fn is_char_device(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    meta.file_type().is_char_device()
}

#[cfg(not(unix))]
fn is_char_device(_meta: &std::fs::Metadata) -> bool {
    false
}

/// Classify a console source.
///
/// A non-empty regular file is a log file; a character device is a serial
/// console. Anything else (missing path, empty file, directory, socket) is a
/// source error and ends the run before parsing starts.
pub fn classify_source(path: &Path) -> Result<SourceKind, SourceError> {
    let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => SourceError::NotFound {
            path: path.to_path_buf(),
        },
        _ => SourceError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    if is_char_device(&meta) {
        tracing::debug!(path = %path.display(), "Source is a character device");
        return Ok(SourceKind::SerialConsole);
    }
    if meta.is_file() {
        if meta.len() == 0 {
            return Err(SourceError::Empty {
                path: path.to_path_buf(),
            });
        }
        tracing::debug!(path = %path.display(), bytes = meta.len(), "Source is a log file");
        return Ok(SourceKind::LogFile);
    }
    Err(SourceError::Unsupported {
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_regular_file_is_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.log");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"START_MemTest\n")
            .unwrap();
        assert_eq!(classify_source(&path).unwrap(), SourceKind::LogFile);
    }

    #[test]
    fn test_empty_missing_and_directory_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.log");
        std::fs::File::create(&empty).unwrap();

        assert!(matches!(classify_source(&empty), Err(SourceError::Empty { .. })));
        assert!(matches!(
            classify_source(&dir.path().join("missing.log")),
            Err(SourceError::NotFound { .. })
        ));
        assert!(matches!(
            classify_source(dir.path()),
            Err(SourceError::Unsupported { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_dev_null_is_character_device() {
        let kind = classify_source(Path::new("/dev/null")).unwrap();
        assert!(kind.is_live());
    }
}
