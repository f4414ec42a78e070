//! Cached loading with a retrievable last error.

use std::path::Path;

use tracing::warn;

use crate::constants::{DEFAULT_MAX_CODE_BYTES, DEFAULT_MAX_SECTION_BYTES};
use crate::{ElfImage, Result};

/// Resource bounds applied while loading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadOptions {
    /// Upper bound on the executable segment bytes read.
    pub max_code_bytes: usize,
    /// Sections larger than this keep their header but no data.
    pub max_section_bytes: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            max_code_bytes: DEFAULT_MAX_CODE_BYTES,
            max_section_bytes: DEFAULT_MAX_SECTION_BYTES,
        }
    }
}

impl LoadOptions {
    #[must_use]
    pub const fn with_max_code_bytes(mut self, bytes: usize) -> Self {
        self.max_code_bytes = bytes;
        self
    }

    #[must_use]
    pub const fn with_max_section_bytes(mut self, bytes: usize) -> Self {
        self.max_section_bytes = bytes;
        self
    }
}

/// Holds the most recently loaded image.
///
/// A successful [`load_file`](Self::load_file) replaces the cached image
/// wholesale; a failed one clears it and records the error text.
#[derive(Debug, Default)]
pub struct ElfLoader {
    options: LoadOptions,
    image: Option<ElfImage>,
    last_error: Option<String>,
}

impl ElfLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: LoadOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Load `path`, replacing any cached image.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<&ElfImage> {
        let path = path.as_ref();
        self.image = None;
        self.last_error = None;
        match ElfImage::from_path(path, &self.options) {
            Ok(image) => Ok(self.image.insert(image)),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to load ELF");
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    pub const fn image(&self) -> Option<&ElfImage> {
        self.image.as_ref()
    }

    /// Take ownership of the cached image.
    pub fn take_image(&mut self) -> Option<ElfImage> {
        self.image.take()
    }

    pub const fn is_loaded(&self) -> bool {
        self.image.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub const fn options(&self) -> &LoadOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::ElfError;
    use crate::testutil::sample_x86_64;

    fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid() {
        let file = write_temp(&sample_x86_64());
        let mut loader = ElfLoader::new();
        let image = loader.load_file(file.path()).unwrap();
        assert_eq!(image.path(), Some(file.path()));
        assert_eq!(image.info().symbol_count, image.get_symbols().len());
        assert!(loader.is_loaded());
        assert!(loader.last_error().is_none());
    }

    #[test]
    fn test_non_elf_sets_last_error() {
        for content in [&b"#!/bin/sh\necho hi\n"[..], b"", b"\x7fELG....", b"MZ\x90\x00\x03"] {
            let file = write_temp(content);
            let mut loader = ElfLoader::new();
            assert!(loader.load_file(file.path()).is_err());
            assert!(!loader.is_loaded());
            assert!(!loader.last_error().unwrap().is_empty());
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = ElfLoader::new();
        let err = loader.load_file(dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, ElfError::Io { .. }));
        assert!(loader.last_error().unwrap().contains("absent"));
    }

    #[test]
    fn test_reload_replaces_image() {
        let good = write_temp(&sample_x86_64());
        let bad = write_temp(b"not an elf");
        let mut loader = ElfLoader::new();
        loader.load_file(good.path()).unwrap();
        assert!(loader.load_file(bad.path()).is_err());
        assert!(loader.image().is_none());
        loader.load_file(good.path()).unwrap();
        assert!(loader.last_error().is_none());
    }

    #[test]
    fn test_truncated_elf_does_not_panic() {
        let full = sample_x86_64();
        for len in [4, 16, 40, 64, 100, full.len() / 2, full.len() - 1] {
            let file = write_temp(&full[..len]);
            let mut loader = ElfLoader::new();
            // best-effort: either an error or a partial image, never a panic
            let _ = loader.load_file(file.path());
        }
    }
}
