//! Batch input resolution
//!
//! Turns the single input path given on the command line into either one
//! file (single-item mode) or an ordered list of files (batch mode). Archive
//! inputs are extracted into a scratch directory that is wiped before every
//! extraction, so files from a previous run never leak into the next batch.

use crate::error::InputError;
use crate::types::InputType;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Platform housekeeping files that never count as batch inputs
const HOUSEKEEPING_FILES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

/// What the resolver produced
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedInput {
    /// A plain file: upload it on its own, no batch
    Single(PathBuf),
    /// Files listed from a directory or extracted archive, sorted by name
    Batch(Vec<PathBuf>),
}

impl ResolvedInput {
    /// Files to upload, in order
    pub fn files(&self) -> Vec<PathBuf> {
        match self {
            ResolvedInput::Single(path) => vec![path.clone()],
            ResolvedInput::Batch(files) => files.clone(),
        }
    }

    /// Whether batch mode applies
    pub fn is_batch(&self) -> bool {
        matches!(self, ResolvedInput::Batch(_))
    }
}

/// Expands archive and directory inputs into upload lists
pub struct BatchInputResolver {
    scratch_dir: PathBuf,
}

impl BatchInputResolver {
    /// Create a resolver extracting archives into `scratch_dir`
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Directory archives are extracted into
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Resolve `input` for the given input type.
    ///
    /// Archive and directory inputs are only accepted for [`InputType::Photo`];
    /// this check runs before anything touches the scratch directory.
    pub fn resolve(&self, input: &Path, input_type: InputType) -> Result<ResolvedInput, InputError> {
        let archive = is_zip(input);
        let directory = input.is_dir();

        if !archive && !directory {
            if input.is_file() {
                debug!(?input, "single input file");
                return Ok(ResolvedInput::Single(input.to_path_buf()));
            }
            return Err(InputError::NotSupported {
                path: input.to_path_buf(),
            });
        }

        if input_type != InputType::Photo {
            return Err(InputError::UnsupportedBatchType {
                input_type: input_type.to_string(),
            });
        }

        let listing_root = if archive {
            self.extract(input)?;
            self.scratch_dir.clone()
        } else {
            input.to_path_buf()
        };

        let files = list_eligible_files(&listing_root)?;
        info!(
            input = ?input,
            file_count = files.len(),
            "resolved batch input"
        );
        Ok(ResolvedInput::Batch(files))
    }

    /// Clear the scratch directory and extract `archive` into it
    fn extract(&self, archive_path: &Path) -> Result<(), InputError> {
        match std::fs::remove_dir_all(&self.scratch_dir) {
            Ok(()) => debug!(scratch_dir = ?self.scratch_dir, "cleared scratch directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(InputError::Listing {
                    path: self.scratch_dir.clone(),
                    reason: format!("failed to clear scratch directory: {}", e),
                });
            }
        }

        std::fs::create_dir_all(&self.scratch_dir).map_err(|e| InputError::Listing {
            path: self.scratch_dir.clone(),
            reason: format!("failed to create scratch directory: {}", e),
        })?;

        let extraction_failed = |reason: String| InputError::ArchiveExtractionFailed {
            archive: archive_path.to_path_buf(),
            reason,
        };

        let file = std::fs::File::open(archive_path)
            .map_err(|e| extraction_failed(format!("failed to open archive: {}", e)))?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| extraction_failed(format!("failed to read ZIP archive: {}", e)))?;

        let mut extracted = 0usize;
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| extraction_failed(format!("failed to read ZIP entry: {}", e)))?;

            let out_path = match entry.enclosed_name() {
                Some(path) => self.scratch_dir.join(path),
                None => {
                    warn!(entry = entry.name(), "skipping entry with unsafe path");
                    continue;
                }
            };

            if entry.is_dir() {
                std::fs::create_dir_all(&out_path)
                    .map_err(|e| extraction_failed(format!("failed to create directory: {}", e)))?;
                continue;
            }

            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    extraction_failed(format!("failed to create parent directories: {}", e))
                })?;
            }

            let mut outfile = std::fs::File::create(&out_path)
                .map_err(|e| extraction_failed(format!("failed to create output file: {}", e)))?;
            std::io::copy(&mut entry, &mut outfile)
                .map_err(|e| extraction_failed(format!("failed to extract file: {}", e)))?;
            extracted += 1;
        }

        info!(?archive_path, extracted, "ZIP extraction successful");
        Ok(())
    }
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
        && path.is_file()
}

fn is_housekeeping(name: &str) -> bool {
    HOUSEKEEPING_FILES.contains(&name) || name.starts_with("._")
}

/// Leaf files directly under `dir`, sorted by file name
fn list_eligible_files(dir: &Path) -> Result<Vec<PathBuf>, InputError> {
    let listing_failed = |e: std::io::Error| InputError::Listing {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(listing_failed)? {
        let entry = entry.map_err(listing_failed)?;
        let path = entry.path();

        // Skip directories
        if path.is_dir() {
            continue;
        }

        let name = entry.file_name();
        if is_housekeeping(&name.to_string_lossy()) {
            debug!(?path, "skipping housekeeping file");
            continue;
        }

        files.push(path);
    }

    files.sort();
    Ok(files)
}

/// Replace id arguments with ids read from `reader` when any of them is `-`.
///
/// One id per line; surrounding whitespace and blank lines are dropped.
pub fn expand_stdin_ids(args: Vec<String>, reader: impl std::io::BufRead) -> std::io::Result<Vec<String>> {
    if !args.iter().any(|arg| arg == "-") {
        return Ok(args);
    }

    let mut ids = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let id = line.trim();
        if !id.is_empty() {
            ids.push(id.to_string());
        }
    }
    debug!(count = ids.len(), "read ids from stdin");
    Ok(ids)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn dash_reads_ids_from_stdin() {
        let stdin = std::io::Cursor::new("abc\n\n  def  \n");
        let ids = expand_stdin_ids(vec!["-".to_string()], stdin).unwrap();
        assert_eq!(ids, vec!["abc", "def"]);
    }

    #[test]
    fn ids_without_dash_ignore_stdin() {
        let stdin = std::io::Cursor::new("never read\n");
        let ids = expand_stdin_ids(vec!["k1".to_string(), "k2".to_string()], stdin).unwrap();
        assert_eq!(ids, vec!["k1", "k2"]);
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        for (name, content) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    fn names(files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn plain_file_is_single_item() {
        let dir = tempdir().unwrap();
        let photo = dir.path().join("leo.jpg");
        std::fs::write(&photo, b"jpeg").unwrap();

        let resolver = BatchInputResolver::new(dir.path().join("scratch"));
        let resolved = resolver.resolve(&photo, InputType::Photo).unwrap();

        assert_eq!(resolved, ResolvedInput::Single(photo));
        assert!(!resolved.is_batch());
        assert!(
            !dir.path().join("scratch").exists(),
            "single-item mode must not touch the scratch directory"
        );
    }

    #[test]
    fn directory_listing_skips_housekeeping_and_subdirectories() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("photos");
        std::fs::create_dir_all(input.join("subdir")).unwrap();
        std::fs::write(input.join("b.jpg"), b"b").unwrap();
        std::fs::write(input.join("a.jpg"), b"a").unwrap();
        std::fs::write(input.join(".DS_Store"), b"meta").unwrap();
        std::fs::write(input.join("subdir").join("c.jpg"), b"c").unwrap();

        let resolver = BatchInputResolver::new(dir.path().join("scratch"));
        let resolved = resolver.resolve(&input, InputType::Photo).unwrap();

        match resolved {
            ResolvedInput::Batch(files) => {
                assert_eq!(names(&files), vec!["a.jpg", "b.jpg"]);
                assert!(files.iter().all(|f| f.starts_with(&input)));
            }
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[test]
    fn archive_with_non_photo_type_is_rejected_before_extraction() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("scans.zip");
        write_zip(&archive, &[("a.jpg", b"a")]);
        let scratch = dir.path().join("scratch");

        let resolver = BatchInputResolver::new(&scratch);
        let err = resolver.resolve(&archive, InputType::Rgbd).unwrap_err();

        assert!(matches!(
            err,
            InputError::UnsupportedBatchType { ref input_type } if input_type == "rgbd"
        ));
        assert!(!scratch.exists(), "nothing may be extracted for a rejected batch");
    }

    #[test]
    fn directory_with_non_photo_type_is_rejected() {
        let dir = tempdir().unwrap();
        let resolver = BatchInputResolver::new(dir.path().join("scratch"));
        let err = resolver
            .resolve(dir.path(), InputType::HifimeshTexturePhoto)
            .unwrap_err();
        assert!(matches!(err, InputError::UnsupportedBatchType { .. }));
    }

    #[test]
    fn archive_extraction_clears_stale_scratch_files() {
        let dir = tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();
        std::fs::write(scratch.join("stale.jpg"), b"old run").unwrap();

        let archive = dir.path().join("batch.zip");
        write_zip(
            &archive,
            &[
                ("two.jpg", b"2"),
                ("one.jpg", b"1"),
                ("nested/", b""),
                ("nested/three.jpg", b"3"),
            ],
        );

        let resolver = BatchInputResolver::new(&scratch);
        let files = match resolver.resolve(&archive, InputType::Photo).unwrap() {
            ResolvedInput::Batch(files) => files,
            other => panic!("expected batch, got {other:?}"),
        };

        assert_eq!(names(&files), vec!["one.jpg", "two.jpg"]);
        assert!(!scratch.join("stale.jpg").exists());
        assert_eq!(std::fs::read(&files[0]).unwrap(), b"1");
    }

    #[test]
    fn corrupt_archive_reports_extraction_failure() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        std::fs::write(&archive, b"definitely not a zip").unwrap();

        let resolver = BatchInputResolver::new(dir.path().join("scratch"));
        let err = resolver.resolve(&archive, InputType::Photo).unwrap_err();
        assert!(matches!(err, InputError::ArchiveExtractionFailed { .. }));
    }

    #[test]
    fn empty_directory_is_an_empty_batch() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("empty");
        std::fs::create_dir_all(&input).unwrap();

        let resolver = BatchInputResolver::new(dir.path().join("scratch"));
        assert_eq!(
            resolver.resolve(&input, InputType::Photo).unwrap(),
            ResolvedInput::Batch(vec![])
        );
    }

    #[test]
    fn missing_input_is_not_supported() {
        let dir = tempdir().unwrap();
        let resolver = BatchInputResolver::new(dir.path().join("scratch"));
        let err = resolver
            .resolve(&dir.path().join("nope.jpg"), InputType::Photo)
            .unwrap_err();
        assert!(matches!(err, InputError::NotSupported { .. }));
    }
}
