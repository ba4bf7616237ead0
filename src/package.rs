//! Packaging of test binaries and their data dependencies.
//!
//! The service accepts one upload per test, so the test binary, every
//! host-side data dependency and any auxiliary install packages are bundled
//! into a single zip archive:
//!
//! | Input | Archive location |
//! |-------|------------------|
//! | test binary | its base name |
//! | directory dependency | its contents, relative to the directory |
//! | file dependency | its base name |
//! | auxiliary package | its base name |
//!
//! Directory walks are sorted by file name, so the member listing only
//! depends on the inputs.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{RunError, RunResult};

/// A host file or directory that must be visible to the test on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDependency {
    /// Path on the machine running the trigger phase.
    #[serde(rename = "host")]
    pub host_path: PathBuf,

    /// Intended location on the device. The service places bundled files
    /// itself; this is kept for logging.
    #[serde(rename = "device", default)]
    pub device_path: String,
}

impl DataDependency {
    pub fn new(host_path: impl Into<PathBuf>, device_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            device_path: device_path.into(),
        }
    }
}

/// A packaged test archive.
///
/// Owns the temporary archive file; it is deleted when this value is dropped.
#[derive(Debug)]
pub struct PackagedArtifact {
    archive: NamedTempFile,
    /// Base name of the test binary inside the archive.
    pub host_test: String,
    /// Top-level names of the data dependencies, as seen on the device.
    pub sdcard_files: Vec<String>,
    /// Base names of the auxiliary install packages.
    pub additional_apks: Vec<String>,
    /// Every file stored in the archive, in write order.
    pub members: Vec<String>,
}

impl PackagedArtifact {
    /// Path of the archive on disk.
    pub fn path(&self) -> &Path {
        self.archive.path()
    }
}

/// Bundles `test_path`, `data_deps` and `extra_apks` into a temporary zip.
///
/// # Errors
///
/// Returns [`RunError::Packaging`] if an input has no usable file name, does
/// not exist, or two inputs map to the same archive member; I/O errors are
/// passed through.
pub fn package_test(
    test_path: &Path,
    data_deps: &[DataDependency],
    extra_apks: &[PathBuf],
) -> RunResult<PackagedArtifact> {
    let mut archive = tempfile::Builder::new()
        .prefix("devrun-test-")
        .suffix(".zip")
        .tempfile()?;

    let host_test = base_name(test_path)?;
    let mut sdcard_files = Vec::new();
    let mut additional_apks = Vec::new();

    let members = {
        let mut writer = ArchiveWriter::new(archive.as_file_mut());
        writer.add_file(test_path, &host_test)?;

        for dep in data_deps {
            let host = &dep.host_path;
            if host.is_dir() {
                writer.add_dir(host)?;
                sdcard_files.extend(top_level_entries(host)?);
            } else if host.is_file() {
                let name = base_name(host)?;
                writer.add_file(host, &name)?;
                sdcard_files.push(name);
            } else {
                return Err(RunError::Packaging(format!(
                    "data dependency not found: {}",
                    host.display()
                )));
            }
            debug!("Bundled {} for {}", host.display(), dep.device_path);
        }

        for apk in extra_apks {
            let name = base_name(apk)?;
            writer.add_file(apk, &name)?;
            additional_apks.push(name);
        }

        writer.finish()?
    };

    Ok(PackagedArtifact {
        archive,
        host_test,
        sdcard_files,
        additional_apks,
        members,
    })
}

/// Zip writer that tracks member names and rejects duplicates.
struct ArchiveWriter<W: io::Write + io::Seek> {
    zip: ZipWriter<W>,
    options: FileOptions,
    members: Vec<String>,
    seen: HashSet<String>,
}

impl<W: io::Write + io::Seek> ArchiveWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            zip: ZipWriter::new(inner),
            options: FileOptions::default().compression_method(CompressionMethod::Deflated),
            members: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn add_file(&mut self, source: &Path, name: &str) -> RunResult<()> {
        if !source.is_file() {
            return Err(RunError::Packaging(format!(
                "not a file: {}",
                source.display()
            )));
        }
        if !self.seen.insert(name.to_string()) {
            return Err(RunError::Packaging(format!(
                "duplicate archive member: {}",
                name
            )));
        }
        self.zip.start_file(name, self.options)?;
        let mut input = fs::File::open(source)?;
        io::copy(&mut input, &mut self.zip)?;
        self.members.push(name.to_string());
        Ok(())
    }

    /// Adds every file under `dir`, named relative to `dir`.
    fn add_dir(&mut self, dir: &Path) -> RunResult<()> {
        for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| RunError::Packaging(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(dir)
                .map_err(|e| RunError::Packaging(e.to_string()))?;
            let name = archive_name(relative);
            self.add_file(entry.path(), &name)?;
        }
        Ok(())
    }

    fn finish(mut self) -> RunResult<Vec<String>> {
        self.zip.finish()?;
        Ok(self.members)
    }
}

/// Joins path components with `/` regardless of platform.
fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn base_name(path: &Path) -> RunResult<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| RunError::Packaging(format!("path has no file name: {}", path.display())))
}

fn top_level_entries(dir: &Path) -> RunResult<Vec<String>> {
    let mut names = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<io::Result<Vec<_>>>()?;
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use zip::ZipArchive;

    struct Fixture {
        _dir: TempDir,
        test_apk: PathBuf,
        data_dir: PathBuf,
        data_file: PathBuf,
        extra_apk: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        let test_apk = root.join("ChromeTest.apk");
        fs::write(&test_apk, b"test apk").unwrap();

        let data_dir = root.join("test_data");
        fs::create_dir_all(data_dir.join("media/nested")).unwrap();
        fs::write(data_dir.join("media/nested/clip.webm"), b"clip").unwrap();
        fs::write(data_dir.join("media/image.png"), b"png").unwrap();
        fs::write(data_dir.join("fonts.xml"), b"<fonts/>").unwrap();

        let data_file = root.join("icudtl.dat");
        fs::write(&data_file, b"icu").unwrap();

        let extra_apk = root.join("ChromeSupport.apk");
        fs::write(&extra_apk, b"support").unwrap();

        Fixture {
            _dir: dir,
            test_apk,
            data_dir,
            data_file,
            extra_apk,
        }
    }

    fn archive_names(path: &Path) -> Vec<String> {
        let archive = ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        names
    }

    #[test]
    fn test_package_layout() {
        let fx = fixture();
        let deps = vec![
            DataDependency::new(&fx.data_dir, "/sdcard/test_data"),
            DataDependency::new(&fx.data_file, "/sdcard/icudtl.dat"),
        ];

        let artifact = package_test(&fx.test_apk, &deps, &[fx.extra_apk.clone()]).unwrap();

        assert_eq!(artifact.host_test, "ChromeTest.apk");
        assert_eq!(artifact.sdcard_files, vec!["fonts.xml", "media", "icudtl.dat"]);
        assert_eq!(artifact.additional_apks, vec!["ChromeSupport.apk"]);
        assert_eq!(
            artifact.members,
            vec![
                "ChromeTest.apk",
                "fonts.xml",
                "media/image.png",
                "media/nested/clip.webm",
                "icudtl.dat",
                "ChromeSupport.apk",
            ]
        );

        let mut expected = artifact.members.clone();
        expected.sort();
        assert_eq!(archive_names(artifact.path()), expected);
    }

    #[test]
    fn test_package_member_listing_is_deterministic() {
        let fx = fixture();
        let deps = vec![
            DataDependency::new(&fx.data_dir, ""),
            DataDependency::new(&fx.data_file, ""),
        ];
        let extras = vec![fx.extra_apk.clone()];

        let first = package_test(&fx.test_apk, &deps, &extras).unwrap();
        let second = package_test(&fx.test_apk, &deps, &extras).unwrap();

        assert_eq!(first.members, second.members);
        assert_eq!(archive_names(first.path()), archive_names(second.path()));
        assert_ne!(first.path(), second.path());
    }

    #[test]
    fn test_missing_dependency_is_packaging_error() {
        let fx = fixture();
        let deps = vec![DataDependency::new(fx.data_dir.join("absent"), "")];

        let err = package_test(&fx.test_apk, &deps, &[]).unwrap_err();

        assert!(matches!(err, RunError::Packaging(_)));
    }

    #[test]
    fn test_duplicate_member_is_rejected() {
        let fx = fixture();
        let deps = vec![DataDependency::new(&fx.test_apk, "")];

        let err = package_test(&fx.test_apk, &deps, &[]).unwrap_err();

        assert!(err.to_string().contains("duplicate archive member"));
    }

    #[test]
    fn test_archive_removed_on_drop() {
        let fx = fixture();
        let artifact = package_test(&fx.test_apk, &[], &[]).unwrap();
        let path = artifact.path().to_path_buf();
        assert!(path.exists());

        drop(artifact);

        assert!(!path.exists());
    }
}
