//! Payload extraction from a self-extracting binary.
//!
//! The archive is located by reading the trailer backwards from end of file;
//! the runner stub's own length is never assumed.

use crate::archive::trailer::{self, TRAILER_LEN};
use crate::config::types::{ParkerError, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Counts of what an unpack created
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnpackSummary {
    pub directories: usize,
    pub files: usize,
    pub symlinks: usize,
}

/// Read the compressed archive embedded at the end of `exe`.
pub fn read_embedded_archive(exe: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(exe)?;
    let archive = read_archive_from(&mut file)?;
    log::debug!(
        "read {} bytes of embedded archive from {}",
        archive.len(),
        exe.display()
    );
    Ok(archive)
}

/// Recover the archive bytes from any seekable self-extracting image.
pub fn read_archive_from<R: Read + Seek>(reader: &mut R) -> Result<Vec<u8>> {
    let total = reader.seek(SeekFrom::End(0))?;
    if total < TRAILER_LEN as u64 {
        return Err(ParkerError::TrailerCorrupt(format!(
            "image is {} bytes, shorter than the trailer",
            total
        )));
    }

    reader.seek(SeekFrom::End(-(TRAILER_LEN as i64)))?;
    let mut raw = [0u8; TRAILER_LEN];
    reader.read_exact(&mut raw)?;
    log::debug!("tail {} bytes: {:?}", TRAILER_LEN, String::from_utf8_lossy(&raw));

    let size = trailer::decode(&raw)?;
    let available = total - TRAILER_LEN as u64;
    if size > available {
        return Err(ParkerError::TruncatedRead {
            expected: size,
            actual: available,
        });
    }

    reader.seek(SeekFrom::Start(available - size))?;
    let mut archive = Vec::with_capacity(size as usize);
    let read = reader.by_ref().take(size).read_to_end(&mut archive)? as u64;
    if read != size {
        return Err(ParkerError::TruncatedRead {
            expected: size,
            actual: read,
        });
    }

    if !archive.starts_with(&GZIP_MAGIC) {
        return Err(ParkerError::TrailerCorrupt(format!(
            "length {} does not point at a gzip stream",
            size
        )));
    }

    Ok(archive)
}

/// Reject absolute paths and parent components; drop `.` components.
pub fn sanitize_entry_path(path: &Path) -> Result<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ParkerError::Extract(format!(
                    "entry {} escapes the working directory",
                    path.display()
                )));
            }
        }
    }
    Ok(clean)
}

fn extract_err(what: &str, path: &Path, err: impl std::fmt::Display) -> ParkerError {
    ParkerError::Extract(format!("{} {}: {}", what, path.display(), err))
}

/// Refuse to write through a symlink planted by an earlier entry. Every
/// ancestor of `relative` below `workdir` must be a real directory or absent.
fn ensure_no_symlink_ancestors(workdir: &Path, relative: &Path) -> Result<()> {
    let mut current = workdir.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(ParkerError::Extract(format!(
                    "entry {} escapes the working directory through symlink {}",
                    relative.display(),
                    current.display()
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => return Err(extract_err("Failed to stat", &current, e)),
        }
    }
    Ok(())
}

/// Remove `dest` when it is a symlink so the next write lands inside the workdir.
fn unlink_symlink(dest: &Path) -> Result<()> {
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(dest).map_err(|e| extract_err("Failed to replace", dest, e))
        }
        _ => Ok(()),
    }
}

/// Decompress and untar `reader` into `workdir`, in archive order.
pub fn unpack_archive<R: Read>(reader: R, workdir: &Path) -> Result<UnpackSummary> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let mut summary = UnpackSummary::default();

    let entries = archive
        .entries()
        .map_err(|e| extract_err("Failed to read archive for", workdir, e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| extract_err("Bad tar header in archive for", workdir, e))?;
        let raw_path = entry
            .path()
            .map_err(|e| extract_err("Bad entry path in archive for", workdir, e))?
            .into_owned();
        let relative = sanitize_entry_path(&raw_path)?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let dest = workdir.join(&relative);
        let entry_type = entry.header().entry_type();
        ensure_no_symlink_ancestors(workdir, &relative)?;

        if entry_type.is_dir() {
            unlink_symlink(&dest)?;
            fs::create_dir_all(&dest)
                .map_err(|e| extract_err("Failed to create directory", &dest, e))?;
            summary.directories += 1;
        } else if entry_type.is_file() {
            let mode = entry
                .header()
                .mode()
                .map_err(|e| extract_err("Bad mode for", &dest, e))?
                & 0o7777;
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| extract_err("Failed to create directory", parent, e))?;
            }

            unlink_symlink(&dest)?;
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(mode)
                .custom_flags(libc::O_NOFOLLOW)
                .open(&dest)
                .map_err(|e| extract_err("Failed to create file", &dest, e))?;
            io::copy(&mut entry, &mut file)
                .map_err(|e| extract_err("Failed to write file", &dest, e))?;
            // umask applies at creation and pre-existing files keep their mode
            file.set_permissions(fs::Permissions::from_mode(mode))
                .map_err(|e| extract_err("Failed to chmod", &dest, e))?;
            summary.files += 1;
        } else if entry_type.is_symlink() {
            let link = entry
                .link_name()
                .map_err(|e| extract_err("Bad link name for", &dest, e))?
                .ok_or_else(|| extract_err("Missing link name for", &dest, "empty"))?
                .into_owned();
            if fs::symlink_metadata(&dest).is_ok() {
                fs::remove_file(&dest)
                    .map_err(|e| extract_err("Failed to replace", &dest, e))?;
            }
            std::os::unix::fs::symlink(&link, &dest)
                .map_err(|e| extract_err("Failed to create symlink", &dest, e))?;
            summary.symlinks += 1;
        } else {
            log::debug!("skipping {:?} entry {}", entry_type, raw_path.display());
        }
    }

    log::debug!("unpacked into {}: {:?}", workdir.display(), summary);
    Ok(summary)
}

/// Unpack a compressed archive stored at `archive_path` into `workdir`.
pub fn unpack_file(archive_path: &Path, workdir: &Path) -> Result<UnpackSummary> {
    let file = File::open(archive_path)?;
    unpack_archive(io::BufReader::new(file), workdir)
}
