//! Extraction of commit tarballs.
//!
//! GitHub wraps every file of a commit tarball in one synthetic directory
//! (`owner-repo-sha/`). Extraction drops that first path component so the
//! destination directory holds the repository tree itself.

use flate2::read::GzDecoder;
use std::fs::{self, DirBuilder, File, Permissions};
use std::io::{self, Read};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt, symlink};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};

/// Decompresses a gzip stream and extracts the tar archive inside into `dest`.
pub fn extract<R: Read>(reader: R, dest: &Path) -> io::Result<()> {
    extract_tar(GzDecoder::new(reader), dest)
}

/// Extracts an uncompressed tar stream into `dest`, stripping the root component.
///
/// Entries are handled in stream order. The first I/O error aborts extraction;
/// whatever was already written stays in `dest` for the caller to clean up.
pub fn extract_tar<R: Read>(reader: R, dest: &Path) -> io::Result<()> {
    let mut archive = Archive::new(reader);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_type = entry.header().entry_type();

        if is_metadata(entry_type) {
            continue;
        }

        let path = entry.path()?.into_owned();
        let relative = strip_root(&path)?;

        if relative.as_os_str().is_empty() && !entry_type.is_dir() {
            continue;
        }

        let target = dest.join(&relative);
        let mode = entry.header().mode()? & 0o7777;

        match entry_type {
            EntryType::Directory => {
                DirBuilder::new().recursive(true).mode(mode).create(&target)?;
            }
            EntryType::Symlink => {
                // Targets are recreated verbatim, absolute ones included.
                let link = entry.link_name()?.ok_or_else(|| missing_link(&path))?;
                symlink(&link, &target)?;
            }
            EntryType::Link => {
                let link = entry.link_name()?.ok_or_else(|| missing_link(&path))?;
                let source = dest.join(strip_root(&link)?);
                fs::hard_link(source, &target)?;
            }
            EntryType::Char | EntryType::Block | EntryType::Fifo => {
                continue;
            }
            _ => {
                let mut file = File::create(&target)?;
                io::copy(&mut entry, &mut file)?;
                drop(file);
                fs::set_permissions(&target, Permissions::from_mode(mode))?;
            }
        }
    }

    Ok(())
}

fn is_metadata(entry_type: EntryType) -> bool {
    entry_type.is_pax_global_extensions()
        || entry_type.is_pax_local_extensions()
        || entry_type.is_gnu_longname()
        || entry_type.is_gnu_longlink()
}

/// Drops the first path component and rejects anything that could leave the
/// destination directory.
fn strip_root(path: &Path) -> io::Result<PathBuf> {
    let mut relative = PathBuf::new();
    for component in path.components().skip(1) {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("archive entry escapes destination: {}", path.display()),
                ));
            }
        }
    }
    Ok(relative)
}

fn missing_link(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("link entry without target: {}", path.display()),
    )
}
