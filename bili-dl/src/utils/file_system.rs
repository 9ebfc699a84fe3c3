//! Tools for working with the file system.

use crate::model::TrackKind;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::fs::{File, OpenOptions};

/// Characters that are illegal in file names on at least one supported platform.
static ILLEGAL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|]"#).expect("static pattern is valid"));

/// Creates (or truncates) a file at the given destination.
///
/// # Arguments
///
/// * `destination` - The path to create the file at.
pub async fn create_file(destination: impl AsRef<Path>) -> std::io::Result<File> {
    let mut open_options = OpenOptions::new();
    open_options.write(true);
    open_options.create(true);
    open_options.truncate(true);

    #[cfg(not(target_os = "windows"))]
    {
        open_options.mode(0o644);
    }

    open_options.open(destination).await
}

/// Creates a new directory at the given destination.
/// If the directory already exists, nothing is done.
///
/// # Arguments
///
/// * `destination` - The path to create the directory at.
pub fn create_dir(destination: impl AsRef<Path>) -> std::io::Result<()> {
    std::fs::create_dir_all(destination)
}

/// Creates the parent directory of the given destination.
/// If the parent directory already exists, nothing is done.
///
/// # Arguments
///
/// * `destination` - The path to create the parent directory for.
pub fn create_parent_dir(destination: impl AsRef<Path>) -> std::io::Result<()> {
    match destination.as_ref().parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Removes a temporary file and logs any errors.
/// Does not propagate errors to avoid interrupting the execution flow; a file
/// that is already gone counts as removed.
///
/// # Arguments
///
/// * `file_path` - The path of the file to delete
///
/// # Returns
///
/// `true` if the file is gone afterwards, `false` otherwise
pub async fn remove_temp_file(file_path: impl AsRef<Path> + std::fmt::Debug) -> bool {
    match tokio::fs::remove_file(&file_path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!("Failed to remove temporary file {:?}: {}", file_path, _e);

            false
        }
    }
}

/// Blocking variant of [`remove_temp_file`], for use in `Drop`.
pub fn remove_temp_file_sync(file_path: impl AsRef<Path> + std::fmt::Debug) -> bool {
    match std::fs::remove_file(&file_path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!("Failed to remove temporary file {:?}: {}", file_path, _e);

            false
        }
    }
}

/// The path an in-progress download is written to before it is renamed.
pub fn partial_path(destination: impl AsRef<Path>) -> PathBuf {
    let mut name = destination
        .as_ref()
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");

    destination.as_ref().with_file_name(name)
}

/// The temporary file of one track of one page, unique per `(bvid, cid, track)`.
pub fn track_path(temp_dir: impl AsRef<Path>, bvid: &str, cid: i64, kind: TrackKind) -> PathBuf {
    temp_dir
        .as_ref()
        .join(format!("{}_{}_{}.m4s", sanitize(bvid), cid, kind))
}

/// The file a job muxes into before it is moved onto its final name.
pub fn staged_output_path(temp_dir: impl AsRef<Path>, bvid: &str, cid: i64, quality: u32) -> PathBuf {
    temp_dir
        .as_ref()
        .join(format!("{}_{}_{}.mp4", sanitize(bvid), cid, quality))
}

/// Moves a finished file onto `to`, replacing whatever is there.
///
/// When a rename is not possible, e.g. across file systems, the file is copied
/// to `<to>.part` first and renamed from there, so `to` never holds a partial
/// copy. The source is left to its owner in that case.
///
/// # Arguments
///
/// * `from` - The finished file.
/// * `to` - Its final path.
pub async fn move_file(from: impl AsRef<Path>, to: impl AsRef<Path>) -> std::io::Result<()> {
    let (from, to) = (from.as_ref(), to.as_ref());
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    let partial = partial_path(to);
    let copied = async {
        tokio::fs::copy(from, &partial).await?;
        tokio::fs::rename(&partial, to).await
    }
    .await;

    if copied.is_err() {
        remove_temp_file(&partial).await;
    }
    copied
}

/// Strips `\ / : * ? " < > |` and surrounding whitespace from a name component.
pub fn sanitize(component: &str) -> String {
    ILLEGAL_CHARS.replace_all(component, "").trim().to_string()
}

/// Like [`sanitize`], then keeps at most `max_chars` characters.
pub fn sanitize_truncated(component: &str, max_chars: usize) -> String {
    sanitize(component)
        .chars()
        .take(max_chars)
        .collect::<String>()
        .trim_end()
        .to_string()
}
