//! Deterministic resource URLs and output file names derived from video IDs.

use std::path::{Path, PathBuf};

use super::constants::{OUTPUT_EXTENSION, OUTPUT_PREFIX, PARTIAL_SUFFIX};

/// Builds the CDN location of a video: `<base>/<id>.mp4`.
///
/// A trailing slash on `base` is ignored.
///
/// ```
/// use sora_batch_core::download::resource_url;
///
/// assert_eq!(
///     resource_url("https://oscdn2.dyysy.com/MP4/", "abc"),
///     "https://oscdn2.dyysy.com/MP4/abc.mp4"
/// );
/// ```
#[must_use]
pub fn resource_url(base: &str, id: &str) -> String {
    format!("{}/{id}.{OUTPUT_EXTENSION}", base.trim_end_matches('/'))
}

/// Returns the saved file name for a video: `Sora_<id>.mp4`.
#[must_use]
pub fn output_filename(id: &str) -> String {
    format!("{OUTPUT_PREFIX}{id}.{OUTPUT_EXTENSION}")
}

/// Returns the full destination path of a video inside `output_dir`.
#[must_use]
pub fn output_path(output_dir: &Path, id: &str) -> PathBuf {
    output_dir.join(output_filename(id))
}

/// Returns the temporary path a body is streamed into before it replaces `dest`.
#[must_use]
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}
