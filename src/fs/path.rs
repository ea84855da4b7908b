use std::path::{Component, Path, PathBuf};

use crate::error::CaptureError;

/// Long-path and device prefixes that capture backends leak into the paths they return,
/// paired with what they should be rewritten to. Order matters: the UNC forms must be tried
/// before their shorter counterparts.
const LONG_PATH_PREFIXES: [(&str, &str); 6] = [
    (r"\\?\UNC\", r"\\"),
    (r"\\?\", ""),
    (r"\??\", ""),
    (r"\\.\", ""),
    ("//?/UNC/", "//"),
    ("//?/", ""),
];

/// Strips any recognized long-path prefix from a path handed back by a screenshot provider so it
/// can be opened by ordinary file APIs. Paths without a prefix are returned untouched.
pub fn sanitize_provider_path(raw: &Path) -> Result<PathBuf, CaptureError> {
    let invalid = |reason| CaptureError::PathSanitization {
        path: raw.to_path_buf(),
        reason,
    };

    // Prefixes are ASCII, so a path that isn't valid unicode can't carry one.
    let Some(text) = raw.to_str() else {
        return Ok(raw.to_path_buf());
    };

    if text.trim().is_empty() {
        return Err(invalid("empty path"));
    }
    if text.contains('\0') {
        return Err(invalid("embedded NUL character"));
    }

    let Some((prefix, replacement)) = LONG_PATH_PREFIXES
        .iter()
        .find(|(prefix, _)| text.starts_with(prefix))
    else {
        return Ok(raw.to_path_buf());
    };

    let rest = &text[prefix.len()..];
    if rest.is_empty() {
        return Err(invalid("nothing follows the long-path prefix"));
    }

    Ok(PathBuf::from(format!("{replacement}{rest}")))
}

/// Checks that a path handed to the filesystem provider stays inside its base directory.
pub fn ensure_relative(path: &Path) -> Result<(), &'static str> {
    if path.as_os_str().is_empty() {
        return Err("path is empty");
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err("path escapes its base directory"),
            Component::RootDir | Component::Prefix(_) => return Err("path must be relative"),
        }
    }
    Ok(())
}
