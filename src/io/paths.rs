use crate::error::{Result, StemError};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Where downloaded models live: `override_dir` if given, else the
/// platform cache directory.
pub fn models_cache_dir(override_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = override_dir {
        return Ok(dir.to_path_buf());
    }
    let proj = ProjectDirs::from("dev", "StemSeparator", "stem-separator-core")
        .ok_or(StemError::CacheDirUnavailable)?;
    let mut p = PathBuf::from(proj.cache_dir());
    p.push("models");
    Ok(p)
}
