use crate::{
    config::EngineConfig,
    error::{Result, StemError},
    io::{
        crypto::verify_sha256,
        net::{download_with_progress, http_client},
        paths::models_cache_dir,
    },
    model::{
        registry::{resolve_manifest_url, ModelInfo},
        stem_model::StemModel,
    },
    types::ModelManifest,
};

use std::{fs, path::PathBuf, sync::Arc};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct ModelHandle {
    pub manifest: ModelManifest,
    pub local_path: PathBuf,
}

/// Fetch the manifest for `model_name` (or `manifest_url_override`) and
/// make sure its primary artifact sits verified in the model cache,
/// downloading it if needed.
pub fn ensure_model(
    model_name: &str,
    manifest_url_override: Option<&str>,
    config: &EngineConfig,
    on_progress: &dyn Fn(u64, u64),
) -> Result<ModelHandle> {
    let manifest_url = match manifest_url_override {
        Some(url) => url.to_string(),
        None => resolve_manifest_url(model_name, &config.model_base_url)?,
    };

    let client = http_client()?;
    debug!(url = %manifest_url, "fetching model manifest");
    let manifest: ModelManifest = client
        .get(&manifest_url)
        .send()?
        .error_for_status()?
        .json()?;

    let a = manifest
        .resolve_primary_artifact()
        .map_err(StemError::Manifest)?;

    let cache_dir = models_cache_dir(config.cache_dir.as_deref())?;
    fs::create_dir_all(&cache_dir)?;
    let ext = a
        .file
        .rsplit_once('.')
        .map(|(_, ext)| format!(".{ext}"))
        .unwrap_or_default();
    let short_sha = a.sha256.get(..8).unwrap_or(&a.sha256);
    let file_name = format!("{}-{}{}", manifest.name, short_sha, ext);
    let local_path = cache_dir.join(file_name);

    let need_download = !matches!(verify_sha256(&local_path, &a.sha256), Ok(true));
    if need_download {
        info!(model = %manifest.name, url = %a.url, "downloading model artifact");
        download_with_progress(&client, &a.url, &local_path, on_progress)?;
        if !verify_sha256(&local_path, &a.sha256)? {
            return Err(StemError::Checksum {
                path: local_path.display().to_string(),
            });
        }
        if a.size_bytes > 0 {
            let size = fs::metadata(&local_path).map(|m| m.len()).unwrap_or(0);
            if size != a.size_bytes {
                warn!(
                    path = %local_path.display(),
                    expected = a.size_bytes,
                    got = size,
                    "model size mismatch"
                );
            }
        }
    } else {
        debug!(path = %local_path.display(), "model cache hit");
    }

    Ok(ModelHandle {
        manifest,
        local_path,
    })
}

/// Turns a catalog entry into a ready backend. Runs on a blocking thread.
pub trait ModelLoader: Send + Sync {
    fn load(
        &self,
        info: &ModelInfo,
        manifest_url_override: Option<&str>,
        on_download: &dyn Fn(u64, u64),
    ) -> Result<Arc<dyn StemModel>>;
}

/// Default loader: manifest + cached artifact, then the inference runtime.
pub struct ManifestLoader {
    config: EngineConfig,
}

impl ManifestLoader {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl ModelLoader for ManifestLoader {
    fn load(
        &self,
        info: &ModelInfo,
        manifest_url_override: Option<&str>,
        on_download: &dyn Fn(u64, u64),
    ) -> Result<Arc<dyn StemModel>> {
        let handle = ensure_model(info.name, manifest_url_override, &self.config, on_download)?;
        if handle.manifest.stems.len() != info.stem_count() {
            return Err(StemError::Manifest(format!(
                "manifest for `{}` lists {} stems, catalog says {}",
                info.name,
                handle.manifest.stems.len(),
                info.stem_count()
            )));
        }
        instantiate(&handle)
    }
}

#[cfg(feature = "onnx")]
fn instantiate(handle: &ModelHandle) -> Result<Arc<dyn StemModel>> {
    Ok(Arc::new(crate::core::engine::OnnxModel::load(handle)?))
}

#[cfg(not(feature = "onnx"))]
fn instantiate(handle: &ModelHandle) -> Result<Arc<dyn StemModel>> {
    Err(StemError::ModelUnavailable(format!(
        "`{}` ({}) needs an inference runtime; built without the `onnx` feature",
        handle.manifest.name, handle.manifest.backend
    )))
}
