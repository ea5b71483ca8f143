//! Location of the pretrained model files

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use hf_hub::api::tokio::{ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use tracing::{info, instrument};

use crate::config::ModelSettings;
use crate::error::{Error, Result};

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";
const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

/// Paths of the files needed to build the classifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    /// `config.json`
    pub config: PathBuf,
    /// `tokenizer.json`
    pub tokenizer: PathBuf,
    /// One or more safetensors shards
    pub weights: Vec<PathBuf>,
}

impl ModelFiles {
    /// Resolve the files from the configured local directory, or the hub cache otherwise
    #[instrument(skip(settings), fields(model = %settings.model_id))]
    pub async fn resolve(settings: &ModelSettings) -> Result<Self> {
        match &settings.local_dir {
            Some(dir) => Self::from_dir(dir),
            None => Self::from_hub(&settings.model_id, &settings.revision).await,
        }
    }

    /// Files from a local directory
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let config = required(dir, CONFIG_FILE)?;
        let tokenizer = required(dir, TOKENIZER_FILE)?;

        let single = dir.join(WEIGHTS_FILE);
        let weights = if single.is_file() {
            vec![single]
        } else {
            let mut shards: Vec<PathBuf> = std::fs::read_dir(dir)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.extension().map(|ext| ext == "safetensors").unwrap_or(false))
                .collect();
            shards.sort();
            shards
        };

        if weights.is_empty() {
            return Err(Error::model_loading(format!(
                "no safetensors weights found in {}",
                dir.display()
            )));
        }

        info!("Using local model files from {}", dir.display());
        Ok(Self {
            config,
            tokenizer,
            weights,
        })
    }

    async fn from_hub(model_id: &str, revision: &str) -> Result<Self> {
        let api = ApiBuilder::new()
            .with_progress(true)
            .build()
            .map_err(|e| Error::model_loading(format!("failed to create hub client: {}", e)))?;
        let repo = api.repo(Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            revision.to_string(),
        ));

        let config = fetch(&repo, CONFIG_FILE).await?;
        let tokenizer = fetch(&repo, TOKENIZER_FILE).await?;
        let weights = match repo.get(WEIGHTS_FILE).await {
            Ok(path) => vec![path],
            Err(_) => Self::fetch_shards(&repo).await?,
        };

        info!("Resolved {} from the hub ({} weight file(s))", model_id, weights.len());
        Ok(Self {
            config,
            tokenizer,
            weights,
        })
    }

    async fn fetch_shards(repo: &ApiRepo) -> Result<Vec<PathBuf>> {
        let index_path = fetch(repo, WEIGHTS_INDEX_FILE).await?;
        let index: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&index_path)?)?;
        let shard_names: BTreeSet<&str> = index
            .get("weight_map")
            .and_then(|map| map.as_object())
            .ok_or_else(|| Error::model_loading("weights index has no weight_map"))?
            .values()
            .filter_map(|v| v.as_str())
            .collect();

        let mut shards = Vec::with_capacity(shard_names.len());
        for name in shard_names {
            shards.push(fetch(repo, name).await?);
        }
        Ok(shards)
    }
}

fn required(dir: &Path, name: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    if path.is_file() {
        Ok(path)
    } else {
        Err(Error::model_loading(format!("missing model file: {}", path.display())))
    }
}

async fn fetch(repo: &ApiRepo, name: &str) -> Result<PathBuf> {
    repo.get(name)
        .await
        .map_err(|e| Error::model_loading(format!("failed to download {}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_dir_prefers_single_file() {
        let dir = TempDir::new().unwrap();
        let shard = "model-00001-of-00002.safetensors";
        for name in [CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_FILE, shard] {
            std::fs::write(dir.path().join(name), b"{}").unwrap();
        }
        let files = ModelFiles::from_dir(dir.path()).unwrap();
        assert_eq!(files.weights, vec![dir.path().join(WEIGHTS_FILE)]);
    }

    #[test]
    fn test_from_dir_collects_shards_in_order() {
        let dir = TempDir::new().unwrap();
        for name in [
            CONFIG_FILE,
            TOKENIZER_FILE,
            "model-00002-of-00002.safetensors",
            "model-00001-of-00002.safetensors",
        ] {
            std::fs::write(dir.path().join(name), b"{}").unwrap();
        }
        let files = ModelFiles::from_dir(dir.path()).unwrap();
        assert_eq!(files.weights.len(), 2);
        assert!(files.weights[0].ends_with("model-00001-of-00002.safetensors"));
    }

    #[test]
    fn test_from_dir_reports_missing_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), b"{}").unwrap();
        let err = ModelFiles::from_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains(TOKENIZER_FILE));

        std::fs::write(dir.path().join(TOKENIZER_FILE), b"{}").unwrap();
        let err = ModelFiles::from_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains("no safetensors"));
    }

    #[tokio::test]
    async fn test_resolve_uses_local_dir() {
        let dir = TempDir::new().unwrap();
        for name in [CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_FILE] {
            std::fs::write(dir.path().join(name), b"{}").unwrap();
        }
        let settings = ModelSettings {
            local_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let files = ModelFiles::resolve(&settings).await.unwrap();
        assert_eq!(files.config, dir.path().join(CONFIG_FILE));
    }
}
