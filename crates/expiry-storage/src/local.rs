//! Local disk content cache

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};
use url::Url;

use crate::backend::{
    CacheStorage, CachedResponse, ContentCache, MatchOptions, cache_key, urls_match,
    validate_cache_name,
};
use crate::error::StorageError;

const META_EXTENSION: &str = "json";
const BODY_EXTENSION: &str = "body";

/// Local disk cache storage
///
/// Stores each named cache in its own directory:
/// `<base_path>/<hex(cache name)>/<sha256(url)>.{json,body}`
///
/// URLs are stored under their [`cache_key`], resolved against the base URL
/// if one is set.
pub struct LocalCacheStorage {
    base_path: PathBuf,
    base_url: Option<Url>,
}

impl LocalCacheStorage {
    /// Create a new local cache storage rooted at `base_path`
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await?;

        info!("Initialized local cache storage at {:?}", base_path);

        Ok(Self {
            base_path,
            base_url: None,
        })
    }

    /// Resolve relative request URLs against `base_url`
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Get the directory for a cache name
    fn cache_dir(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_cache_name(name)?;
        Ok(self.base_path.join(hex::encode(name.as_bytes())))
    }
}

#[async_trait]
impl CacheStorage for LocalCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn ContentCache>, StorageError> {
        let dir = self.cache_dir(name)?;
        fs::create_dir_all(&dir).await?;
        Ok(Arc::new(LocalContentCache {
            dir,
            base_url: self.base_url.clone(),
        }))
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let dir = self.cache_dir(name)?;
        debug!("Deleting cache {} at {:?}", name, dir);

        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn has(&self, name: &str) -> Result<bool, StorageError> {
        let dir = self.cache_dir(name)?;
        Ok(fs::try_exists(&dir).await?)
    }

    async fn cache_names(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let decoded = hex::decode(file_name.to_string_lossy().as_bytes())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok());
            match decoded {
                Some(name) => names.push(name),
                None => warn!("Ignoring unexpected directory {:?}", entry.path()),
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Metadata sidecar stored next to each body file
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
}

/// A single cache directory
pub struct LocalContentCache {
    dir: PathBuf,
    base_url: Option<Url>,
}

impl LocalContentCache {
    fn key(&self, url: &str) -> String {
        cache_key(self.base_url.as_ref(), url)
    }

    fn entry_stem(&self, url: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        self.dir.join(hex::encode(hasher.finalize()))
    }

    async fn read_meta(path: &Path) -> Result<Option<EntryMeta>, StorageError> {
        match fs::read(path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// All metadata files in this cache, paired with their path stem
    async fn all_entries(&self) -> Result<Vec<(PathBuf, EntryMeta)>, StorageError> {
        let mut entries = Vec::new();
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(StorageError::Io(e)),
        };

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(META_EXTENSION) {
                continue;
            }
            if let Some(meta) = Self::read_meta(&path).await? {
                entries.push((path.with_extension(""), meta));
            }
        }
        Ok(entries)
    }

    async fn load(stem: &Path, meta: EntryMeta) -> Result<Option<CachedResponse>, StorageError> {
        let body = match fs::read(stem.with_extension(BODY_EXTENSION)).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Cache entry metadata without body: {}", meta.url);
                return Ok(None);
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let mut headers = HeaderMap::new();
        for (name, value) in meta.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| StorageError::Backend(format!("Invalid header name: {}", e)))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| StorageError::Backend(format!("Invalid header value: {}", e)))?;
            headers.append(name, value);
        }
        let status = StatusCode::from_u16(meta.status)
            .map_err(|e| StorageError::Backend(format!("Invalid status: {}", e)))?;

        Ok(Some(CachedResponse::new(status, headers, Bytes::from(body))))
    }

    async fn remove_entry(stem: &Path) -> Result<bool, StorageError> {
        let removed = match fs::remove_file(stem.with_extension(META_EXTENSION)).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(StorageError::Io(e)),
        };
        match fs::remove_file(stem.with_extension(BODY_EXTENSION)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Io(e)),
        }
        Ok(removed)
    }

    /// Write atomically using a uniquely named temp file
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let temp_path = self.dir.join(format!("{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&temp_path, data).await?;
        fs::rename(&temp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl ContentCache for LocalContentCache {
    async fn match_url(
        &self,
        url: &str,
        options: &MatchOptions,
    ) -> Result<Option<CachedResponse>, StorageError> {
        let url = self.key(url);
        if !options.ignore_search {
            let stem = self.entry_stem(&url);
            return match Self::read_meta(&stem.with_extension(META_EXTENSION)).await? {
                Some(meta) => Self::load(&stem, meta).await,
                None => Ok(None),
            };
        }

        for (stem, meta) in self.all_entries().await? {
            if urls_match(&meta.url, &url, options) {
                return Self::load(&stem, meta).await;
            }
        }
        Ok(None)
    }

    async fn put(&self, url: &str, response: CachedResponse) -> Result<(), StorageError> {
        let url = self.key(url);
        let stem = self.entry_stem(&url);
        debug!("Writing cache entry {} to {:?}", url, stem);

        fs::create_dir_all(&self.dir).await?;

        let meta = EntryMeta {
            url,
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect(),
        };

        // Body first so a visible metadata file always has a body
        self.write_atomic(&stem.with_extension(BODY_EXTENSION), &response.body)
            .await?;
        self.write_atomic(
            &stem.with_extension(META_EXTENSION),
            &serde_json::to_vec(&meta)?,
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, url: &str, options: &MatchOptions) -> Result<bool, StorageError> {
        let url = self.key(url);
        debug!("Deleting cache entry {} from {:?}", url, self.dir);

        if !options.ignore_search {
            return Self::remove_entry(&self.entry_stem(&url)).await;
        }

        let mut removed = false;
        for (stem, meta) in self.all_entries().await? {
            if urls_match(&meta.url, &url, options) {
                removed |= Self::remove_entry(&stem).await?;
            }
        }
        Ok(removed)
    }

    async fn keys(
        &self,
        url: Option<&str>,
        options: &MatchOptions,
    ) -> Result<Vec<String>, StorageError> {
        let requested = url.map(|url| self.key(url));
        let mut keys: Vec<String> = self
            .all_entries()
            .await?
            .into_iter()
            .map(|(_, meta)| meta.url)
            .filter(|stored| {
                requested
                    .as_deref()
                    .is_none_or(|requested| urls_match(stored, requested, options))
            })
            .collect();
        keys.sort();
        Ok(keys)
    }
}
