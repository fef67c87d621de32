//! 图片上传与加载
//!
//! 上传传输本身由外部媒体存储负责，这里只定义端口，并在其上叠加
//! 会话共享的图片缓存。

use std::sync::Arc;

use async_trait::async_trait;
use domain::ImageRef;
use thiserror::Error;

use crate::cache::ImageCache;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MediaError {
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("image not found: {0}")]
    NotFound(String),
}

/// 待上传的图片
#[derive(Debug, Clone, PartialEq)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl ImageUpload {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
        }
    }
}

/// 远程媒体存储
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn upload(&self, upload: ImageUpload) -> Result<ImageRef, MediaError>;

    async fn download(&self, image: &ImageRef) -> Result<Vec<u8>, MediaError>;
}

/// 带缓存的图片加载器
pub struct ImageLoader {
    media: Arc<dyn MediaStore>,
    cache: Arc<ImageCache>,
}

impl ImageLoader {
    pub fn new(media: Arc<dyn MediaStore>, cache: Arc<ImageCache>) -> Self {
        Self { media, cache }
    }

    /// 先查缓存，未命中时下载并写入缓存
    pub async fn load(&self, image: &ImageRef) -> Result<Arc<Vec<u8>>, MediaError> {
        if let Some(bytes) = self.cache.get(image) {
            return Ok(bytes);
        }

        let bytes = Arc::new(self.media.download(image).await?);
        self.cache.put(image.clone(), bytes.clone());
        Ok(bytes)
    }

    /// 上传成功后以新引用预热缓存
    pub async fn upload(&self, upload: ImageUpload) -> Result<ImageRef, MediaError> {
        let bytes = Arc::new(upload.bytes.clone());
        let image = self.media.upload(upload).await?;
        tracing::debug!(image = %image, size = bytes.len(), "图片上传完成");
        self.cache.put(image.clone(), bytes);
        Ok(image)
    }
}

/// 内存实现的媒体存储（用于测试和演示）
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct MemoryMediaStore {
        objects: RwLock<HashMap<ImageRef, Vec<u8>>>,
        next_id: RwLock<u64>,
    }

    impl MemoryMediaStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn object_count(&self) -> usize {
            self.objects.read().await.len()
        }
    }

    #[async_trait]
    impl MediaStore for MemoryMediaStore {
        async fn upload(&self, upload: ImageUpload) -> Result<ImageRef, MediaError> {
            if upload.bytes.is_empty() {
                return Err(MediaError::Upload("empty image".to_string()));
            }

            let mut next_id = self.next_id.write().await;
            *next_id += 1;
            let image = ImageRef::parse(format!("images/{}", *next_id))
                .map_err(|err| MediaError::Upload(err.to_string()))?;

            self.objects
                .write()
                .await
                .insert(image.clone(), upload.bytes);
            Ok(image)
        }

        async fn download(&self, image: &ImageRef) -> Result<Vec<u8>, MediaError> {
            self.objects
                .read()
                .await
                .get(image)
                .cloned()
                .ok_or_else(|| MediaError::NotFound(image.to_string()))
        }
    }
}
