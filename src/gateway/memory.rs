use super::{in_listing_scope, ObjectGateway, RemoteMetadata, RemoteObject};
use crate::error::GatewayError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    modified_at: DateTime<Utc>,
}

/// 进程内对象存储，修改时间可由调用方指定
#[derive(Debug, Default)]
pub struct MemoryGateway {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以指定修改时间写入对象
    pub async fn insert(&self, key: &str, data: impl Into<Bytes>, modified_at: DateTime<Utc>) {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data: data.into(),
                modified_at,
            },
        );
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectGateway for MemoryGateway {
    async fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>, GatewayError> {
        let objects = self.objects.read().await;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| in_listing_scope(prefix, key))
            .map(|(key, obj)| RemoteObject {
                key: key.clone(),
                size: obj.data.len() as u64,
                modified_at: obj.modified_at,
            })
            .collect())
    }

    async fn head(&self, key: &str) -> Result<Option<RemoteMetadata>, GatewayError> {
        let objects = self.objects.read().await;
        Ok(objects.get(key).map(|obj| RemoteMetadata {
            size: obj.data.len() as u64,
            modified_at: obj.modified_at,
        }))
    }

    async fn get(&self, key: &str) -> Result<Bytes, GatewayError> {
        let objects = self.objects.read().await;
        objects
            .get(key)
            .map(|obj| obj.data.clone())
            .ok_or_else(|| GatewayError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<(), GatewayError> {
        self.insert(key, data, Utc::now()).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn list_is_prefix_scoped_and_sorted() {
        let gateway = MemoryGateway::new();
        let t = Utc::now();
        gateway.insert("syncThing/WXYZ/sub/b.txt", "b", t).await;
        gateway.insert("syncThing/WXYZ/a.txt", "a", t).await;
        gateway.insert("syncThing/WXY", "x", t).await;
        gateway.insert("syncThing/WXYZW/c.txt", "c", t).await;
        gateway.insert("syncThing/XXXX/a.txt", "a", t).await;

        let keys: Vec<_> = gateway
            .list("syncThing/WXYZ")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["syncThing/WXYZ/a.txt", "syncThing/WXYZ/sub/b.txt"]);
    }

    #[tokio::test]
    async fn put_stamps_current_time() {
        let gateway = MemoryGateway::new();
        let before = Utc::now();
        gateway
            .put("syncThing/K/f", Bytes::from_static(b"123"))
            .await
            .unwrap();

        let meta = gateway.head("syncThing/K/f").await.unwrap().unwrap();
        assert_eq!(meta.size, 3);
        assert!(meta.modified_at >= before);
    }
}
