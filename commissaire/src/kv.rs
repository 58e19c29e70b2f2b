use async_trait::async_trait;

use crate::error::KvError;

/// A hierarchical key-value store with directory listing and last-writer-wins
/// writes. Backed concretely by etcd v3 (`EtcdKv`), which has no native
/// directory nodes — "directories" are emulated with key-prefix range reads
/// over `{prefix}/` children, the standard idiom for flat-keyspace stores.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, KvError>;

    /// Lists the immediate children of `prefix` (a key ending in `/`),
    /// returning each child's full key and value. Returns `KvError::NotFound`
    /// if there are no children at all, mirroring a missing directory.
    async fn get_dir(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KvError>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), KvError>;

    async fn delete(&self, key: &str) -> Result<(), KvError>;
}

pub mod etcd {
    use super::*;
    use etcd_client::{Certificate, Client, ConnectOptions, GetOptions, TlsOptions};

    /// etcd v3-backed [`KvStore`].
    pub struct EtcdKv {
        client: Client,
    }

    impl EtcdKv {
        pub async fn connect(
            endpoints: &[String],
            username: Option<&str>,
            password: Option<&str>,
            ca_cert_pem: Option<&str>,
        ) -> anyhow::Result<Self> {
            let mut options = ConnectOptions::new();
            if let (Some(u), Some(p)) = (username, password) {
                options = options.with_user(u.to_string(), p.to_string());
            }
            if let Some(pem) = ca_cert_pem {
                let tls = TlsOptions::new().ca_certificate(Certificate::from_pem(pem));
                options = options.with_tls(tls);
            }
            let has_options = username.is_some() || ca_cert_pem.is_some();
            let client =
                Client::connect(endpoints, has_options.then_some(options)).await?;
            Ok(Self { client })
        }
    }

    #[async_trait]
    impl KvStore for EtcdKv {
        async fn get(&self, key: &str) -> Result<Vec<u8>, KvError> {
            let mut client = self.client.clone();
            let resp = client
                .get(key, None)
                .await
                .map_err(|e| KvError::Other(e.into()))?;
            resp.kvs()
                .first()
                .map(|kv| kv.value().to_vec())
                .ok_or(KvError::NotFound)
        }

        async fn get_dir(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KvError> {
            let prefix = if prefix.ends_with('/') {
                prefix.to_string()
            } else {
                format!("{prefix}/")
            };
            let mut client = self.client.clone();
            let resp = client
                .get(prefix.as_str(), Some(GetOptions::new().with_prefix()))
                .await
                .map_err(|e| KvError::Other(e.into()))?;
            if resp.kvs().is_empty() {
                return Err(KvError::NotFound);
            }
            Ok(resp
                .kvs()
                .iter()
                .map(|kv| (kv.key_str().unwrap_or_default().to_string(), kv.value().to_vec()))
                .collect())
        }

        async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), KvError> {
            let mut client = self.client.clone();
            client
                .put(key, value, None)
                .await
                .map_err(|e| KvError::Other(e.into()))?;
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), KvError> {
            let mut client = self.client.clone();
            let resp = client
                .delete(key, None)
                .await
                .map_err(|e| KvError::Other(e.into()))?;
            if resp.deleted() == 0 {
                return Err(KvError::NotFound);
            }
            Ok(())
        }
    }
}

pub mod memory {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;

    /// In-memory [`KvStore`] used by unit tests; a `BTreeMap` gives the same
    /// lexicographic child ordering etcd's range reads return.
    #[derive(Default)]
    pub struct MemoryKv {
        data: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    impl MemoryKv {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl KvStore for MemoryKv {
        async fn get(&self, key: &str) -> Result<Vec<u8>, KvError> {
            self.data
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or(KvError::NotFound)
        }

        async fn get_dir(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, KvError> {
            let prefix = if prefix.ends_with('/') {
                prefix.to_string()
            } else {
                format!("{prefix}/")
            };
            let data = self.data.lock().unwrap();
            let children: Vec<(String, Vec<u8>)> = data
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if children.is_empty() {
                return Err(KvError::NotFound);
            }
            Ok(children)
        }

        async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), KvError> {
            self.data.lock().unwrap().insert(key.to_string(), value);
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), KvError> {
            self.data
                .lock()
                .unwrap()
                .remove(key)
                .map(|_| ())
                .ok_or(KvError::NotFound)
        }
    }
}

pub const HOSTS_PREFIX: &str = "/commissaire/hosts";
pub const CLUSTERS_PREFIX: &str = "/commissaire/clusters";

pub fn host_key(address: &str) -> String {
    format!("{HOSTS_PREFIX}/{address}")
}

pub fn cluster_key(name: &str) -> String {
    format!("{CLUSTERS_PREFIX}/{name}")
}

pub fn cluster_restart_key(name: &str) -> String {
    format!("/commissaire/cluster/{name}/restart")
}

pub fn cluster_upgrade_key(name: &str) -> String {
    format!("/commissaire/cluster/{name}/upgrade")
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryKv;
    use super::*;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let kv = MemoryKv::new();
        kv.set("/commissaire/hosts/10.0.0.1", b"hi".to_vec())
            .await
            .unwrap();
        assert_eq!(
            kv.get("/commissaire/hosts/10.0.0.1").await.unwrap(),
            b"hi".to_vec()
        );
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let kv = MemoryKv::new();
        assert!(matches!(kv.get("/nope").await, Err(KvError::NotFound)));
    }

    #[tokio::test]
    async fn get_dir_lists_children_only_under_prefix() {
        let kv = MemoryKv::new();
        kv.set("/commissaire/hosts/a", b"1".to_vec()).await.unwrap();
        kv.set("/commissaire/hosts/b", b"2".to_vec()).await.unwrap();
        kv.set("/commissaire/clusters/dev", b"3".to_vec())
            .await
            .unwrap();
        let children = kv.get_dir("/commissaire/hosts").await.unwrap();
        assert_eq!(children.len(), 2);
    }

    #[tokio::test]
    async fn get_dir_on_empty_prefix_is_not_found() {
        let kv = MemoryKv::new();
        assert!(matches!(
            kv.get_dir("/commissaire/hosts").await,
            Err(KvError::NotFound)
        ));
    }

    #[tokio::test]
    async fn delete_missing_key_is_not_found() {
        let kv = MemoryKv::new();
        assert!(matches!(kv.delete("/nope").await, Err(KvError::NotFound)));
    }
}
