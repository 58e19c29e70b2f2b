use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::containermgr::ContainerManager;
use crate::kv::{KvStore, host_key};
use crate::models::{Host, HostStatus};
use crate::oscmd::get_oscmd;
use crate::queue::{InvestigateItem, InvestigateReceiver};
use crate::transport::HostTransport;

const CONTAINER_MANAGER_ATTEMPTS: usize = 3;
const CONTAINER_MANAGER_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Drives hosts through `investigating -> bootstrapping ->
/// active|inactive|failed|disassociated`, one queued item at a time.
pub struct Investigator {
    pub kv: Arc<dyn KvStore>,
    pub transport: Arc<dyn HostTransport>,
    pub container_manager: Arc<dyn ContainerManager>,
}

/// Removes the investigator's temporary SSH key file on every exit path —
/// success, failure, or early return — so cleanup can't be skipped by
/// forgetting a call on some branch.
struct KeyFileGuard(std::path::PathBuf);

impl Drop for KeyFileGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.0.display(), error = %e, "failed to clean up investigator key file");
        }
    }
}

impl Investigator {
    pub async fn run(&self, mut queue: InvestigateReceiver, cancel: CancellationToken) {
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("investigator shutting down");
                    return;
                }
                item = queue.recv() => item,
            };
            let Some(item) = item else {
                tracing::info!("investigate queue closed, investigator exiting");
                return;
            };
            self.investigate_one(item).await;
        }
    }

    /// Processes exactly one queued host; returns `false` once the queue is
    /// closed. Used by tests to drive the state machine deterministically.
    pub async fn run_once(&self, queue: &mut InvestigateReceiver) -> bool {
        match queue.recv().await {
            Some(item) => {
                self.investigate_one(item).await;
                true
            }
            None => false,
        }
    }

    async fn investigate_one(&self, item: InvestigateItem) {
        let InvestigateItem { host, ssh_priv_key } = item;
        let address = host.address.clone();

        let key_bytes = match STANDARD.decode(ssh_priv_key.as_bytes()) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(%address, error = %e, "malformed ssh key, dropping investigation");
                return;
            }
        };
        let key_file = match write_key_file(&key_bytes) {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(%address, error = %e, "failed to write temporary key file");
                return;
            }
        };
        let _guard = KeyFileGuard(key_file.clone());

        let mut host = match self.kv.get(&host_key(&address)).await {
            Ok(bytes) => match Host::from_secure_bytes(&bytes) {
                Ok(h) => h,
                Err(e) => {
                    tracing::error!(%address, error = %e, "bad host record, aborting investigation");
                    return;
                }
            },
            Err(e) => {
                tracing::error!(%address, error = %e, "host vanished before investigation, aborting");
                return;
            }
        };

        match self.transport.get_info(&address, &key_file).await {
            Ok(facts) => {
                host.os = facts.os;
                host.cpus = facts.cpus;
                host.memory = facts.memory;
                host.space = facts.space;
                host.last_check = Some(Utc::now());
                host.status = HostStatus::Bootstrapping;
                self.persist(&host).await;
            }
            Err(e) => {
                tracing::warn!(%address, error = %e, "get_info failed");
                host.status = HostStatus::Failed;
                host.last_check = Some(Utc::now());
                self.persist(&host).await;
                return;
            }
        }

        let oscmd = get_oscmd(&host.os);
        match self
            .transport
            .bootstrap(&address, &key_file, oscmd.as_ref())
            .await
        {
            Ok(()) => {
                host.status = HostStatus::Inactive;
                self.persist(&host).await;
            }
            Err(e) => {
                tracing::warn!(%address, error = %e, "bootstrap failed");
                host.status = HostStatus::Disassociated;
                self.persist(&host).await;
                return;
            }
        }

        for attempt in 0..CONTAINER_MANAGER_ATTEMPTS {
            if self.container_manager.node_registered(&address).await {
                host.status = HostStatus::Active;
                break;
            }
            if attempt + 1 < CONTAINER_MANAGER_ATTEMPTS {
                tokio::time::sleep(CONTAINER_MANAGER_POLL_INTERVAL).await;
            }
        }
        self.persist(&host).await;
    }

    async fn persist(&self, host: &Host) {
        if let Err(e) = self
            .kv
            .set(&host_key(&host.address), host.to_secure_bytes())
            .await
        {
            tracing::error!(address = %host.address, error = %e, "failed to persist host");
        }
    }
}

fn write_key_file(key_bytes: &[u8]) -> std::io::Result<std::path::PathBuf> {
    use std::io::Write;
    let mut file = tempfile::Builder::new()
        .prefix("commissaire-key-")
        .tempfile()?;
    file.write_all(key_bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    let (_, path) = file.keep()?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::containermgr::stub::{AlwaysRegistered, FlakyContainerManager, NeverRegistered};
    use crate::kv::memory::MemoryKv;
    use crate::queue;
    use crate::transport::stub::StubTransport;

    fn make_item(address: &str) -> InvestigateItem {
        InvestigateItem {
            host: Host::new_investigating(address.to_string()),
            ssh_priv_key: STANDARD.encode(b"fake-key-bytes"),
        }
    }

    async fn seed(kv: &MemoryKv, address: &str) {
        let host = Host::new_investigating(address.to_string());
        kv.set(&host_key(address), host.to_secure_bytes())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn successful_investigation_reaches_active() {
        let memory = Arc::new(MemoryKv::new());
        seed(&memory, "10.0.0.1").await;
        let kv: Arc<dyn KvStore> = memory;

        let investigator = Investigator {
            kv: kv.clone(),
            transport: Arc::new(StubTransport::default()),
            container_manager: Arc::new(AlwaysRegistered),
        };

        let (tx, mut rx) = queue::channel(4);
        tx.send(make_item("10.0.0.1")).await.unwrap();
        assert!(investigator.run_once(&mut rx).await);

        let bytes = kv.get(&host_key("10.0.0.1")).await.unwrap();
        let host = Host::from_secure_bytes(&bytes).unwrap();
        assert_eq!(host.status, HostStatus::Active);
        assert_eq!(host.os, "fedora");
    }

    #[tokio::test]
    async fn failed_get_info_marks_host_failed() {
        let memory = Arc::new(MemoryKv::new());
        seed(&memory, "10.0.0.2").await;
        let kv: Arc<dyn KvStore> = memory;

        let investigator = Investigator {
            kv: kv.clone(),
            transport: Arc::new(StubTransport {
                fail_get_info: true,
                ..Default::default()
            }),
            container_manager: Arc::new(AlwaysRegistered),
        };

        let (tx, mut rx) = queue::channel(4);
        tx.send(make_item("10.0.0.2")).await.unwrap();
        investigator.run_once(&mut rx).await;

        let bytes = kv.get(&host_key("10.0.0.2")).await.unwrap();
        let host = Host::from_secure_bytes(&bytes).unwrap();
        assert_eq!(host.status, HostStatus::Failed);
    }

    #[tokio::test]
    async fn failed_bootstrap_marks_host_disassociated() {
        let memory = Arc::new(MemoryKv::new());
        seed(&memory, "10.0.0.3").await;
        let kv: Arc<dyn KvStore> = memory;

        let investigator = Investigator {
            kv: kv.clone(),
            transport: Arc::new(StubTransport {
                fail_bootstrap: true,
                ..Default::default()
            }),
            container_manager: Arc::new(AlwaysRegistered),
        };

        let (tx, mut rx) = queue::channel(4);
        tx.send(make_item("10.0.0.3")).await.unwrap();
        investigator.run_once(&mut rx).await;

        let bytes = kv.get(&host_key("10.0.0.3")).await.unwrap();
        let host = Host::from_secure_bytes(&bytes).unwrap();
        assert_eq!(host.status, HostStatus::Disassociated);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_container_manager_polling_leaves_host_inactive() {
        let memory = Arc::new(MemoryKv::new());
        seed(&memory, "10.0.0.4").await;
        let kv: Arc<dyn KvStore> = memory;

        let investigator = Investigator {
            kv: kv.clone(),
            transport: Arc::new(StubTransport::default()),
            container_manager: Arc::new(NeverRegistered),
        };

        let (tx, mut rx) = queue::channel(4);
        tx.send(make_item("10.0.0.4")).await.unwrap();
        investigator.run_once(&mut rx).await;

        let bytes = kv.get(&host_key("10.0.0.4")).await.unwrap();
        let host = Host::from_secure_bytes(&bytes).unwrap();
        assert_eq!(host.status, HostStatus::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn registers_on_a_later_attempt() {
        let memory = Arc::new(MemoryKv::new());
        seed(&memory, "10.0.0.5").await;
        let kv: Arc<dyn KvStore> = memory;

        let investigator = Investigator {
            kv: kv.clone(),
            transport: Arc::new(StubTransport::default()),
            container_manager: Arc::new(FlakyContainerManager::new(2)),
        };

        let (tx, mut rx) = queue::channel(4);
        tx.send(make_item("10.0.0.5")).await.unwrap();
        investigator.run_once(&mut rx).await;

        let bytes = kv.get(&host_key("10.0.0.5")).await.unwrap();
        let host = Host::from_secure_bytes(&bytes).unwrap();
        assert_eq!(host.status, HostStatus::Active);
    }
}
