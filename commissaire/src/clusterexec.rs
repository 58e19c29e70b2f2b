use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;

use crate::error::TransportError;
use crate::kv::{KvStore, cluster_restart_key, cluster_upgrade_key, host_key};
use crate::models::{ClusterRestart, ClusterUpgrade, Host, ProgressStatus};
use crate::oscmd::get_oscmd;
use crate::transport::HostTransport;

/// Bounds how many cluster-exec jobs (rolling restart or upgrade) run at
/// once across the whole control plane. Keyed `clusterexecpool` in the
/// source; a counting semaphore is the Rust idiom for the same bound.
pub struct ClusterExecPool {
    semaphore: Semaphore,
}

impl ClusterExecPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Semaphore::new(capacity.max(1)),
        }
    }
}

async fn fetch_host(kv: &Arc<dyn KvStore>, address: &str) -> Option<Host> {
    match kv.get(&host_key(address)).await {
        Ok(bytes) => match Host::from_secure_bytes(&bytes) {
            Ok(host) => Some(host),
            Err(e) => {
                tracing::warn!(address, error = %e, "bad host record during cluster-exec");
                None
            }
        },
        Err(e) => {
            tracing::warn!(address, error = %e, "host vanished during cluster-exec");
            None
        }
    }
}

/// Runs a rolling restart over `hostset` in sorted address order, updating
/// the cluster's restart progress record at every step. Intended to be
/// driven via `tokio::spawn`; the handler that initiates the job has
/// already written the initial `in_process` record before spawning this.
pub async fn run_restart(
    pool: Arc<ClusterExecPool>,
    kv: Arc<dyn KvStore>,
    transport: Arc<dyn HostTransport>,
    fleet_key_path: Arc<PathBuf>,
    cluster_name: String,
    mut hostset: Vec<String>,
) {
    let _permit = pool
        .semaphore
        .acquire()
        .await
        .expect("cluster-exec pool semaphore never closes");
    hostset.sort();

    let key = cluster_restart_key(&cluster_name);
    let mut record = match kv.get(&key).await {
        Ok(bytes) => {
            ClusterRestart::from_bytes(&bytes).unwrap_or_else(|_| ClusterRestart::new(Utc::now()))
        }
        Err(_) => ClusterRestart::new(Utc::now()),
    };

    for address in hostset {
        record.in_process.push(address.clone());
        persist_restart(&kv, &key, &record).await;

        let outcome = match fetch_host(&kv, &address).await {
            Some(host) => {
                let oscmd = get_oscmd(&host.os);
                transport.restart(&address, &fleet_key_path, oscmd.as_ref()).await
            }
            None => Err(TransportError::Connect("host record unavailable".into())),
        };

        record.in_process.retain(|a| a != &address);
        match outcome {
            Ok(()) => {
                record.restarted.push(address.clone());
                persist_restart(&kv, &key, &record).await;
            }
            Err(e) => {
                tracing::warn!(%address, cluster = %cluster_name, error = %e, "cluster restart step failed");
                record.status = ProgressStatus::Failed;
                record.finished_at = Some(Utc::now());
                persist_restart(&kv, &key, &record).await;
                return;
            }
        }
    }

    record.status = ProgressStatus::Finished;
    record.finished_at = Some(Utc::now());
    persist_restart(&kv, &key, &record).await;
}

/// As [`run_restart`], but runs `upgrade_to` on each host.
pub async fn run_upgrade(
    pool: Arc<ClusterExecPool>,
    kv: Arc<dyn KvStore>,
    transport: Arc<dyn HostTransport>,
    fleet_key_path: Arc<PathBuf>,
    cluster_name: String,
    mut hostset: Vec<String>,
    upgrade_to: String,
) {
    let _permit = pool
        .semaphore
        .acquire()
        .await
        .expect("cluster-exec pool semaphore never closes");
    hostset.sort();

    let key = cluster_upgrade_key(&cluster_name);
    let mut record = match kv.get(&key).await {
        Ok(bytes) => ClusterUpgrade::from_bytes(&bytes)
            .unwrap_or_else(|_| ClusterUpgrade::new(upgrade_to.clone(), Utc::now())),
        Err(_) => ClusterUpgrade::new(upgrade_to.clone(), Utc::now()),
    };

    for address in hostset {
        record.in_process.push(address.clone());
        persist_upgrade(&kv, &key, &record).await;

        let outcome = match fetch_host(&kv, &address).await {
            Some(host) => {
                let oscmd = get_oscmd(&host.os);
                transport
                    .upgrade(&address, &fleet_key_path, oscmd.as_ref(), &upgrade_to)
                    .await
            }
            None => Err(TransportError::Connect("host record unavailable".into())),
        };

        record.in_process.retain(|a| a != &address);
        match outcome {
            Ok(()) => {
                record.upgraded.push(address.clone());
                persist_upgrade(&kv, &key, &record).await;
            }
            Err(e) => {
                tracing::warn!(%address, cluster = %cluster_name, error = %e, "cluster upgrade step failed");
                record.status = ProgressStatus::Failed;
                record.finished_at = Some(Utc::now());
                persist_upgrade(&kv, &key, &record).await;
                return;
            }
        }
    }

    record.status = ProgressStatus::Finished;
    record.finished_at = Some(Utc::now());
    persist_upgrade(&kv, &key, &record).await;
}

async fn persist_restart(kv: &Arc<dyn KvStore>, key: &str, record: &ClusterRestart) {
    if let Err(e) = kv.set(key, record.to_bytes()).await {
        tracing::error!(key, error = %e, "failed to persist cluster restart progress");
    }
}

async fn persist_upgrade(kv: &Arc<dyn KvStore>, key: &str, record: &ClusterUpgrade) {
    if let Err(e) = kv.set(key, record.to_bytes()).await {
        tracing::error!(key, error = %e, "failed to persist cluster upgrade progress");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryKv;
    use crate::transport::stub::StubTransport;

    async fn seed_cluster(kv: &MemoryKv, name: &str, hostset: &[&str]) {
        use crate::models::Cluster;
        let mut cluster = Cluster::new();
        for a in hostset {
            cluster.add_host(a);
        }
        kv.set(&crate::kv::cluster_key(name), cluster.to_bytes())
            .await
            .unwrap();
    }

    async fn seed_host(kv: &MemoryKv, address: &str) {
        let host = Host::new_investigating(address.to_string());
        kv.set(&host_key(address), host.to_secure_bytes())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn restart_runs_hosts_in_sorted_order_and_finishes() {
        let memory = Arc::new(MemoryKv::new());
        seed_cluster(&memory, "dev", &["10.0.0.2", "10.0.0.1"]).await;
        seed_host(&memory, "10.0.0.1").await;
        seed_host(&memory, "10.0.0.2").await;
        let kv: Arc<dyn KvStore> = memory;

        let pool = Arc::new(ClusterExecPool::new(2));
        let transport = Arc::new(StubTransport::default());
        let fleet_key_path = Arc::new(PathBuf::from("/tmp/fleet-key"));

        run_restart(
            pool,
            kv.clone(),
            transport.clone(),
            fleet_key_path,
            "dev".to_string(),
            vec!["10.0.0.2".to_string(), "10.0.0.1".to_string()],
        )
        .await;

        let bytes = kv.get(&cluster_restart_key("dev")).await.unwrap();
        let record = ClusterRestart::from_bytes(&bytes).unwrap();
        assert_eq!(record.status, ProgressStatus::Finished);
        assert_eq!(record.restarted, vec!["10.0.0.1", "10.0.0.2"]);
        assert!(record.in_process.is_empty());
        assert!(record.finished_at.is_some());

        let calls = transport.calls.lock().unwrap();
        assert_eq!(*calls, vec!["restart:10.0.0.1", "restart:10.0.0.2"]);
    }

    #[tokio::test]
    async fn upgrade_stops_and_marks_failed_on_missing_host() {
        let memory = Arc::new(MemoryKv::new());
        seed_cluster(&memory, "dev", &["10.0.0.1", "10.0.0.2"]).await;
        seed_host(&memory, "10.0.0.1").await;
        // 10.0.0.2 deliberately not seeded as a host record.
        let kv: Arc<dyn KvStore> = memory;

        let pool = Arc::new(ClusterExecPool::new(2));
        let transport = Arc::new(StubTransport::default());
        let fleet_key_path = Arc::new(PathBuf::from("/tmp/fleet-key"));

        run_upgrade(
            pool,
            kv.clone(),
            transport,
            fleet_key_path,
            "dev".to_string(),
            vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
            "7.0.2".to_string(),
        )
        .await;

        let bytes = kv.get(&cluster_upgrade_key("dev")).await.unwrap();
        let record = ClusterUpgrade::from_bytes(&bytes).unwrap();
        assert_eq!(record.status, ProgressStatus::Failed);
        assert_eq!(record.upgraded, vec!["10.0.0.1"]);
        assert!(record.in_process.is_empty());
        assert!(record.finished_at.is_some());
    }
}
