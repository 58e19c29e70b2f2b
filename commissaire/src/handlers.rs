use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::{Value, json};

use crate::clusterexec::{self, ClusterExecPool};
use crate::containermgr::ContainerManager;
use crate::error::{ApiError, ApiResult, KvError};
use crate::kv::{
    CLUSTERS_PREFIX, HOSTS_PREFIX, KvStore, cluster_key, cluster_restart_key, cluster_upgrade_key,
    host_key,
};
use crate::models::{
    Cluster, ClusterHostsUpdate, ClusterRestart, ClusterUpgrade, ClusterUpgradeRequest, Clusters,
    Host, HostCounts, HostCreateRequest, Hosts,
};
use crate::queue::InvestigateItem;
use crate::transport::HostTransport;

/// Shared handles every HTTP handler closes over. Cheap to clone (everything
/// inside is an `Arc` or an `mpsc::Sender`), so it is passed as axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub kv: Arc<dyn KvStore>,
    pub transport: Arc<dyn HostTransport>,
    pub container_manager: Arc<dyn ContainerManager>,
    pub investigate_tx: crate::queue::InvestigateSender,
    pub cluster_exec_pool: Arc<ClusterExecPool>,
    pub fleet_key_path: Arc<PathBuf>,
}

async fn load_cluster(kv: &Arc<dyn KvStore>, name: &str) -> ApiResult<Cluster> {
    let bytes = kv.get(&cluster_key(name)).await?;
    Ok(Cluster::from_bytes(&bytes)?)
}

async fn ensure_cluster_exists(kv: &Arc<dyn KvStore>, name: &str) -> ApiResult<()> {
    kv.get(&cluster_key(name)).await?;
    Ok(())
}

/// Counts members of `hostset` by status, reading every Host record under
/// `/commissaire/hosts`. A missing hosts directory (no hosts created yet)
/// is not an error here — it just means every count is zero.
async fn host_counts(kv: &Arc<dyn KvStore>, hostset: &[String]) -> HostCounts {
    let children = match kv.get_dir(HOSTS_PREFIX).await {
        Ok(children) => children,
        Err(_) => return HostCounts::default(),
    };
    let mut counts = HostCounts::default();
    for (_, value) in children {
        let Ok(host) = Host::from_secure_bytes(&value) else {
            continue;
        };
        if hostset.iter().any(|a| a == &host.address) {
            counts.total += 1;
            if host.status.is_available() {
                counts.available += 1;
            } else {
                counts.unavailable += 1;
            }
        }
    }
    counts
}

// --- /healthz ---------------------------------------------------------------

/// Liveness probe: a trivial KV read. `NotFound` still counts as healthy —
/// it means the backend answered, just that `/commissaire/hosts` has no
/// children yet. Any other KV failure reports unhealthy.
pub async fn healthz(State(state): State<AppState>) -> Response {
    match state.kv.get_dir(HOSTS_PREFIX).await {
        Ok(_) | Err(KvError::NotFound) => (StatusCode::OK, "ok").into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "healthz: kv backend unreachable");
            (StatusCode::SERVICE_UNAVAILABLE, "kv unreachable").into_response()
        }
    }
}

// --- /clusters -------------------------------------------------------------

pub async fn list_clusters(State(state): State<AppState>) -> ApiResult<Response> {
    match state.kv.get_dir(CLUSTERS_PREFIX).await {
        Ok(children) => {
            let mut names: Vec<String> = children
                .into_iter()
                .map(|(key, _)| key.rsplit('/').next().unwrap_or_default().to_string())
                .collect();
            names.sort();
            if names.is_empty() {
                Ok((StatusCode::OK, Json(Value::Null)).into_response())
            } else {
                Ok((StatusCode::OK, Json(Clusters { clusters: names })).into_response())
            }
        }
        Err(KvError::NotFound) => Err(ApiError::NotFound),
        Err(e) => Err(e.into()),
    }
}

// --- /cluster/{name} ---------------------------------------------------

pub async fn get_cluster(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let cluster = load_cluster(&state.kv, &name).await?;
    let counts = host_counts(&state.kv, &cluster.hostset).await;
    Ok((StatusCode::OK, Json(cluster.to_json_with_counts(counts))).into_response())
}

pub async fn create_cluster(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let key = cluster_key(&name);
    match state.kv.get(&key).await {
        Ok(_) => {}
        Err(KvError::NotFound) => {
            state.kv.set(&key, Cluster::new().to_bytes()).await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(StatusCode::CREATED.into_response())
}

pub async fn delete_cluster(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    match state.kv.delete(&cluster_key(&name)).await {
        Ok(()) => Ok(StatusCode::GONE.into_response()),
        Err(KvError::NotFound) => Err(ApiError::NotFound),
        Err(e) => Err(e.into()),
    }
}

// --- /cluster/{name}/hosts ----------------------------------------------

pub async fn list_cluster_hosts(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let cluster = load_cluster(&state.kv, &name).await?;
    Ok((StatusCode::OK, Json(cluster.hostset)).into_response())
}

pub async fn replace_cluster_hosts(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    let update: ClusterHostsUpdate =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let key = cluster_key(&name);
    let mut cluster = load_cluster(&state.kv, &name).await?;

    let current: HashSet<&str> = cluster.hostset.iter().map(String::as_str).collect();
    let old: HashSet<&str> = update.old.iter().map(String::as_str).collect();
    if current != old {
        return Err(ApiError::Conflict(format!(
            "hostset for cluster {name} changed since last read"
        )));
    }

    let new_set: HashSet<String> = update.new.into_iter().collect();
    let mut new_hostset: Vec<String> = new_set.into_iter().collect();
    new_hostset.sort();
    cluster.hostset = new_hostset;
    state.kv.set(&key, cluster.to_bytes()).await?;
    Ok(StatusCode::OK.into_response())
}

// --- /cluster/{name}/hosts/{address} -------------------------------------

pub async fn get_cluster_host(
    State(state): State<AppState>,
    Path((name, address)): Path<(String, String)>,
) -> ApiResult<Response> {
    let cluster = load_cluster(&state.kv, &name).await?;
    if cluster.has_host(&address) {
        Ok(StatusCode::OK.into_response())
    } else {
        Err(ApiError::NotFound)
    }
}

pub async fn add_cluster_host(
    State(state): State<AppState>,
    Path((name, address)): Path<(String, String)>,
) -> ApiResult<Response> {
    let key = cluster_key(&name);
    let mut cluster = load_cluster(&state.kv, &name).await?;
    cluster.add_host(&address);
    state.kv.set(&key, cluster.to_bytes()).await?;
    Ok(StatusCode::OK.into_response())
}

pub async fn remove_cluster_host(
    State(state): State<AppState>,
    Path((name, address)): Path<(String, String)>,
) -> ApiResult<Response> {
    let key = cluster_key(&name);
    let mut cluster = load_cluster(&state.kv, &name).await?;
    cluster.remove_host(&address);
    state.kv.set(&key, cluster.to_bytes()).await?;
    Ok(StatusCode::OK.into_response())
}

// --- /cluster/{name}/restart ---------------------------------------------

pub async fn get_cluster_restart(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    ensure_cluster_exists(&state.kv, &name).await?;
    match state.kv.get(&cluster_restart_key(&name)).await {
        Ok(bytes) => {
            let record = ClusterRestart::from_bytes(&bytes)?;
            Ok((StatusCode::OK, Json(record)).into_response())
        }
        Err(KvError::NotFound) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => Err(e.into()),
    }
}

pub async fn start_cluster_restart(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let cluster = load_cluster(&state.kv, &name).await?;
    let record = ClusterRestart::new(Utc::now());
    state
        .kv
        .set(&cluster_restart_key(&name), record.to_bytes())
        .await?;

    let pool = state.cluster_exec_pool.clone();
    let kv = state.kv.clone();
    let transport = state.transport.clone();
    let fleet_key_path = state.fleet_key_path.clone();
    let cluster_name = name.clone();
    let hostset = cluster.hostset.clone();
    tokio::spawn(async move {
        clusterexec::run_restart(pool, kv, transport, fleet_key_path, cluster_name, hostset).await;
    });

    Ok((StatusCode::CREATED, Json(record)).into_response())
}

// --- /cluster/{name}/upgrade ----------------------------------------------

pub async fn get_cluster_upgrade(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    ensure_cluster_exists(&state.kv, &name).await?;
    match state.kv.get(&cluster_upgrade_key(&name)).await {
        Ok(bytes) => {
            let record = ClusterUpgrade::from_bytes(&bytes)?;
            Ok((StatusCode::OK, Json(record)).into_response())
        }
        Err(KvError::NotFound) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => Err(e.into()),
    }
}

pub async fn start_cluster_upgrade(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    let req: ClusterUpgradeRequest =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let cluster = load_cluster(&state.kv, &name).await?;
    let record = ClusterUpgrade::new(req.upgrade_to.clone(), Utc::now());
    state
        .kv
        .set(&cluster_upgrade_key(&name), record.to_bytes())
        .await?;

    let pool = state.cluster_exec_pool.clone();
    let kv = state.kv.clone();
    let transport = state.transport.clone();
    let fleet_key_path = state.fleet_key_path.clone();
    let cluster_name = name.clone();
    let hostset = cluster.hostset.clone();
    let upgrade_to = req.upgrade_to;
    tokio::spawn(async move {
        clusterexec::run_upgrade(
            pool,
            kv,
            transport,
            fleet_key_path,
            cluster_name,
            hostset,
            upgrade_to,
        )
        .await;
    });

    Ok((StatusCode::CREATED, Json(record)).into_response())
}

// --- /hosts ---------------------------------------------------------------

pub async fn list_hosts(State(state): State<AppState>) -> ApiResult<Response> {
    match state.kv.get_dir(HOSTS_PREFIX).await {
        Ok(children) => {
            let mut hosts: Vec<Host> = children
                .into_iter()
                .filter_map(|(_, value)| match Host::from_secure_bytes(&value) {
                    Ok(host) => Some(host),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping unreadable host record");
                        None
                    }
                })
                .collect();
            hosts.sort_by(|a, b| a.address.cmp(&b.address));
            if hosts.is_empty() {
                Ok((StatusCode::OK, Json(Value::Null)).into_response())
            } else {
                Ok((StatusCode::OK, Json(Hosts { hosts })).into_response())
            }
        }
        Err(KvError::NotFound) => Err(ApiError::NotFound),
        Err(e) => Err(e.into()),
    }
}

// --- /host/{address} -------------------------------------------------------

pub async fn get_host(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<Response> {
    let bytes = state.kv.get(&host_key(&address)).await?;
    let host = Host::from_secure_bytes(&bytes)?;
    Ok((StatusCode::OK, Json(host)).into_response())
}

pub async fn create_host(
    State(state): State<AppState>,
    Path(address): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    let req: HostCreateRequest =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let key = host_key(&address);
    match state.kv.get(&key).await {
        Ok(_) => return Err(ApiError::Conflict(format!("host {address} already exists"))),
        Err(KvError::NotFound) => {}
        Err(e) => return Err(e.into()),
    }

    let cluster = match &req.cluster {
        Some(cluster_name) => Some(
            load_cluster(&state.kv, cluster_name)
                .await
                .map_err(|e| match e {
                    ApiError::NotFound => {
                        ApiError::Conflict(format!("cluster {cluster_name} does not exist"))
                    }
                    other => other,
                })?,
        ),
        None => None,
    };

    let host = Host::new_investigating(address.clone());
    state.kv.set(&key, host.to_secure_bytes()).await?;

    state
        .investigate_tx
        .send(InvestigateItem {
            host: host.clone(),
            ssh_priv_key: req.ssh_priv_key,
        })
        .await
        .map_err(|_| ApiError::Internal(anyhow::anyhow!("investigate queue is closed")))?;

    if let (Some(cluster_name), Some(mut cluster)) = (req.cluster, cluster) {
        cluster.add_host(&address);
        state.kv.set(&cluster_key(&cluster_name), cluster.to_bytes()).await?;
    }

    Ok((StatusCode::CREATED, Json(host)).into_response())
}

pub async fn delete_host(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<Response> {
    match state.kv.delete(&host_key(&address)).await {
        Ok(()) => {}
        Err(KvError::NotFound) => return Err(ApiError::NotFound),
        Err(e) => return Err(e.into()),
    }

    if let Ok(children) = state.kv.get_dir(CLUSTERS_PREFIX).await {
        for (key, value) in children {
            match Cluster::from_bytes(&value) {
                Ok(mut cluster) if cluster.has_host(&address) => {
                    cluster.remove_host(&address);
                    if let Err(e) = state.kv.set(&key, cluster.to_bytes()).await {
                        tracing::warn!(cluster = %key, error = %e, "failed to scrub deleted host from cluster");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(cluster = %key, error = %e, "skipping unreadable cluster record during host scrub")
                }
            }
        }
    }

    Ok(StatusCode::GONE.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containermgr::stub::AlwaysRegistered;
    use crate::kv::memory::MemoryKv;
    use crate::queue;
    use crate::transport::stub::StubTransport;

    fn test_state() -> (AppState, crate::queue::InvestigateReceiver) {
        let (tx, rx) = queue::channel(8);
        let state = AppState {
            kv: Arc::new(MemoryKv::new()),
            transport: Arc::new(StubTransport::default()),
            container_manager: Arc::new(AlwaysRegistered),
            investigate_tx: tx,
            cluster_exec_pool: Arc::new(ClusterExecPool::new(2)),
            fleet_key_path: Arc::new(PathBuf::from("/tmp/fleet-key")),
        };
        (state, rx)
    }

    #[tokio::test]
    async fn create_then_get_cluster_round_trips() {
        let (state, _rx) = test_state();
        let resp = create_cluster(State(state.clone()), Path("dev".into()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = get_cluster(State(state), Path("dev".into())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_missing_cluster_is_404() {
        let (state, _rx) = test_state();
        let err = get_cluster(State(state), Path("nope".into())).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cluster_hosts_cas_conflict() {
        let (state, _rx) = test_state();
        create_cluster(State(state.clone()), Path("dev".into()))
            .await
            .unwrap();
        add_cluster_host(State(state.clone()), Path(("dev".into(), "10.2.0.2".into())))
            .await
            .unwrap();

        let good_body = Bytes::from(
            serde_json::to_vec(&json!({"old": ["10.2.0.2"], "new": ["10.2.0.2", "10.2.0.3"]}))
                .unwrap(),
        );
        let resp = replace_cluster_hosts(State(state.clone()), Path("dev".into()), good_body)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let stale_body =
            Bytes::from(serde_json::to_vec(&json!({"old": [], "new": ["x"]})).unwrap());
        let err = replace_cluster_hosts(State(state), Path("dev".into()), stale_body)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn host_creation_joins_cluster_and_enqueues_investigation() {
        let (state, mut rx) = test_state();
        create_cluster(State(state.clone()), Path("dev".into()))
            .await
            .unwrap();

        let body = Bytes::from(
            serde_json::to_vec(&json!({"ssh_priv_key": "dGVzdAo=", "cluster": "dev"})).unwrap(),
        );
        let resp = create_host(State(state.clone()), Path("10.2.0.2".into()), body)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let hosts_resp = list_cluster_hosts(State(state), Path("dev".into()))
            .await
            .unwrap();
        assert_eq!(hosts_resp.status(), StatusCode::OK);

        let item = rx.try_recv().expect("one item queued");
        assert_eq!(item.host.address, "10.2.0.2");
    }

    #[tokio::test]
    async fn host_creation_rejects_unknown_cluster() {
        let (state, mut rx) = test_state();
        let body = Bytes::from(
            serde_json::to_vec(&json!({"ssh_priv_key": "dGVzdAo=", "cluster": "nope"})).unwrap(),
        );
        let err = create_host(State(state.clone()), Path("10.2.0.2".into()), body)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let missing = get_host(State(state), Path("10.2.0.2".into())).await.unwrap_err();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn deleting_host_scrubs_cluster_membership() {
        let (state, _rx) = test_state();
        create_cluster(State(state.clone()), Path("dev".into()))
            .await
            .unwrap();
        add_cluster_host(State(state.clone()), Path(("dev".into(), "10.2.0.2".into())))
            .await
            .unwrap();
        state
            .kv
            .set(
                &host_key("10.2.0.2"),
                Host::new_investigating("10.2.0.2".into()).to_secure_bytes(),
            )
            .await
            .unwrap();

        let resp = delete_host(State(state.clone()), Path("10.2.0.2".into()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::GONE);

        let hosts_resp = list_cluster_hosts(State(state), Path("dev".into()))
            .await
            .unwrap();
        assert_eq!(hosts_resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn upgrade_requires_body() {
        let (state, _rx) = test_state();
        create_cluster(State(state.clone()), Path("dev".into()))
            .await
            .unwrap();

        let err = start_cluster_upgrade(State(state.clone()), Path("dev".into()), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let body = Bytes::from(serde_json::to_vec(&json!({"upgrade_to": "7.0.2"})).unwrap());
        let resp = start_cluster_upgrade(State(state.clone()), Path("dev".into()), body)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn healthz_is_ok_even_with_empty_kv() {
        let (state, _rx) = test_state();
        let resp = healthz(State(state)).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn restart_status_is_204_until_started() {
        let (state, _rx) = test_state();
        create_cluster(State(state.clone()), Path("dev".into()))
            .await
            .unwrap();

        let resp = get_cluster_restart(State(state.clone()), Path("dev".into()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = start_cluster_restart(State(state.clone()), Path("dev".into()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = get_cluster_restart(State(state), Path("dev".into())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
