use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

mod args;
mod clusterexec;
mod containermgr;
mod error;
mod handlers;
mod investigator;
mod kv;
mod models;
mod oscmd;
mod queue;
mod server;
mod transport;

use args::Cli;
use clusterexec::ClusterExecPool;
use containermgr::HttpContainerManager;
use handlers::AppState;
use investigator::Investigator;
use kv::KvStore;
use kv::etcd::EtcdKv;
use transport::{HostTransport, SshHostTransport};

#[tokio::main]
async fn main() -> Result<()> {
    commissaire_common::init();

    let cli = Cli::parse();

    let etcd = EtcdKv::connect(
        cli.etcd.endpoints(),
        cli.etcd.etcd_username.as_deref(),
        cli.etcd.etcd_password.as_deref(),
        cli.etcd.etcd_ca_cert.as_deref(),
    )
    .await?;
    let kv: Arc<dyn KvStore> = Arc::new(etcd);

    let transport: Arc<dyn HostTransport> = Arc::new(SshHostTransport::new(cli.ssh.clone()));
    let container_manager = Arc::new(HttpContainerManager::new(cli.container_manager_url.clone()));
    let fleet_key_path = Arc::new(cli.ssh.ssh_fleet_key_path.clone());
    let cluster_exec_pool = Arc::new(ClusterExecPool::new(cli.pool.cluster_exec_pool_size));

    let (investigate_tx, investigate_rx) = queue::channel(cli.pool.investigate_queue_capacity);

    let cancel = CancellationToken::new();

    let investigator = Investigator {
        kv: kv.clone(),
        transport: transport.clone(),
        container_manager: container_manager.clone(),
    };
    let investigator_cancel = cancel.clone();
    let investigator_handle =
        tokio::spawn(async move { investigator.run(investigate_rx, investigator_cancel).await });

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        commissaire_common::shutdown::shutdown_signal(signal_cancel).await;
    });

    let state = AppState {
        kv,
        transport,
        container_manager,
        investigate_tx,
        cluster_exec_pool,
        fleet_key_path,
    };

    server::run_server(cancel, cli.http_port, state).await?;
    investigator_handle.await.ok();
    Ok(())
}
