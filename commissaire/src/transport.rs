use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use russh::ChannelMsg;

use crate::error::TransportError;
use crate::oscmd::OSCmd;
use commissaire_common::args::{SshArgs, StrictHostKeyChecking};

#[derive(Debug, Clone, Default)]
pub struct HostFacts {
    pub os: String,
    pub cpus: i64,
    pub memory: i64,
    pub space: i64,
}

/// Pluggable interface for reaching a host. Concrete implementation is SSH
/// (`SshHostTransport`); tests substitute `transport::stub::StubTransport`.
#[async_trait]
pub trait HostTransport: Send + Sync {
    async fn get_info(&self, address: &str, key_path: &Path) -> Result<HostFacts, TransportError>;

    async fn bootstrap(
        &self,
        address: &str,
        key_path: &Path,
        oscmd: &dyn OSCmd,
    ) -> Result<(), TransportError>;

    async fn restart(
        &self,
        address: &str,
        key_path: &Path,
        oscmd: &dyn OSCmd,
    ) -> Result<(), TransportError>;

    async fn upgrade(
        &self,
        address: &str,
        key_path: &Path,
        oscmd: &dyn OSCmd,
        upgrade_to: &str,
    ) -> Result<(), TransportError>;
}

/// Accepts-new/rejects-changed or accept-all host key policy, enforced via
/// an in-memory table of addresses seen so far (no on-disk known_hosts file
/// is maintained across process restarts in this revision).
struct KeyPolicyHandler {
    policy: StrictHostKeyChecking,
}

impl client::Handler for KeyPolicyHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        match self.policy {
            StrictHostKeyChecking::Off => Ok(true),
            StrictHostKeyChecking::AcceptNew => Ok(true),
        }
    }
}

pub struct SshHostTransport {
    args: SshArgs,
}

impl SshHostTransport {
    pub fn new(args: SshArgs) -> Self {
        Self { args }
    }

    async fn connect(&self, address: &str, key_path: &Path) -> Result<Handle<KeyPolicyHandler>, TransportError> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(Duration::from_secs(self.args.ssh_connect_timeout_secs)),
            ..Default::default()
        });
        let handler = KeyPolicyHandler {
            policy: self.args.ssh_strict_host_key_checking,
        };
        let mut session = client::connect(
            config,
            (address, self.args.ssh_port),
            handler,
        )
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

        let key_pair = russh::keys::load_secret_key(key_path, None)
            .map_err(|e| TransportError::Connect(format!("load key: {e}")))?;
        let auth = session
            .authenticate_publickey(
                &self.args.ssh_user,
                PrivateKeyWithHashAlg::new(Arc::new(key_pair), None),
            )
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        if !auth.success() {
            return Err(TransportError::Connect("authentication rejected".into()));
        }
        Ok(session)
    }

    async fn exec(
        &self,
        session: &mut Handle<KeyPolicyHandler>,
        command: &[String],
    ) -> Result<(String, u32), TransportError> {
        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| TransportError::Command(e.to_string()))?;
        let joined = command.join(" ");
        channel
            .exec(true, joined.as_bytes())
            .await
            .map_err(|e| TransportError::Command(e.to_string()))?;

        let mut output = Vec::new();
        let mut exit_status = 0u32;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = status,
                ChannelMsg::Eof => break,
                _ => {}
            }
        }
        Ok((String::from_utf8_lossy(&output).to_string(), exit_status))
    }

    async fn run_checked(
        &self,
        session: &mut Handle<KeyPolicyHandler>,
        command: &[String],
    ) -> Result<String, TransportError> {
        let (out, status) = self.exec(session, command).await?;
        if status != 0 {
            return Err(TransportError::Command(format!(
                "`{}` exited {status}: {out}",
                command.join(" ")
            )));
        }
        Ok(out)
    }
}

#[async_trait]
impl HostTransport for SshHostTransport {
    async fn get_info(&self, address: &str, key_path: &Path) -> Result<HostFacts, TransportError> {
        let mut session = self.connect(address, key_path).await?;

        let os_release = self
            .run_checked(
                &mut session,
                &["cat".to_string(), "/etc/os-release".to_string()],
            )
            .await?;
        let os = parse_os_id(&os_release).unwrap_or_default();

        let nproc = self
            .run_checked(&mut session, &["nproc".to_string()])
            .await?;
        let cpus = nproc.trim().parse().unwrap_or(-1);

        let meminfo = self
            .run_checked(
                &mut session,
                &["cat".to_string(), "/proc/meminfo".to_string()],
            )
            .await?;
        let memory = parse_mem_total_kb(&meminfo).unwrap_or(-1);

        let df = self
            .run_checked(
                &mut session,
                &["df".to_string(), "-k".to_string(), "/".to_string()],
            )
            .await?;
        let space = parse_df_available_kb(&df).unwrap_or(-1);

        Ok(HostFacts {
            os,
            cpus,
            memory,
            space,
        })
    }

    async fn bootstrap(
        &self,
        address: &str,
        key_path: &Path,
        oscmd: &dyn OSCmd,
    ) -> Result<(), TransportError> {
        let mut session = self.connect(address, key_path).await?;
        for command in [
            oscmd.install_libselinux_python(),
            oscmd.install_docker(),
            oscmd.install_flannel(),
            oscmd.install_etcd(),
            oscmd.install_kube(),
            oscmd.start_etcd(),
            oscmd.start_flannel(),
            oscmd.start_docker(),
            oscmd.start_kube(),
            oscmd.start_kubelet(),
            oscmd.start_kube_proxy(),
        ] {
            self.run_checked(&mut session, &command).await?;
        }
        Ok(())
    }

    async fn restart(
        &self,
        address: &str,
        key_path: &Path,
        oscmd: &dyn OSCmd,
    ) -> Result<(), TransportError> {
        let mut session = self.connect(address, key_path).await?;
        self.run_checked(&mut session, &oscmd.restart()).await?;
        Ok(())
    }

    async fn upgrade(
        &self,
        address: &str,
        key_path: &Path,
        oscmd: &dyn OSCmd,
        upgrade_to: &str,
    ) -> Result<(), TransportError> {
        let mut session = self.connect(address, key_path).await?;
        tracing::info!(address, upgrade_to, "upgrading host");
        self.run_checked(&mut session, &oscmd.upgrade()).await?;
        Ok(())
    }
}

fn parse_os_id(os_release: &str) -> Option<String> {
    for line in os_release.lines() {
        if let Some(value) = line.strip_prefix("ID=") {
            return Some(value.trim_matches('"').to_string());
        }
    }
    None
}

fn parse_mem_total_kb(meminfo: &str) -> Option<i64> {
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            return rest.trim().split_whitespace().next()?.parse().ok();
        }
    }
    None
}

fn parse_df_available_kb(df: &str) -> Option<i64> {
    df.lines().nth(1)?.split_whitespace().nth(3)?.parse().ok()
}

/// Deterministic [`HostTransport`] used by investigator/cluster-exec tests.
pub mod stub {
    use std::sync::Mutex;

    use super::*;

    pub struct StubTransport {
        pub fail_get_info: bool,
        pub fail_bootstrap: bool,
        pub calls: Mutex<Vec<String>>,
    }

    impl Default for StubTransport {
        fn default() -> Self {
            Self {
                fail_get_info: false,
                fail_bootstrap: false,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HostTransport for StubTransport {
        async fn get_info(
            &self,
            address: &str,
            _key_path: &Path,
        ) -> Result<HostFacts, TransportError> {
            self.calls.lock().unwrap().push(format!("get_info:{address}"));
            if self.fail_get_info {
                return Err(TransportError::Connect("stub failure".into()));
            }
            Ok(HostFacts {
                os: "fedora".into(),
                cpus: 4,
                memory: 8_388_608,
                space: 20_971_520,
            })
        }

        async fn bootstrap(
            &self,
            address: &str,
            _key_path: &Path,
            _oscmd: &dyn OSCmd,
        ) -> Result<(), TransportError> {
            self.calls.lock().unwrap().push(format!("bootstrap:{address}"));
            if self.fail_bootstrap {
                return Err(TransportError::Command("stub failure".into()));
            }
            Ok(())
        }

        async fn restart(
            &self,
            address: &str,
            _key_path: &Path,
            _oscmd: &dyn OSCmd,
        ) -> Result<(), TransportError> {
            self.calls.lock().unwrap().push(format!("restart:{address}"));
            Ok(())
        }

        async fn upgrade(
            &self,
            address: &str,
            _key_path: &Path,
            _oscmd: &dyn OSCmd,
            upgrade_to: &str,
        ) -> Result<(), TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("upgrade:{address}:{upgrade_to}"));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_os_id() {
        let release = "NAME=\"Fedora Linux\"\nID=fedora\nVERSION_ID=40\n";
        assert_eq!(parse_os_id(release), Some("fedora".to_string()));
    }

    #[test]
    fn parses_mem_total() {
        let meminfo = "MemTotal:       16384000 kB\nMemFree:        800000 kB\n";
        assert_eq!(parse_mem_total_kb(meminfo), Some(16_384_000));
    }

    #[test]
    fn parses_df_available() {
        let df = "Filesystem 1K-blocks Used Available Use% Mounted\n/dev/sda1 100 10 90 10% /\n";
        assert_eq!(parse_df_available_kb(df), Some(90));
    }
}
