/// Per-OS vocabulary of command tokens the host transport executes over SSH.
/// Each method returns an argv-style token sequence, mirroring how the
/// original tool built shell commands per package manager.
pub trait OSCmd: Send + Sync {
    fn restart(&self) -> Vec<String>;
    fn upgrade(&self) -> Vec<String>;
    fn install_libselinux_python(&self) -> Vec<String>;
    fn install_docker(&self) -> Vec<String>;
    fn install_flannel(&self) -> Vec<String>;
    fn install_etcd(&self) -> Vec<String>;
    fn install_kube(&self) -> Vec<String>;
    fn start_flannel(&self) -> Vec<String>;
    fn start_docker(&self) -> Vec<String>;
    fn start_etcd(&self) -> Vec<String>;
    fn start_kube(&self) -> Vec<String>;
    fn start_kubelet(&self) -> Vec<String>;
    fn start_kube_proxy(&self) -> Vec<String>;
}

fn toks(s: &[&str]) -> Vec<String> {
    s.iter().map(|t| t.to_string()).collect()
}

pub struct Rhel;

impl OSCmd for Rhel {
    fn restart(&self) -> Vec<String> {
        toks(&["shutdown", "-r", "now"])
    }

    fn upgrade(&self) -> Vec<String> {
        toks(&["yum", "-y", "update"])
    }

    fn install_libselinux_python(&self) -> Vec<String> {
        toks(&["yum", "-y", "install", "libselinux-python"])
    }

    fn install_docker(&self) -> Vec<String> {
        toks(&["yum", "-y", "install", "docker"])
    }

    fn install_flannel(&self) -> Vec<String> {
        toks(&["yum", "-y", "install", "flannel"])
    }

    fn install_etcd(&self) -> Vec<String> {
        toks(&["yum", "-y", "install", "etcd"])
    }

    fn install_kube(&self) -> Vec<String> {
        toks(&["yum", "-y", "install", "kubernetes"])
    }

    fn start_flannel(&self) -> Vec<String> {
        toks(&["systemctl", "start", "flanneld"])
    }

    fn start_docker(&self) -> Vec<String> {
        toks(&["systemctl", "start", "docker"])
    }

    fn start_etcd(&self) -> Vec<String> {
        toks(&["systemctl", "start", "etcd"])
    }

    fn start_kube(&self) -> Vec<String> {
        toks(&["systemctl", "start", "kube-apiserver"])
    }

    fn start_kubelet(&self) -> Vec<String> {
        toks(&["systemctl", "start", "kubelet"])
    }

    fn start_kube_proxy(&self) -> Vec<String> {
        toks(&["systemctl", "start", "kube-proxy"])
    }
}

pub struct Fedora;

impl OSCmd for Fedora {
    fn restart(&self) -> Vec<String> {
        toks(&["shutdown", "-r", "now"])
    }

    fn upgrade(&self) -> Vec<String> {
        toks(&["dnf", "-y", "update"])
    }

    fn install_libselinux_python(&self) -> Vec<String> {
        toks(&["dnf", "-y", "install", "libselinux-python"])
    }

    fn install_docker(&self) -> Vec<String> {
        toks(&["dnf", "-y", "install", "docker"])
    }

    fn install_flannel(&self) -> Vec<String> {
        toks(&["dnf", "-y", "install", "flannel"])
    }

    fn install_etcd(&self) -> Vec<String> {
        toks(&["dnf", "-y", "install", "etcd"])
    }

    fn install_kube(&self) -> Vec<String> {
        toks(&["dnf", "-y", "install", "kubernetes"])
    }

    fn start_flannel(&self) -> Vec<String> {
        toks(&["systemctl", "start", "flanneld"])
    }

    fn start_docker(&self) -> Vec<String> {
        toks(&["systemctl", "start", "docker"])
    }

    fn start_etcd(&self) -> Vec<String> {
        toks(&["systemctl", "start", "etcd"])
    }

    fn start_kube(&self) -> Vec<String> {
        toks(&["systemctl", "start", "kube-apiserver"])
    }

    fn start_kubelet(&self) -> Vec<String> {
        toks(&["systemctl", "start", "kubelet"])
    }

    fn start_kube_proxy(&self) -> Vec<String> {
        toks(&["systemctl", "start", "kube-proxy"])
    }
}

/// Selects an OSCmd implementation for `os`. Unknown or empty OS strings
/// fall back to the RHEL vocabulary, the most conservative default.
pub fn get_oscmd(os: &str) -> Box<dyn OSCmd> {
    match os.to_lowercase().as_str() {
        "fedora" => Box::new(Fedora),
        _ => Box::new(Rhel),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fedora_uses_dnf() {
        let cmd = get_oscmd("Fedora");
        assert_eq!(cmd.upgrade(), vec!["dnf", "-y", "update"]);
    }

    #[test]
    fn unknown_os_falls_back_to_rhel() {
        let cmd = get_oscmd("some-bespoke-distro");
        assert_eq!(cmd.upgrade(), vec!["yum", "-y", "update"]);
    }
}
