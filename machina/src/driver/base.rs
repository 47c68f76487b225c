use serde::{Deserialize, Serialize};

/// Fields every driver persists, shared by embedding with `#[serde(flatten)]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseDriver {
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    #[serde(rename = "MachineName")]
    pub machine_name: String,
    #[serde(rename = "SSHUser")]
    pub ssh_user: String,
    #[serde(rename = "SSHPort")]
    pub ssh_port: u16,
    #[serde(rename = "SSHKeyPath")]
    pub ssh_key_path: String,
    #[serde(rename = "StorePath")]
    pub store_path: String,
    #[serde(rename = "SwarmMaster")]
    pub swarm_master: bool,
    #[serde(rename = "SwarmHost")]
    pub swarm_host: String,
    #[serde(rename = "SwarmDiscovery")]
    pub swarm_discovery: String,
}

impl BaseDriver {
    pub const DEFAULT_SSH_USER: &'static str = "docker";
    pub const DEFAULT_SSH_PORT: u16 = 22;

    pub fn new(machine_name: impl Into<String>, store_path: impl Into<String>) -> Self {
        Self {
            machine_name: machine_name.into(),
            store_path: store_path.into(),
            ssh_user: Self::DEFAULT_SSH_USER.to_string(),
            ssh_port: Self::DEFAULT_SSH_PORT,
            ..Default::default()
        }
    }

    pub fn ssh_user(&self) -> String {
        if self.ssh_user.is_empty() {
            Self::DEFAULT_SSH_USER.to_string()
        } else {
            self.ssh_user.clone()
        }
    }

    pub fn ssh_port(&self) -> u16 {
        if self.ssh_port == 0 {
            Self::DEFAULT_SSH_PORT
        } else {
            self.ssh_port
        }
    }

    /// `<store>/machines/<name>/id_rsa` unless a key path was persisted.
    pub fn ssh_key_path(&self) -> String {
        if !self.ssh_key_path.is_empty() {
            return self.ssh_key_path.clone();
        }
        if self.store_path.is_empty() || self.machine_name.is_empty() {
            return String::new();
        }
        std::path::Path::new(&self.store_path)
            .join("machines")
            .join(&self.machine_name)
            .join("id_rsa")
            .to_string_lossy()
            .into_owned()
    }
}
