//! VirtualBox driver backed by the `VBoxManage` command line tool.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use super::{BaseDriver, Driver, DriverError, MachineState, decode_config, encode_config};

pub const DRIVER_NAME: &str = "virtualbox";

const VBOX_MANAGE: &str = "VBoxManage";
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Longest a single stop waits for the machine to power off.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualBoxDriver {
    #[serde(flatten)]
    pub base: BaseDriver,
    #[serde(rename = "CPU")]
    pub cpu: u32,
    #[serde(rename = "Memory")]
    pub memory: u32,
    #[serde(rename = "DiskSize")]
    pub disk_size: u32,
    #[serde(rename = "NatNicType")]
    pub nat_nic_type: String,
    #[serde(rename = "Boot2DockerURL")]
    pub boot2docker_url: String,
    #[serde(rename = "Boot2DockerImportVM")]
    pub boot2docker_import_vm: String,
    #[serde(rename = "HostDNSResolver")]
    pub host_dns_resolver: bool,
    #[serde(rename = "HostOnlyCIDR")]
    pub host_only_cidr: String,
    #[serde(rename = "HostOnlyNicType")]
    pub host_only_nic_type: String,
    #[serde(rename = "HostOnlyPromiscMode")]
    pub host_only_promisc_mode: String,
    #[serde(rename = "UIType")]
    pub ui_type: String,
    #[serde(rename = "HostOnlyNoDHCP")]
    pub host_only_no_dhcp: bool,
    #[serde(rename = "NoShare")]
    pub no_share: bool,
    #[serde(rename = "DNSProxy")]
    pub dns_proxy: bool,
    #[serde(rename = "NoVTXCheck")]
    pub no_vtx_check: bool,
}

impl Default for VirtualBoxDriver {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl VirtualBoxDriver {
    pub fn new(machine_name: impl Into<String>, store_path: impl Into<String>) -> Self {
        Self {
            base: BaseDriver::new(machine_name, store_path),
            cpu: 1,
            memory: 1024,
            disk_size: 20000,
            nat_nic_type: "82540EM".to_string(),
            boot2docker_url: String::new(),
            boot2docker_import_vm: String::new(),
            host_dns_resolver: false,
            host_only_cidr: "192.168.99.1/24".to_string(),
            host_only_nic_type: "82540EM".to_string(),
            host_only_promisc_mode: "deny".to_string(),
            ui_type: "headless".to_string(),
            host_only_no_dhcp: false,
            no_share: false,
            dns_proxy: true,
            no_vtx_check: false,
        }
    }

    fn machine_dir(&self) -> PathBuf {
        PathBuf::from(&self.base.store_path).join("machines")
    }

    fn require_name(&self) -> Result<&str, DriverError> {
        if self.base.machine_name.is_empty() {
            return Err(DriverError::InvalidConfig(
                "machine name is not configured".to_string(),
            ));
        }
        Ok(&self.base.machine_name)
    }

    async fn vbox_manage(&self, args: &[&str]) -> Result<String, DriverError> {
        debug!("{} {}", VBOX_MANAGE, args.join(" "));

        let output = Command::new(VBOX_MANAGE)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DriverError::Command(format!("failed to run {}: {}", VBOX_MANAGE, e)))?;

        if !output.status.success() {
            return Err(DriverError::Command(format!(
                "{} {} exited with {}: {}",
                VBOX_MANAGE,
                args.first().copied().unwrap_or_default(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn wait_for_state(&self, wanted: MachineState) -> Result<(), DriverError> {
        let deadline = tokio::time::Instant::now() + STOP_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if self.state().await? == wanted {
                return Ok(());
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
        Err(DriverError::InvalidState(format!(
            "machine did not reach state {} in time",
            wanted
        )))
    }
}

/// Map the `VMState` value of `showvminfo --machinereadable` to a state.
fn parse_vm_state(info: &str) -> MachineState {
    let raw = info
        .lines()
        .find_map(|line| line.strip_prefix("VMState="))
        .map(|v| v.trim().trim_matches('"'))
        .unwrap_or_default();

    match raw {
        "running" => MachineState::Running,
        "paused" => MachineState::Paused,
        "saved" => MachineState::Saved,
        "poweroff" | "aborted" => MachineState::Stopped,
        "stopping" => MachineState::Stopping,
        "starting" | "restoring" => MachineState::Starting,
        "" => MachineState::None,
        _ => MachineState::Error,
    }
}

#[async_trait]
impl Driver for VirtualBoxDriver {
    fn driver_name(&self) -> String {
        DRIVER_NAME.to_string()
    }

    fn machine_name(&self) -> String {
        self.base.machine_name.clone()
    }

    async fn set_config_raw(&mut self, raw: &[u8]) -> Result<(), DriverError> {
        *self = decode_config(raw)?;
        Ok(())
    }

    async fn get_config_raw(&self) -> Result<Vec<u8>, DriverError> {
        encode_config(self)
    }

    async fn ip(&self) -> Result<String, DriverError> {
        if self.base.ip_address.is_empty() {
            return Err(DriverError::InvalidState(
                "IP address is not known yet".to_string(),
            ));
        }
        Ok(self.base.ip_address.clone())
    }

    async fn ssh_port(&self) -> Result<u16, DriverError> {
        Ok(self.base.ssh_port())
    }

    async fn ssh_username(&self) -> Result<String, DriverError> {
        Ok(self.base.ssh_user())
    }

    async fn ssh_key_path(&self) -> Result<String, DriverError> {
        Ok(self.base.ssh_key_path())
    }

    async fn state(&self) -> Result<MachineState, DriverError> {
        let name = self.require_name()?;
        let info = self
            .vbox_manage(&["showvminfo", name, "--machinereadable"])
            .await?;
        Ok(parse_vm_state(&info))
    }

    async fn pre_create_check(&self) -> Result<(), DriverError> {
        self.require_name()?;
        self.vbox_manage(&["--version"]).await?;
        Ok(())
    }

    async fn create(&mut self) -> Result<(), DriverError> {
        self.pre_create_check().await?;
        let name = self.base.machine_name.clone();
        let base_folder = self.machine_dir();
        let base_folder = base_folder.to_string_lossy();
        let cpus = self.cpu.to_string();
        let memory = self.memory.to_string();

        info!("Creating VirtualBox VM {}", name);
        self.vbox_manage(&[
            "createvm",
            "--basefolder",
            &base_folder,
            "--name",
            &name,
            "--register",
        ])
        .await?;

        self.vbox_manage(&[
            "modifyvm",
            &name,
            "--cpus",
            &cpus,
            "--memory",
            &memory,
            "--nic1",
            "nat",
            "--nictype1",
            &self.nat_nic_type,
            "--natdnsproxy1",
            if self.dns_proxy { "on" } else { "off" },
            "--natdnshostresolver1",
            if self.host_dns_resolver { "on" } else { "off" },
        ])
        .await?;

        Ok(())
    }

    async fn start(&mut self) -> Result<(), DriverError> {
        let name = self.require_name()?.to_string();
        match self.state().await? {
            MachineState::Running => Ok(()),
            MachineState::Paused => {
                self.vbox_manage(&["controlvm", &name, "resume"]).await?;
                Ok(())
            }
            _ => {
                info!("Starting VirtualBox VM {}", name);
                self.vbox_manage(&["startvm", &name, "--type", &self.ui_type])
                    .await?;
                Ok(())
            }
        }
    }

    async fn stop(&mut self) -> Result<(), DriverError> {
        let name = self.require_name()?.to_string();
        if self.state().await? == MachineState::Stopped {
            return Ok(());
        }
        info!("Stopping VirtualBox VM {}", name);
        self.vbox_manage(&["controlvm", &name, "acpipowerbutton"])
            .await?;
        self.wait_for_state(MachineState::Stopped).await?;
        self.base.ip_address.clear();
        Ok(())
    }

    async fn kill(&mut self) -> Result<(), DriverError> {
        let name = self.require_name()?.to_string();
        self.vbox_manage(&["controlvm", &name, "poweroff"]).await?;
        self.base.ip_address.clear();
        Ok(())
    }

    async fn remove(&mut self) -> Result<(), DriverError> {
        let name = self.require_name()?.to_string();
        if self.state().await? == MachineState::Running {
            self.kill().await?;
        }
        info!("Removing VirtualBox VM {}", name);
        self.vbox_manage(&["unregistervm", &name, "--delete"])
            .await?;
        Ok(())
    }
}
