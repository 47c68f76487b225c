//! Driver for hosts that need no hypervisor.
//!
//! The machine "exists" only as persisted state, which makes this driver
//! useful for bare-metal hosts and for exercising the plugin path without a
//! hypervisor installed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{BaseDriver, Driver, DriverError, MachineState, decode_config, encode_config};

pub const DRIVER_NAME: &str = "none";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoneDriver {
    #[serde(flatten)]
    pub base: BaseDriver,
    #[serde(rename = "State")]
    pub state: MachineState,
}

impl NoneDriver {
    pub fn new(machine_name: impl Into<String>, store_path: impl Into<String>) -> Self {
        Self {
            base: BaseDriver::new(machine_name, store_path),
            state: MachineState::None,
        }
    }

    fn transition(
        &mut self,
        allowed: &[MachineState],
        next: MachineState,
        op: &str,
    ) -> Result<(), DriverError> {
        if !allowed.contains(&self.state) {
            return Err(DriverError::InvalidState(format!(
                "cannot {} a machine in state '{:?}'",
                op, self.state
            )));
        }
        self.state = next;
        Ok(())
    }
}

#[async_trait]
impl Driver for NoneDriver {
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
            Ok("127.0.0.1".to_string())
        } else {
            Ok(self.base.ip_address.clone())
        }
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
        Ok(self.state)
    }

    async fn create(&mut self) -> Result<(), DriverError> {
        self.transition(&[MachineState::None], MachineState::Stopped, "create")
    }

    async fn start(&mut self) -> Result<(), DriverError> {
        self.transition(
            &[MachineState::Stopped, MachineState::Running],
            MachineState::Running,
            "start",
        )
    }

    async fn stop(&mut self) -> Result<(), DriverError> {
        self.transition(
            &[MachineState::Running, MachineState::Stopped],
            MachineState::Stopped,
            "stop",
        )
    }

    async fn kill(&mut self) -> Result<(), DriverError> {
        self.transition(
            &[MachineState::Running, MachineState::Stopped],
            MachineState::Stopped,
            "kill",
        )
    }

    async fn remove(&mut self) -> Result<(), DriverError> {
        self.state = MachineState::None;
        Ok(())
    }
}
