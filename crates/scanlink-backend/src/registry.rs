//! Device registry: enumerate configured scanners and open sessions

use std::collections::BTreeMap;
use std::sync::Arc;

use scanlink_core::{DeviceDescriptor, ScanError, ScanResult};
use tracing::{info, warn};

use crate::command::{CommandService, OpcodeTable};
use crate::config::{BackendConfig, ScanConfig};
use crate::session::scan_session::{describe, identify};
use crate::session::ScanSession;
use crate::transport::{create_provider, TransportProvider};

struct Entry {
    descriptor: DeviceDescriptor,
    provider: Arc<dyn TransportProvider>,
    scan: ScanConfig,
    opcodes: OpcodeTable,
}

/// Known scanners, keyed by name
#[derive(Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, Entry>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach every configured device
    ///
    /// Devices that fail to identify are skipped with a warning so one bad
    /// entry does not hide the others.
    pub async fn from_config(config: &BackendConfig) -> ScanResult<Self> {
        let mut registry = Self::new();
        for device in &config.devices {
            let provider = create_provider(&device.transport)?;
            let opcodes = OpcodeTable::from_overrides(&device.opcode_overrides);
            if let Err(e) = registry
                .attach(&device.name, provider, device.scan.clone(), opcodes)
                .await
            {
                warn!(device = %device.name, error = %e, "Skipping device");
            }
        }
        Ok(registry)
    }

    /// Probe a device and add it under `name`
    pub async fn attach(
        &mut self,
        name: &str,
        provider: Arc<dyn TransportProvider>,
        scan: ScanConfig,
        opcodes: OpcodeTable,
    ) -> ScanResult<DeviceDescriptor> {
        let transport = provider.open(name).await?;
        let mut service = CommandService::with_opcodes(transport, opcodes);
        let identified = identify(&mut service).await;
        let _ = service.close().await;
        let caps = identified?;

        let descriptor = describe(name, &caps);
        info!(
            device = name,
            vendor = %descriptor.vendor,
            model = %descriptor.model,
            "Device attached"
        );
        self.devices.insert(
            name.to_string(),
            Entry {
                descriptor: descriptor.clone(),
                provider,
                scan,
                opcodes,
            },
        );
        Ok(descriptor)
    }

    pub fn enumerate(&self) -> Vec<DeviceDescriptor> {
        self.devices.values().map(|e| e.descriptor.clone()).collect()
    }

    pub async fn open(&self, name: &str) -> ScanResult<ScanSession> {
        let entry = self
            .devices
            .get(name)
            .ok_or_else(|| ScanError::DeviceNotFound(name.to_string()))?;
        ScanSession::open(name, entry.provider.clone(), entry.scan.clone(), entry.opcodes).await
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.devices.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfig, SimulatedConfig, TransportConfig};
    use crate::transport::SimulatedScanner;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_from_config_enumerates_devices() {
        let config = BackendConfig::from_toml_str(
            r#"
[[devices]]
name = "sim:one"

[[devices]]
name = "sim:two"
[devices.transport]
type = "simulated"
model = "Second Flatbed"
"#,
        )
        .unwrap();
        let registry = DeviceRegistry::from_config(&config).await.unwrap();
        let devices = registry.enumerate();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].model, "Second Flatbed");
    }

    #[tokio::test]
    async fn test_open_unknown_device() {
        let registry = DeviceRegistry::new();
        let err = registry.open("sim:none").await.unwrap_err();
        assert_eq!(err, ScanError::DeviceNotFound("sim:none".to_string()));
    }

    #[tokio::test]
    async fn test_attach_closes_probe_handle() {
        let scanner = SimulatedScanner::new(SimulatedConfig::default());
        let mut registry = DeviceRegistry::new();
        registry
            .attach(
                "sim:probe",
                Arc::new(scanner.clone()),
                ScanConfig::default(),
                OpcodeTable::default(),
            )
            .await
            .unwrap();
        assert_eq!(scanner.open_handles(), 0);

        let session = registry.open("sim:probe").await.unwrap();
        assert_eq!(scanner.open_handles(), 1);
        drop(session);
        assert_eq!(scanner.open_handles(), 0);
    }

    #[test]
    fn test_default_device_config_is_simulated() {
        let device = DeviceConfig::default();
        assert!(matches!(device.transport, TransportConfig::Simulated(_)));
    }
}
