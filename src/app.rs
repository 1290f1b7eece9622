use std::sync::Arc;

use crate::errors::ProbeError;
use crate::managers::fleet::FleetManager;
use crate::services::logger::Logger;
use crate::services::registry::Registry;
use crate::services::security::Security;

pub struct App {
    pub logger: Logger,
    pub registry: Arc<Registry>,
    pub fleet: Arc<FleetManager>,
}

impl App {
    pub fn initialize() -> Result<Self, ProbeError> {
        let logger = Logger::new("fleetmon");

        let security = Arc::new(Security::new()?);
        let registry = Arc::new(Registry::new(security, logger.child("registry")));
        registry.load_from_disk()?;

        let fleet = Arc::new(FleetManager::new(registry.clone(), logger.clone()));

        logger.debug(
            "Initialized",
            Some(&serde_json::json!({"hosts": registry.list_hosts().len()})),
        );

        Ok(Self {
            logger,
            registry,
            fleet,
        })
    }
}
