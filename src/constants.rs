pub mod network {
    pub const SSH_DEFAULT_PORT: u16 = 22;
    pub const WINRM_HTTP_PORT: u16 = 5985;
    pub const WINRM_HTTPS_PORT: u16 = 5986;
    pub const WINRM_PORTS: &[u16] = &[WINRM_HTTP_PORT, WINRM_HTTPS_PORT];
    pub const TIMEOUT_CONNECT_MS: u64 = 10_000;
    pub const TIMEOUT_EXEC_DEFAULT_MS: u64 = 30_000;
    pub const TIMEOUT_EXEC_HARD_GRACE_MS: u64 = 2_000;
    pub const TIMEOUT_WINRM_REQUEST_MS: u64 = 35_000;
    pub const WINRM_RECEIVE_POLL_MS: u64 = 300;
    pub const SERVICE_RESTART_SETTLE_MS: u64 = 1_000;
}

pub mod limits {
    pub const MAX_COMMAND_LENGTH: usize = 8_192;
    pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;
    pub const LOG_SUBSTRING_LENGTH: usize = 100;
    pub const COMMAND_SUBSTRING_LENGTH: usize = 50;
    pub const TOP_PROCESS_COUNT: usize = 10;
    pub const FLEET_PROBE_CONCURRENCY: usize = 8;
    pub const WINRM_RECEIVE_MAX_POLLS: usize = 200;
}

pub mod health {
    pub const WARNING_PERCENT: f64 = 80.0;
    pub const CRITICAL_PERCENT: f64 = 90.0;
}

pub mod crypto {
    pub const KEY_SIZE: usize = 32;
    pub const IV_SIZE: usize = 12;
    pub const TAG_SIZE: usize = 16;
}

pub mod paths {
    pub const DATA_DIR_NAME: &str = ".fleetmon";
    pub const REGISTRY_FILE_NAME: &str = "registry.json";
    pub const KEY_FILE_NAME: &str = "registry.key";
}

pub mod env {
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
    pub const ENCRYPTION_KEY: &str = "FLEETMON_ENCRYPTION_KEY";
    pub const REGISTRY_PATH: &str = "FLEETMON_REGISTRY_PATH";
    pub const COMMAND_TIMEOUT_MS: &str = "FLEETMON_COMMAND_TIMEOUT_MS";
}
