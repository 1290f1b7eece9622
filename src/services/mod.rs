pub mod credentials;
pub mod logger;
pub mod registry;
pub mod security;
pub mod validation;
