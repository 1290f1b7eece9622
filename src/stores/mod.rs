pub mod memory_registry;
