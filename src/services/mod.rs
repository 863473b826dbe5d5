//! Core services: name generation, the expiring object store, and its sweeper.

pub mod clock;
pub mod expiry_scheduler;
pub mod name_generator;
pub mod storage_service;
