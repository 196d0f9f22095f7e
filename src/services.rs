// src/services.rs

pub mod auth;
pub mod lead_service;
pub mod ledger;
pub mod portal;
pub mod receipt;
