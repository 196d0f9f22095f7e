// src/models.rs

pub mod auth;
pub mod lead;
pub mod ledger;
pub mod portal;
pub mod receipt;
pub mod response;
