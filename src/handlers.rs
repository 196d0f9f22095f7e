// src/handlers.rs

pub mod auth;
pub mod leads;
pub mod ledger;
pub mod portal;
pub mod receipts;
