// src/clients.rs

pub mod cdp;
pub mod messaging;
pub mod sheets;
