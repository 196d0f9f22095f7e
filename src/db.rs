// src/db.rs

pub mod lead_repo;
pub mod user_repo;

pub use lead_repo::LeadRepository;
pub use user_repo::UserRepository;
