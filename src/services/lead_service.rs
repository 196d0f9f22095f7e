// src/services/lead_service.rs

use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::error::AppError,
    db::LeadRepository,
    models::lead::{estimated_bill, CreateLeadPayload, Lead},
};

#[derive(Clone)]
pub struct LeadService {
    repo: LeadRepository,
    pool: PgPool,
}

impl LeadService {
    pub fn new(repo: LeadRepository, pool: PgPool) -> Self {
        Self { repo, pool }
    }

    pub async fn create(&self, payload: CreateLeadPayload) -> Result<Lead, AppError> {
        payload.validate()?;

        // Derived here; the client never gets to set it.
        let bill = estimated_bill(payload.house_count, payload.price_per_house).ok_or_else(|| {
            AppError::BadRequest("House count times price per house is too large.".into())
        })?;
        let lead = self.repo.insert(&self.pool, &payload, bill).await?;

        tracing::info!(lead_id = %lead.id, houses = lead.house_count, bill = %lead.estimated_bill, "📋 Lead created");
        Ok(lead)
    }

    pub async fn list(&self) -> Result<Vec<Lead>, AppError> {
        self.repo.list().await
    }

    pub async fn get(&self, id: Uuid) -> Result<Lead, AppError> {
        self.repo.find_by_id(id).await?.ok_or(AppError::LeadNotFound)
    }
}
