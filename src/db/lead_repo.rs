// src/db/lead_repo.rs

use rust_decimal::Decimal;
use sqlx::{Executor, PgPool, Postgres};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::lead::{CreateLeadPayload, Lead},
};

#[derive(Clone)]
pub struct LeadRepository {
    pool: PgPool,
}

impl LeadRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert<'e, E>(
        &self,
        executor: E,
        payload: &CreateLeadPayload,
        estimated_bill: Decimal,
    ) -> Result<Lead, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let lead = sqlx::query_as::<_, Lead>(
            r#"
            INSERT INTO leads (
                customer_name, mobile_number, whatsapp_number,
                village, district, taluko,
                house_count, price_per_house, estimated_bill,
                inquiry_for, designation, reference_source,
                incoming_call_date, reminder_date, remarks
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING *
            "#,
        )
        .bind(payload.customer_name.trim())
        .bind(payload.mobile_number.trim())
        .bind(payload.whatsapp_number.trim())
        .bind(payload.village.trim())
        .bind(payload.district.trim())
        .bind(payload.taluko.trim())
        .bind(payload.house_count)
        .bind(payload.price_per_house)
        .bind(estimated_bill)
        .bind(payload.inquiry_for.trim())
        .bind(payload.designation.trim())
        .bind(payload.reference_source.trim())
        .bind(payload.incoming_call_date)
        .bind(payload.reminder_date)
        .bind(payload.remarks.as_deref().map(str::trim).filter(|r| !r.is_empty()))
        .fetch_one(executor)
        .await?;

        Ok(lead)
    }

    // Newest first
    pub async fn list(&self) -> Result<Vec<Lead>, AppError> {
        let leads = sqlx::query_as::<_, Lead>("SELECT * FROM leads ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(leads)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Lead>, AppError> {
        let lead = sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(lead)
    }
}
