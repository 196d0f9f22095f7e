// src/models/lead.rs

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

// --- STORED RECORD ---

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: Uuid,

    #[schema(example = "Mahesh Chaudhari")]
    pub customer_name: String,
    #[schema(example = "9876543210")]
    pub mobile_number: String,
    pub whatsapp_number: String,

    pub village: String,
    pub district: String,
    pub taluko: String,

    #[schema(example = 120)]
    pub house_count: i32,
    #[schema(value_type = f64, example = 45.5)]
    pub price_per_house: Decimal,
    // Always house_count * price_per_house at insert time
    #[schema(value_type = f64, example = 5460.0)]
    pub estimated_bill: Decimal,

    pub inquiry_for: String,
    pub designation: String,
    pub reference_source: String,

    pub incoming_call_date: NaiveDate,
    pub reminder_date: NaiveDate,
    pub remarks: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// The bill estimate shown on the intake form, or `None` when the product
/// does not fit in a `Decimal`.
pub fn estimated_bill(house_count: i32, price_per_house: Decimal) -> Option<Decimal> {
    Decimal::from(house_count).checked_mul(price_per_house)
}

// --- INTAKE PAYLOAD ---

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateLeadPayload {
    #[validate(custom(function = "not_blank"))]
    pub customer_name: String,
    #[validate(custom(function = "not_blank"))]
    pub mobile_number: String,
    #[validate(custom(function = "not_blank"))]
    pub whatsapp_number: String,

    #[validate(custom(function = "not_blank"))]
    pub village: String,
    #[validate(custom(function = "not_blank"))]
    pub district: String,
    #[validate(custom(function = "not_blank"))]
    pub taluko: String,

    // The form posts these as strings; numbers are accepted too.
    #[serde(deserialize_with = "flexible_i32")]
    #[validate(range(min = 0, message = "House count cannot be negative."))]
    #[schema(value_type = i32, example = 120)]
    pub house_count: i32,
    #[serde(deserialize_with = "flexible_decimal")]
    #[validate(custom(function = "non_negative"))]
    #[schema(value_type = f64, example = 45.5)]
    pub price_per_house: Decimal,

    #[validate(custom(function = "not_blank"))]
    pub inquiry_for: String,
    #[validate(custom(function = "not_blank"))]
    pub designation: String,
    #[validate(custom(function = "not_blank"))]
    pub reference_source: String,

    #[schema(value_type = String, format = Date, example = "2025-06-01")]
    pub incoming_call_date: NaiveDate,
    #[schema(value_type = String, format = Date, example = "2025-06-08")]
    pub reminder_date: NaiveDate,
    #[serde(default)]
    pub remarks: Option<String>,
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("required");
        err.message = Some("This field is required.".into());
        return Err(err);
    }
    Ok(())
}

fn non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        let mut err = ValidationError::new("range");
        err.message = Some("Price per house cannot be negative.".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(serde_json::Number),
    Text(String),
}

impl NumberOrText {
    fn as_text(&self) -> String {
        match self {
            NumberOrText::Number(n) => n.to_string(),
            NumberOrText::Text(s) => s.trim().to_string(),
        }
    }
}

fn flexible_i32<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = NumberOrText::deserialize(deserializer)?.as_text();
    raw.parse::<i32>()
        .map_err(|_| serde::de::Error::custom(format!("'{raw}' is not a whole number")))
}

fn flexible_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = NumberOrText::deserialize(deserializer)?.as_text();
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| serde::de::Error::custom(format!("'{raw}' is not a number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form() -> serde_json::Value {
        json!({
            "customerName": "Mahesh Chaudhari",
            "mobileNumber": "9876543210",
            "whatsappNumber": "9876543210",
            "village": "Meghraj",
            "district": "Aravalli",
            "taluko": "Meghraj",
            "houseCount": "120",
            "pricePerHouse": "45.50",
            "inquiryFor": "Tax software",
            "designation": "TCM",
            "referenceSource": "Facebook",
            "incomingCallDate": "2025-06-01",
            "reminderDate": "2025-06-08",
            "remarks": "",
            "estimatedBill": 1
        })
    }

    #[test]
    fn estimated_bill_is_exact_product() {
        let price = Decimal::from_str("45.50").unwrap();
        assert_eq!(estimated_bill(120, price), Some(Decimal::from_str("5460.00").unwrap()));
        assert_eq!(estimated_bill(0, price), Some(Decimal::ZERO));
        assert_eq!(
            estimated_bill(3, Decimal::from_str("0.1").unwrap()),
            Some(Decimal::from_str("0.3").unwrap())
        );
    }

    #[test]
    fn estimated_bill_too_large_is_none() {
        assert_eq!(estimated_bill(2, Decimal::MAX), None);
        assert_eq!(estimated_bill(1, Decimal::MAX), Some(Decimal::MAX));
    }

    #[test]
    fn accepts_numeric_strings_and_numbers() {
        let payload: CreateLeadPayload = serde_json::from_value(form()).unwrap();
        assert_eq!(payload.house_count, 120);
        assert_eq!(payload.price_per_house, Decimal::from_str("45.50").unwrap());

        let mut numeric = form();
        numeric["houseCount"] = json!(7);
        numeric["pricePerHouse"] = json!(12.25);
        let payload: CreateLeadPayload = serde_json::from_value(numeric).unwrap();
        assert_eq!(payload.house_count, 7);
        assert_eq!(payload.price_per_house, Decimal::from_str("12.25").unwrap());
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn rejects_garbage_numbers() {
        let mut bad = form();
        bad["houseCount"] = json!("many");
        assert!(serde_json::from_value::<CreateLeadPayload>(bad).is_err());
    }

    #[test]
    fn blank_and_negative_fields_fail_validation() {
        let mut bad = form();
        bad["customerName"] = json!("   ");
        bad["houseCount"] = json!(-1);
        bad["pricePerHouse"] = json!("-3");
        let payload: CreateLeadPayload = serde_json::from_value(bad).unwrap();

        let errors = payload.validate().unwrap_err();
        assert_eq!(errors.field_errors().len(), 3);
    }
}
