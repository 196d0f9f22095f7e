// src/docs.rs

use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::OpenApi;

use crate::handlers;
use crate::models;

#[derive(OpenApi)]
#[openapi(
    paths(
        // --- Auth ---
        handlers::auth::register,
        handlers::auth::login,

        // --- Users ---
        handlers::auth::get_me,
        handlers::auth::list_staff,

        // --- Leads ---
        handlers::leads::create_lead,
        handlers::leads::list_leads,
        handlers::leads::get_lead,

        // --- Ledger ---
        handlers::ledger::update_sheet_record,
        handlers::ledger::update_receipt,
        handlers::ledger::get_all_sheet_data,

        // --- Receipts ---
        handlers::receipts::send_receipt,

        // --- Portal ---
        handlers::portal::run_portal_login,
    ),
    components(
        schemas(
            // --- Auth ---
            models::auth::StaffRole,
            models::auth::User,
            models::auth::RegisterUserPayload,
            models::auth::LoginUserPayload,
            models::auth::AuthResponse,

            // --- Leads ---
            models::lead::Lead,
            models::lead::CreateLeadPayload,

            // --- Ledger / receipts ---
            models::ledger::UpdateSheetRecordPayload,
            models::ledger::UpdateReceiptPayload,
            models::ledger::SheetDataResponse,
            models::receipt::SendReceiptPayload,
            models::response::ActionResponse,

            // --- Portal ---
            models::portal::PortalLoginResponse,
        )
    ),
    tags(
        (name = "Auth", description = "Sign-in and staff registration"),
        (name = "Users", description = "Staff accounts"),
        (name = "Leads", description = "Lead intake"),
        (name = "Ledger", description = "Billing ledger sync (Google Sheets)"),
        (name = "Receipts", description = "WhatsApp receipt dispatch"),
        (name = "Portal", description = "Tax portal login automation")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme("api_jwt", SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/auth/register",
            "/api/leads/{id}",
            "/send-receipt",
            "/update-sheet-record",
            "/get-all-sheet-data",
            "/api/portal/login",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path} missing from OpenAPI");
        }
    }
}
