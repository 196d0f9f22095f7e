// src/config.rs

use std::{env, sync::Arc, time::Duration};

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    clients::{
        messaging::MessagingChannel,
        sheets::{GoogleSheetsClient, ServiceAccountKey, SheetRecordStore},
    },
    db::{LeadRepository, UserRepository},
    services::{
        auth::AuthService,
        lead_service::LeadService,
        ledger::LedgerService,
        portal::{chromium::ChromiumLauncher, AspNetPostback, BrowserLauncher, PortalConfig, PortalService},
        receipt::ReceiptService,
    },
};

const DEFAULT_PORT: u16 = 4444;
const DEFAULT_SHEET_NAME: &str = "AC MAST";
const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:8085/session";
const DEFAULT_RECEIPT_BASE_URL: &str = "https://afinfosys.netlify.app/reciept_format.html";

fn required(name: &str) -> anyhow::Result<String> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("{name} must be set"))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn or_default(name: &str, default: &str) -> String {
    optional(name).unwrap_or_else(|| default.to_string())
}

#[derive(Debug, Clone)]
pub struct PortalSettings {
    pub entry_url: String,
    pub target_url: String,
    pub login_id: String,
    pub password: String,
    pub dashboard_path: Option<String>,
    pub module_label: Option<String>,
    pub role_label: Option<String>,
    pub headless: bool,
    pub chrome_path: Option<String>,
}

impl PortalSettings {
    pub fn to_config(&self) -> PortalConfig {
        let mut config = PortalConfig::new(
            self.entry_url.clone(),
            self.target_url.clone(),
            self.login_id.clone(),
            self.password.clone(),
        );
        if let Some(path) = &self.dashboard_path {
            config.dashboard_path = path.clone();
        }
        if let Some(label) = &self.module_label {
            config.module_label = label.clone();
        }
        if let Some(label) = &self.role_label {
            config.role_label = label.clone();
        }
        config
    }
}

/// Everything read from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub sheet_id: String,
    pub google_credentials: String,
    pub sheet_name: String,
    pub gateway_url: String,
    pub reconnect_delay: Duration,
    pub receipt_base_url: String,
    pub portal: PortalSettings,
    pub bootstrap_owner: Option<(String, String)>,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let port = match optional("PORT") {
            Some(raw) => raw.parse().with_context(|| format!("PORT is not a port number: {raw}"))?,
            None => DEFAULT_PORT,
        };

        let portal = PortalSettings {
            entry_url: required("PORTAL_ENTRY_URL")?,
            target_url: required("PORTAL_TARGET_URL")?,
            login_id: required("PORTAL_LOGIN_ID")?,
            password: required("PORTAL_PASSWORD")?,
            dashboard_path: optional("PORTAL_DASHBOARD_PATH"),
            module_label: optional("PORTAL_MODULE_LABEL"),
            role_label: optional("PORTAL_ROLE_LABEL"),
            headless: optional("PORTAL_HEADLESS").is_none_or(|v| v != "false" && v != "0"),
            chrome_path: optional("PORTAL_CHROME_PATH"),
        };

        let bootstrap_owner = match (optional("BOOTSTRAP_OWNER_EMAIL"), optional("BOOTSTRAP_OWNER_PASSWORD")) {
            (Some(email), Some(password)) => Some((email, password)),
            (None, None) => None,
            _ => anyhow::bail!("BOOTSTRAP_OWNER_EMAIL and BOOTSTRAP_OWNER_PASSWORD must be set together"),
        };

        Ok(Self {
            port,
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            sheet_id: required("GOOGLE_SHEET_ID")?,
            google_credentials: required("GOOGLE_CREDENTIALS_JSON")?,
            sheet_name: or_default("SHEET_NAME", DEFAULT_SHEET_NAME),
            gateway_url: or_default("MESSAGING_GATEWAY_URL", DEFAULT_GATEWAY_URL),
            reconnect_delay: Duration::from_secs(3),
            receipt_base_url: or_default("RECEIPT_BASE_URL", DEFAULT_RECEIPT_BASE_URL),
            portal,
            bootstrap_owner,
        })
    }
}

/// The outside systems the services talk to.
pub struct Integrations {
    pub sheets: Arc<dyn SheetRecordStore>,
    pub channel: Arc<dyn MessagingChannel>,
    pub browser: Arc<dyn BrowserLauncher>,
}

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub auth_service: AuthService,
    pub lead_service: LeadService,
    pub ledger_service: LedgerService,
    pub receipt_service: ReceiptService,
    pub portal_service: PortalService,
}

impl AppState {
    pub async fn new(settings: &Settings, channel: Arc<dyn MessagingChannel>) -> anyhow::Result<Self> {
        let db_pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&settings.database_url)
            .await
            .context("could not connect to the database")?;

        tracing::info!("✅ Database connection established.");

        let key = ServiceAccountKey::from_json(&settings.google_credentials)
            .context("GOOGLE_CREDENTIALS_JSON is not a usable service-account key")?;
        let sheets = GoogleSheetsClient::new(settings.sheet_id.clone(), key)?;

        let integrations = Integrations {
            sheets: Arc::new(sheets),
            channel,
            browser: Arc::new(ChromiumLauncher::new(
                settings.portal.chrome_path.clone(),
                settings.portal.headless,
            )),
        };

        Ok(Self::assemble(db_pool, settings, integrations))
    }

    // Wires the dependency graph
    pub fn assemble(db_pool: PgPool, settings: &Settings, integrations: Integrations) -> Self {
        let Integrations { sheets, channel, browser } = integrations;

        let auth_service = AuthService::new(
            UserRepository::new(db_pool.clone()),
            settings.jwt_secret.clone(),
            db_pool.clone(),
        );
        let lead_service = LeadService::new(LeadRepository::new(db_pool.clone()), db_pool.clone());
        let ledger_service = LedgerService::new(Arc::clone(&sheets), settings.sheet_name.clone());
        let receipt_service = ReceiptService::new(
            sheets,
            channel,
            settings.sheet_name.clone(),
            settings.receipt_base_url.clone(),
        );
        let portal_service = PortalService::new(browser, Arc::new(AspNetPostback), settings.portal.to_config());

        Self {
            db_pool,
            auth_service,
            lead_service,
            ledger_service,
            receipt_service,
            portal_service,
        }
    }
}
