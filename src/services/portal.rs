// src/services/portal.rs

//! Scripted login into the tax portal.
//!
//! The portal has no API. Its login form fills two dropdowns only after
//! the site identifier changes, re-renders itself through a server
//! postback once the role is picked, and pre-fills its own CAPTCHA. The
//! sequence below walks that form step by step and lands on the property
//! listing page.

pub mod chromium;
pub mod postback;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::common::poll::{poll_until, PollPolicy};

pub use postback::{AspNetPostback, PostbackDriver};

// =============================================================================
//  BROWSER SEAM
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

/// The page operations the login sequence needs.
#[async_trait]
pub trait PortalPage: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), PortalError>;
    async fn wait_for_navigation(&self) -> Result<(), PortalError>;
    async fn current_url(&self) -> Option<String>;

    async fn exists(&self, selector: &str) -> Result<bool, PortalError>;
    /// Sets `.value`; `Ok(false)` when nothing matches `selector`.
    async fn set_value(&self, selector: &str, value: &str) -> Result<bool, PortalError>;
    async fn dispatch_event(&self, selector: &str, event: &str) -> Result<(), PortalError>;
    /// `.value` for inputs, text content otherwise.
    async fn read_value(&self, selector: &str) -> Result<Option<String>, PortalError>;
    async fn select_options(&self, selector: &str) -> Result<Vec<SelectOption>, PortalError>;
    async fn click(&self, selector: &str) -> Result<(), PortalError>;
    /// Submits the page's main form; `Ok(false)` when there is none.
    async fn submit_form(&self) -> Result<bool, PortalError>;
    async fn evaluate(&self, script: &str) -> Result<Value, PortalError>;
}

/// One browser, owned for the duration of a single run.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    fn page(&self) -> &dyn PortalPage;
    async fn close(self: Box<Self>) -> Result<(), PortalError>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, PortalError>;
}

// =============================================================================
//  ERRORS
// =============================================================================

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("could not start the browser: {0}")]
    Launch(String),

    #[error("browser command failed: {0}")]
    Browser(String),

    #[error("{step} did not finish within {}s", .timeout.as_secs())]
    Timeout { step: &'static str, timeout: Duration },

    #[error("dropdowns never loaded after {attempts} attempts")]
    DropdownsNotLoaded { attempts: u32 },

    #[error("no '{label}' option in the {dropdown} dropdown")]
    OptionNotFound { dropdown: &'static str, label: String },

    #[error("{step}: field {selector} not found on the page")]
    FieldMissing { step: &'static str, selector: String },

    #[error("postback field {0} not found on the page")]
    PostbackFieldsMissing(&'static str),

    #[error("year field did not appear after {attempts} attempts")]
    YearFieldMissing { attempts: u32 },

    #[error("CAPTCHA value was never filled in after {attempts} attempts")]
    CaptchaMissing { attempts: u32 },

    #[error("login was not accepted, landed on {url}")]
    LoginRejected { url: String },
}

/// A failed run, with the page URL the browser was on when it stopped.
#[derive(Debug, Error)]
pub struct PortalRunError {
    #[source]
    pub error: PortalError,
    pub last_url: Option<String>,
}

impl fmt::Display for PortalRunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.last_url {
            Some(url) => write!(f, "{} (last url: {url})", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

// =============================================================================
//  CONFIG
// =============================================================================

#[derive(Debug, Clone)]
pub struct PortalSelectors {
    pub login_id: String,
    pub module_select: String,
    pub role_select: String,
    /// `name` of the role dropdown, as the server expects it in `__EVENTTARGET`.
    pub role_postback_target: String,
    pub year_select: String,
    pub password: String,
    pub captcha_source: String,
    pub captcha_input: String,
    pub login_button: String,
}

impl Default for PortalSelectors {
    fn default() -> Self {
        Self {
            login_id: "#txtLoginId".into(),
            module_select: "#ddlModule".into(),
            role_select: "#ddlUserType".into(),
            role_postback_target: "ddlUserType".into(),
            year_select: "#ddlYear".into(),
            password: "#txtPassword".into(),
            captcha_source: "#txtCaptchaCode".into(),
            captcha_input: "#txtCaptcha".into(),
            login_button: "#btnLogin".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub entry_url: String,
    pub target_url: String,
    pub dashboard_path: String,
    pub login_id: String,
    pub password: String,
    pub module_label: String,
    pub role_label: String,
    pub selectors: PortalSelectors,
    pub navigation_timeout: Duration,
    pub dropdown_poll: PollPolicy,
    pub field_poll: PollPolicy,
    pub settle_delay: Duration,
}

impl PortalConfig {
    pub fn new(entry_url: String, target_url: String, login_id: String, password: String) -> Self {
        Self {
            entry_url,
            target_url,
            dashboard_path: "/Dashboard".into(),
            login_id,
            password,
            module_label: "Tax".into(),
            role_label: "Talati".into(),
            selectors: PortalSelectors::default(),
            navigation_timeout: Duration::from_secs(120),
            dropdown_poll: PollPolicy::new(20, Duration::from_millis(500)),
            field_poll: PollPolicy::new(20, Duration::from_millis(500)),
            settle_delay: Duration::from_secs(1),
        }
    }
}

// =============================================================================
//  LOGIN SEQUENCE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalLogin {
    pub url: String,
}

/// Case-insensitive match on the visible option text.
pub fn find_option<'a>(options: &'a [SelectOption], label: &str) -> Option<&'a SelectOption> {
    let wanted = label.trim().to_lowercase();
    options
        .iter()
        .find(|o| o.label.trim().to_lowercase() == wanted)
        .or_else(|| options.iter().find(|o| o.label.to_lowercase().contains(&wanted)))
}

async fn bounded<T, F>(step: &'static str, timeout: Duration, fut: F) -> Result<T, PortalError>
where
    F: Future<Output = Result<T, PortalError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| PortalError::Timeout { step, timeout })?
}

/// Sets a form field that the sequence cannot continue without.
async fn fill(page: &dyn PortalPage, step: &'static str, selector: &str, value: &str) -> Result<(), PortalError> {
    if page.set_value(selector, value).await? {
        Ok(())
    } else {
        Err(PortalError::FieldMissing { step, selector: selector.to_string() })
    }
}

#[derive(Clone)]
pub struct PortalService {
    launcher: Arc<dyn BrowserLauncher>,
    postback: Arc<dyn PostbackDriver>,
    config: Arc<PortalConfig>,
}

impl PortalService {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        postback: Arc<dyn PostbackDriver>,
        config: PortalConfig,
    ) -> Self {
        Self {
            launcher,
            postback,
            config: Arc::new(config),
        }
    }

    /// Runs the whole login once. The browser is closed whatever happens;
    /// a failed run is never retried here.
    pub async fn run_login(&self) -> Result<PortalLogin, PortalRunError> {
        tracing::info!(url = %self.config.entry_url, "Starting portal login run");

        let session = self.launcher.launch().await.map_err(|error| PortalRunError {
            error,
            last_url: None,
        })?;

        let outcome = self.drive(session.page()).await;
        let outcome = match outcome {
            Ok(login) => Ok(login),
            Err(error) => Err(PortalRunError {
                error,
                last_url: session.page().current_url().await,
            }),
        };

        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "Browser did not close cleanly");
        }

        match &outcome {
            Ok(login) => tracing::info!(url = %login.url, "✅ Portal login succeeded"),
            Err(e) => tracing::error!(error = %e, "Portal login failed"),
        }
        outcome
    }

    async fn drive(&self, page: &dyn PortalPage) -> Result<PortalLogin, PortalError> {
        let cfg = &*self.config;
        let sel = &cfg.selectors;

        // 1. entry page
        bounded("navigation to the login page", cfg.navigation_timeout, page.goto(&cfg.entry_url)).await?;

        // 2. the dependent dropdowns only refresh on a change notification
        fill(page, "login id", &sel.login_id, &cfg.login_id).await?;
        page.dispatch_event(&sel.login_id, "change").await?;

        // 3. wait for both dropdowns to hold more than the placeholder
        let (modules, roles) = poll_until(cfg.dropdown_poll, || async {
            let modules = page.select_options(&sel.module_select).await.ok()?;
            let roles = page.select_options(&sel.role_select).await.ok()?;
            (modules.len() > 1 && roles.len() > 1).then_some((modules, roles))
        })
        .await
        .ok_or(PortalError::DropdownsNotLoaded { attempts: cfg.dropdown_poll.attempts })?;

        // 4. option values change between sessions, labels do not
        let module = find_option(&modules, &cfg.module_label).ok_or_else(|| PortalError::OptionNotFound {
            dropdown: "module",
            label: cfg.module_label.clone(),
        })?;
        let role = find_option(&roles, &cfg.role_label).ok_or_else(|| PortalError::OptionNotFound {
            dropdown: "user role",
            label: cfg.role_label.clone(),
        })?;
        tracing::debug!(module = %module.value, role = %role.value, "dropdown options resolved");

        // 5. module
        fill(page, "module selection", &sel.module_select, &module.value).await?;
        page.dispatch_event(&sel.module_select, "change").await?;
        tokio::time::sleep(cfg.settle_delay).await;

        // 6-7. role, then drive the postback by hand and wait for the reload
        fill(page, "role selection", &sel.role_select, &role.value).await?;
        self.postback.trigger(page, &sel.role_postback_target).await?;
        bounded("postback after role selection", cfg.navigation_timeout, page.wait_for_navigation()).await?;

        // 8. the year field only exists on the re-rendered form
        poll_until(cfg.field_poll, || async {
            page.exists(&sel.year_select).await.ok().filter(|found| *found)
        })
        .await
        .ok_or(PortalError::YearFieldMissing { attempts: cfg.field_poll.attempts })?;

        // 9. password
        fill(page, "password", &sel.password, &cfg.password).await?;

        // 10-11. the page fills in its own CAPTCHA; copy it over
        let captcha = poll_until(cfg.field_poll, || async {
            let raw = page.read_value(&sel.captcha_source).await.ok()??;
            let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
            (!compact.is_empty()).then_some(compact)
        })
        .await
        .ok_or(PortalError::CaptchaMissing { attempts: cfg.field_poll.attempts })?;
        fill(page, "captcha echo", &sel.captcha_input, &captcha).await?;

        // 12. client-side validators we cannot satisfy
        self.postback.disable_client_validation(page).await?;

        // 13. submit
        page.click(&sel.login_button).await?;
        bounded("login submit", cfg.navigation_timeout, page.wait_for_navigation()).await?;

        // 14. verify and move on to the listing page
        let landed = page.current_url().await.unwrap_or_default();
        if !landed.contains(&cfg.dashboard_path) {
            return Err(PortalError::LoginRejected { url: landed });
        }
        tracing::info!(url = %landed, "Reached the portal dashboard");

        bounded("navigation to the listing page", cfg.navigation_timeout, page.goto(&cfg.target_url)).await?;
        let url = page.current_url().await.unwrap_or_else(|| cfg.target_url.clone());
        Ok(PortalLogin { url })
    }
}

// =============================================================================
//  SCRIPTED PAGE (tests)
// =============================================================================
