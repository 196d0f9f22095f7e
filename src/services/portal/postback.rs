// src/services/portal/postback.rs

use async_trait::async_trait;

use super::{PortalError, PortalPage};

/// Site-specific form plumbing kept out of the login sequence.
#[async_trait]
pub trait PostbackDriver: Send + Sync {
    /// Makes the server see a change of `control` and re-render the form.
    async fn trigger(&self, page: &dyn PortalPage, control: &str) -> Result<(), PortalError>;

    /// Stops client-side checks from blocking the login submit.
    async fn disable_client_validation(&self, page: &dyn PortalPage) -> Result<(), PortalError>;
}

const EVENT_TARGET: &str = "#__EVENTTARGET";
const EVENT_ARGUMENT: &str = "#__EVENTARGUMENT";

const ALWAYS_VALID: &str = r#"(() => {
    window.Page_ClientValidate = function () { return true; };
    if (typeof window.Page_IsValid !== 'undefined') { window.Page_IsValid = true; }
    return true;
})()"#;

/// ASP.NET WebForms: fill the hidden postback fields and submit the form
/// ourselves, since `__doPostBack` from the dropdown's onchange does not
/// fire reliably in a headless browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct AspNetPostback;

#[async_trait]
impl PostbackDriver for AspNetPostback {
    async fn trigger(&self, page: &dyn PortalPage, control: &str) -> Result<(), PortalError> {
        if !page.set_value(EVENT_TARGET, control).await? {
            return Err(PortalError::PostbackFieldsMissing(EVENT_TARGET));
        }
        if !page.set_value(EVENT_ARGUMENT, "").await? {
            return Err(PortalError::PostbackFieldsMissing(EVENT_ARGUMENT));
        }
        if !page.submit_form().await? {
            return Err(PortalError::PostbackFieldsMissing("form"));
        }
        tracing::debug!(%control, "postback submitted");
        Ok(())
    }

    async fn disable_client_validation(&self, page: &dyn PortalPage) -> Result<(), PortalError> {
        page.evaluate(ALWAYS_VALID).await?;
        Ok(())
    }
}
