//! Webhook delivery client.
//!
//! Issues `POST <timer url>` with an empty body and classifies the outcome:
//!
//! - 2xx: delivered.
//! - 429, a status of 0, and 5xx other than 501: retryable.
//! - Any other status: permanent.
//! - Transport errors: retryable, except redirect exhaustion, an
//!   unsupported scheme, and a TLS certificate from an unknown issuer,
//!   which are permanent. Expired or wrong-host certificates stay
//!   retryable.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use rustls::CertificateError;
use tracing::debug;

use crate::config::DeliveryConfig;
use crate::models::Timer;
use crate::timer::WebhookShooter;
use crate::{AppError, Result};

/// Trust failures reported as text by platform verifiers.
static UNTRUSTED_CERT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)unknown ?issuer|unknown authority|certificate is not trusted|self[- ]signed certificate")
        .ok()
});

/// Failed webhook call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The call may succeed later.
    Retryable(String),
    /// Retrying cannot help.
    Permanent(String),
}

impl DeliveryError {
    /// Whether the broker should try again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

impl Display for DeliveryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retryable(msg) => write!(f, "retryable delivery failure: {msg}"),
            Self::Permanent(msg) => write!(f, "permanent delivery failure: {msg}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Classify an HTTP status code.
///
/// # Errors
///
/// Returns the failure class for every status outside 2xx.
pub fn classify_status(status: u16) -> std::result::Result<(), DeliveryError> {
    match status {
        200..=299 => Ok(()),
        429 => Err(DeliveryError::Retryable("unexpected HTTP status 429".into())),
        501 => Err(DeliveryError::Permanent("unexpected HTTP status 501".into())),
        0 | 500.. => Err(DeliveryError::Retryable(format!(
            "unexpected HTTP status {status}"
        ))),
        _ => Err(DeliveryError::Permanent(format!(
            "unexpected HTTP status {status}"
        ))),
    }
}

/// Whether `err` or any error in its source chain reports a certificate
/// whose issuer cannot be trusted.
///
/// Expired, not-yet-valid, and wrong-host certificates are not trust
/// failures and yield `false`.
#[must_use]
pub fn is_untrusted_certificate(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(source) = current {
        if let Some(tls) = source.downcast_ref::<rustls::Error>() {
            return matches!(
                tls,
                rustls::Error::InvalidCertificate(
                    CertificateError::UnknownIssuer | CertificateError::BadSignature
                )
            );
        }
        // io::Error::source() skips the wrapped error.
        if let Some(inner) = source
            .downcast_ref::<std::io::Error>()
            .and_then(std::io::Error::get_ref)
        {
            if is_untrusted_certificate(inner) {
                return true;
            }
        }
        if UNTRUSTED_CERT
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(&source.to_string()))
        {
            return true;
        }
        current = source.source();
    }
    false
}

/// Classify a transport error.
#[must_use]
pub fn classify_transport_error(err: &reqwest::Error) -> DeliveryError {
    if err.is_redirect() {
        return DeliveryError::Permanent(format!("redirect limit exhausted: {err}"));
    }
    if err.is_builder() {
        return DeliveryError::Permanent(format!("unsupported request: {err}"));
    }
    if is_untrusted_certificate(err) {
        return DeliveryError::Permanent(format!("certificate not trusted: {err}"));
    }
    DeliveryError::Retryable(err.to_string())
}

/// HTTP client for timer webhooks.
#[derive(Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
}

impl WebhookClient {
    /// Build a client with the configured timeout and redirect limit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Http` if the TLS backend cannot be initialised.
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .redirect(Policy::limited(config.max_redirects))
            .build()
            .map_err(|err| AppError::Http(format!("failed to build webhook client: {err}")))?;
        Ok(Self { http })
    }

    /// Call the webhook of `timer`.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] classified as described in the module
    /// documentation.
    pub async fn shoot(&self, timer: &Timer) -> std::result::Result<(), DeliveryError> {
        let url = timer.url();
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DeliveryError::Permanent(format!(
                "unsupported protocol scheme {:?}",
                url.scheme()
            )));
        }

        let response = self
            .http
            .post(url.as_str())
            .body(Vec::new())
            .send()
            .await
            .map_err(|err| classify_transport_error(&err))?;

        let status: StatusCode = response.status();
        debug!(timer_id = timer.id(), status = status.as_u16(), "webhook responded");
        classify_status(status.as_u16())
    }
}

impl WebhookShooter for WebhookClient {
    fn shoot<'a>(
        &'a self,
        timer: &'a Timer,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), DeliveryError>> + Send + 'a>> {
        Box::pin(WebhookClient::shoot(self, timer))
    }
}
