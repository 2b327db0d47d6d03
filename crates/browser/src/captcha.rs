//! Captcha sub-state-machine (spec.md §4.E): detect which kind of
//! challenge is blocking the page, then either solve it via a configured
//! solver service, wait out a Cloudflare interstitial, or report failure
//! so the pipeline advances to proxy rotation.

use std::time::Duration;

use crate::driver::{BrowserDriver, SessionId};
use crate::stealth::CAPTCHA_SELECTORS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaKind {
    Recaptcha,
    Hcaptcha,
    Cloudflare,
    None,
}

/// Third-party solver service credentials. Submission/polling against a
/// real service (2captcha, anticaptcha, ...) is out of scope here — no
/// such credentials are available in this environment — so `solve` below
/// documents the call shape and always reports `Unsupported` rather than
/// fabricating a response.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    pub service_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptchaOutcome {
    Solved,
    Waited,
    NotConfigured,
    Unsupported,
    Failed(String),
}

const CLOUDFLARE_WAIT_POLLS: u32 = 30;
const CLOUDFLARE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Scan the page for known challenge selectors and classify which kind is
/// present, if any. `CAPTCHA_SELECTORS` is `[g-recaptcha, recaptcha iframe,
/// hcaptcha iframe, cf-challenge-stage, cf-browser-verification]`.
pub async fn detect(
    driver: &dyn BrowserDriver,
    session: SessionId,
) -> Result<CaptchaKind, crate::driver::DriverError> {
    let present = driver.detect_selectors(session, CAPTCHA_SELECTORS).await?;
    if present.is_empty() {
        return Ok(CaptchaKind::None);
    }
    if present
        .iter()
        .any(|s| s.contains("cf-challenge") || s.contains("cf-browser"))
    {
        return Ok(CaptchaKind::Cloudflare);
    }
    if present.iter().any(|s| s.contains("hcaptcha")) {
        return Ok(CaptchaKind::Hcaptcha);
    }
    Ok(CaptchaKind::Recaptcha)
}

/// Attempt to clear the detected challenge. Cloudflare is handled by
/// polling; reCAPTCHA/hCaptcha require a configured solver service and are
/// otherwise reported `Unsupported` so the caller treats the proxy as
/// burned and advances the retry ladder (spec.md §4.E step 4).
pub async fn handle(
    driver: &dyn BrowserDriver,
    session: SessionId,
    kind: CaptchaKind,
    solver: Option<&SolverConfig>,
) -> CaptchaOutcome {
    match kind {
        CaptchaKind::None => CaptchaOutcome::Solved,
        CaptchaKind::Cloudflare => wait_for_cloudflare(driver, session).await,
        CaptchaKind::Recaptcha | CaptchaKind::Hcaptcha => {
            if solver.is_none() {
                return CaptchaOutcome::NotConfigured;
            }
            CaptchaOutcome::Unsupported
        }
    }
}

async fn wait_for_cloudflare(driver: &dyn BrowserDriver, session: SessionId) -> CaptchaOutcome {
    for _ in 0..CLOUDFLARE_WAIT_POLLS {
        match driver.detect_selectors(session, CAPTCHA_SELECTORS).await {
            Ok(present) if present.iter().all(|s| !s.contains("cf-")) => {
                return CaptchaOutcome::Waited;
            }
            Ok(_) => {}
            Err(e) => return CaptchaOutcome::Failed(e.to_string()),
        }
        tokio::time::sleep(CLOUDFLARE_POLL_INTERVAL).await;
    }
    CaptchaOutcome::Failed("cloudflare challenge did not clear in time".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_cloudflare_selector_group() {
        let present = vec!["#cf-challenge-stage".to_string()];
        assert!(present.iter().any(|s| s.contains("cf-challenge")));
    }
}
