//! Browser session
//!
//! One isolated chromium instance per place attempt, driven over CDP. The
//! session owns the event-handler loop, request interception (resource
//! blocking and proxy authentication) and passive capture of the review
//! payloads the page fetches for itself. Nothing here knows about places
//! or reviews; the driver supplies the navigation and the scripts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EnableParams as FetchEnableParams, EventAuthRequired,
    EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, EventResponseReceived, GetResponseBodyParams, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::SessionConfig;

use super::proxy::ProxyEndpoint;
use super::PlaceError;

/// Response URLs worth capturing: the endpoints the reviews UI pulls its
/// structured data from.
const CAPTURE_URL_MARKERS: &[&str] = &["listugcposts", "listreviews", "/_/LocalReviewsUi/"];

/// Third-party hosts whose requests never contribute to review content.
const BLOCKED_HOST_MARKERS: &[&str] = &[
    "doubleclick.net",
    "googlesyndication.com",
    "adservice.google",
    "google-analytics.com",
    "googletagmanager.com",
];

/// New documents get this before any page script runs: popup suppression
/// keeps the flow inside the one tab the driver controls.
const INIT_SCRIPT: &str = r#"
    window.open = function() { return null; };
    document.addEventListener('click', function(e) {
        const a = e.target && e.target.closest ? e.target.closest('a[target=_blank]') : null;
        if (a) { a.removeAttribute('target'); }
    }, true);
"#;

/// Whether a paused request should be aborted instead of continued.
/// Images stay allowed; photo thumbnails are part of the extracted data.
fn should_block(resource_type: &ResourceType, url: &str) -> bool {
    if matches!(
        resource_type,
        ResourceType::Media
            | ResourceType::Font
            | ResourceType::TextTrack
            | ResourceType::EventSource
            | ResourceType::Manifest
    ) {
        return true;
    }
    BLOCKED_HOST_MARKERS.iter().any(|h| url.contains(h))
}

fn is_capture_url(url: &str) -> bool {
    CAPTURE_URL_MARKERS.iter().any(|m| url.contains(m))
}

/// One live browser with a single page, plus the background tasks that
/// keep it serviced. Dropped state is unrecoverable; the retry controller
/// always launches a fresh session.
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    tasks: Vec<JoinHandle<()>>,
    captured: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl BrowserSession {
    /// Launch a fresh chromium instance, optionally routed through a
    /// proxy, with interception and payload capture armed before any
    /// navigation happens.
    pub async fn launch(
        config: &SessionConfig,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<Self, PlaceError> {
        let mut builder = BrowserConfig::builder()
            .window_size(config.viewport_width, config.viewport_height)
            .no_sandbox()
            .arg("--disable-blink-features=AutomationControlled");
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(exe) = &config.executable {
            builder = builder.chrome_executable(exe);
        }
        if let Some(endpoint) = proxy {
            builder = builder.arg(format!("--proxy-server={}", endpoint.server_arg()));
        }
        let browser_config = builder.build().map_err(PlaceError::Launch)?;

        let (browser, mut handler) = Browser::launch(browser_config).await?;

        let closed = Arc::new(AtomicBool::new(false));
        let mut tasks = Vec::new();
        {
            let closed = Arc::clone(&closed);
            tasks.push(tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if let Err(e) = event {
                        debug!(error = %e, "browser handler event error");
                    }
                }
                closed.store(true, Ordering::SeqCst);
            }));
        }

        let page = browser.new_page("about:blank").await?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(INIT_SCRIPT))
            .await?;

        let captured = Arc::new(Mutex::new(Vec::new()));
        tasks.push(spawn_capture_task(&page, Arc::clone(&captured)).await?);

        let needs_auth = proxy.map(ProxyEndpoint::has_credentials).unwrap_or(false);
        if config.block_resources || needs_auth {
            tasks.extend(
                arm_interception(&page, config.block_resources, needs_auth.then(|| {
                    // has_credentials implies username is present
                    let p = proxy.unwrap();
                    (p.username.clone().unwrap_or_default(), p.password.clone())
                }))
                .await?,
            );
        }

        Ok(Self {
            browser,
            page,
            tasks,
            captured,
            closed,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// True once the CDP transport has dropped.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Structured review payloads captured so far, oldest first.
    pub async fn captured_payloads(&self) -> Vec<String> {
        self.captured.lock().await.clone()
    }

    /// Graceful shutdown; safe to call on a session whose transport
    /// already died.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!(error = %e, "browser close failed");
        }
        let _ = self.browser.wait().await;
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Mirror review-data responses into `captured` as they arrive. The body
/// fetch is delayed slightly; CDP rejects body reads while the response
/// is still streaming.
async fn spawn_capture_task(
    page: &Page,
    captured: Arc<Mutex<Vec<String>>>,
) -> Result<JoinHandle<()>, PlaceError> {
    let mut responses = page.event_listener::<EventResponseReceived>().await?;
    let page = page.clone();
    Ok(tokio::spawn(async move {
        while let Some(event) = responses.next().await {
            if !is_capture_url(&event.response.url) {
                continue;
            }
            let request_id = event.request_id.clone();
            let page = page.clone();
            let captured = Arc::clone(&captured);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                match page.execute(GetResponseBodyParams::new(request_id)).await {
                    Ok(body) => {
                        if body.result.base64_encoded {
                            debug!("skipping base64-encoded review payload");
                        } else {
                            captured.lock().await.push(body.result.body.clone());
                        }
                    }
                    Err(e) => debug!(error = %e, "review payload body unavailable"),
                }
            });
        }
    }))
}

/// Enable the CDP fetch domain and service paused requests and auth
/// challenges for the lifetime of the page.
async fn arm_interception(
    page: &Page,
    block_resources: bool,
    credentials: Option<(String, Option<String>)>,
) -> Result<Vec<JoinHandle<()>>, PlaceError> {
    let mut paused = page.event_listener::<EventRequestPaused>().await?;
    let mut auth_events = page.event_listener::<EventAuthRequired>().await?;

    page.execute(FetchEnableParams {
        patterns: None,
        handle_auth_requests: Some(credentials.is_some()),
    })
    .await?;

    let mut tasks = Vec::new();

    {
        let page = page.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let blocked =
                    block_resources && should_block(&event.resource_type, &event.request.url);
                let result = if blocked {
                    page.execute(FailRequestParams::new(
                        event.request_id.clone(),
                        ErrorReason::BlockedByClient,
                    ))
                    .await
                    .map(|_| ())
                } else {
                    page.execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ())
                };
                if let Err(e) = result {
                    debug!(error = %e, "request interception response failed");
                }
            }
        }));
    }

    if let Some((username, password)) = credentials {
        let page = page.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = auth_events.next().await {
                let response = AuthChallengeResponse {
                    response: AuthChallengeResponseResponse::ProvideCredentials,
                    username: Some(username.clone()),
                    password: password.clone(),
                };
                if let Err(e) = page
                    .execute(ContinueWithAuthParams::new(
                        event.request_id.clone(),
                        response,
                    ))
                    .await
                {
                    warn!(error = %e, "proxy auth challenge response failed");
                }
            }
        }));
    }

    Ok(tasks)
}
