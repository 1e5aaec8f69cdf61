//! Loopback HTTP surface for the 2FA coordinator
//!
//! Serves three endpoints on 127.0.0.1 (binding anywhere else is refused
//! at construction time):
//!
//! - `GET  /`       - HTML page that polls `/status` and submits the code
//! - `GET  /status` - JSON `{state, message}`
//! - `POST /request` - asks the cloud to resend a code (1 per 30 s)
//! - `POST /submit`  - body `{code}`; 6 ASCII digits or 400
//!
//! The server exists only while a 2FA exchange is in progress; the
//! [`TwoFactorCoordinator::obtain_code`] façade starts it, blocks until a
//! terminal state, and tears it down.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use iphoto_core::config::PortRange;
use iphoto_core::ports::cloud_session::{CloudError, RequestOutcome, VerifyOutcome};

use crate::rate_limit::{RequestThrottle, SubmitLimiter};
use crate::state::{AuthState, StateMachine, StateSnapshot};

/// Budget for a single HTTP request, including any cloud round trip.
const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default overall budget for obtaining a code.
pub const OBTAIN_CODE_TIMEOUT: Duration = Duration::from_secs(300);

// ============================================================================
// Errors and capabilities
// ============================================================================

/// Errors raised while standing the web server up
#[derive(Debug, Error)]
pub enum AuthError {
    /// The configured bind address is not a loopback address
    #[error("Refusing to bind 2FA server to non-loopback address {0}")]
    NonLoopbackBind(IpAddr),

    /// Every port in the configured range was taken
    #[error("No free port for the 2FA server in range {start}-{end}")]
    NoPortAvailable {
        /// First port tried
        start: u16,
        /// Last port tried
        end: u16,
    },

    /// The server failed after startup
    #[error("2FA web server error: {0}")]
    Server(String),
}

/// Why `obtain_code` returned without a code
#[derive(Debug, Error)]
pub enum ObtainFailure {
    /// No code was accepted within the allotted time
    #[error("Timed out waiting for a 2FA code")]
    TimedOut,

    /// The exchange was cancelled from outside (shutdown)
    #[error("2FA exchange cancelled")]
    Cancelled,

    /// The web server could not be started or died
    #[error(transparent)]
    Server(#[from] AuthError),
}

/// Capabilities the coordinator needs from the cloud session
///
/// Supplied by the caller so this crate never depends on the concrete
/// cloud adapter.
#[async_trait::async_trait]
pub trait TwoFactorGateway: Send + Sync {
    /// Asks the service to push a fresh code to the user's devices
    async fn request_code(&self) -> Result<RequestOutcome, CloudError>;

    /// Submits a code for verification
    async fn verify_code(&self, code: &str) -> Result<VerifyOutcome, CloudError>;
}

// ============================================================================
// Shared server state
// ============================================================================

struct Inner {
    machine: Mutex<StateMachine>,
    state_tx: watch::Sender<StateSnapshot>,
    gateway: Arc<dyn TwoFactorGateway>,
    submits: SubmitLimiter,
    requests: RequestThrottle,
}

impl Inner {
    /// Runs one serialized transition and publishes the new snapshot.
    fn with_machine<R>(&self, f: impl FnOnce(&mut StateMachine) -> R) -> R {
        let mut machine = self.machine.lock().unwrap_or_else(|e| e.into_inner());
        let result = f(&mut machine);
        let _ = self.state_tx.send(machine.snapshot());
        result
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Builds and runs the 2FA web server
pub struct TwoFactorCoordinator {
    bind_addr: IpAddr,
    ports: PortRange,
}

impl TwoFactorCoordinator {
    /// Creates a coordinator bound to a loopback address.
    ///
    /// # Errors
    /// [`AuthError::NonLoopbackBind`] when `bind_addr` is not loopback;
    /// binding the 2FA page to anything reachable from the network is
    /// never acceptable.
    pub fn new(bind_addr: IpAddr, ports: PortRange) -> Result<Self, AuthError> {
        if !bind_addr.is_loopback() {
            return Err(AuthError::NonLoopbackBind(bind_addr));
        }
        Ok(Self { bind_addr, ports })
    }

    /// Starts the web server on the first free port in the range.
    pub async fn start(
        &self,
        gateway: Arc<dyn TwoFactorGateway>,
    ) -> Result<RunningCoordinator, AuthError> {
        let listener = self.bind_first_free().await?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AuthError::Server(format!("Cannot read local address: {}", e)))?;

        let machine = StateMachine::new();
        let (state_tx, state_rx) = watch::channel(machine.snapshot());
        let inner = Arc::new(Inner {
            machine: Mutex::new(machine),
            state_tx,
            gateway,
            submits: SubmitLimiter::new(),
            requests: RequestThrottle::new(),
        });

        inner.with_machine(|m| m.start());

        let shutdown = CancellationToken::new();
        let server_inner = inner.clone();
        let server_shutdown = shutdown.clone();
        let task = tokio::spawn(async move {
            serve(listener, server_inner, server_shutdown).await;
        });

        let url = format!("http://{}:{}/", local_addr.ip(), local_addr.port());
        info!(url = %url, "2FA web server listening");

        Ok(RunningCoordinator {
            url,
            inner,
            state_rx,
            shutdown,
            task,
        })
    }

    /// Full exchange: start the server, optionally open the browser, wait
    /// for a terminal state, and tear the server down.
    ///
    /// Returns the accepted code; verification has already happened
    /// through the gateway by the time this returns.
    pub async fn obtain_code(
        &self,
        gateway: Arc<dyn TwoFactorGateway>,
        timeout: Duration,
        open_browser: bool,
    ) -> Result<String, ObtainFailure> {
        let running = self.start(gateway).await?;

        if open_browser {
            // Best effort; headless hosts simply log and move on.
            if let Err(e) = webbrowser::open(running.url()) {
                debug!(error = %e, "Could not open browser for 2FA page");
            }
        }

        let result = running.wait(timeout).await;
        running.shutdown().await;
        result
    }

    async fn bind_first_free(&self) -> Result<TcpListener, AuthError> {
        for port in self.ports.iter() {
            let addr = SocketAddr::new(self.bind_addr, port);
            match TcpListener::bind(addr).await {
                Ok(listener) => return Ok(listener),
                Err(e) => {
                    debug!(port, error = %e, "2FA port unavailable, trying next");
                }
            }
        }
        Err(AuthError::NoPortAvailable {
            start: self.ports.start,
            end: self.ports.end,
        })
    }
}

/// A started 2FA web server
pub struct RunningCoordinator {
    url: String,
    inner: Arc<Inner>,
    state_rx: watch::Receiver<StateSnapshot>,
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl RunningCoordinator {
    /// URL of the web interface (loopback)
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Blocks until a terminal state, applying the overall timeout.
    pub async fn wait(&self, timeout: Duration) -> Result<String, ObtainFailure> {
        let mut rx = self.state_rx.clone();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            let state = rx.borrow_and_update().state;
            match state {
                AuthState::Success => {
                    let code = self
                        .inner
                        .with_machine(|m| m.accepted_code().map(|c| c.to_string()));
                    return code.ok_or_else(|| {
                        AuthError::Server("Success state without a code".to_string()).into()
                    });
                }
                AuthState::Failed => return Err(ObtainFailure::TimedOut),
                AuthState::Cancelled => return Err(ObtainFailure::Cancelled),
                _ => {}
            }

            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(ObtainFailure::Cancelled);
                    }
                }
                _ = &mut deadline => {
                    self.inner.with_machine(|m| m.timeout());
                    return Err(ObtainFailure::TimedOut);
                }
            }
        }
    }

    /// Cancels the exchange from outside (engine shutdown).
    pub fn cancel(&self) {
        self.inner.with_machine(|m| m.cancel());
    }

    /// Stops the listener and waits for the accept loop to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "2FA server task join failed");
        }
    }
}

// ============================================================================
// HTTP plumbing
// ============================================================================

async fn serve(listener: TcpListener, inner: Arc<Inner>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("2FA server accept loop stopping");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "2FA server accept failed");
                        continue;
                    }
                };

                let io = TokioIo::new(stream);
                let conn_inner = inner.clone();
                let service = service_fn(move |req: Request<Incoming>| {
                    let inner = conn_inner.clone();
                    async move { handle_with_timeout(req, peer.ip(), inner).await }
                });

                tokio::spawn(async move {
                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        debug!(error = %e, "2FA connection error");
                    }
                });
            }
        }
    }
}

async fn handle_with_timeout(
    req: Request<Incoming>,
    peer: IpAddr,
    inner: Arc<Inner>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    match tokio::time::timeout(ENDPOINT_TIMEOUT, handle(req, peer, inner.clone())).await {
        Ok(response) => response,
        Err(_) => {
            // A verify dropped mid-flight must not wedge the machine in
            // Validating; surface the timeout and allow a resubmission.
            inner.with_machine(|m| m.code_rejected("Verification timed out, try again"));
            Ok(plain_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "Request timed out",
            ))
        }
    }
}

async fn handle(
    req: Request<Incoming>,
    peer: IpAddr,
    inner: Arc<Inner>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!(%method, %path, "2FA server request");

    let response = match (method, path.as_str()) {
        (Method::GET, "/") => html_response(INDEX_HTML),
        (Method::GET, "/status") => {
            let snapshot = inner.with_machine(|m| m.snapshot());
            json_response(StatusCode::OK, &snapshot)
        }
        (Method::POST, "/request") => handle_request_code(inner).await,
        (Method::POST, "/submit") => handle_submit(req, peer, inner).await?,
        _ => plain_response(StatusCode::NOT_FOUND, "Not found"),
    };

    Ok(response)
}

async fn handle_request_code(inner: Arc<Inner>) -> Response<Full<Bytes>> {
    if !inner.requests.allow() {
        return plain_response(
            StatusCode::TOO_MANY_REQUESTS,
            "A code was requested less than 30 seconds ago",
        );
    }

    if !inner.with_machine(|m| m.begin_request()) {
        return plain_response(StatusCode::CONFLICT, "Cannot request a code right now");
    }

    match inner.gateway.request_code().await {
        Ok(RequestOutcome::Ok) => {
            inner.with_machine(|m| m.request_accepted());
            plain_response(StatusCode::OK, "Code requested")
        }
        Ok(RequestOutcome::RateLimited) => {
            inner.with_machine(|m| m.request_rejected("The cloud service is rate limiting code requests"));
            plain_response(StatusCode::TOO_MANY_REQUESTS, "Rate limited by the cloud service")
        }
        Ok(RequestOutcome::ServiceUnavailable) | Err(_) => {
            inner.with_machine(|m| m.request_rejected("The cloud service is unavailable"));
            plain_response(StatusCode::BAD_GATEWAY, "Cloud service unavailable")
        }
    }
}

/// Body shape for `POST /submit`
#[derive(Debug, Deserialize)]
struct SubmitBody {
    code: String,
}

async fn handle_submit(
    req: Request<Incoming>,
    peer: IpAddr,
    inner: Arc<Inner>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    if !inner.submits.allow(peer) {
        return Ok(plain_response(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many submissions, wait a minute",
        ));
    }

    let body = req.into_body().collect().await?.to_bytes();
    let Ok(submit) = serde_json::from_slice::<SubmitBody>(&body) else {
        return Ok(plain_response(StatusCode::BAD_REQUEST, "Body must be JSON {\"code\": \"nnnnnn\"}"));
    };

    // Format validation happens before any state change.
    if submit.code.len() != 6 || !submit.code.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(plain_response(
            StatusCode::BAD_REQUEST,
            "Code must be exactly 6 digits",
        ));
    }

    if !inner.with_machine(|m| m.begin_validation()) {
        return Ok(plain_response(
            StatusCode::CONFLICT,
            "A verification is already in progress",
        ));
    }

    match inner.gateway.verify_code(&submit.code).await {
        Ok(VerifyOutcome::Ok) => {
            inner.with_machine(|m| m.code_accepted(&submit.code));
            Ok(plain_response(StatusCode::OK, "Code accepted"))
        }
        Ok(VerifyOutcome::CodeInvalid) => {
            inner.with_machine(|m| m.code_rejected("Code rejected, try again"));
            Ok(plain_response(StatusCode::UNAUTHORIZED, "Code rejected"))
        }
        Ok(VerifyOutcome::ServiceUnavailable) | Err(_) => {
            inner.with_machine(|m| m.code_rejected("The cloud service is unavailable"));
            Ok(plain_response(StatusCode::BAD_GATEWAY, "Cloud service unavailable"))
        }
    }
}

// ============================================================================
// Response helpers
// ============================================================================

// Builders below only carry static, known-valid parts; construction
// cannot fail.

fn html_response(html: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/html; charset=utf-8")
        .body(Full::new(Bytes::from(html)))
        .unwrap()
}

fn json_response(status: StatusCode, payload: &impl serde::Serialize) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(payload).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn plain_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(message.to_string())))
        .unwrap()
}

/// The single-page web interface. Polls `/status` every 2 seconds.
const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Two-Factor Authentication</title>
  <style>
    body { font-family: sans-serif; max-width: 26rem; margin: 4rem auto; }
    input { font-size: 1.4rem; letter-spacing: .4rem; width: 9rem; }
    #message { margin: 1rem 0; color: #444; }
    button { margin-right: .5rem; }
  </style>
</head>
<body>
  <h1>Enter your verification code</h1>
  <p id="message">Loading&hellip;</p>
  <form id="code-form">
    <input id="code" inputmode="numeric" pattern="[0-9]{6}" maxlength="6" autofocus>
    <button type="submit">Verify</button>
    <button type="button" id="resend">Request new code</button>
  </form>
  <script>
    async function poll() {
      try {
        const res = await fetch('/status');
        const body = await res.json();
        document.getElementById('message').textContent = body.message;
        if (body.state === 'success') {
          document.getElementById('code-form').style.display = 'none';
        }
      } catch (e) { /* server gone: exchange finished */ }
    }
    setInterval(poll, 2000);
    poll();

    document.getElementById('code-form').addEventListener('submit', async (ev) => {
      ev.preventDefault();
      const code = document.getElementById('code').value;
      await fetch('/submit', {
        method: 'POST',
        headers: {'Content-Type': 'application/json'},
        body: JSON.stringify({code})
      });
      poll();
    });

    document.getElementById('resend').addEventListener('click', async () => {
      await fetch('/request', {method: 'POST'});
      poll();
    });
  </script>
</body>
</html>
"#;
