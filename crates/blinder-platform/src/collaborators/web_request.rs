//! Web request collaborator.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::{debug, warn};
use url::Url;

use crate::executor::Executor;

/// Network-level outcome of a request, as numeric codes script understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkStatus {
    #[default]
    Ok,
    Failure,
    MalformedUri,
    UnknownProtocol,
    UnknownHost,
    ConnectionRefused,
    Timeout,
}

impl NetworkStatus {
    pub fn code(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::Failure => 0x8000_4005,
            Self::MalformedUri => 0x804b_000a,
            Self::ConnectionRefused => 0x804b_000d,
            Self::Timeout => 0x804b_000e,
            Self::UnknownProtocol => 0x804b_0012,
            Self::UnknownHost => 0x804b_001e,
        }
    }
}

/// Result of a GET request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerResponse {
    pub status: NetworkStatus,
    pub response_status: u16,
    pub response_headers: Vec<(String, String)>,
    pub response_text: String,
}

impl ServerResponse {
    pub fn failed(status: NetworkStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }
}

pub type ResponseCallback = Box<dyn FnOnce(ServerResponse) + Send + 'static>;

/// Asynchronous HTTP GET.
pub trait WebRequest: Send + Sync {
    fn get(&self, url: &str, headers: Vec<(String, String)>, done: ResponseCallback);
}

/// Blocking `reqwest` on the executor.
pub struct DefaultWebRequest {
    executor: Arc<dyn Executor>,
    client: Arc<OnceLock<reqwest::blocking::Client>>,
    timeout: Duration,
}

impl DefaultWebRequest {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            client: Arc::new(OnceLock::new()),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Only plain web URLs may be fetched.
fn validate(url: &str) -> Result<Url, NetworkStatus> {
    let parsed = Url::parse(url).map_err(|_| NetworkStatus::MalformedUri)?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(NetworkStatus::UnknownProtocol),
    }
}

fn classify(error: &reqwest::Error) -> NetworkStatus {
    if error.is_timeout() {
        NetworkStatus::Timeout
    } else if error.is_connect() {
        NetworkStatus::ConnectionRefused
    } else if error.is_builder() {
        NetworkStatus::MalformedUri
    } else {
        NetworkStatus::Failure
    }
}

fn fetch(
    client: &reqwest::blocking::Client,
    url: Url,
    headers: &[(String, String)],
) -> ServerResponse {
    let mut request = client.get(url);
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    let response = match request.send() {
        Ok(response) => response,
        Err(error) => {
            warn!(%error, "web request failed");
            return ServerResponse::failed(classify(&error));
        }
    };

    let response_status = response.status().as_u16();
    let response_headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_owned(), value.to_owned()))
        })
        .collect();
    match response.text() {
        Ok(response_text) => ServerResponse {
            status: NetworkStatus::Ok,
            response_status,
            response_headers,
            response_text,
        },
        Err(error) => {
            warn!(%error, "reading response body failed");
            ServerResponse {
                status: classify(&error),
                response_status,
                response_headers,
                response_text: String::new(),
            }
        }
    }
}

impl WebRequest for DefaultWebRequest {
    fn get(&self, url: &str, headers: Vec<(String, String)>, done: ResponseCallback) {
        let target = match validate(url) {
            Ok(target) => target,
            Err(status) => {
                debug!(url, ?status, "rejected web request");
                done(ServerResponse::failed(status));
                return;
            }
        };
        let client = self.client.clone();
        let timeout = self.timeout;
        let task = Box::new(move || {
            let client = client.get_or_init(|| {
                reqwest::blocking::Client::builder()
                    .timeout(timeout)
                    .build()
                    .unwrap_or_else(|error| {
                        warn!(%error, "falling back to default HTTP client");
                        reqwest::blocking::Client::new()
                    })
            });
            done(fetch(client, target, &headers));
        });
        if self.executor.dispatch(task).is_err() {
            debug!(url, "web request dropped: executor stopped");
        }
    }
}
