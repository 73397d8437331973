//! Network transport seam.

use crate::{ChannelResult, TransportResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tracing::debug;

/// One encoded batch ready to be posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub endpoint: String,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

/// Delivers requests and reports what happened. Never retries.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> TransportResult;
}

/// HTTP transport backed by `reqwest`.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> ChannelResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> TransportResult {
        let TransportRequest {
            endpoint,
            body,
            headers,
        } = request;

        let mut builder = self.client.post(&endpoint).body(body);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                debug!(endpoint = %endpoint, status, "Ingestion response");
                TransportResult::Status(status)
            }
            Err(e) => {
                debug!(endpoint = %endpoint, error = %e, "Ingestion request failed");
                TransportResult::NetworkError(e.to_string())
            }
        }
    }
}

/// Transport that answers from a script and records every request.
///
/// Queued results are used in order, then the default. While held, sends
/// wait until [`ScriptedTransport::release`]. In manual mode each send waits
/// for its own [`ScriptedTransport::answer`], so replies can come back in
/// any order.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<TransportResult>>,
    default_response: Mutex<TransportResult>,
    requests: Mutex<Vec<TransportRequest>>,
    held: Mutex<bool>,
    released: Notify,
    manual: Mutex<bool>,
    answers: Mutex<HashMap<usize, oneshot::Sender<TransportResult>>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default_response: Mutex::new(TransportResult::Status(200)),
            requests: Mutex::new(Vec::new()),
            held: Mutex::new(false),
            released: Notify::new(),
            manual: Mutex::new(false),
            answers: Mutex::new(HashMap::new()),
        }
    }

    /// Queue a result for the next unanswered send.
    pub fn push_response(&self, result: TransportResult) {
        self.responses.lock().push_back(result);
    }

    /// Result used once the queue is empty.
    pub fn set_default(&self, result: TransportResult) {
        *self.default_response.lock() = result;
    }

    pub fn hold(&self) {
        *self.held.lock() = true;
    }

    pub fn release(&self) {
        *self.held.lock() = false;
        self.released.notify_waiters();
    }

    /// Leave every later send unanswered until it is picked by index.
    pub fn answer_manually(&self) {
        *self.manual.lock() = true;
    }

    /// Resolve the send that arrived `index`-th, counting from zero.
    /// Returns false if that send is not waiting.
    pub fn answer(&self, index: usize, result: TransportResult) -> bool {
        let waiting = self.answers.lock().remove(&index);
        match waiting {
            Some(reply) => reply.send(result).is_ok(),
            None => false,
        }
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> TransportResult {
        let index = {
            let mut requests = self.requests.lock();
            requests.push(request);
            requests.len() - 1
        };

        let manual = *self.manual.lock();
        if manual {
            let (reply, answer) = oneshot::channel();
            self.answers.lock().insert(index, reply);
            return answer
                .await
                .unwrap_or_else(|_| TransportResult::NetworkError("request abandoned".to_string()));
        }

        loop {
            let released = self.released.notified();
            let held = *self.held.lock();
            if !held {
                break;
            }
            released.await;
        }

        let queued = self.responses.lock().pop_front();
        match queued {
            Some(result) => result,
            None => self.default_response.lock().clone(),
        }
    }
}
