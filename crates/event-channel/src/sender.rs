//! Batch encoding and dispatch.

use crate::{
    classify, Batch, BatchId, ChannelResult, ClassificationTable, SendOutcome, Transport,
    TransportRequest,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use event_storage::RecordId;
use futures_util::future::{BoxFuture, FutureExt};
use pipeline_config_and_utils::DEFAULT_INGESTION_URL;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// URL every batch is posted to.
    pub endpoint: String,
    /// Application secret sent as `App-Secret`.
    pub app_secret: Option<String>,
    /// Installation identifier sent as `Install-ID`.
    pub install_id: Option<String>,
    /// Status classification.
    pub classification: ClassificationTable,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_INGESTION_URL.to_string(),
            app_secret: None,
            install_id: None,
            classification: ClassificationTable::default(),
        }
    }
}

impl SenderConfig {
    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(secret) = &self.app_secret {
            headers.push(("App-Secret".to_string(), secret.clone()));
        }
        if let Some(install_id) = &self.install_id {
            headers.push(("Install-ID".to_string(), install_id.clone()));
        }
        headers
    }
}

/// Wire form of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEnvelope {
    pub batch_id: BatchId,
    pub channel: String,
    pub logs: Vec<LogEntry>,
}

/// Wire form of one record. The payload is base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: RecordId,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub timestamp: DateTime<Utc>,
    pub payload: String,
}

impl BatchEnvelope {
    pub fn from_batch(batch: &Batch) -> Self {
        Self {
            batch_id: batch.batch_id.clone(),
            channel: batch.channel.clone(),
            logs: batch
                .records
                .iter()
                .map(|record| LogEntry {
                    id: record.record_id,
                    type_tag: record.type_tag.clone(),
                    timestamp: record.enqueued_at,
                    payload: STANDARD.encode(&record.payload),
                })
                .collect(),
        }
    }

    pub fn encode(&self) -> ChannelResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> ChannelResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn record_ids(&self) -> Vec<RecordId> {
        self.logs.iter().map(|entry| entry.id).collect()
    }
}

/// Result of one dispatch, routed back to the owning channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub channel: String,
    pub batch_id: BatchId,
    pub outcome: SendOutcome,
}

/// Encodes batches, hands them to the transport and classifies the result.
pub struct Sender {
    transport: Arc<dyn Transport>,
    config: SenderConfig,
}

impl Sender {
    pub fn new(transport: Arc<dyn Transport>, config: SenderConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Build the request for a batch.
    pub fn prepare(&self, batch: &Batch) -> ChannelResult<TransportRequest> {
        let body = BatchEnvelope::from_batch(batch).encode()?;
        Ok(TransportRequest {
            endpoint: self.config.endpoint.clone(),
            body,
            headers: self.config.headers(),
        })
    }

    /// Send a batch. The returned future owns everything it needs and always
    /// resolves to a classified outcome.
    pub fn dispatch(&self, batch: &Batch) -> BoxFuture<'static, DispatchReport> {
        let channel = batch.channel.clone();
        let batch_id = batch.batch_id.clone();

        let request = match self.prepare(batch) {
            Ok(request) => request,
            Err(e) => {
                error!(channel = %channel, batch_id = %batch_id, error = %e, "Failed to encode batch");
                let report = DispatchReport {
                    channel,
                    batch_id,
                    outcome: SendOutcome::FatalFailure(format!("encode failed: {}", e)),
                };
                return futures_util::future::ready(report).boxed();
            }
        };

        let transport = self.transport.clone();
        let table = self.config.classification.clone();
        let record_count = batch.len();

        async move {
            debug!(channel = %channel, batch_id = %batch_id, record_count, "Sending batch");
            let result = transport.send(request).await;
            let outcome = classify(&result, &table);
            DispatchReport {
                channel,
                batch_id,
                outcome,
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ScriptedTransport, TransportResult};
    use event_storage::EventRecord;

    fn batch() -> Batch {
        Batch {
            batch_id: "batch-1".to_string(),
            channel: "logs".to_string(),
            records: (1..=3)
                .map(|id| EventRecord {
                    channel: "logs".to_string(),
                    record_id: id,
                    type_tag: "event".to_string(),
                    payload: format!("payload-{}", id).into_bytes(),
                    enqueued_at: Utc::now(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_envelope_shape() {
        let body = BatchEnvelope::from_batch(&batch()).encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["batchId"], "batch-1");
        assert_eq!(json["channel"], "logs");
        assert_eq!(json["logs"][0]["id"], 1);
        assert_eq!(json["logs"][0]["type"], "event");
        assert_eq!(json["logs"][2]["payload"], STANDARD.encode("payload-3"));
    }

    #[test]
    fn test_default_endpoint_matches_config_default() {
        let config = pipeline_config_and_utils::Config::default();
        assert_eq!(SenderConfig::default().endpoint, config.ingestion_url);
    }

    #[test]
    fn test_headers() {
        let transport = Arc::new(ScriptedTransport::new());
        let sender = Sender::new(
            transport,
            SenderConfig {
                endpoint: "http://localhost/logs".to_string(),
                app_secret: Some("secret".to_string()),
                install_id: Some("install-1".to_string()),
                ..Default::default()
            },
        );

        let request = sender.prepare(&batch()).unwrap();
        assert_eq!(request.endpoint, "http://localhost/logs");
        assert!(request
            .headers
            .contains(&("App-Secret".to_string(), "secret".to_string())));
        assert!(request
            .headers
            .contains(&("Install-ID".to_string(), "install-1".to_string())));
        assert_eq!(
            BatchEnvelope::decode(&request.body).unwrap().record_ids(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn test_dispatch_classifies_result() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(TransportResult::Status(429));
        transport.push_response(TransportResult::Status(400));
        let sender = Sender::new(transport.clone(), SenderConfig::default());

        let report = sender.dispatch(&batch()).await;
        assert_eq!(report.batch_id, "batch-1");
        assert_eq!(
            report.outcome,
            SendOutcome::RecoverableFailure("HTTP 429".to_string())
        );

        let report = sender.dispatch(&batch()).await;
        assert!(matches!(report.outcome, SendOutcome::FatalFailure(_)));

        let report = sender.dispatch(&batch()).await;
        assert!(report.outcome.is_success());
        assert_eq!(transport.request_count(), 3);
    }
}
