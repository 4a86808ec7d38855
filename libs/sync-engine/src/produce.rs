use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use broker_api::{BrokerBackend, PayloadEncoding, ProduceRequest};

use crate::error::{SyncError, ValidationError};
use crate::notify::{Notifier, Surface};
use crate::settings::ConnectionSettings;

/// Sends one message per call. No retry, no tracking beyond an in-flight flag.
pub struct ProduceDispatcher {
    backend: Arc<dyn BrokerBackend>,
    notifier: Notifier,
    settings: ConnectionSettings,
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag on every exit path.
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag.clone()))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ProduceDispatcher {
    pub fn new(backend: Arc<dyn BrokerBackend>, notifier: Notifier, settings: ConnectionSettings) -> Self {
        Self {
            backend,
            notifier,
            settings,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Send `payload` to `topic`. With `schema` set the backend encodes the
    /// payload against that registry subject, otherwise it goes out as is.
    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
        schema: Option<&str>,
    ) -> Result<(), SyncError> {
        let request = match self.prepare(topic, key, payload, schema) {
            Ok(r) => r,
            Err(e) => {
                let err = SyncError::from(e);
                self.notifier.failure(&err, Surface::Inline);
                return Err(err);
            }
        };

        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            let err = SyncError::from(ValidationError::SendInFlight);
            self.notifier.failure(&err, Surface::Inline);
            return Err(err);
        };

        match self.backend.produce(&request).await {
            Ok(()) => {
                tracing::info!(topic = %topic, key = %key, schema = ?schema, "message sent");
                self.notifier.success("Message sent");
                Ok(())
            }
            Err(e) => {
                let err = SyncError::Produce(e.with_context(format!("produce to '{topic}'")));
                self.notifier.failure(&err, Surface::Inline);
                Err(err)
            }
        }
    }

    fn prepare(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
        schema: Option<&str>,
    ) -> Result<ProduceRequest, ValidationError> {
        if payload.trim().is_empty() {
            return Err(ValidationError::EmptyPayload);
        }
        let encoding = match schema {
            None => PayloadEncoding::Json,
            Some(subject) => {
                if !self.settings.schema_registry_connected {
                    return Err(ValidationError::SchemaRegistryUnavailable);
                }
                match serde_json::from_str::<serde_json::Value>(payload) {
                    Ok(v) if v.is_object() => {}
                    Ok(_) => return Err(ValidationError::PayloadNotObject("not an object".into())),
                    Err(e) => return Err(ValidationError::PayloadNotObject(e.to_string())),
                }
                PayloadEncoding::Schema { subject: subject.to_string() }
            }
        };
        Ok(ProduceRequest {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_string(),
            encoding,
        })
    }
}
