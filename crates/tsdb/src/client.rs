// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::api::{QueryResult, TsdbApi};
use crate::config::Conf;
use crate::constants::{PUT_QUEUE_CAPACITY, SHUTDOWN_GRACE_PERIOD};
use crate::datapoint::DataPoint;
use crate::errors::TsdbError;
use crate::query::QueryRequest;
use crate::span::SpanProvider;
use crate::writer::{FlushFailure, Writer, WriterConfig};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Anything that accepts single data points for asynchronous delivery.
#[async_trait]
pub trait PointSink: Send + Sync {
    async fn put(&self, point: DataPoint) -> Result<(), TsdbError>;
}

/// Client for one TSDB backend.
///
/// Queries and `put_many` go straight to the backend. `put` enqueues onto a
/// bounded queue drained by a background writer task.
pub struct HttpClient {
    api: Arc<TsdbApi>,
    sender: mpsc::Sender<DataPoint>,
    // Holds the receiving end when the writer is disabled so that `put`
    // applies backpressure instead of failing.
    _parked: Mutex<Option<mpsc::Receiver<DataPoint>>>,
    cancel_token: CancellationToken,
    writer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl HttpClient {
    /// Builds the client and, when enabled, spawns the writer on the current
    /// tokio runtime.
    pub fn new(config: &Conf) -> Result<Self, TsdbError> {
        Self::build(config, None)
    }

    /// Like [`HttpClient::new`], also reporting every dropped batch on `observer`.
    pub fn with_flush_observer(
        config: &Conf,
        observer: mpsc::UnboundedSender<FlushFailure>,
    ) -> Result<Self, TsdbError> {
        Self::build(config, Some(observer))
    }

    fn build(
        config: &Conf,
        observer: Option<mpsc::UnboundedSender<FlushFailure>>,
    ) -> Result<Self, TsdbError> {
        let handle = Handle::try_current()
            .map_err(|e| TsdbError::Precondition(format!("no tokio runtime available: {e}")))?;
        let api = Arc::new(TsdbApi::new(config)?);
        let (sender, receiver) = mpsc::channel(PUT_QUEUE_CAPACITY);
        let cancel_token = CancellationToken::new();

        let (parked, writer) = if config.writer_enabled() {
            let mut writer = Writer::new(
                api.clone(),
                WriterConfig {
                    buffer_size: config.buffer_size,
                    interval: config.flush_interval,
                    shutdown_grace: SHUTDOWN_GRACE_PERIOD,
                },
                receiver,
                cancel_token.clone(),
            )?;
            if let Some(observer) = observer {
                writer = writer.with_observer(observer);
            }
            debug!(
                "Starting TSDB writer: buffer size {}, interval {:?}",
                config.buffer_size, config.flush_interval
            );
            (None, Some(handle.spawn(writer.run())))
        } else {
            warn!(
                "TSDB writer disabled (buffer size {}, flush interval {:?}); queued data points will not be sent",
                config.buffer_size, config.flush_interval
            );
            (Some(receiver), None)
        };

        Ok(Self {
            api,
            sender,
            _parked: Mutex::new(parked),
            cancel_token,
            writer: tokio::sync::Mutex::new(writer),
        })
    }

    /// Enqueues a data point for the writer. Waits while the queue is full.
    pub async fn put(&self, point: DataPoint) -> Result<(), TsdbError> {
        self.sender
            .send(point)
            .await
            .map_err(|_| TsdbError::Precondition("writer has been shut down".to_string()))
    }

    pub async fn put_many(&self, points: &[DataPoint]) -> Result<(), TsdbError> {
        self.api.put_many(points).await
    }

    pub async fn query_get(
        &self,
        request: &QueryRequest,
        spans: Option<&dyn SpanProvider>,
    ) -> Result<Vec<QueryResult>, TsdbError> {
        self.api.query_get(request, spans).await
    }

    pub async fn query_post(&self, request: &QueryRequest) -> Result<Vec<QueryResult>, TsdbError> {
        self.api.query_post(request).await
    }

    /// Stops the writer after a final flush of everything already queued.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let writer = self.writer.lock().await.take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!("TSDB writer task failed: {e}");
            }
        }
    }
}

#[async_trait]
impl PointSink for HttpClient {
    async fn put(&self, point: DataPoint) -> Result<(), TsdbError> {
        HttpClient::put(self, point).await
    }
}
