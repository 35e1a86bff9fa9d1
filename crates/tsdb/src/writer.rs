// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background writer batching queued data points into `put_many` calls.

use crate::api::TsdbApi;
use crate::datapoint::DataPoint;
use crate::errors::TsdbError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Destination of flushed batches.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn put_many(&self, points: &[DataPoint]) -> Result<(), TsdbError>;
}

#[async_trait]
impl BatchSink for TsdbApi {
    async fn put_many(&self, points: &[DataPoint]) -> Result<(), TsdbError> {
        TsdbApi::put_many(self, points).await
    }
}

/// A batch the writer gave up on. The points are not retried.
#[derive(Debug)]
pub struct FlushFailure {
    pub points: Vec<DataPoint>,
    pub error: TsdbError,
}

#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
    pub buffer_size: usize,
    pub interval: Duration,
    /// Upper bound on the final flush once cancelled.
    pub shutdown_grace: Duration,
}

pub struct Writer<S: ?Sized> {
    sink: Arc<S>,
    config: WriterConfig,
    receiver: mpsc::Receiver<DataPoint>,
    cancel_token: CancellationToken,
    observer: Option<mpsc::UnboundedSender<FlushFailure>>,
    buffer: Vec<DataPoint>,
}

impl<S: BatchSink + ?Sized> Writer<S> {
    /// Fails when either threshold is zero; the loop needs both.
    pub fn new(
        sink: Arc<S>,
        config: WriterConfig,
        receiver: mpsc::Receiver<DataPoint>,
        cancel_token: CancellationToken,
    ) -> Result<Self, TsdbError> {
        if config.buffer_size == 0 || config.interval.is_zero() {
            return Err(TsdbError::InvalidConfig(format!(
                "writer needs a non-zero buffer size and flush interval, got {} and {:?}",
                config.buffer_size, config.interval
            )));
        }
        Ok(Self {
            sink,
            config,
            receiver,
            cancel_token,
            observer: None,
            buffer: Vec::with_capacity(config.buffer_size),
        })
    }

    #[must_use]
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<FlushFailure>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Flushes when the buffer reaches `buffer_size` or on every interval
    /// tick, until cancelled or every sender is gone.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        // first tick is immediate
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => {
                    debug!("Writer cancelled");
                    break;
                }
                point = self.receiver.recv() => match point {
                    Some(point) => {
                        self.buffer.push(point);
                        if self.buffer.len() >= self.config.buffer_size {
                            self.flush().await;
                        }
                    }
                    None => {
                        debug!("Writer queue closed");
                        break;
                    }
                },
                _ = ticker.tick() => self.flush().await,
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        self.receiver.close();
        while let Ok(point) = self.receiver.try_recv() {
            self.buffer.push(point);
        }
        let grace = self.config.shutdown_grace;
        let pending = self.buffer.len();
        if tokio::time::timeout(grace, self.flush()).await.is_err() {
            error!("Final flush of {pending} data points did not finish within {grace:?}");
        }
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let points = std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(self.config.buffer_size),
        );
        debug!("Flushing {} data points", points.len());
        if let Err(error) = self.sink.put_many(&points).await {
            error!("Failed to write {} data points: {error}", points.len());
            if let Some(observer) = &self.observer {
                // nobody listening anymore is fine
                let _ = observer.send(FlushFailure { points, error });
            }
        }
    }
}
