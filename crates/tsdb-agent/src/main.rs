// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use tsdb::{Conf, HttpClient, PointSink};
use tsdb_monitor::{CountingAllocator, Monitor, MonitorConfig};

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator;

const ENV_APP_NAME: &str = "TSDB_APP_NAME";
const ENV_APP_VERSION: &str = "TSDB_APP_VERSION";
const ENV_ROUTING_KEYS: &str = "TSDB_ROUTING_KEYS";
const ENV_LOG_LEVEL: &str = "TSDB_LOG_LEVEL";

#[tokio::main]
pub async fn main() {
    let log_level = env::var(ENV_LOG_LEVEL)
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,reqwest=off,{log_level}");

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let conf = match Conf::from_env() {
        Ok(conf) => conf,
        Err(e) => {
            error!("Error reading TSDB configuration: {e}");
            return;
        }
    };

    let client = match HttpClient::new(&conf) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Error creating TSDB client: {e}");
            return;
        }
    };

    let monitor_config = monitor_config_from_env();
    let app_name = monitor_config.app_name.clone();
    let monitor = match Monitor::new(monitor_config, Some(client.clone() as Arc<dyn PointSink>))
        .and_then(Monitor::start)
    {
        Ok(monitor) => monitor,
        Err(e) => {
            error!("Error starting monitor: {e}");
            client.shutdown().await;
            return;
        }
    };
    info!(
        "Monitoring {app_name}, writing to {}:{}",
        conf.host, conf.port
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }

    info!("Shutting down");
    monitor.shutdown().await;
    client.shutdown().await;
}

fn monitor_config_from_env() -> MonitorConfig {
    MonitorConfig {
        app_name: env::var(ENV_APP_NAME).unwrap_or_default(),
        app_version: env::var(ENV_APP_VERSION).unwrap_or_default(),
        routing_keys: parse_routing_keys(&env::var(ENV_ROUTING_KEYS).unwrap_or_default()),
        ..Default::default()
    }
}

fn parse_routing_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}
