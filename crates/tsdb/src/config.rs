// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::TsdbError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_HOST: &str = "TSDB_HOST";
pub const ENV_PORT: &str = "TSDB_PORT";
pub const ENV_BUFFER_SIZE: &str = "TSDB_BUFFER_SIZE";
pub const ENV_FLUSH_INTERVAL_SECS: &str = "TSDB_FLUSH_INTERVAL_SECS";
pub const ENV_DIAL_TIMEOUT_MS: &str = "TSDB_HTTP_DIAL_TIMEOUT_MS";
pub const ENV_TLS_HANDSHAKE_TIMEOUT_MS: &str = "TSDB_HTTP_TLS_HANDSHAKE_TIMEOUT_MS";
pub const ENV_MAX_IDLE_CONNS_PER_HOST: &str = "TSDB_HTTP_MAX_IDLE_CONNS_PER_HOST";
pub const ENV_MAX_IDLE_CONNS: &str = "TSDB_HTTP_MAX_IDLE_CONNS";
pub const ENV_IDLE_CONN_TIMEOUT_MS: &str = "TSDB_HTTP_IDLE_CONN_TIMEOUT_MS";
pub const ENV_CLIENT_TIMEOUT_MS: &str = "TSDB_HTTP_CLIENT_TIMEOUT_MS";

/// Connection settings for the backend and the background writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conf {
    pub host: String,
    pub port: u16,
    /// Number of data points to buffer before flushing. Zero disables the writer.
    pub buffer_size: usize,
    /// Longest time buffered points wait before being flushed. Zero disables the writer.
    pub flush_interval: Duration,
    pub http: HttpConf,
}

/// Settings for the pooled HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConf {
    pub dial_timeout: Duration,
    pub tls_handshake_timeout: Duration,
    pub max_idle_conns_per_host: usize,
    pub max_idle_conns: usize,
    pub idle_conn_timeout: Duration,
    pub client_timeout: Duration,
}

impl Conf {
    /// Reads every setting from the environment.
    ///
    /// All keys are required; the error names every key that is missing.
    pub fn from_env() -> Result<Self, TsdbError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Conf::from_env`] with an injectable source, used by tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TsdbError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut reader = EnvReader {
            lookup,
            missing: Vec::new(),
        };

        let host = reader.string(ENV_HOST);
        let port = reader.parse::<u16>(ENV_PORT)?;
        let buffer_size = reader.parse::<usize>(ENV_BUFFER_SIZE)?;
        let flush_interval = reader.parse::<u64>(ENV_FLUSH_INTERVAL_SECS)?;
        let dial_timeout = reader.parse::<u64>(ENV_DIAL_TIMEOUT_MS)?;
        let tls_handshake_timeout = reader.parse::<u64>(ENV_TLS_HANDSHAKE_TIMEOUT_MS)?;
        let max_idle_conns_per_host = reader.parse::<usize>(ENV_MAX_IDLE_CONNS_PER_HOST)?;
        let max_idle_conns = reader.parse::<usize>(ENV_MAX_IDLE_CONNS)?;
        let idle_conn_timeout = reader.parse::<u64>(ENV_IDLE_CONN_TIMEOUT_MS)?;
        let client_timeout = reader.parse::<u64>(ENV_CLIENT_TIMEOUT_MS)?;

        if !reader.missing.is_empty() {
            return Err(TsdbError::InvalidConfig(format!(
                "values not configured for key(s): {}",
                reader.missing.join(", ")
            )));
        }

        let config = Self {
            host: host.unwrap_or_default(),
            port: port.unwrap_or_default(),
            buffer_size: buffer_size.unwrap_or_default(),
            flush_interval: Duration::from_secs(flush_interval.unwrap_or_default()),
            http: HttpConf {
                dial_timeout: Duration::from_millis(dial_timeout.unwrap_or_default()),
                tls_handshake_timeout: Duration::from_millis(
                    tls_handshake_timeout.unwrap_or_default(),
                ),
                max_idle_conns_per_host: max_idle_conns_per_host.unwrap_or_default(),
                max_idle_conns: max_idle_conns.unwrap_or_default(),
                idle_conn_timeout: Duration::from_millis(idle_conn_timeout.unwrap_or_default()),
                client_timeout: Duration::from_millis(client_timeout.unwrap_or_default()),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TsdbError> {
        if self.host.trim().is_empty() {
            return Err(TsdbError::InvalidConfig(format!(
                "{ENV_HOST} cannot be empty"
            )));
        }
        if self.port == 0 {
            return Err(TsdbError::InvalidConfig(
                "port must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}/api", self.host, self.port)
    }

    /// The writer only runs when both thresholds are set.
    pub fn writer_enabled(&self) -> bool {
        self.buffer_size != 0 && !self.flush_interval.is_zero()
    }
}

struct EnvReader<F> {
    lookup: F,
    missing: Vec<&'static str>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&mut self, key: &'static str) -> Option<String> {
        let value = (self.lookup)(key).filter(|value| !value.trim().is_empty());
        if value.is_none() {
            self.missing.push(key);
        }
        value
    }

    fn parse<T: FromStr>(&mut self, key: &'static str) -> Result<Option<T>, TsdbError> {
        match self.string(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
                TsdbError::InvalidConfig(format!("{key} has an invalid value '{raw}'"))
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            (ENV_HOST, "tsdb.internal"),
            (ENV_PORT, "4242"),
            (ENV_BUFFER_SIZE, "500"),
            (ENV_FLUSH_INTERVAL_SECS, "10"),
            (ENV_DIAL_TIMEOUT_MS, "2000"),
            (ENV_TLS_HANDSHAKE_TIMEOUT_MS, "1000"),
            (ENV_MAX_IDLE_CONNS_PER_HOST, "8"),
            (ENV_MAX_IDLE_CONNS, "16"),
            (ENV_IDLE_CONN_TIMEOUT_MS, "90000"),
            (ENV_CLIENT_TIMEOUT_MS, "5000"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<Conf, TsdbError> {
        Conf::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn test_from_lookup_reads_everything() {
        let conf = load(&full_env()).unwrap();
        assert_eq!(conf.host, "tsdb.internal");
        assert_eq!(conf.port, 4242);
        assert_eq!(conf.buffer_size, 500);
        assert_eq!(conf.flush_interval, Duration::from_secs(10));
        assert_eq!(conf.http.idle_conn_timeout, Duration::from_secs(90));
        assert_eq!(conf.base_url(), "http://tsdb.internal:4242/api");
        assert!(conf.writer_enabled());
    }

    #[test]
    fn test_missing_keys_are_all_reported() {
        let mut env = full_env();
        env.remove(ENV_HOST);
        env.remove(ENV_CLIENT_TIMEOUT_MS);
        let err = load(&env).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: values not configured for key(s): TSDB_HOST, TSDB_HTTP_CLIENT_TIMEOUT_MS"
        );
    }

    #[test]
    fn test_invalid_number() {
        let mut env = full_env();
        env.insert(ENV_PORT, "not-a-port");
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains("TSDB_PORT"));
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut env = full_env();
        env.insert(ENV_PORT, "0");
        assert!(load(&env).is_err());
    }

    #[test]
    fn test_writer_disabled_without_interval() {
        let mut env = full_env();
        env.insert(ENV_FLUSH_INTERVAL_SECS, "0");
        assert!(!load(&env).unwrap().writer_enabled());
    }
}
