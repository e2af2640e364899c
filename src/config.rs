//! Bridge configuration read from the environment snapshot.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
};

use crate::{
    env::EnvironmentSnapshot,
    error::{BridgeError, Result},
    runtime::drain::DrainPolicy,
};

/// Port the Lambda Web Adapter forwards to. Checked before [`PORT_ENV`].
pub const LWA_PORT_ENV: &str = "AWS_LWA_PORT";
pub const PORT_ENV: &str = "PORT";
pub const BIND_HOST_ENV: &str = "LAMBDA_BRIDGE_BIND_HOST";
pub const MAX_BODY_BYTES_ENV: &str = "LAMBDA_BRIDGE_MAX_BODY_BYTES";

fn default_bind_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_max_body_bytes() -> usize {
    6 * 1024 * 1024
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Port for the process-based host. `None` when no valid port is configured.
    pub port: Option<u16>,
    /// Interface the process-based host binds to.
    pub bind_host: IpAddr,
    /// Maximum accepted request body size.
    pub max_body_bytes: usize,
    /// Drain timing for the process-based host's shutdown.
    pub drain: DrainPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: None,
            bind_host: default_bind_host(),
            max_body_bytes: default_max_body_bytes(),
            drain: DrainPolicy::default(),
        }
    }
}

impl BridgeConfig {
    pub fn from_env(env: &EnvironmentSnapshot) -> Result<Self> {
        let port = [LWA_PORT_ENV, PORT_ENV]
            .into_iter()
            .find_map(|key| env.non_empty_var(key).map(|v| (key, v)))
            .and_then(|(key, raw)| match raw.trim().parse::<u16>() {
                Ok(port) => Some(port),
                Err(err) => {
                    tracing::warn!(key, value = %raw, error = %err, "ignoring invalid port");
                    None
                }
            });

        let bind_host = match env.non_empty_var(BIND_HOST_ENV) {
            Some(raw) => IpAddr::from_str(raw.trim()).map_err(|err| {
                BridgeError::Config(format!("invalid {BIND_HOST_ENV} ({raw}): {err}"))
            })?,
            None => default_bind_host(),
        };

        let max_body_bytes = match env.non_empty_var(MAX_BODY_BYTES_ENV) {
            Some(raw) => raw.trim().parse::<usize>().map_err(|err| {
                BridgeError::Config(format!("invalid {MAX_BODY_BYTES_ENV} ({raw}): {err}"))
            })?,
            None => default_max_body_bytes(),
        };

        Ok(Self {
            port,
            bind_host,
            max_body_bytes,
            drain: DrainPolicy::default(),
        })
    }

    /// Address for the process-based host, if a port is configured.
    pub fn process_addr(&self) -> Option<SocketAddr> {
        self.port.map(|port| SocketAddr::new(self.bind_host, port))
    }
}
