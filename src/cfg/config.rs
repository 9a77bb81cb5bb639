// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::cfg::enums::{ReconnectKind, Wire};

/// Runtime knobs for this crate's embedding binary. Unlike the wire formats
/// in [`crate::codec`], nothing here is transmitted — it only decides how
/// local tasks (codecs, the manager's sweeper, the client's heartbeat and
/// reconnect loop) are parameterized.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Which framing this process speaks.
    pub wire: WireConfig,
    /// Manager-side session registry knobs.
    pub manager: ManagerConfig,
    /// Client dial/heartbeat/reconnect knobs.
    pub client: ClientConfig,
}

/// Framing-related knobs: keepalive type codes and the JSON delimiter.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct WireConfig {
    /// Which codec family this config describes the keepalive markers for.
    pub kind: Wire,
    /// TLV `type` value that marks an outbound keepalive request.
    #[serde(default = "default_tlv_keepalive_request")]
    pub tlv_keepalive_request_type: i32,
    /// TLV `type` value that marks a keepalive response/acknowledgement.
    #[serde(default = "default_tlv_keepalive_response")]
    pub tlv_keepalive_response_type: i32,
    /// Literal byte sequence that terminates every JSON frame on the wire.
    #[serde(default = "default_json_delimiter")]
    pub json_delimiter: Vec<u8>,
    /// Maximum TLV payload length this process will decode before failing.
    #[serde(default = "default_max_tlv_payload")]
    pub max_tlv_payload_bytes: u64,
}

fn default_tlv_keepalive_request() -> i32 {
    1
}

fn default_tlv_keepalive_response() -> i32 {
    2
}

fn default_json_delimiter() -> Vec<u8> {
    b"\r\n".to_vec()
}

fn default_max_tlv_payload() -> u64 {
    16 * 1024 * 1024
}

/// Manager registry knobs.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ManagerConfig {
    /// How often the keepalive sweeper scans for stale sessions. `None`
    /// disables the sweeper entirely.
    #[serde(default, with = "serde_opt_secs")]
    pub keepalive_tick: Option<Duration>,
    /// When true, `store()` evicts any prior session for the same
    /// authenticated user id before registering the new one.
    #[serde(default)]
    pub exclusive_user: bool,
}

/// Client dial/heartbeat/reconnect knobs.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ClientConfig {
    /// Timeout applied to `dial_timeout` calls made internally by the
    /// reconnect loop.
    #[serde(with = "serde_secs")]
    pub dial_timeout: Duration,
    /// Period between heartbeat pump ticks. `None` disables the pump.
    #[serde(default, with = "serde_opt_secs")]
    pub heartbeat_period: Option<Duration>,
    /// When false, a session ending for any reason is final: the client
    /// never redials. When true, the reconnect loop redials any session
    /// that was not closed via `Session::close` (a manual close always
    /// wins over this flag).
    #[serde(default)]
    pub need_reconnect: bool,
    /// Reconnect policy parameters.
    pub reconnect: ReconnectConfig,
}

/// Parameters for the three [`crate::client::policy::ReconnectPolicy`]
/// implementors. Fields irrelevant to `kind` are simply unused.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ReconnectConfig {
    /// Which policy to build.
    pub kind: ReconnectKind,
    /// Fixed or initial delay before the next dial attempt.
    #[serde(default = "default_initial_delay", with = "serde_secs")]
    pub initial_delay: Duration,
    /// Upper bound on the delay (only consulted by `exponential`).
    #[serde(default = "default_max_delay", with = "serde_secs")]
    pub max_delay: Duration,
    /// Maximum number of reconnect attempts before giving up. `0` means
    /// unbounded.
    #[serde(default)]
    pub max_attempts: u32,
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants that serde's derive cannot express.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            !self.wire.json_delimiter.is_empty(),
            "wire.json_delimiter must not be empty"
        );
        ensure!(
            self.client.dial_timeout > Duration::ZERO,
            "client.dial_timeout must be > 0"
        );
        if self.client.reconnect.kind == ReconnectKind::Exponential {
            ensure!(
                self.client.reconnect.max_delay >= self.client.reconnect.initial_delay,
                "client.reconnect.max_delay must be >= initial_delay"
            );
        }
        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Same as [`serde_secs`] but for an optional period (`null`/omitted ⇒ disabled).
mod serde_opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        d: &Option<Duration>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<Duration>, D::Error> {
        let secs: Option<u64> = Option::deserialize(d)?;
        Ok(secs.map(Duration::from_secs))
    }
}
