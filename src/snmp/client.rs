//! SNMP session over an `async-snmp` client
//!
//! Every attempt is bounded by the engine's per-attempt timeout; retries
//! follow the configured backoff. The client itself runs a single attempt
//! per call.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use async_snmp::{Auth, Client, Error as ClientError, ErrorStatus, UdpClient};
use tokio::time::timeout;
use tracing::debug;

use super::{Oid, SnmpVersion, VarBind, is_exception};
use crate::SnmpCommunity;
use crate::config::Backoff;
use crate::engine::error::{EngineError, EngineResult};

/// Upper bound on rows collected by a single walk
const MAX_TABLE_ROWS: usize = 10_000;

/// Timeout and retry policy of SNMP exchanges
#[derive(Debug, Clone, PartialEq)]
pub struct SnmpSettings {
    pub timeout: Duration,
    pub retries: u32,
    pub backoff: Backoff,
}

impl SnmpSettings {
    /// Time to wait for a response on the given attempt (0 = first try)
    pub fn attempt_timeout(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.timeout,
            Backoff::Exponential => self.timeout.saturating_mul(2u32.saturating_pow(attempt)),
        }
    }

    /// Worst-case duration of one exchange including all retries
    pub fn total_timeout(&self) -> Duration {
        (0..=self.retries)
            .map(|attempt| self.attempt_timeout(attempt))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Outcome of a table walk
///
/// `values` is `None` only when nothing could be fetched at all (device
/// unreachable or root invalid). A walk interrupted after some rows keeps
/// those rows and reports the interrupting error next to them.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkOutcome {
    pub values: Option<Vec<VarBind>>,
    pub error: Option<EngineError>,
}

pub struct SnmpSession {
    client: UdpClient,
    target: SocketAddr,
    version: SnmpVersion,
    settings: SnmpSettings,
}

impl SnmpSession {
    pub async fn open(
        target: SocketAddr,
        community: SnmpCommunity,
        settings: SnmpSettings,
    ) -> EngineResult<Self> {
        let auth = match community.version {
            SnmpVersion::V1 => Auth::v1(community.community),
            SnmpVersion::V2c => Auth::v2c(community.community),
        };

        let client = Client::builder(target.to_string(), auth)
            .timeout(settings.attempt_timeout(settings.retries))
            .retries(0)
            .connect()
            .await
            .map_err(|e| EngineError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            target,
            version: community.version,
            settings,
        })
    }

    /// GET all `oids` in one request
    ///
    /// Exception values (`noSuchObject`, `noSuchInstance`) are reported as
    /// [`EngineError::NoSuchObject`].
    pub async fn get(&self, oids: &[Oid]) -> EngineResult<Vec<VarBind>> {
        let client = &self.client;
        let varbinds = self.with_retries(move || client.get_many(oids)).await?;

        if varbinds.len() != oids.len() {
            return Err(EngineError::Protocol(format!(
                "expected {} bindings, got {}",
                oids.len(),
                varbinds.len()
            )));
        }
        if let Some(missing) = varbinds.iter().find(|vb| is_exception(&vb.value)) {
            return Err(EngineError::NoSuchObject(missing.oid.to_string()));
        }

        Ok(varbinds)
    }

    /// GET-NEXT from `oid`; `None` once the end of the MIB view is reached
    pub async fn get_next(&self, oid: &Oid) -> EngineResult<Option<VarBind>> {
        let client = &self.client;
        let varbind = match self.with_retries(move || client.get_next(oid)).await {
            Ok(varbind) => varbind,
            // v1 agents end a walk with noSuchName
            Err(EngineError::NoSuchObject(_)) if self.version == SnmpVersion::V1 => return Ok(None),
            Err(e) => return Err(e),
        };

        if is_exception(&varbind.value) {
            return Ok(None);
        }
        if varbind.oid.arcs() <= oid.arcs() {
            return Err(EngineError::Protocol(format!(
                "agent returned non-increasing OID {}",
                varbind.oid
            )));
        }

        Ok(Some(varbind))
    }

    /// Walk the subtree below `root` with successive GET-NEXT requests
    pub async fn walk(&self, root: &Oid) -> WalkOutcome {
        if root.arcs().len() < 2 {
            return WalkOutcome {
                values: None,
                error: Some(EngineError::InvalidRequest(format!("invalid table root {root}"))),
            };
        }

        let mut rows: Vec<VarBind> = vec![];
        let mut current = root.clone();

        loop {
            match self.get_next(&current).await {
                Ok(Some(varbind)) if varbind.oid.arcs().starts_with(root.arcs()) => {
                    current = varbind.oid.clone();
                    rows.push(varbind);
                }
                Ok(_) => {
                    debug!(snmp.target = %self.target, rows = rows.len(), "walk complete");
                    return WalkOutcome {
                        values: Some(rows),
                        error: None,
                    };
                }
                Err(e) if rows.is_empty() => {
                    return WalkOutcome {
                        values: None,
                        error: Some(e),
                    };
                }
                Err(e) => {
                    debug!(snmp.target = %self.target, rows = rows.len(), "walk interrupted: {e}");
                    return WalkOutcome {
                        values: Some(rows),
                        error: Some(e),
                    };
                }
            }

            if rows.len() >= MAX_TABLE_ROWS {
                return WalkOutcome {
                    values: Some(rows),
                    error: Some(EngineError::Protocol(format!(
                        "table exceeds {MAX_TABLE_ROWS} rows"
                    ))),
                };
            }
        }
    }

    /// Run `request` until it answers, fails terminally or runs out of attempts
    async fn with_retries<T, F, Fut>(&self, mut request: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        for attempt in 0..=self.settings.retries {
            if attempt > 0 {
                debug!(snmp.target = %self.target, snmp.retries = attempt, "retrying request");
            }

            match timeout(self.settings.attempt_timeout(attempt), request()).await {
                Ok(Ok(answer)) => return Ok(answer),
                Ok(Err(ClientError::Timeout { .. })) | Err(_) => continue,
                Ok(Err(e)) => return Err(fold_error(e)),
            }
        }

        Err(EngineError::Timeout {
            retries: self.settings.retries,
        })
    }
}

/// Map a terminal client error onto the engine's error kinds
fn fold_error(err: ClientError) -> EngineError {
    match &err {
        ClientError::Snmp {
            status: ErrorStatus::NoSuchName,
            ..
        } => EngineError::NoSuchObject(err.to_string()),
        ClientError::Snmp { status, .. } => EngineError::Snmp {
            status: format!("{status:?}"),
        },
        _ => EngineError::Protocol(err.to_string()),
    }
}
