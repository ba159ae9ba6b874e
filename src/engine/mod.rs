//! Request engine - owns every in-flight protocol exchange of a worker
//!
//! Plugins submit requests together with a continuation. Nothing runs
//! until [`RequestEngine::poll`] is driven: each call waits a bounded time
//! for the next exchange to finish, then invokes the continuation of every
//! finished exchange exactly once, in the order the exchanges became ready.
//!
//! ```text
//! plugin ──submit(target, request, continuation)──▶ pending + in_flight
//!                                                        │
//! worker loop ──poll()──▶ next ready exchange ──▶ continuation(engine, ctx, reply)
//! ```
//!
//! Continuations receive the engine itself so they can chain follow-up
//! requests, and the caller's context (buffer, result sink) as `ctx`.
//! Dropping the engine abandons every outstanding request without calling
//! its continuation.

pub mod error;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use futures::future::{self, BoxFuture};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::config::EngineConfig;
use crate::snmp::{self, Oid, SnmpSession, SnmpSettings, SnmpValue, VarBind, WalkOutcome};
use crate::tcp::{self, TcpCheck, TcpResponse};
use crate::{Host, SnmpCommunity};

use self::error::{EngineError, EngineResult};

pub type RequestId = u64;

/// Handle returned by [`RequestEngine::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHandle(RequestId);

impl RequestHandle {
    pub fn id(&self) -> RequestId {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    SnmpGet,
    SnmpTable,
    TcpConnect,
}

/// Protocol parameters of a request
#[derive(Debug, Clone)]
pub enum Request {
    /// GET of one or more OIDs in a single PDU
    SnmpGet {
        community: SnmpCommunity,
        oids: Vec<Oid>,
        default: Option<Vec<SnmpValue>>,
    },

    /// GET-NEXT walk of the subtree below `root`
    SnmpTable {
        community: SnmpCommunity,
        root: Oid,
        default: Option<Vec<VarBind>>,
    },

    /// TCP connect, optionally followed by a read
    TcpConnect { check: TcpCheck },
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::SnmpGet { .. } => RequestKind::SnmpGet,
            Request::SnmpTable { .. } => RequestKind::SnmpTable,
            Request::TcpConnect { .. } => RequestKind::TcpConnect,
        }
    }
}

/// Reply to an SNMP GET
///
/// With a caller default, failures resolve to `values = Some(default)` and
/// no error.
#[derive(Debug, Clone, PartialEq)]
pub struct SnmpReply {
    pub values: Option<Vec<SnmpValue>>,
    pub error: Option<EngineError>,
}

impl SnmpReply {
    fn resolve(result: EngineResult<Vec<VarBind>>, default: Option<Vec<SnmpValue>>) -> Self {
        match (result, default) {
            (Ok(varbinds), _) => SnmpReply {
                values: Some(varbinds.into_iter().map(|vb| vb.value).collect()),
                error: None,
            },
            (Err(e), Some(default)) => {
                trace!("request failed, using default: {e}");
                SnmpReply {
                    values: Some(default),
                    error: None,
                }
            }
            (Err(e), None) => SnmpReply {
                values: None,
                error: Some(e),
            },
        }
    }
}

/// Reply to a single-OID string fetch
#[derive(Debug, Clone, PartialEq)]
pub struct StrReply {
    pub value: Option<String>,
    pub error: Option<EngineError>,
}

/// Everything a continuation can receive
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Snmp(SnmpReply),
    Table(WalkOutcome),
    Tcp(EngineResult<TcpResponse>),
}

fn mismatched(reply: &Reply) -> EngineError {
    EngineError::Protocol(format!("unexpected reply kind: {reply:?}"))
}

/// Called exactly once when a request finishes
pub type Continuation<C> = Box<dyn FnOnce(&mut RequestEngine<C>, &mut C, Reply) + Send>;

/// One in-flight protocol exchange
pub struct PollRequest<C> {
    pub target: SocketAddr,
    pub kind: RequestKind,
    pub issued_at: Instant,
    /// Latest instant the exchange is expected to end, retries included
    pub deadline: Instant,
    pub retries: u32,
    continuation: Continuation<C>,
}

pub struct RequestEngine<C> {
    config: EngineConfig,
    next_id: RequestId,
    pending: HashMap<RequestId, PollRequest<C>>,
    in_flight: FuturesUnordered<BoxFuture<'static, (RequestId, Reply)>>,
}

impl<C> RequestEngine<C> {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            next_id: 1,
            pending: HashMap::new(),
            in_flight: FuturesUnordered::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of requests whose continuation has not run yet
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, handle: RequestHandle) -> bool {
        self.pending.contains_key(&handle.0)
    }

    /// Requests that are past their deadline
    pub fn overdue(&self) -> usize {
        let now = Instant::now();
        self.pending.values().filter(|r| r.deadline < now).count()
    }

    /// Register a request; never blocks
    ///
    /// For SNMP `timeout` is the wait of a single attempt, the retry policy
    /// comes from the engine configuration. For TCP it bounds the connect and
    /// every read.
    pub fn submit(
        &mut self,
        target: SocketAddr,
        request: Request,
        continuation: Continuation<C>,
        timeout: Duration,
    ) -> RequestHandle {
        let kind = request.kind();
        let settings = SnmpSettings {
            timeout,
            ..self.config.snmp_settings()
        };

        let (retries, expected) = match kind {
            RequestKind::TcpConnect => (0, timeout.saturating_mul(2)),
            RequestKind::SnmpGet | RequestKind::SnmpTable => {
                (settings.retries, settings.total_timeout())
            }
        };

        let exchange = execute(target, request, settings, timeout).boxed();
        self.enqueue(target, kind, retries, expected, exchange, continuation)
    }

    /// Advance the engine once
    ///
    /// Waits at most `poll_wait` for an exchange to finish, then runs the
    /// continuations of every finished exchange. Returns whether requests
    /// remain outstanding.
    pub async fn poll(&mut self, ctx: &mut C) -> bool {
        if self.in_flight.is_empty() {
            return false;
        }

        if let Ok(Some((id, reply))) =
            tokio::time::timeout(self.config.poll_wait(), self.in_flight.next()).await
        {
            self.complete(id, reply, ctx);

            // drain whatever else is already finished
            let ready = self.in_flight.len();
            for _ in 0..ready {
                match self.in_flight.next().now_or_never() {
                    Some(Some((id, reply))) => self.complete(id, reply, ctx),
                    _ => break,
                }
            }
        }

        !self.in_flight.is_empty()
    }

    /// Drop every outstanding request without running its continuation
    pub fn abandon(&mut self) -> usize {
        let abandoned = self.pending.len();
        self.pending.clear();
        self.in_flight = FuturesUnordered::new();
        abandoned
    }

    /// GET several OIDs of `host` in one request
    pub fn get_list<F>(
        &mut self,
        host: &Host,
        oids: Vec<Oid>,
        default: Option<Vec<SnmpValue>>,
        continuation: F,
    ) -> RequestHandle
    where
        F: FnOnce(&mut RequestEngine<C>, &mut C, SnmpReply) + Send + 'static,
    {
        let continuation: Continuation<C> = Box::new(move |engine, ctx, reply| match reply {
            Reply::Snmp(reply) => continuation(engine, ctx, reply),
            other => continuation(
                engine,
                ctx,
                SnmpReply {
                    values: None,
                    error: Some(mismatched(&other)),
                },
            ),
        });

        let Some((target, community)) = snmp_target(host) else {
            let reply = SnmpReply::resolve(Err(missing_credentials(host)), default);
            return self.reject(host, RequestKind::SnmpGet, Reply::Snmp(reply), continuation);
        };

        let timeout = Duration::from_millis(self.config.snmp_timeout_ms);
        self.submit(
            target,
            Request::SnmpGet {
                community,
                oids,
                default,
            },
            continuation,
            timeout,
        )
    }

    /// GET one OID of `host` and render the value as a string
    pub fn get_str<F>(
        &mut self,
        host: &Host,
        oid: Oid,
        default: Option<String>,
        continuation: F,
    ) -> RequestHandle
    where
        F: FnOnce(&mut RequestEngine<C>, &mut C, StrReply) + Send + 'static,
    {
        let default = default.map(|value| vec![snmp::octets(&value)]);
        self.get_list(host, vec![oid], default, move |engine, ctx, reply| {
            let value = reply
                .values
                .and_then(|values| values.into_iter().next())
                .map(|value| snmp::render(&value));
            continuation(
                engine,
                ctx,
                StrReply {
                    value,
                    error: reply.error,
                },
            )
        })
    }

    /// Walk the subtree below `root` on `host`
    pub fn get_table<F>(
        &mut self,
        host: &Host,
        root: Oid,
        default: Option<Vec<VarBind>>,
        continuation: F,
    ) -> RequestHandle
    where
        F: FnOnce(&mut RequestEngine<C>, &mut C, WalkOutcome) + Send + 'static,
    {
        let continuation: Continuation<C> = Box::new(move |engine, ctx, reply| match reply {
            Reply::Table(outcome) => continuation(engine, ctx, outcome),
            other => continuation(
                engine,
                ctx,
                WalkOutcome {
                    values: None,
                    error: Some(mismatched(&other)),
                },
            ),
        });

        let Some((target, community)) = snmp_target(host) else {
            let outcome = resolve_table(
                WalkOutcome {
                    values: None,
                    error: Some(missing_credentials(host)),
                },
                default,
            );
            return self.reject(host, RequestKind::SnmpTable, Reply::Table(outcome), continuation);
        };

        let timeout = Duration::from_millis(self.config.snmp_timeout_ms);
        self.submit(
            target,
            Request::SnmpTable {
                community,
                root,
                default,
            },
            continuation,
            timeout,
        )
    }

    /// Connect to `target` and run the check
    pub fn get_tcp<F>(&mut self, target: SocketAddr, check: TcpCheck, continuation: F) -> RequestHandle
    where
        F: FnOnce(&mut RequestEngine<C>, &mut C, EngineResult<TcpResponse>) + Send + 'static,
    {
        let continuation: Continuation<C> = Box::new(move |engine, ctx, reply| match reply {
            Reply::Tcp(result) => continuation(engine, ctx, result),
            other => continuation(engine, ctx, Err(mismatched(&other))),
        });

        let timeout = self.config.tcp_timeout();
        self.submit(target, Request::TcpConnect { check }, continuation, timeout)
    }

    /// Queue a request whose reply is already known
    fn reject(
        &mut self,
        host: &Host,
        kind: RequestKind,
        reply: Reply,
        continuation: Continuation<C>,
    ) -> RequestHandle {
        let target = SocketAddr::new(host.mgmt_address, 0);
        self.enqueue(
            target,
            kind,
            0,
            Duration::ZERO,
            future::ready(reply).boxed(),
            continuation,
        )
    }

    fn enqueue(
        &mut self,
        target: SocketAddr,
        kind: RequestKind,
        retries: u32,
        expected: Duration,
        exchange: BoxFuture<'static, Reply>,
        continuation: Continuation<C>,
    ) -> RequestHandle {
        let id = self.next_id;
        self.next_id += 1;

        let issued_at = Instant::now();
        self.pending.insert(
            id,
            PollRequest {
                target,
                kind,
                issued_at,
                deadline: issued_at + expected,
                retries,
                continuation,
            },
        );
        self.in_flight
            .push(exchange.map(move |reply| (id, reply)).boxed());

        trace!(request = id, ?kind, %target, "request submitted");
        RequestHandle(id)
    }

    fn complete(&mut self, id: RequestId, reply: Reply, ctx: &mut C) {
        let Some(request) = self.pending.remove(&id) else {
            warn!(request = id, "completion for unknown request");
            return;
        };

        trace!(
            request = id,
            kind = ?request.kind,
            target = %request.target,
            elapsed_ms = request.issued_at.elapsed().as_millis() as u64,
            "request finished"
        );

        (request.continuation)(self, ctx, reply);
    }
}

fn snmp_target(host: &Host) -> Option<(SocketAddr, SnmpCommunity)> {
    let community = host.snmp.clone()?;
    Some((SocketAddr::new(host.mgmt_address, community.port), community))
}

fn missing_credentials(host: &Host) -> EngineError {
    EngineError::InvalidRequest(format!("host {} has no SNMP credentials", host.id))
}

fn resolve_table(outcome: WalkOutcome, default: Option<Vec<VarBind>>) -> WalkOutcome {
    match (outcome, default) {
        (WalkOutcome { values: None, .. }, Some(default)) => WalkOutcome {
            values: Some(default),
            error: None,
        },
        (
            WalkOutcome {
                values: Some(rows),
                error: None,
            },
            Some(default),
        ) if rows.is_empty() => WalkOutcome {
            values: Some(default),
            error: None,
        },
        (outcome, _) => outcome,
    }
}

/// Run one exchange to completion
async fn execute(
    target: SocketAddr,
    request: Request,
    settings: SnmpSettings,
    io_timeout: Duration,
) -> Reply {
    match request {
        Request::SnmpGet {
            community,
            oids,
            default,
        } => {
            let result = match SnmpSession::open(target, community, settings).await {
                Ok(session) => session.get(&oids).await,
                Err(e) => Err(e),
            };
            Reply::Snmp(SnmpReply::resolve(result, default))
        }
        Request::SnmpTable {
            community,
            root,
            default,
        } => {
            let outcome = match SnmpSession::open(target, community, settings).await {
                Ok(session) => session.walk(&root).await,
                Err(e) => WalkOutcome {
                    values: None,
                    error: Some(e),
                },
            };
            Reply::Table(resolve_table(outcome, default))
        }
        Request::TcpConnect { check } => Reply::Tcp(tcp::get_tcp(target, &check, io_timeout).await),
    }
}
