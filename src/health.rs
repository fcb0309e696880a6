//! Health gate for the inference server.
//!
//! The belief that "the server is up and a model is loaded" is cached in the
//! configuration file for ten minutes. Within that window no request is made.
//!
//! Two behaviors are kept on purpose:
//! - the freshness window is ten minutes, although older documentation
//!   spoke of five;
//! - a stale check records the current time *before* probing, so the next
//!   invocation skips the probe whatever this probe's outcome was.

use crate::config::ConfigFile;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use tracing::{debug, info, warn};

/// How long a recorded health check stays trusted.
pub const FRESHNESS_WINDOW_MINUTES: i64 = 10;

/// Whether the cached health check can be trusted at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthGate {
    /// Skip the probe and assume the server is online.
    Fresh { until: NaiveDateTime },
    /// The probe must run.
    Stale,
}

impl HealthGate {
    /// A check is fresh when `now - window <= last_check`.
    pub fn evaluate(last_check: NaiveDateTime, now: NaiveDateTime) -> Self {
        let window = Duration::minutes(FRESHNESS_WINDOW_MINUTES);
        if now - window <= last_check {
            HealthGate::Fresh {
                until: last_check + window,
            }
        } else {
            HealthGate::Stale
        }
    }
}

/// Read/update access to the persisted health-check timestamp.
pub trait HealthStore {
    fn last_health_check(&self) -> Result<Option<NaiveDateTime>>;
    fn record_health_check(&mut self, at: NaiveDateTime) -> Result<()>;
}

impl HealthStore for ConfigFile {
    fn last_health_check(&self) -> Result<Option<NaiveDateTime>> {
        Ok(self.config.last_health_check()?)
    }

    fn record_health_check(&mut self, at: NaiveDateTime) -> Result<()> {
        self.config.set_last_health_check(at);
        self.save()
    }
}

/// Result of querying the model-list endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// HTTP 200 with at least one model in the list.
    Ready { models: usize },
    /// HTTP 200 but the model list is empty.
    NoModelLoaded,
    UnexpectedStatus(u16),
    /// HTTP 200 with a body that is not a model list.
    InvalidResponse(String),
    /// The request never got a response.
    Unreachable(String),
}

impl ProbeOutcome {
    pub fn is_online(&self) -> bool {
        matches!(self, ProbeOutcome::Ready { .. })
    }
}

/// Something that can ask the inference server which models are loaded.
#[async_trait]
pub trait ModelProbe {
    async fn probe(&self) -> Result<ProbeOutcome>;
}

/// Check the server and model status, honoring the cached health check.
///
/// An empty timestamp counts as "checked just now".
pub async fn is_llm_online<S, P>(store: &mut S, probe: &P, now: NaiveDateTime) -> Result<bool>
where
    S: HealthStore + ?Sized,
    P: ModelProbe + ?Sized,
{
    let last_check = store.last_health_check()?.unwrap_or(now);

    match HealthGate::evaluate(last_check, now) {
        HealthGate::Fresh { until } => {
            debug!("Health check is fresh until {}, skipping probe", until);
            Ok(true)
        }
        HealthGate::Stale => {
            store.record_health_check(now)?;
            let outcome = probe.probe().await?;
            match &outcome {
                ProbeOutcome::Ready { models } => {
                    info!("Server is up and LLM is loaded ({} model(s))", models)
                }
                ProbeOutcome::NoModelLoaded => warn!("LLM is not loaded"),
                ProbeOutcome::UnexpectedStatus(status) => {
                    warn!("Server answered the model query with status {}", status)
                }
                ProbeOutcome::InvalidResponse(reason) => {
                    warn!("Server answered the model query with an invalid list: {}", reason)
                }
                ProbeOutcome::Unreachable(reason) => warn!("Server is down: {}", reason),
            }
            Ok(outcome.is_online())
        }
    }
}
