/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Work unit runners.
//!
//! [`WorkUnitRunner`] is the seam between the task executor and the code
//! that actually performs a unit. The production implementation is
//! [`ProbeRunner`], which handles monitor probes directly and delegates
//! scripts to a [`ScriptEngine`]. Unit failures are reported in the
//! [`UnitReport`], never as errors; a failing unit must not take down
//! the worker.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::ErrorKind;
use tokio::net::TcpStream;
use tracing::debug;

use crate::models::entity::{MonitorProbe, WorkScript};
use crate::models::task::WorkUnit;

/// Result of running one work unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UnitOutcome {
    /// The unit ran and its check held.
    Passed,
    /// The unit ran and its check did not hold.
    Failed { reason: String },
    /// The unit could not run to a verdict.
    Error { message: String },
}

impl UnitOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, UnitOutcome::Passed)
    }
}

/// Report for one executed work unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitReport {
    pub name: String,
    pub outcome: UnitOutcome,
    pub duration_ms: i64,
}

/// Runs a single work unit to a verdict.
#[async_trait]
pub trait WorkUnitRunner: Send + Sync {
    async fn run_unit(&self, unit: &WorkUnit) -> UnitReport;
}

/// Runs a script to a verdict. Kept behind a trait so deployments can
/// plug in their own execution sandbox.
#[async_trait]
pub trait ScriptEngine: Send + Sync {
    async fn run_script(&self, script: &WorkScript) -> UnitOutcome;
}

/// Script engine that executes the script body with `sh -c`.
///
/// Exit status zero is a pass; non-zero is a failure carrying a stderr
/// snippet.
#[derive(Debug, Default)]
pub struct ProcessScriptEngine;

#[async_trait]
impl ScriptEngine for ProcessScriptEngine {
    async fn run_script(&self, script: &WorkScript) -> UnitOutcome {
        // kill_on_drop: when a task timeout drops this future, the
        // child must die with it rather than outlive its run.
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&script.content)
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => UnitOutcome::Passed,
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                UnitOutcome::Failed {
                    reason: format!(
                        "script '{}' exited with {}: {}",
                        script.name,
                        output.status,
                        stderr.trim()
                    ),
                }
            }
            Err(e) => UnitOutcome::Error {
                message: format!("failed to spawn script '{}': {}", script.name, e),
            },
        }
    }
}

/// Default probe timeout for network checks.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Production runner: probes via reqwest/tokio, scripts via the
/// configured [`ScriptEngine`].
pub struct ProbeRunner {
    client: reqwest::Client,
    script_engine: Box<dyn ScriptEngine>,
}

impl ProbeRunner {
    pub fn new(script_engine: Box<dyn ScriptEngine>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            script_engine,
        }
    }

    async fn run_probe(&self, probe: &MonitorProbe) -> UnitOutcome {
        match probe {
            MonitorProbe::HttpRequest {
                url,
                method,
                expected_status,
            } => {
                let method = match reqwest::Method::from_bytes(method.as_bytes()) {
                    Ok(m) => m,
                    Err(_) => {
                        return UnitOutcome::Error {
                            message: format!("invalid http method '{}'", method),
                        }
                    }
                };
                match self.client.request(method, url).send().await {
                    Ok(response) => {
                        let status = response.status().as_u16();
                        let ok = match expected_status {
                            Some(expected) => status == *expected,
                            None => response.status().is_success(),
                        };
                        if ok {
                            UnitOutcome::Passed
                        } else {
                            UnitOutcome::Failed {
                                reason: format!("unexpected status {}", status),
                            }
                        }
                    }
                    Err(e) => UnitOutcome::Failed {
                        reason: format!("request failed: {}", e),
                    },
                }
            }
            MonitorProbe::Website { url } => match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => UnitOutcome::Passed,
                Ok(response) => UnitOutcome::Failed {
                    reason: format!("status {}", response.status().as_u16()),
                },
                Err(e) => UnitOutcome::Failed {
                    reason: format!("request failed: {}", e),
                },
            },
            // ICMP needs raw sockets; a TCP reachability check stands in.
            // Connection refused still proves the host is up.
            MonitorProbe::PingHost { host } => {
                match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect((host.as_str(), 80)))
                    .await
                {
                    Ok(Ok(_)) => UnitOutcome::Passed,
                    Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => UnitOutcome::Passed,
                    Ok(Err(e)) => UnitOutcome::Failed {
                        reason: format!("host unreachable: {}", e),
                    },
                    Err(_) => UnitOutcome::Failed {
                        reason: "connection timed out".to_string(),
                    },
                }
            }
            MonitorProbe::PortCheck { host, port } => {
                match tokio::time::timeout(
                    PROBE_TIMEOUT,
                    TcpStream::connect((host.as_str(), *port)),
                )
                .await
                {
                    Ok(Ok(_)) => UnitOutcome::Passed,
                    Ok(Err(e)) => UnitOutcome::Failed {
                        reason: format!("connect to {}:{} failed: {}", host, port, e),
                    },
                    Err(_) => UnitOutcome::Failed {
                        reason: format!("connect to {}:{} timed out", host, port),
                    },
                }
            }
            MonitorProbe::Heartbeat {
                last_seen,
                grace_minutes,
            } => match last_seen {
                Some(last_seen) => {
                    let deadline = *last_seen + chrono::Duration::minutes(*grace_minutes as i64);
                    if Utc::now() <= deadline {
                        UnitOutcome::Passed
                    } else {
                        UnitOutcome::Failed {
                            reason: format!(
                                "no heartbeat since {} (grace {}m)",
                                last_seen.to_rfc3339(),
                                grace_minutes
                            ),
                        }
                    }
                }
                None => UnitOutcome::Failed {
                    reason: "no heartbeat ever received".to_string(),
                },
            },
        }
    }
}

#[async_trait]
impl WorkUnitRunner for ProbeRunner {
    async fn run_unit(&self, unit: &WorkUnit) -> UnitReport {
        let name = unit.name();
        let start = Instant::now();
        let outcome = match unit {
            WorkUnit::Script(script) => self.script_engine.run_script(script).await,
            WorkUnit::Probe(probe) => self.run_probe(probe).await,
        };
        let duration_ms = start.elapsed().as_millis() as i64;
        debug!(unit = %name, duration_ms, passed = outcome.passed(), "Work unit finished");

        UnitReport {
            name,
            outcome,
            duration_ms,
        }
    }
}
