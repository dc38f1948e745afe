//! `run`: the monitoring loops, or a single pass with `--once`.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use netvigil_core::{Connection, CycleReport, Device, EventLogEntry, TrafficPoint, TrafficReport};

use crate::cli::{GlobalOpts, OutputFormat, RunArgs};
use crate::error::CliError;
use crate::output;

use super::Context;

/// Result of `run --once`.
#[derive(Serialize)]
struct PassSummary {
    cycle: CycleReport,
    traffic: TrafficReport,
}

/// Written by `--state-out` on shutdown.
#[derive(Serialize)]
struct StateDump {
    generated_at: DateTime<Utc>,
    devices: Vec<Device>,
    connections: Vec<Connection>,
    traffic: BTreeMap<String, Vec<TrafficPoint>>,
    events: Vec<EventLogEntry>,
}

fn cycle_line(r: &CycleReport) -> String {
    format!(
        "cycle {}{}: {} devices, {} ok, {} failed, {} skipped, {} changes in {}ms",
        r.cycle,
        if r.detailed { " (detailed)" } else { "" },
        r.devices,
        r.succeeded,
        r.failed,
        r.skipped,
        r.status_changes,
        r.elapsed_ms,
    )
}

pub async fn handle(ctx: &Context, args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    if args.once {
        let summary = PassSummary {
            cycle: ctx.engine.run_cycle().await?,
            traffic: ctx.engine.run_traffic_cycle().await?,
        };
        let out = output::render_single(
            &global.output,
            &summary,
            |s| {
                format!(
                    "{}\ntraffic: {} links, {} sampled, {} rebased, {} failed",
                    cycle_line(&s.cycle),
                    s.traffic.connections,
                    s.traffic.sampled,
                    s.traffic.rebased,
                    s.traffic.failed,
                )
            },
            |s| s.cycle.cycle.to_string(),
        )?;
        output::print_output(&out, global.quiet);
    } else {
        watch_until_interrupted(ctx, global).await?;
    }

    if let Some(path) = args.state_out {
        write_state(ctx, &path).await?;
        info!(path = %path.display(), "state written");
    }
    Ok(())
}

/// Start the engine and print one line per finished cycle until Ctrl-C.
async fn watch_until_interrupted(ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    ctx.engine.start().await?;
    let mut cycles = ctx.engine.last_cycle();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "cannot listen for Ctrl-C");
                }
                info!("interrupted, stopping");
                break;
            }
            changed = cycles.changed() => {
                if changed.is_err() {
                    break;
                }
                let report = cycles.borrow_and_update().clone();
                if let Some(report) = report {
                    let line = match global.output {
                        OutputFormat::Json | OutputFormat::JsonCompact => {
                            match output::render_json(&report, true) {
                                Ok(line) => line,
                                Err(e) => {
                                    warn!(error = %e, "cannot render cycle report");
                                    continue;
                                }
                            }
                        }
                        _ => cycle_line(&report),
                    };
                    output::print_output(&line, global.quiet);
                }
            }
        }
    }

    if let Some(stats) = ctx.engine.pool_stats() {
        info!(
            sessions = stats.entries,
            in_use = stats.in_use,
            connected = stats.connected,
            "closing router sessions"
        );
    }
    ctx.engine.stop().await;
    Ok(())
}

async fn write_state(ctx: &Context, path: &Path) -> Result<(), CliError> {
    let devices: Vec<Device> = ctx.store.devices().iter().map(|d| (**d).clone()).collect();
    let connections: Vec<Connection> =
        ctx.store.connections().iter().map(|c| (**c).clone()).collect();
    let traffic = connections
        .iter()
        .map(|c| (c.id.to_string(), ctx.engine.traffic_history(&c.id)))
        .filter(|(_, points)| !points.is_empty())
        .collect();

    let dump = StateDump {
        generated_at: Utc::now(),
        devices,
        connections,
        traffic,
        events: ctx.store.events(),
    };

    let json = output::render_json(&dump, false)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}
