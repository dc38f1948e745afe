//! Device and link listing.

use std::time::Duration;

use tabled::Tabled;

use netvigil_core::{Connection, Device};

use crate::cli::{DevicesArgs, DevicesCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::Context;

/// Gap between the two samples of `devices links --sample`.
const SAMPLE_GAP: Duration = Duration::from_secs(5);

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Type")]
    dtype: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Failures")]
    failures: u32,
    #[tabled(rename = "Last seen")]
    last_seen: String,
}

impl DeviceRow {
    fn new(d: &Device, color: bool) -> Self {
        Self {
            id: d.id.to_string(),
            name: d.name.clone(),
            address: d.ip_address.clone(),
            dtype: d.device_type.to_string(),
            status: output::status_label(d.status, color),
            failures: d.failure_count,
            last_seen: d
                .last_seen
                .map_or_else(|| "-".into(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

#[derive(Tabled)]
struct LinkRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Monitor")]
    monitor: String,
    #[tabled(rename = "In")]
    rx: String,
    #[tabled(rename = "Out")]
    tx: String,
    #[tabled(rename = "Util")]
    util: String,
}

fn endpoint(device: &impl std::fmt::Display, port: Option<&str>) -> String {
    port.map_or_else(|| device.to_string(), |p| format!("{device}:{p}"))
}

impl LinkRow {
    fn new(c: &Connection) -> Self {
        let stats = &c.link_stats;
        let sampled = stats.last_sample_at.is_some() && !stats.is_stale;
        let rate = |bps: f64| if sampled { output::format_bps(bps) } else { "-".into() };
        Self {
            id: c.id.to_string(),
            source: endpoint(&c.source_device_id, c.source_port()),
            target: endpoint(&c.target_device_id, c.target_port()),
            monitor: c.monitor_interface().to_string(),
            rx: rate(stats.in_bits_per_sec),
            tx: rate(stats.out_bits_per_sec),
            util: if sampled {
                format!("{}%", stats.utilization_pct)
            } else {
                "-".into()
            },
        }
    }
}

/// Multi-line view of one device.
pub fn detail(d: &Device) -> String {
    let mut lines = vec![
        format!("ID:        {}", d.id),
        format!("Name:      {}", d.name),
        format!("Address:   {}", d.ip_address),
        format!("Type:      {}", d.device_type),
        format!("Status:    {}", d.status),
        format!("Failures:  {}", d.failure_count),
        format!(
            "Last seen: {}",
            d.last_seen.map_or_else(|| "-".into(), |t| t.to_rfc3339())
        ),
    ];
    let Some(data) = &d.device_data else {
        return lines.join("\n");
    };
    if let Some(ref identity) = data.identity {
        lines.push(format!("Identity:  {identity}"));
    }
    if let Some(ref model) = data.model {
        lines.push(format!("Model:     {model}"));
    }
    if let Some(ref version) = data.version {
        lines.push(format!("Version:   {version}"));
    }
    if let Some(up) = data.uptime_secs {
        lines.push(format!("Uptime:    {up}s"));
    }
    if let Some(cpu) = data.cpu_pct {
        lines.push(format!("CPU:       {cpu:.1}%"));
    }
    if let Some(mem) = data.memory_pct {
        lines.push(format!("Memory:    {mem:.1}%"));
    }
    if let Some(disk) = data.disk_pct {
        lines.push(format!("Disk:      {disk:.1}%"));
    }
    if let Some(rtt) = data.ping_rtt_ms {
        lines.push(format!("RTT:       {rtt:.2} ms"));
    }
    if !data.ports.is_empty() {
        lines.push("Ports:".into());
        for port in &data.ports {
            lines.push(format!(
                "  {:<16} {:<6} {:<8} {}",
                port.name,
                port.status,
                port.speed.as_deref().unwrap_or("-"),
                port.snmp_index.map_or_else(|| "-".into(), |i| format!("ifIndex {i}")),
            ));
        }
    }
    lines.join("\n")
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(ctx: &Context, args: DevicesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        DevicesCommand::List { probe } => {
            if probe {
                ctx.engine.run_cycle().await?;
            }
            let mut devices: Vec<Device> = ctx.store.devices().iter().map(|d| (**d).clone()).collect();
            devices.sort_by(|a, b| a.id.cmp(&b.id));

            let color = output::should_color(&global.color);
            let out = output::render_list(
                &global.output,
                &devices,
                |d| DeviceRow::new(d, color),
                |d| d.id.to_string(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Links { sample } => {
            if sample {
                ctx.engine.run_cycle().await?;
                ctx.engine.run_traffic_cycle().await?;
                tokio::time::sleep(SAMPLE_GAP).await;
                ctx.engine.run_traffic_cycle().await?;
            }
            let mut links: Vec<Connection> =
                ctx.store.connections().iter().map(|c| (**c).clone()).collect();
            links.sort_by(|a, b| a.id.cmp(&b.id));

            let out = output::render_list(
                &global.output,
                &links,
                LinkRow::new,
                |c| c.id.to_string(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
