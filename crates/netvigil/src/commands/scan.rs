//! Ping sweep of an address range.

use tabled::Tabled;

use netvigil_core::ScanHit;

use crate::cli::{GlobalOpts, ScanArgs};
use crate::error::CliError;
use crate::output;

use super::Context;

#[derive(Tabled)]
struct HitRow {
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "RTT")]
    rtt: String,
}

impl HitRow {
    fn new(hit: &ScanHit) -> Self {
        Self {
            address: hit.address.clone(),
            rtt: hit
                .rtt_ms
                .map_or_else(|| "-".into(), |ms| format!("{ms:.2} ms")),
        }
    }
}

pub async fn handle(ctx: &Context, args: &ScanArgs, global: &GlobalOpts) -> Result<(), CliError> {
    tracing::info!(range = %args.range, "scanning");
    let hits = ctx.engine.scan_range(args.range).await?;

    let out = output::render_list(&global.output, &hits, HitRow::new, |h| h.address.clone())?;
    output::print_output(&out, global.quiet);
    Ok(())
}
