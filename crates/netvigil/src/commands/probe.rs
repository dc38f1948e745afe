//! Out-of-band detailed probe of one device.

use netvigil_core::EntityId;

use crate::cli::{GlobalOpts, ProbeArgs};
use crate::error::CliError;
use crate::output;

use super::{Context, devices};

pub async fn handle(ctx: &Context, args: &ProbeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let id = EntityId::from(args.device.as_str());
    let device = ctx.engine.probe_now(&id).await?;

    let out = output::render_single(&global.output, &device, devices::detail, |d| {
        d.status.to_string()
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}
