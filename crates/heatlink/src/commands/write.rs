//! `heatlink write`: set one register.

use heatlink_core::PollingCoordinator;

use crate::cli::{GlobalOpts, WriteArgs};
use crate::error::CliError;
use crate::output;

use super::read::Reading;

pub async fn handle(
    coordinator: &PollingCoordinator,
    args: &WriteArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let id = super::resolve_entity(coordinator.catalog(), &args.entity)?;

    let accepted = coordinator.write(id, &args.value).await;
    coordinator.shutdown().await;

    if !accepted? {
        return Err(CliError::WriteRejected {
            entity: args.entity.clone(),
        });
    }

    let reading = Reading::from_store(coordinator.store(), id);
    let out = output::render_list(
        global.output,
        std::slice::from_ref(&reading),
        Reading::to_row,
        Reading::to_line,
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
