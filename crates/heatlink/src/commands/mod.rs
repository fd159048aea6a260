//! Command dispatch: bridges CLI args -> coordinator calls -> output formatting.

pub mod catalog;
pub mod check;
pub mod config_cmd;
pub mod read;
pub mod watch;
pub mod write;

use std::sync::Arc;

use heatlink_core::{Catalog, DeviceConfig, EntityDescriptor, PollingCoordinator};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a device-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    device: DeviceConfig,
    catalog: Catalog,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Read(args) => {
            let coordinator = PollingCoordinator::new(device, Arc::new(catalog))?;
            read::handle(&coordinator, &args, global).await
        }
        Command::Write(args) => {
            let mut device = device;
            if args.allow_write {
                device.write_access = true;
            }
            let coordinator = PollingCoordinator::new(device, Arc::new(catalog))?;
            write::handle(&coordinator, &args, global).await
        }
        Command::Watch(args) => {
            let mut device = device;
            if let Some(interval) = args.interval {
                device.poll_interval = interval.into();
            }
            let coordinator = PollingCoordinator::new(device, Arc::new(catalog))?;
            watch::handle(&coordinator, &args, global).await
        }
        Command::Check => {
            let coordinator = PollingCoordinator::new(device, Arc::new(catalog))?;
            check::handle(&coordinator, global).await
        }
        // Handled before a device is resolved
        Command::Catalog(_) | Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}

/// Resolve a register argument: numeric id first, then catalog key or name.
pub fn resolve_entity(catalog: &Catalog, identifier: &str) -> Result<u32, CliError> {
    if let Ok(id) = identifier.trim().parse::<u32>() {
        return Ok(id);
    }
    catalog
        .find(identifier.trim())
        .map(|d: &EntityDescriptor| d.id)
        .ok_or_else(|| CliError::NotFound {
            identifier: identifier.into(),
        })
}
