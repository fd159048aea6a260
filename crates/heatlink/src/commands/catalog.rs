//! `heatlink catalog`: list register metadata. No device I/O.

use tabled::Tabled;

use heatlink_core::{Catalog, EntityDescriptor};

use crate::cli::{CatalogArgs, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct EntityRow {
    #[tabled(rename = "ID")]
    id: u32,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Vendor Name")]
    vendor_name: String,
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Class")]
    class: String,
    #[tabled(rename = "Access")]
    access: String,
    #[tabled(rename = "Range")]
    range: String,
}

impl From<&EntityDescriptor> for EntityRow {
    fn from(d: &EntityDescriptor) -> Self {
        let range = match (d.min, d.max) {
            (Some(min), Some(max)) => format!("{min}..{max}"),
            (Some(min), None) => format!(">= {min}"),
            (None, Some(max)) => format!("<= {max}"),
            (None, None) => String::new(),
        };
        Self {
            id: d.id,
            key: d.key.clone(),
            vendor_name: d.vendor_name.clone(),
            unit: d.unit.clone().unwrap_or_default(),
            class: d.device_class.map(|c| c.to_string()).unwrap_or_default(),
            access: d.access.to_string(),
            range,
        }
    }
}

pub fn handle(args: &CatalogArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let catalog = active_catalog(global)?;
    let entries: Vec<&EntityDescriptor> = catalog
        .iter()
        .filter(|d| !args.writable || d.is_writable())
        .collect();

    let out = output::render_list(
        global.output,
        &entries,
        |d| EntityRow::from(*d),
        |d| format!("{}\t{}\t{}", d.id, d.key, d.vendor_name),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

/// Catalog of the active profile, or the built-in one when no profile exists.
fn active_catalog(global: &GlobalOpts) -> Result<Catalog, CliError> {
    let cfg = config::load_config()?;
    let name = config::active_profile_name(global, &cfg);
    match cfg.profiles.get(&name) {
        Some(profile) => Ok(heatlink_config::resolve_catalog(profile)?),
        None => Ok(Catalog::builtin()),
    }
}
