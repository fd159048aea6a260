//! `heatlink read`: one-shot fetch of selected registers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;

use heatlink_core::{CatalogTransform, PollingCoordinator, Sample, Value, ValueStore};

use crate::cli::{GlobalOpts, ReadArgs};
use crate::error::CliError;
use crate::output;

// ── Views ────────────────────────────────────────────────────────────

/// One register as printed by `read` and `watch`.
#[derive(Debug, Serialize)]
pub struct Reading {
    pub id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub name: String,
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub raw: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

#[derive(Tabled)]
pub struct ReadingRow {
    #[tabled(rename = "ID")]
    id: u32,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Raw")]
    raw: String,
}

impl Reading {
    /// Build a view of `id` from the store, falling back to catalog metadata.
    pub fn from_store(store: &ValueStore, id: u32) -> Self {
        let descriptor = store.catalog().get(id);
        let sample = store.get(id);
        let name = sample
            .as_deref()
            .map(|s: &Sample| s.name.clone())
            .or_else(|| descriptor.map(|d| d.vendor_name.clone()))
            .unwrap_or_else(|| format!("entity_{id}"));

        Self {
            id,
            key: descriptor.map(|d| d.key.clone()),
            name,
            value: sample.as_ref().and_then(|s| s.transformed.clone()),
            unit: descriptor.and_then(|d| d.unit.clone()),
            raw: sample.as_ref().map(|s| s.raw.clone()),
            fetched_at: sample.as_ref().map(|s| s.fetched_at),
        }
    }

    pub fn display_value(&self) -> String {
        self.value
            .as_ref()
            .map_or_else(|| "-".into(), ToString::to_string)
    }

    pub fn to_row(&self) -> ReadingRow {
        ReadingRow {
            id: self.id,
            key: self.key.clone().unwrap_or_default(),
            name: self.name.clone(),
            value: self.display_value(),
            unit: self.unit.clone().unwrap_or_default(),
            raw: self.raw.clone().unwrap_or_default(),
        }
    }

    pub fn to_line(&self) -> String {
        format!("{}={}", self.id, self.display_value())
    }
}

// ── Handler ──────────────────────────────────────────────────────────

pub async fn handle(
    coordinator: &PollingCoordinator,
    args: &ReadArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let catalog = coordinator.catalog();
    let ids: Vec<u32> = if args.entities.is_empty() {
        catalog.readable_ids()
    } else {
        args.entities
            .iter()
            .map(|e| super::resolve_entity(catalog, e))
            .collect::<Result<_, _>>()?
    };

    let records = coordinator
        .client()
        .read_values(&ids)
        .await
        .map_err(heatlink_core::CoreError::from)?;

    let transform = CatalogTransform::new(coordinator.config().sentinel_threshold);
    let stats = coordinator.store().merge(&records, &transform, Utc::now());
    tracing::debug!(
        requested = ids.len(),
        received = stats.received,
        stored = stats.stored,
        sentinel = stats.sentinel,
        "read complete"
    );

    let readings: Vec<Reading> = ids
        .iter()
        .map(|&id| Reading::from_store(coordinator.store(), id))
        .collect();

    let out = output::render_list(
        global.output,
        &readings,
        Reading::to_row,
        Reading::to_line,
    )?;
    output::print_output(&out, global.quiet);

    coordinator.shutdown().await;
    Ok(())
}
