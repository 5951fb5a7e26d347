//! Startup registry: upserts a static manifest of cron definitions into D
//! before the CronGenerator's first tick (§4.2 supplemental, §9's
//! class-catalog-to-data-driven-registry redesign).

use crate::schedule::CronSchedule;
use chrono::Utc;
use eventide_store::{CronDefinition, CronDefinitionPatch, DStore, ManifestOverrides};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// One manifest entry, as read from the registry file.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub event_type: String,
    pub action: String,
    #[serde(default = "default_payload")]
    pub payload: String,
    #[serde(default = "default_actor")]
    pub actor: String,
    pub cron: String,
    pub timezone: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_payload() -> String {
    "{}".to_string()
}

fn default_actor() -> String {
    "system".to_string()
}

fn default_max_retries() -> u32 {
    3
}

/// The full manifest: a list of entries, loaded from a JSON file at
/// `event_registry_path`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

/// Loads the manifest from a JSON file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_manifest(path: &str) -> Result<Manifest, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Upserts every entry in `manifest` into D by name: a new name is inserted
/// fresh; an existing name has its class-default fields refreshed unless the
/// corresponding override flag is set. An entry whose cron expression or
/// timezone fails to validate is logged and skipped, not fatal to the load.
pub async fn upsert_manifest(d_store: &Arc<dyn DStore>, manifest: &Manifest) {
    for entry in &manifest.entries {
        if let Err(e) = CronSchedule::parse(&entry.cron, &entry.timezone) {
            warn!(name = %entry.name, error = %e, "skipping invalid manifest entry");
            continue;
        }

        match d_store.find(&entry.name).await {
            Ok(Some(existing)) => {
                if let Err(e) = refresh_existing(d_store, existing, entry).await {
                    warn!(name = %entry.name, error = %e, "failed to refresh manifest entry");
                }
            }
            Ok(None) => {
                if let Err(e) = insert_new(d_store, entry).await {
                    warn!(name = %entry.name, error = %e, "failed to insert manifest entry");
                }
            }
            Err(e) => {
                warn!(name = %entry.name, error = %e, "failed to look up manifest entry");
            }
        }
    }
}

async fn insert_new(
    d_store: &Arc<dyn DStore>,
    entry: &ManifestEntry,
) -> Result<(), eventide_store::StoreError> {
    let now = Utc::now();
    let schedule = CronSchedule::parse(&entry.cron, &entry.timezone)
        .expect("validated by upsert_manifest before calling insert_new");
    let mut definition = CronDefinition::new(
        &entry.name,
        &entry.event_type,
        &entry.action,
        &entry.payload,
        &entry.actor,
        &entry.cron,
        &entry.timezone,
        entry.max_retries,
    );
    definition.next_fire = schedule.next_after(now);
    d_store.create(definition).await?;
    info!(name = %entry.name, "inserted cron definition from manifest");
    Ok(())
}

async fn refresh_existing(
    d_store: &Arc<dyn DStore>,
    existing: CronDefinition,
    entry: &ManifestEntry,
) -> Result<(), eventide_store::StoreError> {
    let overrides: ManifestOverrides = existing.overrides;
    let patch = CronDefinitionPatch {
        event_type: (!overrides.event_type).then(|| entry.event_type.clone()),
        action: (!overrides.action).then(|| entry.action.clone()),
        default_payload: (!overrides.default_payload).then(|| entry.payload.clone()),
        cron_expression: (!overrides.cron_expression).then(|| entry.cron.clone()),
        timezone: (!overrides.timezone).then(|| entry.timezone.clone()),
        ..Default::default()
    };
    d_store.update_by_id(existing.id, patch).await?;
    info!(name = %entry.name, "refreshed cron definition from manifest");
    Ok(())
}
