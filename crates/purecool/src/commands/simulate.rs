//! `purecool simulate`: import the configured devices as config entries and
//! drive each one end to end against an in-memory fan.

use std::collections::BTreeMap;
use std::sync::Arc;

use secrecy::SecretString;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;

use purecool_config::{Config, coordinator_config, device_to_entry_data};
use purecool_core::{
    ConnectFailure, CoreError, DEFAULT_DEVICE_TYPE, DeviceClient, DeviceState, EntityRegistry,
    EntityValue, EntryData, EntryId, EntryManager, EntryOptions, ImportOutcome, MemoryDevice,
    RenderRequest, ViewEntity,
};

use crate::cli::{FailMode, GlobalOpts, SimulateArgs};
use crate::commands::load;
use crate::error::CliError;

pub async fn handle(args: SimulateArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = load(global)?;
    let imports = entry_data(&cfg, &args)?;

    // One fan per serial, handed out by the factory at setup.
    let failure = args.fail_connect.map(|mode| match mode {
        FailMode::InvalidAuth => ConnectFailure::InvalidAuth,
        FailMode::CannotConnect => ConnectFailure::CannotConnect,
    });
    let mut fans: BTreeMap<String, Arc<MemoryDevice>> = BTreeMap::new();
    for data in &imports {
        fans.entry(data.serial.clone()).or_insert_with(|| {
            let fan = MemoryDevice::from_entry(data).with_state(sample_state());
            fan.fail_connect(failure);
            Arc::new(fan)
        });
    }
    let fans = Arc::new(fans);

    let (tx, mut rx) = mpsc::unbounded_channel::<RenderRequest>();
    let registry = Arc::new(EntityRegistry::new(Arc::new(tx)));
    let factory = {
        let fans = Arc::clone(&fans);
        move |data: &EntryData| -> Result<Arc<dyn DeviceClient>, CoreError> {
            let fan = fans.get(&data.serial).ok_or_else(|| CoreError::CannotConnect {
                reason: format!("no simulated fan for {}", data.serial),
            })?;
            let client: Arc<dyn DeviceClient> = fan.clone();
            Ok(client)
        }
    };
    let manager = EntryManager::new(
        Arc::new(factory),
        registry.clone(),
        coordinator_config(&cfg.coordinator),
    );

    let mut entry_ids: Vec<EntryId> = Vec::new();
    for data in imports {
        let serial = data.serial.clone();
        let outcome = manager
            .import_entry(data)
            .await
            .map_err(|e| CliError::from_setup(e, &serial))?;
        if let ImportOutcome::Updated(_) = outcome {
            info!(serial = %serial, "device listed more than once, keeping the last profile");
        }
        if !entry_ids.contains(&outcome.entry_id()) {
            entry_ids.push(outcome.entry_id());
        }
    }

    for &entry_id in &entry_ids {
        let serial = manager
            .entry(entry_id)
            .map(|entry| entry.data.serial)
            .unwrap_or_default();
        manager
            .setup(entry_id)
            .await
            .map_err(|e| CliError::from_setup(e, &serial))?;
    }

    // Alternate a pushed speed change with each pull.
    for cycle in 1..=args.cycles {
        let speed = cycle % 10 + 1;
        for &entry_id in &entry_ids {
            let runtime = manager
                .runtime(entry_id)
                .ok_or_else(|| CoreError::Internal("entry has no runtime after setup".into()))?;
            if let Some(fan) = fans.get(runtime.device.serial()) {
                fan.push_state_change([("fnsp", format!("{speed:04}"))]);
            }
            let outcome = runtime.coordinator.refresh().await;
            info!(
                cycle,
                serial = runtime.device.serial(),
                success = outcome.is_success(),
                "cycle finished"
            );
        }
    }

    if args.continuous_monitoring {
        for &entry_id in &entry_ids {
            manager
                .update_options(
                    entry_id,
                    EntryOptions {
                        continuous_monitoring: true,
                    },
                )
                .await?;
        }
    }

    let mut renders: BTreeMap<String, usize> = BTreeMap::new();
    while let Ok(request) = rx.try_recv() {
        *renders.entry(request.trigger.to_string()).or_default() += 1;
    }

    if args.json {
        let entries: Vec<_> = entry_ids
            .iter()
            .map(|&entry_id| {
                let rendered: Vec<_> = registry
                    .entities(entry_id)
                    .iter()
                    .map(ViewEntity::render)
                    .collect();
                json!({
                    "serial": manager.entry(entry_id).map(|entry| entry.data.serial),
                    "options": manager.options(entry_id),
                    "entities": rendered,
                })
            })
            .collect();
        let out = json!({ "entries": entries, "renders": renders });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for &entry_id in &entry_ids {
            if let Some(entry) = manager.entry(entry_id) {
                println!("# {}", entry.title);
            }
            for entity in registry.entities(entry_id) {
                let state = entity.render();
                let availability = if state.available { "" } else { " (unavailable)" };
                println!(
                    "{:<40} {}{availability}",
                    state.name,
                    describe(&state.value)
                );
            }
        }
        let summary: Vec<String> = renders
            .iter()
            .map(|(trigger, count)| format!("{trigger}={count}"))
            .collect();
        println!("renders: {}", summary.join(" "));
    }

    manager.shutdown().await;
    Ok(())
}

/// Entry data for every configured device, by profile name. With no
/// devices configured, a single fan with `--serial` stands in.
fn entry_data(cfg: &Config, args: &SimulateArgs) -> Result<Vec<EntryData>, CliError> {
    if cfg.devices.is_empty() {
        let data = EntryData::new(args.serial.clone(), SecretString::from("simulated".to_string()))
            .with_device_type(DEFAULT_DEVICE_TYPE);
        return Ok(vec![data]);
    }
    cfg.devices
        .iter()
        .map(|(name, profile)| device_to_entry_data(profile, name).map_err(CliError::from))
        .collect()
}

fn describe(value: &EntityValue) -> String {
    match value {
        EntityValue::Fan(fan) if fan.is_on => format!("on {}%", fan.percentage),
        EntityValue::Fan(_) => "off".into(),
        EntityValue::Sensor(Some(v)) => v.to_string(),
        EntityValue::Sensor(None) | EntityValue::Number(None) => "unknown".into(),
        EntityValue::Switch(true) => "on".into(),
        EntityValue::Switch(false) => "off".into(),
        EntityValue::Number(Some(n)) => n.to_string(),
    }
}

/// A fan running at speed 4, oscillating 90..270, with typical readings.
fn sample_state() -> DeviceState {
    let product = json!({
        "fpwr": "ON",
        "fnsp": "0004",
        "fdir": "ON",
        "auto": "OFF",
        "nmod": "OFF",
        "oson": "ON",
        "osal": "0090",
        "osau": "0270",
        "sltm": "OFF",
        "rhtm": "OFF",
        "ercd": "NONE",
        "wacd": "NONE",
    });
    let environment = json!({
        "tact": "2955",
        "hact": "0045",
        "pm25": "0003",
        "pm10": "0005",
        "va10": "0010",
        "noxl": "0004",
        "hflr": "0090",
        "cflr": "0080",
    });
    DeviceState::new(as_map(product), as_map(environment))
}

fn as_map(value: serde_json::Value) -> purecool_core::model::FieldMap {
    match value {
        serde_json::Value::Object(map) => map,
        _ => purecool_core::model::FieldMap::new(),
    }
}
