//! Wavoip console
//!
//! Drives the orchestrator against simulated devices: wakes the sleeping
//! ones, dials through every device in turn and hangs up once the call has
//! been held for a while.
//!
//! Usage: `wavoip [settings.json]`, or `wavoip --init [settings.json]` to
//! write the default settings.

mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wavoip_core::protocol::{CallStatus, DeviceToken};
use wavoip_core::{CallAttempt, CallOutgoing, CallRequest, Wavoip};
use wavoip_sim::{SimulatedMedia, SimulatedNetwork};

use settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "wavoip=info,wavoip_protocol=info,wavoip_core=info,wavoip_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let settings = match args.next() {
        Some(flag) if flag == "--init" => {
            let Some(path) = args.next().map(PathBuf::from).or_else(Settings::settings_path) else {
                bail!("Could not determine settings path");
            };
            Settings::default().save_to(&path)?;
            info!("Wrote default settings to {}", path.display());
            return Ok(());
        }
        Some(path) => Settings::load_from(&PathBuf::from(path))?,
        None => Settings::load(),
    };
    info!(
        "Starting wavoip console with {} simulated devices",
        settings.devices.len()
    );

    let network = SimulatedNetwork::default();
    for entry in &settings.devices {
        network.configure(entry.token.as_str(), entry.sim.clone());
    }
    let media = SimulatedMedia::new(settings.media.clone());
    let wavoip = Wavoip::new(
        Arc::new(network),
        Arc::new(media),
        settings.session.clone(),
    );
    let _offers = wavoip.on_offer(|offer| {
        info!(
            "Incoming call {} from {} on {}",
            offer.id(),
            offer.peer().phone,
            offer.device_token()
        );
    });

    let devices = wavoip.add_devices(settings.devices.iter().map(|d| d.token.clone()));
    for device in &devices {
        if let Err(e) = device.refresh().await {
            warn!("Could not sync {}: {}", device.token(), e);
        }
    }

    wake_sleeping(&wavoip).await;

    let call = dial(&wavoip, &settings.number).await?;
    info!("Calling {} from {}", settings.number, call.device_token());

    let status = wait_for_answer(&call, Duration::from_millis(settings.answer_timeout_ms)).await;
    match call.as_active() {
        Some(active) if status == Some(CallStatus::Active) => {
            if let Ok(analyser) = active.audio_analyser().await {
                let mut levels = vec![0u8; analyser.frequency_bin_count()];
                analyser.byte_frequency_data(&mut levels);
                info!("Audio analyser ready with {} bins", levels.len());
            }
            tokio::time::sleep(Duration::from_millis(settings.hold_ms)).await;
            active.end().await?;
        }
        _ if call.is_terminal() => {}
        _ => {
            warn!("No answer within {} ms, hanging up", settings.answer_timeout_ms);
            call.end().await?;
        }
    }

    info!("Call finished with status {}", call.status());
    Ok(())
}

/// Wake every hibernating device, logging each outcome as it arrives
async fn wake_sleeping(wavoip: &Wavoip) {
    let sleeping: Vec<DeviceToken> = wavoip
        .devices()
        .iter()
        .filter(|d| d.status().is_some_and(|s| s.is_hibernating()))
        .map(|d| d.token().clone())
        .collect();
    if sleeping.is_empty() {
        return;
    }

    let mut wakeups = wavoip.wake_up_devices_iterator(&sleeping);
    while let Some(outcome) = wakeups.next().await {
        if outcome.waken {
            info!("Device {} is awake", outcome.token);
        } else {
            warn!("Device {} did not wake up", outcome.token);
        }
    }
}

/// Try the devices in order until one places the call
async fn dial(wavoip: &Wavoip, number: &str) -> anyhow::Result<CallOutgoing> {
    let mut attempts = wavoip.start_call_iterator(CallRequest::new(number));
    while let Some(attempt) = attempts.next().await {
        match attempt {
            CallAttempt::Failed { token, reason } => warn!("Device {} failed: {}", token, reason),
            CallAttempt::Connected { call, .. } => return Ok(call),
            CallAttempt::Exhausted { message } => bail!(message),
        }
    }
    bail!("dispatch ended without a result")
}

/// Wait until the call is answered or over; `None` on timeout
async fn wait_for_answer(call: &CallOutgoing, timeout: Duration) -> Option<CallStatus> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = call.on_status(move |status| {
        info!("Call status: {}", status);
        let _ = tx.send(status);
    });

    let settled = if call.status() == CallStatus::Active || call.is_terminal() {
        Some(call.status())
    } else {
        tokio::time::timeout(timeout, async {
            while let Some(status) = rx.recv().await {
                if status == CallStatus::Active || status.is_terminal() {
                    return Some(status);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    };
    subscription.unsubscribe();
    settled
}
