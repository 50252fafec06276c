//! Fader Firmware
//!
//! Firmware for the USB MIDI fader (STM32F042F6). Mounts the parameter
//! storage at boot, repairs it after an interrupted compaction, and answers
//! configuration requests handed over by the USB HID endpoint.

#![no_std]
#![no_main]

use defmt::*;
use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Ticker};
use heapless::Vec;
use {defmt_rtt as _, panic_probe as _};

use fader_hal_stm32f0::flash::{Stm32f0Flash, SEGMENT_SIZE, STORAGE_BASE, STORAGE_SIZE};
use fader_protocol::{ButtonParameter, ConfigHandler, FaderParameter, Report, REPORT_SIZE};
use fader_storage::{Nvm, Recovery, Storage, StorageError, StorageLayout};

type FlashStorage = Storage<Nvm<Stm32f0Flash<'static>>>;

/// Parameter storage, shared by the configuration and maintenance tasks
static STORAGE: Mutex<CriticalSectionRawMutex, Option<FlashStorage>> = Mutex::new(None);

/// Configuration requests received on the HID OUT endpoint
///
/// Fed by the USB HID task, which is not part of this binary yet; until it
/// lands `config_task` idles on this channel.
pub static CONFIG_REQUESTS: Channel<CriticalSectionRawMutex, Report, 1> = Channel::new();

/// Encoded configuration responses, drained by the USB HID task into the
/// IN endpoint
pub static CONFIG_RESPONSES: Channel<CriticalSectionRawMutex, Vec<u8, REPORT_SIZE>, 1> =
    Channel::new();

/// Free space below which the log is compacted while idle
const IDLE_COMPACT_THRESHOLD: u32 = 128;

/// Maintenance interval
const MAINTENANCE_SECS: u64 = 60;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Fader firmware starting...");

    let p = embassy_stm32::init(Default::default());

    let flash = Stm32f0Flash::new(p.FLASH);
    let nvm = Nvm::new(flash, STORAGE_BASE, STORAGE_SIZE);
    let storage = match mount(nvm) {
        Ok(storage) => storage,
        Err(e) => {
            error!("Storage unavailable: {} ({})", e, e.code());
            return;
        }
    };
    *STORAGE.lock().await = Some(storage);

    spawner.spawn(config_task()).unwrap();
    spawner.spawn(maintenance_task()).unwrap();

    info!("All tasks spawned");
}

/// Open the storage, repair it, and provision a blank device
fn mount(nvm: Nvm<Stm32f0Flash<'static>>) -> Result<FlashStorage, StorageError> {
    let mut storage = Storage::new(nvm, StorageLayout::new(SEGMENT_SIZE))?;

    match storage.recover()? {
        Recovery::Clean => {}
        Recovery::Unprovisioned => {
            warn!("Storage unprovisioned, formatting");
            storage.format()?;
        }
        other => warn!("Storage repaired: {}", other),
    }

    let stats = storage.stats()?;
    info!(
        "Storage segment {}: {} live, {} stale, {} bytes free",
        stats.active,
        stats.live,
        stats.tombstoned,
        stats.free
    );

    storage.for_each_live(|parameter, size| {
        if let Some((setting, index)) = FaderParameter::from_id(parameter) {
            debug!("fader {} {}: {} bytes", index, setting, size);
        } else if let Some((setting, index)) = ButtonParameter::from_id(parameter) {
            debug!("button {} {}: {} bytes", index, setting, size);
        } else {
            debug!("parameter {=u16:#x}: {} bytes", parameter, size);
        }
    })?;

    Ok(storage)
}

/// Configuration task - answers GET/SET requests from the host
#[embassy_executor::task]
async fn config_task() {
    info!("Config task started");

    loop {
        let request = CONFIG_REQUESTS.receive().await;
        let response = {
            let mut guard = STORAGE.lock().await;
            match guard.as_mut() {
                Some(storage) => ConfigHandler::handle(storage, &request),
                None => {
                    let mut response = Report::new(request.command);
                    response.set_status(0, StorageError::NoStorage.code());
                    response
                }
            }
        };
        trace!("Config {=u32:#x} -> {}", request.command, response.status(0));
        CONFIG_RESPONSES.send(response.encode_to_vec()).await;
    }
}

/// Maintenance task - compacts a nearly full log before a write needs it
#[embassy_executor::task]
async fn maintenance_task() {
    info!("Maintenance task started");

    let mut ticker = Ticker::every(Duration::from_secs(MAINTENANCE_SECS));

    loop {
        ticker.next().await;

        let mut guard = STORAGE.lock().await;
        let Some(storage) = guard.as_mut() else {
            continue;
        };

        match storage.stats() {
            Ok(stats) if stats.free < IDLE_COMPACT_THRESHOLD && stats.tombstoned > 0 => {
                match storage.compact() {
                    Ok(migration) => info!(
                        "Idle compaction {} -> {}: {} bytes reclaimed",
                        migration.from,
                        migration.to,
                        migration.reclaimed
                    ),
                    Err(e) => warn!("Idle compaction failed: {}", e),
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Storage check failed: {}", e),
        }
    }
}
