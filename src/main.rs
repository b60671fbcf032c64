//! ClimaStat firmware — main entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  Adapters (outer ring)                   │
//! │                                                          │
//! │  DhtSensor     RelayUart      MqttAdapter                │
//! │  (SensorPort)  (RelayBus+Delay) (MessageBus)             │
//! │  SntpClock     NvsAdapter     wifi::connect_station      │
//! │  (TimeSource)  (Config+Storage)                          │
//! │                                                          │
//! │  ─────────────── Port Trait Boundary ─────────────────   │
//! │                                                          │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │        ControlLoop (pure logic)                    │  │
//! │  │  rules · actuator interlocks · clock sync          │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The supervisor at the bottom of `main` implements the fatal-fault
//! policy: log, persist the fault and the live config, wait 20 s so the
//! restart cannot tight-loop against a broken peripheral, hard reset.

#![deny(unused_must_use)]

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use std::time::{SystemTime, UNIX_EPOCH};

    use esp_idf_hal::delay::FreeRtos;
    use esp_idf_hal::gpio::{AnyIOPin, IOPin};
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_hal::uart::{self, UartDriver};
    use esp_idf_hal::units::Hertz;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use log::{error, info, warn};

    use climastat::adapters::dht::DhtSensor;
    use climastat::adapters::mqtt::MqttAdapter;
    use climastat::adapters::nvs::NvsAdapter;
    use climastat::adapters::relay_uart::RelayUart;
    use climastat::adapters::sntp::SntpClock;
    use climastat::adapters::wifi;
    use climastat::app::ports::{
        ConfigStoreError, ConfigStorePort, DelayPort, RelayBus, SensorPort,
    };
    use climastat::app::service::ControlLoop;
    use climastat::clock::ClockSync;
    use climastat::config::Config;
    use climastat::diagnostics::{FaultEntry, FaultLog};
    use climastat::error::{ActuatorError, SensorError};
    use climastat::state::SensorReading;

    /// The control loop wants one object for the whole hardware side.
    struct Hardware<'d> {
        dht: DhtSensor<'d>,
        relay: RelayUart<'d>,
    }

    impl SensorPort for Hardware<'_> {
        fn measure(&mut self) -> Result<SensorReading, SensorError> {
            self.dht.measure()
        }
    }

    impl RelayBus for Hardware<'_> {
        fn write_frame(&mut self, frame: [u8; 4]) -> Result<(), ActuatorError> {
            self.relay.write_frame(frame)
        }
    }

    impl DelayPort for Hardware<'_> {
        fn delay_ms(&mut self, ms: u32) {
            self.relay.delay_ms(ms);
        }
    }

    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;
    info!("climastat v{}", env!("CARGO_PKG_VERSION"));

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    // ── 2. Network ────────────────────────────────────────────
    let _wifi = wifi::connect_station(peripherals.modem, sysloop, nvs_partition)
        .map_err(|e| anyhow::anyhow!("WiFi bring-up failed: {e}"))?;

    // ── 3. Persistence ────────────────────────────────────────
    let mut nvs = NvsAdapter::new().map_err(|e| anyhow::anyhow!("NVS init failed: {e}"))?;
    let config = match nvs.load() {
        Ok(c) => {
            info!("loaded stored configuration");
            c
        }
        Err(ConfigStoreError::NotFound) => {
            info!("no stored configuration, using defaults");
            Config::default()
        }
        Err(e) => {
            warn!("stored configuration unreadable ({e}), using defaults");
            Config::default()
        }
    };

    let mut fault_log = FaultLog::new();
    fault_log.init(&nvs);
    for entry in fault_log.read_all(&nvs) {
        warn!("previous fatal fault at ts={}: {}", entry.ts, entry.reason);
    }

    // ── 4. Hardware ───────────────────────────────────────────
    let dht = DhtSensor::new(peripherals.pins.gpio4.downgrade())
        .map_err(|e| anyhow::anyhow!("DHT init failed: {e}"))?;

    let uart_config = uart::config::Config::new().baudrate(Hertz(115_200));
    let uart = UartDriver::new(
        peripherals.uart1,
        peripherals.pins.gpio17,
        peripherals.pins.gpio16,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &uart_config,
    )?;

    let mut hw = Hardware {
        dht,
        relay: RelayUart::new(uart),
    };

    // ── 5. Control loop ───────────────────────────────────────
    let mut bus = MqttAdapter::new(config.broker_addr.as_str());
    let clock = ClockSync::new(SntpClock::new());
    let mut control = ControlLoop::new(config, clock);

    let fault = match control.startup(&mut hw, &mut bus) {
        Ok(()) => control.run(&mut hw, &mut bus, &nvs).err(),
        Err(e) => Some(e),
    };

    // ── 6. Fatal-fault supervisor ─────────────────────────────
    // Only reached with actuators in an unknown state; a hard reset
    // re-initialises every relay to Off.
    if let Some(e) = fault {
        error!("fatal fault: {e}");
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        fault_log.record(&mut nvs, &FaultEntry::new(ts, &format!("{e}")));
        if let Err(se) = nvs.save(control.config()) {
            warn!("config flush before restart failed: {se}");
        }
        warn!("restarting in 20 s");
        FreeRtos::delay_ms(20_000);
        esp_idf_hal::reset::restart();
    }
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("climastat targets the ESP32; host builds are for the test suite only");
}
