#![no_std]
#![no_main]

use static_cell::StaticCell;

use embassy_embedded_hal::shared_bus::asynch::i2c::I2cDevice;
use embassy_executor::Spawner;
use embassy_sync::{blocking_mutex::raw::NoopRawMutex, mutex::Mutex};
use embassy_time::{Delay, Duration, Timer};

use esp_alloc as _;
use esp_backtrace as _;
use esp_hal::{self as hal};
use esp_println::logger::init_logger;

use hal::{
    analog::adc::{Adc, AdcConfig, Attenuation},
    i2c::master::{BusTimeout, I2c},
    rng::Rng,
    rtc_cntl::Rtc,
    time::Rate,
    timer::timg::TimerGroup,
    Async,
};
use log::{error, info};

extern crate alloc;

mod firmware;

use firmware::mqtt::{
    session_task, MqttSession, ADMIN_BUFFERS, ADMIN_SESSION, SessionBuffers, TELEMETRY_BUFFERS,
    TELEMETRY_SESSION,
};
use firmware::power::{boot_kind, EmbassyClock, EspControl};
use firmware::sensors::{Bme280, NodeSensors, SupplyMonitor};
use firmware::store::{radio_hint, RtcStore};
use firmware::wifi::Wifi;
use templogger::aggregator::PersistentAggregator;
use templogger::config::CONFIG;
use templogger::connectivity::ConnectivityManager;
use templogger::constants::{HEAP_SIZE, VERSION};
use templogger::controller::DutyCycleController;
use templogger::power::{BootKind, DeviceControl, RadioMode};
use templogger::publisher::TelemetryPublisher;
use templogger::sensors::tsl2561::{self, Tsl2561};

esp_bootloader_esp_idf::esp_app_desc!();

static I2C_BUS: StaticCell<Mutex<NoopRawMutex, I2c<'static, Async>>> = StaticCell::new();

#[esp_hal_embassy::main]
async fn main(spawner: Spawner) {
    init_logger(log::LevelFilter::Info);

    let peripherals = esp_hal::init(esp_hal::Config::default());

    let rng = Rng::new(peripherals.RNG);

    esp_alloc::heap_allocator!(size: HEAP_SIZE);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let timg1 = TimerGroup::new(peripherals.TIMG1);

    esp_hal_embassy::init(timg0.timer0);

    let boot = boot_kind();
    info!("templogger {} starting, {:?} boot", VERSION, boot);

    let mut control = EspControl::new(Rtc::new(peripherals.LPWR));

    let Some(store) = RtcStore::take() else {
        error!("Continuation store already in use");
        control.restart()
    };
    let aggregator = PersistentAggregator::boot(boot, store, CONFIG.defaults());

    let (sda, scl) = (peripherals.GPIO21, peripherals.GPIO22);

    let i2c_config = hal::i2c::master::Config::default()
        .with_frequency(Rate::from_khz(100))
        .with_timeout(BusTimeout::BusCycles(24));

    let i2c = match I2c::new(peripherals.I2C0, i2c_config) {
        Ok(i2c) => i2c.with_sda(sda).with_scl(scl).into_async(),
        Err(e) => {
            error!("Failed to configure I2C: {:?}", e);
            control.restart()
        }
    };

    let i2c_bus = I2C_BUS.init(Mutex::new(i2c));

    let climate = Bme280::new(I2cDevice::new(i2c_bus)).await;
    let light = Tsl2561::new(I2cDevice::new(i2c_bus), Delay, tsl2561::DEFAULT_ADDRESS).await;

    let mut adc_config = AdcConfig::new();
    let supply_pin = adc_config.enable_pin(peripherals.GPIO34, Attenuation::_11dB);
    let supply = SupplyMonitor::new(Adc::new(peripherals.ADC1, adc_config), supply_pin);

    let sensors = NodeSensors::new(climate, light, supply);

    // possibly high transient required at init
    // https://github.com/esp-rs/esp-hal/issues/1626
    Timer::after(Duration::from_millis(1000)).await;

    let mut wifi = match Wifi::new(
        peripherals.WIFI,
        timg1.timer0,
        peripherals.RADIO_CLK,
        rng.clone(),
        spawner,
    )
    .await
    {
        Ok(wifi) => wifi,
        Err(e) => {
            error!("Failed to initialise wifi: {:?}", e);
            control.restart()
        }
    };

    if boot == BootKind::Cold || radio_hint() == RadioMode::Enabled {
        wifi.warm_up().await;
    }

    let sessions = [
        (CONFIG.telemetry, &TELEMETRY_SESSION, TELEMETRY_BUFFERS.init(SessionBuffers::new())),
        (CONFIG.admin, &ADMIN_SESSION, ADMIN_BUFFERS.init(SessionBuffers::new())),
    ];
    for (broker, channels, buffers) in sessions {
        if let Err(e) = spawner.spawn(session_task(wifi.stack, broker, channels, buffers)) {
            error!("Failed to spawn MQTT session task: {:?}", e);
            control.restart()
        }
    }

    let connectivity = ConnectivityManager::new(
        wifi,
        MqttSession::new("telemetry", &TELEMETRY_SESSION),
        MqttSession::new("admin", &ADMIN_SESSION),
        rng,
        Delay,
        EspControl::restart_only(),
    );

    let publisher = match TelemetryPublisher::new(CONFIG.channel_id, CONFIG.api_key) {
        Ok(publisher) => publisher,
        Err(_) => {
            error!("Telemetry topic does not fit, check channel_id and api_key");
            control.restart()
        }
    };

    DutyCycleController::new(
        CONFIG.mode,
        aggregator,
        sensors,
        connectivity,
        publisher,
        control,
        EmbassyClock,
    )
    .run()
    .await
}
