use embassy_executor::Spawner;
use embassy_net::{Runner, Stack, StackResources};
use embassy_time::{with_timeout, Duration};

use esp_hal::peripherals::{RADIO_CLK, WIFI};
use esp_hal::rng::Rng;
use esp_wifi::{
    wifi::{ClientConfiguration, Configuration, WifiController, WifiDevice},
    EspWifiController, EspWifiTimerSource,
};

use core::str::FromStr;
use heapless::String;
use log::{info, warn};
use static_cell::StaticCell;

use templogger::config::CONFIG;
use templogger::constants::WIFI_CONNECT_TIMEOUT_SECS;
use templogger::transport::{Network, NetworkError};

static RESOURCES: StaticCell<StackResources<5>> = StaticCell::new();
static WIFI_INIT: StaticCell<EspWifiController<'static>> = StaticCell::new();

#[derive(Debug)]
pub enum Error {
    WifiInitFailed,
    HostnameTooLong,
    TaskSpawnFailed,
}

/// Station interface driven on demand: the radio stays off until the node
/// needs the network and is switched off again before dormancy.
pub struct Wifi {
    pub stack: Stack<'static>,
    controller: WifiController<'static>,
}

impl Wifi {
    pub async fn new(
        wifi: WIFI<'static>,
        timer: impl EspWifiTimerSource + 'static,
        radio_clk: RADIO_CLK<'static>,
        mut rng: Rng,
        spawner: Spawner,
    ) -> Result<Self, Error> {
        let init = WIFI_INIT.init(
            esp_wifi::init(timer, rng.clone(), radio_clk).map_err(|_| Error::WifiInitFailed)?,
        );
        let (controller, interfaces) =
            esp_wifi::wifi::new(init, wifi).map_err(|_| Error::WifiInitFailed)?;

        let mut dhcp_config = embassy_net::DhcpConfig::default();
        dhcp_config.hostname = Some(
            String::<32>::from_str(CONFIG.device_id).map_err(|_| Error::HostnameTooLong)?,
        );

        let seed = (rng.random() as u64) << 32 | rng.random() as u64;
        let config = embassy_net::Config::dhcpv4(dhcp_config);

        let resources = RESOURCES.init(StackResources::new());
        let (stack, runner) = embassy_net::new(interfaces.sta, config, resources, seed);

        spawner
            .spawn(net_task(runner))
            .map_err(|_| Error::TaskSpawnFailed)?;

        Ok(Self { stack, controller })
    }

    /// Starts the radio ahead of the first connection attempt.
    pub async fn warm_up(&mut self) {
        if let Err(e) = self.start().await {
            warn!("Failed to start radio early: {:?}", e);
        }
    }

    async fn start(&mut self) -> Result<(), NetworkError> {
        if matches!(self.controller.is_started(), Ok(true)) {
            return Ok(());
        }

        if CONFIG.wifi_ssid.is_empty() {
            return Err(NetworkError::Misconfigured);
        }
        let client_config = Configuration::Client(ClientConfiguration {
            ssid: CONFIG
                .wifi_ssid
                .try_into()
                .map_err(|_| NetworkError::Misconfigured)?,
            password: CONFIG
                .wifi_psk
                .try_into()
                .map_err(|_| NetworkError::Misconfigured)?,
            ..Default::default()
        });
        self.controller
            .set_configuration(&client_config)
            .map_err(|_| NetworkError::Misconfigured)?;

        info!("Starting wifi");
        self.controller
            .start_async()
            .await
            .map_err(|_| NetworkError::RadioFailure)?;
        info!("Wifi started!");
        Ok(())
    }
}

impl Network for Wifi {
    fn is_up(&self) -> bool {
        self.stack.is_link_up() && self.stack.config_v4().is_some()
    }

    async fn bring_up(&mut self) -> Result<(), NetworkError> {
        self.start().await?;

        info!("About to connect to {:?}...", CONFIG.wifi_ssid);
        match with_timeout(
            Duration::from_secs(WIFI_CONNECT_TIMEOUT_SECS),
            self.controller.connect_async(),
        )
        .await
        {
            Ok(Ok(())) => {
                info!("Wifi connected!");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("Failed to connect to wifi: {:?}", e);
                Err(NetworkError::RadioFailure)
            }
            Err(_) => {
                warn!("Wifi connection timed out");
                Err(NetworkError::RadioFailure)
            }
        }
    }

    async fn shut_down(&mut self) {
        if matches!(self.controller.is_connected(), Ok(true)) {
            let _ = self.controller.disconnect_async().await;
        }
        if let Err(e) = self.controller.stop_async().await {
            warn!("Failed to stop wifi: {:?}", e);
        }
        info!("Wifi off");
    }
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}
