use core::time::Duration;

use embassy_time::Instant;
use esp_hal::rtc_cntl::{reset_reason, sleep::TimerWakeupSource, Rtc, SocResetReason};
use esp_hal::system::{software_reset, Cpu};
use log::{info, warn};

use templogger::power::{BootKind, Clock, DeviceControl, DormancyPlan};

use super::store::set_radio_hint;

/// Deep-sleep wake-ups and software resets keep RTC memory, everything else
/// starts from scratch.
pub fn boot_kind() -> BootKind {
    let reason = reset_reason(Cpu::ProCpu);
    info!("Reset reason: {:?}", reason);
    match reason {
        Some(SocResetReason::CoreDeepSleep)
        | Some(SocResetReason::CoreSw)
        | Some(SocResetReason::Cpu0Sw) => BootKind::Resume,
        _ => BootKind::Cold,
    }
}

/// Restart and deep sleep. Only the instance holding the RTC controller can
/// put the chip to sleep.
pub struct EspControl {
    rtc: Option<Rtc<'static>>,
}

impl EspControl {
    pub fn new(rtc: Rtc<'static>) -> Self {
        Self { rtc: Some(rtc) }
    }

    pub fn restart_only() -> Self {
        Self { rtc: None }
    }
}

impl DeviceControl for EspControl {
    fn restart(&mut self) -> ! {
        warn!("Restarting");
        software_reset()
    }

    fn enter_dormancy(&mut self, plan: DormancyPlan) -> ! {
        set_radio_hint(plan.radio);
        let Some(rtc) = self.rtc.as_mut() else {
            warn!("No RTC controller to sleep with, restarting instead");
            software_reset()
        };
        info!("Entering deep sleep for {}s", plan.sleep_seconds);
        let timer = TimerWakeupSource::new(Duration::from_secs(u64::from(plan.sleep_seconds)));
        rtc.sleep_deep(&[&timer])
    }
}

pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }
}
