//! Continuation record storage in RTC fast memory, which is retained through
//! deep sleep and software resets but not through a power cycle.

use core::ptr::addr_of_mut;
use core::sync::atomic::{AtomicBool, Ordering};

use embedded_storage::{ReadStorage, Storage};

use templogger::power::RadioMode;

const RTC_STORE_LEN: usize = 64;
const RADIO_ENABLED: u8 = 0xA5;

#[esp_hal::ram(unstable(rtc_fast, persistent))]
static mut RECORD_AREA: [u8; RTC_STORE_LEN] = [0; RTC_STORE_LEN];

#[esp_hal::ram(unstable(rtc_fast, persistent))]
static mut RADIO_HINT: u8 = 0;

static TAKEN: AtomicBool = AtomicBool::new(false);

#[derive(Debug)]
pub enum Error {
    OutOfBounds,
}

pub struct RtcStore {
    area: &'static mut [u8; RTC_STORE_LEN],
}

impl RtcStore {
    /// Hands out the retained area. Returns `None` once it has been taken.
    pub fn take() -> Option<Self> {
        if TAKEN.swap(true, Ordering::AcqRel) {
            return None;
        }
        // SAFETY: guarded by TAKEN, this is the only reference ever created
        let area = unsafe { &mut *addr_of_mut!(RECORD_AREA) };
        Some(Self { area })
    }

    fn range(offset: u32, len: usize) -> Result<core::ops::Range<usize>, Error> {
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= RTC_STORE_LEN => Ok(start..end),
            _ => Err(Error::OutOfBounds),
        }
    }
}

impl ReadStorage for RtcStore {
    type Error = Error;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let range = Self::range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.area[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        RTC_STORE_LEN
    }
}

impl Storage for RtcStore {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let range = Self::range(offset, bytes.len())?;
        self.area[range].copy_from_slice(bytes);
        Ok(())
    }
}

/// Radio state requested by the previous execution. Anything but the marker
/// written by [`set_radio_hint`] reads as disabled.
pub fn radio_hint() -> RadioMode {
    // SAFETY: single byte, only touched from the main task
    match unsafe { *addr_of_mut!(RADIO_HINT) } {
        RADIO_ENABLED => RadioMode::Enabled,
        _ => RadioMode::Disabled,
    }
}

pub fn set_radio_hint(mode: RadioMode) {
    let value = match mode {
        RadioMode::Enabled => RADIO_ENABLED,
        RadioMode::Disabled => 0,
    };
    // SAFETY: single byte, only touched from the main task
    unsafe { *addr_of_mut!(RADIO_HINT) = value };
}
