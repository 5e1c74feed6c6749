//! # AS7343 18-Channel Spectral Sensor Driver
//!
//! This is a platform-agnostic Rust driver for the ams OSRAM AS7343 spectral sensor,
//! built using the [`embedded-hal`] traits for I2C communication.
//!
//! The AS7343 measures light in 14 spectral bands from violet to near-infrared
//! using six ADCs that are multiplexed over three acquisition cycles:
//! - 12 narrow-band channels (F1-F8, FZ, FY, FXL, NIR)
//! - A visible (clear) photodiode pair sampled in every cycle
//! - Programmable gain (0.5x to 2048x)
//! - Programmable integration time (2.78us steps)
//! - On-chip FIFO holding up to one full 18-channel reading
//! - I2C interface (address 0x39)
//!
//! ## Features
//!
//! - **FIFO-based reading** of 6, 12 or 18 channels per measurement
//! - **Async/await support** with feature gating (optional)
//! - **LED driver control** for reflectance measurements
//! - **`defmt` logging** with the `defmt-03` feature
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use as7343::{As7343, Channel};
//!
//! # fn main() {
//! # let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
//! # let delay = embedded_hal_mock::eh1::delay::NoopDelay::new();
//! // Reset and configure the sensor with the default settings
//! let mut sensor = As7343::open(i2c, delay).unwrap();
//!
//! // Tweak the measurement
//! sensor.set_gain(64.0).unwrap();
//! sensor.set_integration_time(50_000.0).unwrap();
//!
//! // Starts the measurement on first use, then drains one reading from the FIFO
//! let reading = sensor.read().unwrap();
//! if let Some(nir) = reading.get(Channel::Nir) {
//!     // ...
//! #   let _ = nir;
//! }
//! # }
//! ```
//!
//! ## Async Usage
//!
//! Enable the `async` feature to use async/await patterns:
//!
//! ```toml
//! [dependencies]
//! as7343 = { version = "0.1", features = ["async"] }
//! ```
//!
//! ```rust,ignore
//! use as7343::As7343;
//!
//! let mut sensor = As7343::open_async(i2c, delay).await.unwrap();
//! let reading = sensor.read_async().await.unwrap();
//! for (channel, value) in reading.iter() {
//!     println!("{}: {}", channel.name(), value);
//! }
//! ```
//!
//! [`embedded-hal`]: https://crates.io/crates/embedded-hal

#![no_std]
#![deny(missing_docs)]

#[macro_use]
mod fmt;

pub mod ll;

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

#[cfg(feature = "async")]
use embedded_hal_async::{delay::DelayNs as AsyncDelayNs, i2c::I2c as AsyncI2c};

use ll::{reg, DeviceInterface};

pub use ll::I2C_ADDRESS;

/// Maximum number of channels one reading can produce
pub const MAX_CHANNELS: usize = 18;

/// Step size of the wait (ms) and integration (us) timers
const STEP_RESOLUTION: f32 = 2.78;

/// Longest integration time accepted by [`As7343::set_integration_time`], in microseconds
pub const MAX_INTEGRATION_TIME_US: f32 = 65535.0 * STEP_RESOLUTION;

/// CFG1 value the chip comes out of reset with (256x)
const DEFAULT_AGAIN: u8 = 9;

const RESET_DELAY_MS: u32 = 500;
const AUTO_ZERO_DELAY_MS: u32 = 100;
const FIFO_POLL_INTERVAL_MS: u32 = 1;

/// FIFO slots written for every acquisition cycle
const FIFO_MAP_ALL_CHANNELS: u8 = ll::FIFO_MAP_CH5
    | ll::FIFO_MAP_CH4
    | ll::FIFO_MAP_CH3
    | ll::FIFO_MAP_CH2
    | ll::FIFO_MAP_CH1
    | ll::FIFO_MAP_CH0;

const ENABLE_MEASURE: u8 = ll::ENABLE_WEN | ll::ENABLE_SMUXEN | ll::ENABLE_SP_EN | ll::ENABLE_PON;

/// Spectral channels, in FIFO emission order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Channel {
    /// FZ, 450nm (CIE Z)
    Fz,
    /// FY, 555nm (CIE Y)
    Fy,
    /// FXL, 600nm (CIE X)
    Fxl,
    /// NIR, 855nm
    Nir,
    /// Visible top-left photodiode, cycle 1
    Vis1Tl,
    /// Visible bottom-right photodiode, cycle 1
    Vis1Br,
    /// F2, 425nm
    F2,
    /// F3, 475nm
    F3,
    /// F4, 515nm
    F4,
    /// F6, 640nm
    F6,
    /// Visible top-left photodiode, cycle 2
    Vis2Tl,
    /// Visible bottom-right photodiode, cycle 2
    Vis2Br,
    /// F1, 405nm
    F1,
    /// F7, 690nm
    F7,
    /// F8, 745nm
    F8,
    /// F5, 550nm
    F5,
    /// Visible top-left photodiode, cycle 3
    Vis3Tl,
    /// Visible bottom-right photodiode, cycle 3
    Vis3Br,
}

/// Channel produced by each FIFO position of an 18-channel reading
///
/// Cycle 1 fills positions 0-5, cycle 2 positions 6-11 and cycle 3 positions 12-17.
pub const CHANNEL_MAP: [Channel; MAX_CHANNELS] = [
    Channel::Fz,
    Channel::Fy,
    Channel::Fxl,
    Channel::Nir,
    Channel::Vis1Tl,
    Channel::Vis1Br,
    Channel::F2,
    Channel::F3,
    Channel::F4,
    Channel::F6,
    Channel::Vis2Tl,
    Channel::Vis2Br,
    Channel::F1,
    Channel::F7,
    Channel::F8,
    Channel::F5,
    Channel::Vis3Tl,
    Channel::Vis3Br,
];

impl Channel {
    /// Position of this channel in [`CHANNEL_MAP`]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Short name as printed on the datasheet
    pub const fn name(self) -> &'static str {
        match self {
            Channel::Fz => "FZ",
            Channel::Fy => "FY",
            Channel::Fxl => "FXL",
            Channel::Nir => "NIR",
            Channel::Vis1Tl => "VIS1_TL",
            Channel::Vis1Br => "VIS1_BR",
            Channel::F2 => "F2",
            Channel::F3 => "F3",
            Channel::F4 => "F4",
            Channel::F6 => "F6",
            Channel::Vis2Tl => "VIS2_TL",
            Channel::Vis2Br => "VIS2_BR",
            Channel::F1 => "F1",
            Channel::F7 => "F7",
            Channel::F8 => "F8",
            Channel::F5 => "F5",
            Channel::Vis3Tl => "VIS3_TL",
            Channel::Vis3Br => "VIS3_BR",
        }
    }

    /// Peak wavelength in nanometers, `None` for the broadband visible channels
    pub const fn wavelength_nm(self) -> Option<u16> {
        match self {
            Channel::F1 => Some(405),
            Channel::F2 => Some(425),
            Channel::Fz => Some(450),
            Channel::F3 => Some(475),
            Channel::F4 => Some(515),
            Channel::F5 => Some(550),
            Channel::Fy => Some(555),
            Channel::Fxl => Some(600),
            Channel::F6 => Some(640),
            Channel::F7 => Some(690),
            Channel::F8 => Some(745),
            Channel::Nir => Some(855),
            Channel::Vis1Tl
            | Channel::Vis1Br
            | Channel::Vis2Tl
            | Channel::Vis2Br
            | Channel::Vis3Tl
            | Channel::Vis3Br => None,
        }
    }
}

/// Number of channels produced per reading (automatic SMUX mode)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum ChannelCount {
    /// Cycle 1 only
    Six = 6,
    /// Cycles 1 and 2
    Twelve = 12,
    /// All three cycles
    Eighteen = 18,
}

impl ChannelCount {
    /// Map a raw channel count, falling back to [`ChannelCount::Six`] for
    /// anything other than 12 or 18
    pub const fn from_count(count: u8) -> Self {
        match count {
            18 => ChannelCount::Eighteen,
            12 => ChannelCount::Twelve,
            _ => ChannelCount::Six,
        }
    }

    /// Number of FIFO entries one reading produces
    pub const fn count(self) -> u8 {
        self as u8
    }

    const fn cfg20_bits(self) -> u8 {
        match self {
            ChannelCount::Six => ll::CFG20_6_CH,
            ChannelCount::Twelve => ll::CFG20_12_CH,
            ChannelCount::Eighteen => ll::CFG20_18_CH,
        }
    }
}

/// Analog gain steps supported by the AS7343
///
/// The discriminant is the CFG1 register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Gain {
    /// 0.5x gain
    X0_5 = 0,
    /// 1x gain
    X1 = 1,
    /// 2x gain
    X2 = 2,
    /// 4x gain
    X4 = 3,
    /// 8x gain
    X8 = 4,
    /// 16x gain
    X16 = 5,
    /// 32x gain
    X32 = 6,
    /// 64x gain
    X64 = 7,
    /// 128x gain
    X128 = 8,
    /// 256x gain
    X256 = 9,
    /// 512x gain
    X512 = 10,
    /// 1024x gain
    X1024 = 11,
    /// 2048x gain
    X2048 = 12,
}

impl Gain {
    /// Linear gain multiplier
    pub fn multiplier(self) -> f32 {
        match self {
            Gain::X0_5 => 0.5,
            other => (1u32 << (other as u8 - 1)) as f32,
        }
    }
}

impl From<Gain> for f32 {
    fn from(gain: Gain) -> Self {
        gain.multiplier()
    }
}

/// Sensor settings applied by [`As7343::init_with_config`]
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Config {
    /// Linear analog gain, see [`As7343::set_gain`]
    pub gain: f32,
    /// Time between measurement cycles in milliseconds
    pub measurement_time_ms: f32,
    /// Integration time in microseconds
    pub integration_time_us: f32,
    /// Number of integration repeats
    pub integration_repeat: u8,
    /// Channels produced per reading
    pub channels: ChannelCount,
    /// AZ_CONFIG value (0 = never, 255 = before the first cycle, n = every nth cycle)
    pub auto_zero: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gain: 256.0,
            measurement_time_ms: 33.0,
            integration_time_us: 27800.0,
            integration_repeat: 1,
            channels: ChannelCount::Eighteen,
            auto_zero: ll::AZ_BEFORE_FIRST_CYCLE,
        }
    }
}

/// Raw FIFO values in emission order
pub type Samples = heapless::Vec<u16, MAX_CHANNELS>;

/// One spectral reading, keyed by [`Channel`]
///
/// Built by pairing [`CHANNEL_MAP`] with the drained FIFO values position by
/// position. Channels without a value (e.g. in 6 or 12 channel mode) are absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Reading {
    values: [Option<u16>; MAX_CHANNELS],
}

impl Reading {
    /// Pair FIFO samples with [`CHANNEL_MAP`], dropping samples beyond the map
    pub fn from_samples(samples: &[u16]) -> Self {
        let mut values = [None; MAX_CHANNELS];
        for (channel, value) in CHANNEL_MAP.iter().zip(samples) {
            values[channel.index()] = Some(*value);
        }
        Self { values }
    }

    /// Value of a single channel
    pub fn get(&self, channel: Channel) -> Option<u16> {
        self.values[channel.index()]
    }

    /// Channels with a value, in [`CHANNEL_MAP`] order
    pub fn iter(&self) -> impl Iterator<Item = (Channel, u16)> + '_ {
        CHANNEL_MAP
            .iter()
            .zip(self.values.iter())
            .filter_map(|(channel, value)| value.map(|v| (*channel, v)))
    }

    /// Number of channels with a value
    pub fn len(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// True if no channel has a value
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// All possible errors in this crate
#[derive(Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error<E> {
    /// I2C communication error
    I2c(E),
    /// Integration time above [`MAX_INTEGRATION_TIME_US`]
    IntegrationTimeOutOfRange,
    /// FIFO did not fill within the poll budget of [`As7343::read_fifo_bounded`]
    Timeout,
}

impl<E: core::fmt::Debug> core::fmt::Display for Error<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::I2c(e) => write!(f, "I2C error: {:?}", e),
            Error::IntegrationTimeOutOfRange => f.write_str("integration time out of range"),
            Error::Timeout => f.write_str("timed out waiting for FIFO data"),
        }
    }
}

impl<E: core::fmt::Debug> core::error::Error for Error<E> {}

/// CFG1 value for a linear gain: the bit length of the integer gain, 0 for 0.5x
fn gain_to_register(gain: f32) -> u8 {
    if gain == 0.5 {
        return 0;
    }
    let igain = gain as u32;
    (u32::BITS - igain.leading_zeros()) as u8
}

/// WTIME value for a cycle time; out of range values wrap to 8 bits
fn measurement_time_to_wtime(ms: f32) -> u8 {
    libm::roundf((ms - STEP_RESOLUTION) / STEP_RESOLUTION) as i32 as u8
}

/// ASTEP value for an integration time, `None` above [`MAX_INTEGRATION_TIME_US`]
///
/// The lowest bit is always cleared.
fn integration_time_to_astep(us: f32) -> Option<u16> {
    if us > MAX_INTEGRATION_TIME_US {
        return None;
    }
    Some(((us - STEP_RESOLUTION) / STEP_RESOLUTION) as i32 as u16 & 0xFFFE)
}

/// LED drive field for a current in milliamps
fn illumination_current_to_drive(ma: f32) -> u8 {
    ((ma - 4.0) / 2.0) as i32 as u8 & ll::LED_DRIVE_MASK
}

/// High-level AS7343 driver
pub struct As7343<I2C, D> {
    dev: DeviceInterface<I2C>,
    delay: D,
    channels: ChannelCount,
    measuring: bool,
}

impl<I2C, D> As7343<I2C, D> {
    /// Create a driver instance without touching the bus
    ///
    /// Call [`init`](As7343::init) (or use [`open`](As7343::open)) before
    /// taking measurements.
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self {
            dev: DeviceInterface { i2c },
            delay,
            channels: ChannelCount::Eighteen,
            measuring: false,
        }
    }

    /// Number of FIFO entries one reading produces
    pub fn num_channels(&self) -> u8 {
        self.channels.count()
    }

    /// Currently configured channel count
    pub fn channel_count(&self) -> ChannelCount {
        self.channels
    }

    /// True between [`start_measurement`](As7343::start_measurement) and
    /// [`stop_measurement`](As7343::stop_measurement)
    pub fn is_measuring(&self) -> bool {
        self.measuring
    }

    /// Destroy the driver and return the I2C interface and delay
    pub fn destroy(self) -> (I2C, D) {
        (self.dev.i2c, self.delay)
    }
}

impl<I2C, E, D> As7343<I2C, D>
where
    I2C: I2c<Error = E>,
    D: DelayNs,
{
    /// Create a driver instance and initialize the sensor with default settings
    pub fn open(i2c: I2C, delay: D) -> Result<Self, Error<E>> {
        let mut sensor = Self::new(i2c, delay);
        sensor.init()?;
        Ok(sensor)
    }

    /// Reset the sensor and apply the default [`Config`]
    pub fn init(&mut self) -> Result<(), Error<E>> {
        self.init_with_config(&Config::default())
    }

    /// Reset the sensor and apply `config`
    ///
    /// Blocks for 500ms after the software reset.
    pub fn init_with_config(&mut self, config: &Config) -> Result<(), Error<E>> {
        self.write_register(reg::CONTROL, ll::CONTROL_SW_RESET)?;
        self.delay.delay_ms(RESET_DELAY_MS);
        self.measuring = false;

        // Bank 0
        self.write_register(reg::CFG0, 0)?;
        self.write_register(reg::CFG1, DEFAULT_AGAIN)?;

        self.set_gain(config.gain)?;
        self.set_measurement_time(config.measurement_time_ms)?;
        self.set_integration_time_with_repeat(
            config.integration_time_us,
            config.integration_repeat,
        )?;
        self.set_channels(config.channels.count())?;
        self.set_auto_zero(config.auto_zero)?;
        self.write_register(reg::FIFO_MAP, FIFO_MAP_ALL_CHANNELS)?;

        debug!("AS7343 initialized, {} channels", self.channels.count());
        Ok(())
    }

    /// Read the part ID from register bank 1
    ///
    /// Bank 0 is selected again before returning.
    pub fn device_id(&mut self) -> Result<u8, Error<E>> {
        self.modify_register(reg::CFG0, ll::CFG0_BANK, ll::CFG0_BANK)?;
        let id = self.read_register(reg::ID);
        self.modify_register(reg::CFG0, ll::CFG0_BANK, 0)?;
        id
    }

    /// Set the analog gain as a linear multiplier
    ///
    /// `0.5` and integer powers of two from 1 to 2048 map onto the chip's gain
    /// steps. Other values are truncated to an integer and encoded by bit length.
    pub fn set_gain(&mut self, gain: f32) -> Result<(), Error<E>> {
        let value = gain_to_register(gain);
        trace!("gain {} -> CFG1 {}", gain, value);
        self.write_register(reg::CFG1, value)
    }

    /// Set the wait time between measurement cycles in milliseconds
    pub fn set_measurement_time(&mut self, ms: f32) -> Result<(), Error<E>> {
        let value = measurement_time_to_wtime(ms);
        trace!("measurement time {}ms -> WTIME {}", ms, value);
        self.write_register(reg::WTIME, value)
    }

    /// Set the integration time in microseconds
    pub fn set_integration_time(&mut self, us: f32) -> Result<(), Error<E>> {
        self.set_integration_time_with_repeat(us, 1)
    }

    /// Set the integration time in microseconds and the number of integration repeats
    ///
    /// Fails with [`Error::IntegrationTimeOutOfRange`] above
    /// [`MAX_INTEGRATION_TIME_US`] without touching the bus.
    pub fn set_integration_time_with_repeat(&mut self, us: f32, repeat: u8) -> Result<(), Error<E>> {
        let astep = integration_time_to_astep(us).ok_or(Error::IntegrationTimeOutOfRange)?;
        trace!("integration time {}us x{} -> ASTEP {}", us, repeat, astep);
        self.write_register(reg::ATIME, repeat.wrapping_sub(1))?;
        self.dev.write_u16(reg::ASTEP, astep).map_err(Error::I2c)
    }

    /// Set the LED drive current in milliamps, keeping the LED on/off state
    pub fn set_illumination_current(&mut self, ma: f32) -> Result<(), Error<E>> {
        let drive = illumination_current_to_drive(ma);
        self.modify_register(reg::LED, ll::LED_DRIVE_MASK, drive)
    }

    /// Switch the LED on or off, keeping the drive current
    pub fn set_illumination_led(&mut self, on: bool) -> Result<(), Error<E>> {
        let value = if on { ll::LED_ACT } else { 0 };
        self.modify_register(reg::LED, ll::LED_ACT, value)
    }

    /// Select 6, 12 or 18 channels per reading
    ///
    /// Any other count selects 6 channels.
    pub fn set_channels(&mut self, count: u8) -> Result<(), Error<E>> {
        let channels = ChannelCount::from_count(count);
        if channels.count() != count {
            warn!("unsupported channel count {}, using 6", count);
        }
        self.modify_register(reg::CFG20, ll::CFG20_CHANNELS_MASK, channels.cfg20_bits())?;
        self.channels = channels;
        Ok(())
    }

    /// Set how often the chip auto-zeroes (0 = never, 255 = before the first cycle)
    pub fn set_auto_zero(&mut self, frequency: u8) -> Result<(), Error<E>> {
        self.write_register(reg::AZ_CONFIG, frequency)
    }

    /// Power up and start continuous measurements
    ///
    /// Does nothing if measurements are already running.
    pub fn start_measurement(&mut self) -> Result<(), Error<E>> {
        if self.measuring {
            return Ok(());
        }
        self.write_register(reg::ENABLE, ENABLE_MEASURE)?;
        self.measuring = true;
        debug!("measurement started");
        Ok(())
    }

    /// Stop measurements and clear the FIFO; the chip stays powered
    pub fn stop_measurement(&mut self) -> Result<(), Error<E>> {
        self.write_register(reg::ENABLE, ll::ENABLE_PON)?;
        self.write_register(reg::CONTROL, ll::CONTROL_FIFO_CLR)?;
        self.measuring = false;
        debug!("measurement stopped");
        Ok(())
    }

    /// Trigger a manual auto-zero and wait 100ms for it to settle
    pub fn force_autorange(&mut self) -> Result<(), Error<E>> {
        self.write_register(reg::CONTROL, ll::CONTROL_SP_MAN_AZ)?;
        self.delay.delay_ms(AUTO_ZERO_DELAY_MS);
        Ok(())
    }

    /// Number of entries waiting in the FIFO
    pub fn fifo_level(&mut self) -> Result<u8, Error<E>> {
        self.read_register(reg::FIFO_LVL)
    }

    /// Wait for a full reading and drain it from the FIFO
    ///
    /// Polls the FIFO level every millisecond with no timeout: a sensor that
    /// never produces data blocks forever. See
    /// [`read_fifo_bounded`](As7343::read_fifo_bounded) for a bounded wait.
    pub fn read_fifo(&mut self) -> Result<Samples, Error<E>> {
        self.wait_for_fifo(None)?;
        self.drain_fifo()
    }

    /// Like [`read_fifo`](As7343::read_fifo), but gives up with
    /// [`Error::Timeout`] after `max_polls` waits
    pub fn read_fifo_bounded(&mut self, max_polls: u32) -> Result<Samples, Error<E>> {
        self.wait_for_fifo(Some(max_polls))?;
        self.drain_fifo()
    }

    /// Start measurements if needed and return the next reading
    pub fn read(&mut self) -> Result<Reading, Error<E>> {
        self.start_measurement()?;
        let samples = self.read_fifo()?;
        Ok(Reading::from_samples(&samples))
    }

    fn wait_for_fifo(&mut self, max_polls: Option<u32>) -> Result<(), Error<E>> {
        let expected = self.channels.count();
        let mut polls: u32 = 0;
        while self.fifo_level()? < expected {
            if max_polls.is_some_and(|max| polls >= max) {
                warn!("FIFO not filled after {} polls", polls);
                return Err(Error::Timeout);
            }
            self.delay.delay_ms(FIFO_POLL_INTERVAL_MS);
            polls = polls.saturating_add(1);
        }
        trace!("FIFO ready after {} polls", polls);
        Ok(())
    }

    // Stops at whichever comes first: the expected count or an empty FIFO
    fn drain_fifo(&mut self) -> Result<Samples, Error<E>> {
        let mut samples = Samples::new();
        let mut remaining = self.channels.count();
        while remaining > 0 && self.fifo_level()? > 0 {
            let value = self.dev.read_u16(reg::FDATA).map_err(Error::I2c)?;
            if samples.push(value).is_err() {
                break;
            }
            remaining -= 1;
        }
        trace!("drained {} FIFO entries", samples.len());
        Ok(samples)
    }

    // Helper methods for register access
    fn read_register(&mut self, address: u8) -> Result<u8, Error<E>> {
        self.dev.read_u8(address).map_err(Error::I2c)
    }

    fn write_register(&mut self, address: u8, value: u8) -> Result<(), Error<E>> {
        self.dev.write_u8(address, value).map_err(Error::I2c)
    }

    fn modify_register(&mut self, address: u8, mask: u8, value: u8) -> Result<(), Error<E>> {
        self.dev
            .modify_u8(address, mask, value)
            .map(|_| ())
            .map_err(Error::I2c)
    }
}

#[cfg(feature = "async")]
impl<I2C, E, D> As7343<I2C, D>
where
    I2C: AsyncI2c<Error = E>,
    D: AsyncDelayNs,
{
    /// Create a driver instance and initialize the sensor with default settings (async version)
    pub async fn open_async(i2c: I2C, delay: D) -> Result<Self, Error<E>> {
        let mut sensor = Self::new(i2c, delay);
        sensor.init_async().await?;
        Ok(sensor)
    }

    /// Reset the sensor and apply the default [`Config`] (async version)
    pub async fn init_async(&mut self) -> Result<(), Error<E>> {
        self.init_with_config_async(&Config::default()).await
    }

    /// Reset the sensor and apply `config` (async version)
    pub async fn init_with_config_async(&mut self, config: &Config) -> Result<(), Error<E>> {
        self.write_register_async(reg::CONTROL, ll::CONTROL_SW_RESET)
            .await?;
        self.delay.delay_ms(RESET_DELAY_MS).await;
        self.measuring = false;

        // Bank 0
        self.write_register_async(reg::CFG0, 0).await?;
        self.write_register_async(reg::CFG1, DEFAULT_AGAIN).await?;

        self.set_gain_async(config.gain).await?;
        self.set_measurement_time_async(config.measurement_time_ms)
            .await?;
        self.set_integration_time_with_repeat_async(
            config.integration_time_us,
            config.integration_repeat,
        )
        .await?;
        self.set_channels_async(config.channels.count()).await?;
        self.set_auto_zero_async(config.auto_zero).await?;
        self.write_register_async(reg::FIFO_MAP, FIFO_MAP_ALL_CHANNELS)
            .await?;

        debug!("AS7343 initialized, {} channels", self.channels.count());
        Ok(())
    }

    /// Read the part ID from register bank 1 (async version)
    pub async fn device_id_async(&mut self) -> Result<u8, Error<E>> {
        self.modify_register_async(reg::CFG0, ll::CFG0_BANK, ll::CFG0_BANK)
            .await?;
        let id = self.read_register_async(reg::ID).await;
        self.modify_register_async(reg::CFG0, ll::CFG0_BANK, 0)
            .await?;
        id
    }

    /// Set the analog gain as a linear multiplier (async version)
    pub async fn set_gain_async(&mut self, gain: f32) -> Result<(), Error<E>> {
        let value = gain_to_register(gain);
        trace!("gain {} -> CFG1 {}", gain, value);
        self.write_register_async(reg::CFG1, value).await
    }

    /// Set the wait time between measurement cycles in milliseconds (async version)
    pub async fn set_measurement_time_async(&mut self, ms: f32) -> Result<(), Error<E>> {
        let value = measurement_time_to_wtime(ms);
        trace!("measurement time {}ms -> WTIME {}", ms, value);
        self.write_register_async(reg::WTIME, value).await
    }

    /// Set the integration time in microseconds (async version)
    pub async fn set_integration_time_async(&mut self, us: f32) -> Result<(), Error<E>> {
        self.set_integration_time_with_repeat_async(us, 1).await
    }

    /// Set the integration time and number of repeats (async version)
    pub async fn set_integration_time_with_repeat_async(
        &mut self,
        us: f32,
        repeat: u8,
    ) -> Result<(), Error<E>> {
        let astep = integration_time_to_astep(us).ok_or(Error::IntegrationTimeOutOfRange)?;
        trace!("integration time {}us x{} -> ASTEP {}", us, repeat, astep);
        self.write_register_async(reg::ATIME, repeat.wrapping_sub(1))
            .await?;
        self.dev
            .write_u16_async(reg::ASTEP, astep)
            .await
            .map_err(Error::I2c)
    }

    /// Set the LED drive current in milliamps (async version)
    pub async fn set_illumination_current_async(&mut self, ma: f32) -> Result<(), Error<E>> {
        let drive = illumination_current_to_drive(ma);
        self.modify_register_async(reg::LED, ll::LED_DRIVE_MASK, drive)
            .await
    }

    /// Switch the LED on or off (async version)
    pub async fn set_illumination_led_async(&mut self, on: bool) -> Result<(), Error<E>> {
        let value = if on { ll::LED_ACT } else { 0 };
        self.modify_register_async(reg::LED, ll::LED_ACT, value)
            .await
    }

    /// Select 6, 12 or 18 channels per reading (async version)
    pub async fn set_channels_async(&mut self, count: u8) -> Result<(), Error<E>> {
        let channels = ChannelCount::from_count(count);
        if channels.count() != count {
            warn!("unsupported channel count {}, using 6", count);
        }
        self.modify_register_async(reg::CFG20, ll::CFG20_CHANNELS_MASK, channels.cfg20_bits())
            .await?;
        self.channels = channels;
        Ok(())
    }

    /// Set how often the chip auto-zeroes (async version)
    pub async fn set_auto_zero_async(&mut self, frequency: u8) -> Result<(), Error<E>> {
        self.write_register_async(reg::AZ_CONFIG, frequency).await
    }

    /// Power up and start continuous measurements (async version)
    pub async fn start_measurement_async(&mut self) -> Result<(), Error<E>> {
        if self.measuring {
            return Ok(());
        }
        self.write_register_async(reg::ENABLE, ENABLE_MEASURE)
            .await?;
        self.measuring = true;
        debug!("measurement started");
        Ok(())
    }

    /// Stop measurements and clear the FIFO (async version)
    pub async fn stop_measurement_async(&mut self) -> Result<(), Error<E>> {
        self.write_register_async(reg::ENABLE, ll::ENABLE_PON).await?;
        self.write_register_async(reg::CONTROL, ll::CONTROL_FIFO_CLR)
            .await?;
        self.measuring = false;
        debug!("measurement stopped");
        Ok(())
    }

    /// Trigger a manual auto-zero and wait 100ms (async version)
    pub async fn force_autorange_async(&mut self) -> Result<(), Error<E>> {
        self.write_register_async(reg::CONTROL, ll::CONTROL_SP_MAN_AZ)
            .await?;
        self.delay.delay_ms(AUTO_ZERO_DELAY_MS).await;
        Ok(())
    }

    /// Number of entries waiting in the FIFO (async version)
    pub async fn fifo_level_async(&mut self) -> Result<u8, Error<E>> {
        self.read_register_async(reg::FIFO_LVL).await
    }

    /// Wait for a full reading and drain it from the FIFO (async version)
    pub async fn read_fifo_async(&mut self) -> Result<Samples, Error<E>> {
        self.wait_for_fifo_async(None).await?;
        self.drain_fifo_async().await
    }

    /// Bounded FIFO read (async version)
    pub async fn read_fifo_bounded_async(&mut self, max_polls: u32) -> Result<Samples, Error<E>> {
        self.wait_for_fifo_async(Some(max_polls)).await?;
        self.drain_fifo_async().await
    }

    /// Start measurements if needed and return the next reading (async version)
    pub async fn read_async(&mut self) -> Result<Reading, Error<E>> {
        self.start_measurement_async().await?;
        let samples = self.read_fifo_async().await?;
        Ok(Reading::from_samples(&samples))
    }

    async fn wait_for_fifo_async(&mut self, max_polls: Option<u32>) -> Result<(), Error<E>> {
        let expected = self.channels.count();
        let mut polls: u32 = 0;
        while self.fifo_level_async().await? < expected {
            if max_polls.is_some_and(|max| polls >= max) {
                warn!("FIFO not filled after {} polls", polls);
                return Err(Error::Timeout);
            }
            self.delay.delay_ms(FIFO_POLL_INTERVAL_MS).await;
            polls = polls.saturating_add(1);
        }
        trace!("FIFO ready after {} polls", polls);
        Ok(())
    }

    async fn drain_fifo_async(&mut self) -> Result<Samples, Error<E>> {
        let mut samples = Samples::new();
        let mut remaining = self.channels.count();
        while remaining > 0 && self.fifo_level_async().await? > 0 {
            let value = self
                .dev
                .read_u16_async(reg::FDATA)
                .await
                .map_err(Error::I2c)?;
            if samples.push(value).is_err() {
                break;
            }
            remaining -= 1;
        }
        trace!("drained {} FIFO entries", samples.len());
        Ok(samples)
    }

    // Helper methods for async register access
    async fn read_register_async(&mut self, address: u8) -> Result<u8, Error<E>> {
        self.dev.read_u8_async(address).await.map_err(Error::I2c)
    }

    async fn write_register_async(&mut self, address: u8, value: u8) -> Result<(), Error<E>> {
        self.dev
            .write_u8_async(address, value)
            .await
            .map_err(Error::I2c)
    }

    async fn modify_register_async(
        &mut self,
        address: u8,
        mask: u8,
        value: u8,
    ) -> Result<(), Error<E>> {
        self.dev
            .modify_u8_async(address, mask, value)
            .await
            .map(|_| ())
            .map_err(Error::I2c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};
    extern crate std;
    use std::time::Duration;
    use std::vec;
    use std::vec::Vec;

    /// Delay that only records how long it was asked to wait
    #[derive(Debug, Default)]
    struct RecordingDelay {
        total_ns: u64,
    }

    impl RecordingDelay {
        fn total_ms(&self) -> u64 {
            self.total_ns / 1_000_000
        }
    }

    impl DelayNs for RecordingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.total_ns += u64::from(ns);
        }
    }

    fn write(bytes: Vec<u8>) -> I2cTransaction {
        I2cTransaction::write(I2C_ADDRESS, bytes)
    }

    fn read(register: u8, response: Vec<u8>) -> I2cTransaction {
        I2cTransaction::write_read(I2C_ADDRESS, vec![register], response)
    }

    fn init_transactions() -> Vec<I2cTransaction> {
        vec![
            write(vec![reg::CONTROL, 0x08]),
            write(vec![reg::CFG0, 0x00]),
            write(vec![reg::CFG1, 9]),
            // set_gain(256.0)
            write(vec![reg::CFG1, 9]),
            // set_measurement_time(33.0)
            write(vec![reg::WTIME, 11]),
            // set_integration_time(27800.0)
            write(vec![reg::ATIME, 0]),
            write(vec![reg::ASTEP, 0x0E, 0x27]),
            // set_channels(18)
            read(reg::CFG20, vec![0x00]),
            write(vec![reg::CFG20, 0x60]),
            write(vec![reg::AZ_CONFIG, 0xFF]),
            write(vec![reg::FIFO_MAP, 0x7E]),
        ]
    }

    /// Open a sensor on a mock expecting the init sequence followed by `then`
    fn open_with(then: &[I2cTransaction]) -> As7343<I2cMock, RecordingDelay> {
        let mut expectations = init_transactions();
        expectations.extend_from_slice(then);
        let i2c = I2cMock::new(&expectations);
        As7343::open(i2c, RecordingDelay::default()).unwrap()
    }

    fn finish(sensor: As7343<I2cMock, RecordingDelay>) -> RecordingDelay {
        let (mut i2c, delay) = sensor.destroy();
        i2c.done();
        delay
    }

    /// FIFO transactions for `values` when the level is already full
    fn fifo_transactions(values: &[u16]) -> Vec<I2cTransaction> {
        let count = values.len() as u8;
        let mut transactions = vec![read(reg::FIFO_LVL, vec![count])];
        for (i, value) in values.iter().enumerate() {
            transactions.push(read(reg::FIFO_LVL, vec![count - i as u8]));
            transactions.push(read(reg::FDATA, value.to_le_bytes().to_vec()));
        }
        transactions
    }

    #[test]
    fn test_open_runs_init_sequence() {
        let sensor = open_with(&[]);
        assert_eq!(sensor.num_channels(), 18);
        assert!(!sensor.is_measuring());

        let delay = finish(sensor);
        assert_eq!(delay.total_ms(), 500);
    }

    #[test]
    fn test_init_with_config() {
        let config = Config {
            gain: 0.5,
            measurement_time_ms: 2.78,
            integration_time_us: 100.0,
            integration_repeat: 4,
            channels: ChannelCount::Twelve,
            auto_zero: ll::AZ_NEVER,
        };
        let expectations = [
            write(vec![reg::CONTROL, 0x08]),
            write(vec![reg::CFG0, 0x00]),
            write(vec![reg::CFG1, 9]),
            write(vec![reg::CFG1, 0]),
            write(vec![reg::WTIME, 0]),
            write(vec![reg::ATIME, 3]),
            // (100 - 2.78) / 2.78 = 34.97 -> 34
            write(vec![reg::ASTEP, 34, 0]),
            read(reg::CFG20, vec![0x60]),
            write(vec![reg::CFG20, 0x40]),
            write(vec![reg::AZ_CONFIG, 0x00]),
            write(vec![reg::FIFO_MAP, 0x7E]),
        ];
        let i2c = I2cMock::new(&expectations);
        let mut sensor = As7343::new(i2c, RecordingDelay::default());
        sensor.init_with_config(&config).unwrap();
        assert_eq!(sensor.channel_count(), ChannelCount::Twelve);
        finish(sensor);
    }

    #[test]
    fn test_fifo_map_excludes_status_prefix() {
        assert_eq!(FIFO_MAP_ALL_CHANNELS, 0x7E);
        assert_eq!(FIFO_MAP_ALL_CHANNELS & ll::FIFO_MAP_ASTATUS, 0);
    }

    #[test]
    fn test_gain_encoding() {
        assert_eq!(gain_to_register(0.5), 0);
        assert_eq!(gain_to_register(1.0), 1);
        assert_eq!(gain_to_register(2.0), 2);
        assert_eq!(gain_to_register(256.0), DEFAULT_AGAIN);
        assert_eq!(gain_to_register(2048.0), 12);
        // not a gain step: truncated to 3, which takes 2 bits
        assert_eq!(gain_to_register(3.9), 2);
        assert_eq!(gain_to_register(0.0), 0);
    }

    #[test]
    fn test_gain_steps_match_register_values() {
        let steps = [
            Gain::X0_5,
            Gain::X1,
            Gain::X2,
            Gain::X4,
            Gain::X8,
            Gain::X16,
            Gain::X32,
            Gain::X64,
            Gain::X128,
            Gain::X256,
            Gain::X512,
            Gain::X1024,
            Gain::X2048,
        ];
        for gain in steps {
            assert_eq!(gain_to_register(gain.into()), gain as u8, "{:?}", gain);
        }
        assert_eq!(Gain::X256.multiplier(), Config::default().gain);
    }

    #[test]
    fn test_set_gain_writes_cfg1() {
        let sensor_expectations = [write(vec![reg::CFG1, 9]), write(vec![reg::CFG1, 0])];
        let mut sensor = open_with(&sensor_expectations);
        sensor.set_gain(256.0).unwrap();
        sensor.set_gain(0.5).unwrap();
        finish(sensor);
    }

    #[test]
    fn test_measurement_time_encoding() {
        assert_eq!(measurement_time_to_wtime(2.78), 0);
        assert_eq!(measurement_time_to_wtime(5.56), 1);
        // 10.87 steps rounds up
        assert_eq!(measurement_time_to_wtime(33.0), 11);
        // 358.7 steps rounds to 359, which does not fit and wraps to 103
        assert_eq!(measurement_time_to_wtime(1000.0), 103);
    }

    #[test]
    fn test_integration_time_bound() {
        assert!(integration_time_to_astep(MAX_INTEGRATION_TIME_US).is_some());
        assert!(integration_time_to_astep(MAX_INTEGRATION_TIME_US + 1.0).is_none());
        assert!(integration_time_to_astep(1.0e6).is_none());

        let mut us = 0.0f32;
        while us <= MAX_INTEGRATION_TIME_US {
            assert!(integration_time_to_astep(us).is_some(), "{}us", us);
            us += 997.0;
        }
    }

    #[test]
    fn test_astep_is_even() {
        assert_eq!(integration_time_to_astep(27800.0), Some(9998));
        for us in [5.56f32, 8.34, 1000.0, 27800.0, 100_000.0, MAX_INTEGRATION_TIME_US] {
            let astep = integration_time_to_astep(us).unwrap();
            assert_eq!(astep & 1, 0, "{}us -> {}", us, astep);
        }
    }

    #[test]
    fn test_set_integration_time_with_repeat() {
        let sensor_expectations = [
            write(vec![reg::ATIME, 9]),
            write(vec![reg::ASTEP, 0x0E, 0x27]),
        ];
        let mut sensor = open_with(&sensor_expectations);
        sensor
            .set_integration_time_with_repeat(27800.0, 10)
            .unwrap();
        finish(sensor);
    }

    #[test]
    fn test_integration_time_out_of_range_skips_bus() {
        let mut sensor = open_with(&[]);
        let result = sensor.set_integration_time(MAX_INTEGRATION_TIME_US + 10.0);
        assert!(matches!(result, Err(Error::IntegrationTimeOutOfRange)));
        finish(sensor);
    }

    #[test]
    fn test_illumination_current_encoding() {
        assert_eq!(illumination_current_to_drive(4.0), 0);
        assert_eq!(illumination_current_to_drive(10.0), 3);
        assert_eq!(illumination_current_to_drive(258.0), 127);
    }

    #[test]
    fn test_led_on_survives_current_change() {
        let sensor_expectations = [
            read(reg::LED, vec![0x00]),
            write(vec![reg::LED, 0x80]),
            read(reg::LED, vec![0x80]),
            write(vec![reg::LED, 0x83]),
        ];
        let mut sensor = open_with(&sensor_expectations);
        sensor.set_illumination_led(true).unwrap();
        sensor.set_illumination_current(10.0).unwrap();
        finish(sensor);
    }

    #[test]
    fn test_led_off_keeps_current() {
        let sensor_expectations = [
            read(reg::LED, vec![0x80]),
            write(vec![reg::LED, 0x83]),
            read(reg::LED, vec![0x83]),
            write(vec![reg::LED, 0x03]),
        ];
        let mut sensor = open_with(&sensor_expectations);
        sensor.set_illumination_current(10.0).unwrap();
        sensor.set_illumination_led(false).unwrap();
        finish(sensor);
    }

    #[test]
    fn test_set_channels_keeps_other_cfg20_bits() {
        let sensor_expectations = [
            read(reg::CFG20, vec![0b1001_0001]),
            write(vec![reg::CFG20, 0b1111_0001]),
            read(reg::CFG20, vec![0b1111_0001]),
            write(vec![reg::CFG20, 0b1001_0001]),
        ];
        let mut sensor = open_with(&sensor_expectations);
        sensor.set_channels(18).unwrap();
        assert_eq!(sensor.num_channels(), 18);
        sensor.set_channels(6).unwrap();
        assert_eq!(sensor.num_channels(), 6);
        finish(sensor);
    }

    #[test]
    fn test_set_channels_unsupported_falls_back_to_six() {
        let sensor_expectations = [
            read(reg::CFG20, vec![0x60]),
            write(vec![reg::CFG20, 0x00]),
        ];
        let mut sensor = open_with(&sensor_expectations);
        sensor.set_channels(7).unwrap();
        assert_eq!(sensor.channel_count(), ChannelCount::Six);
        finish(sensor);
    }

    #[test]
    fn test_read_enables_measurement_once() {
        let first = [100u16, 101, 102, 103, 104, 105];
        let second = [200u16, 201, 202, 203, 204, 205];

        let mut sensor_expectations = vec![
            read(reg::CFG20, vec![0x60]),
            write(vec![reg::CFG20, 0x00]),
            write(vec![reg::ENABLE, 0x1B]),
        ];
        sensor_expectations.extend(fifo_transactions(&first));
        sensor_expectations.extend(fifo_transactions(&second));

        let mut sensor = open_with(&sensor_expectations);
        sensor.set_channels(6).unwrap();

        let reading = sensor.read().unwrap();
        assert!(sensor.is_measuring());
        assert_eq!(reading.len(), 6);
        assert_eq!(reading.get(Channel::Fz), Some(100));
        assert_eq!(reading.get(Channel::Vis1Br), Some(105));
        assert_eq!(reading.get(Channel::F2), None);

        let reading = sensor.read().unwrap();
        assert_eq!(reading.get(Channel::Nir), Some(203));

        finish(sensor);
    }

    #[test]
    fn test_stop_measurement_returns_to_idle() {
        let sensor_expectations = [
            write(vec![reg::ENABLE, 0x1B]),
            write(vec![reg::ENABLE, 0x01]),
            write(vec![reg::CONTROL, 0x02]),
            write(vec![reg::ENABLE, 0x1B]),
        ];
        let mut sensor = open_with(&sensor_expectations);
        sensor.start_measurement().unwrap();
        sensor.start_measurement().unwrap();
        sensor.stop_measurement().unwrap();
        assert!(!sensor.is_measuring());
        sensor.start_measurement().unwrap();
        finish(sensor);
    }

    #[test]
    fn test_read_fifo_returns_values_in_fifo_order() {
        let values: Vec<u16> = (0..18).map(|i| 1000 + i * 7).collect();
        let mut sensor = open_with(&fifo_transactions(&values));

        let samples = sensor.read_fifo().unwrap();
        assert_eq!(samples.as_slice(), values.as_slice());

        let delay = finish(sensor);
        // no polling sleeps beyond the reset delay
        assert_eq!(delay.total_ms(), 500);
    }

    #[test]
    fn test_read_fifo_waits_for_level() {
        let values = [1u16, 2, 3, 4, 5, 6];
        let mut sensor_expectations = vec![
            read(reg::CFG20, vec![0x60]),
            write(vec![reg::CFG20, 0x00]),
            read(reg::FIFO_LVL, vec![0]),
            read(reg::FIFO_LVL, vec![3]),
        ];
        sensor_expectations.extend(fifo_transactions(&values));

        let mut sensor = open_with(&sensor_expectations);
        sensor.set_channels(6).unwrap();
        let samples = sensor.read_fifo().unwrap();
        assert_eq!(samples.as_slice(), &values);

        let delay = finish(sensor);
        assert_eq!(delay.total_ms(), 502);
    }

    #[test]
    fn test_read_fifo_stops_when_fifo_empties() {
        let sensor_expectations = [
            read(reg::CFG20, vec![0x60]),
            write(vec![reg::CFG20, 0x00]),
            read(reg::FIFO_LVL, vec![6]),
            read(reg::FIFO_LVL, vec![6]),
            read(reg::FDATA, vec![0x10, 0x00]),
            read(reg::FIFO_LVL, vec![5]),
            read(reg::FDATA, vec![0x20, 0x00]),
            read(reg::FIFO_LVL, vec![0]),
        ];
        let mut sensor = open_with(&sensor_expectations);
        sensor.set_channels(6).unwrap();
        let samples = sensor.read_fifo().unwrap();
        assert_eq!(samples.as_slice(), &[0x10, 0x20]);
        finish(sensor);
    }

    #[test]
    fn test_read_fifo_bounded_times_out() {
        let sensor_expectations = [
            read(reg::FIFO_LVL, vec![0]),
            read(reg::FIFO_LVL, vec![4]),
            read(reg::FIFO_LVL, vec![17]),
        ];
        let mut sensor = open_with(&sensor_expectations);
        let result = sensor.read_fifo_bounded(2);
        assert!(matches!(result, Err(Error::Timeout)));

        let delay = finish(sensor);
        assert_eq!(delay.total_ms(), 502);
    }

    #[test]
    fn test_read_fifo_bounded_succeeds_within_budget() {
        let values: Vec<u16> = (0..18).collect();
        let mut sensor_expectations = vec![read(reg::FIFO_LVL, vec![2])];
        sensor_expectations.extend(fifo_transactions(&values));

        let mut sensor = open_with(&sensor_expectations);
        let samples = sensor.read_fifo_bounded(5).unwrap();
        assert_eq!(samples.len(), 18);
        finish(sensor);
    }

    /// Bus whose registers all read back as zero
    struct EmptyFifoBus;

    impl ErrorType for EmptyFifoBus {
        type Error = core::convert::Infallible;
    }

    impl I2c for EmptyFifoBus {
        fn transaction(
            &mut self,
            _address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            for operation in operations {
                if let Operation::Read(buffer) = operation {
                    buffer.fill(0);
                }
            }
            Ok(())
        }
    }

    struct SleepDelay;

    impl DelayNs for SleepDelay {
        fn delay_ns(&mut self, ns: u32) {
            std::thread::sleep(Duration::from_nanos(u64::from(ns)));
        }
    }

    #[test]
    fn test_read_fifo_blocks_while_fifo_stays_empty() {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let mut sensor = As7343::new(EmptyFifoBus, SleepDelay);
            let result = sensor.read_fifo().map(|samples| samples.len());
            let _ = tx.send(result);
        });

        // the polling thread is left running; it never returns
        let outcome = rx.recv_timeout(Duration::from_millis(300));
        assert!(matches!(
            outcome,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout)
        ));
    }

    #[test]
    fn test_force_autorange_waits() {
        let mut sensor = open_with(&[write(vec![reg::CONTROL, 0x04])]);
        sensor.force_autorange().unwrap();
        let delay = finish(sensor);
        assert_eq!(delay.total_ms(), 600);
    }

    #[test]
    fn test_device_id_restores_bank() {
        let sensor_expectations = [
            read(reg::CFG0, vec![0x00]),
            write(vec![reg::CFG0, 0x10]),
            read(reg::ID, vec![0x81]),
            read(reg::CFG0, vec![0x10]),
            write(vec![reg::CFG0, 0x00]),
        ];
        let mut sensor = open_with(&sensor_expectations);
        assert_eq!(sensor.device_id().unwrap(), ll::HARDWARE_ID);
        finish(sensor);
    }

    #[test]
    fn test_i2c_error_propagates() {
        let expectations =
            [I2cTransaction::write(I2C_ADDRESS, vec![reg::CONTROL, 0x08]).with_error(ErrorKind::Other)];
        let i2c = I2cMock::new(&expectations);
        let mut sensor = As7343::new(i2c, RecordingDelay::default());

        let result = sensor.init();
        assert!(matches!(result, Err(Error::I2c(ErrorKind::Other))));

        let delay = finish(sensor);
        assert_eq!(delay.total_ms(), 0);
    }

    #[test]
    fn test_channel_map_order() {
        for (i, channel) in CHANNEL_MAP.iter().enumerate() {
            assert_eq!(channel.index(), i);
        }
        let names: Vec<&str> = CHANNEL_MAP.iter().map(|c| c.name()).collect();
        assert_eq!(
            names,
            [
                "FZ", "FY", "FXL", "NIR", "VIS1_TL", "VIS1_BR", "F2", "F3", "F4", "F6", "VIS2_TL",
                "VIS2_BR", "F1", "F7", "F8", "F5", "VIS3_TL", "VIS3_BR",
            ]
        );
        let narrow_band = CHANNEL_MAP
            .iter()
            .filter(|c| c.wavelength_nm().is_some())
            .count();
        assert_eq!(narrow_band, 12);
    }

    #[test]
    fn test_reading_zips_short_and_long_sample_lists() {
        let short = Reading::from_samples(&[1, 2, 3]);
        assert_eq!(short.len(), 3);
        assert_eq!(short.get(Channel::Fxl), Some(3));
        assert_eq!(short.get(Channel::Nir), None);

        let long: Vec<u16> = (0..20).collect();
        let reading = Reading::from_samples(&long);
        assert_eq!(reading.len(), MAX_CHANNELS);
        assert_eq!(reading.get(Channel::Vis3Br), Some(17));

        let pairs: Vec<(Channel, u16)> = reading.iter().take(3).collect();
        assert_eq!(
            pairs,
            [(Channel::Fz, 0), (Channel::Fy, 1), (Channel::Fxl, 2)]
        );

        assert!(Reading::from_samples(&[]).is_empty());
    }
}
