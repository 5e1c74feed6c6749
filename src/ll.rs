//! Low-level register and interface definitions for AS7343

use embedded_hal::i2c::I2c;

/// I2C address of the AS7343
pub const I2C_ADDRESS: u8 = 0x39;

/// Register offsets
///
/// Everything is in bank 0 except [`ID`](reg::ID), which needs
/// [`CFG0_BANK`] set first.
pub mod reg {
    /// Part identification (bank 1)
    pub const ID: u8 = 0x5A;
    /// Power, SMUX, wait and measurement enables
    pub const ENABLE: u8 = 0x80;
    /// Integration repeat count minus one
    pub const ATIME: u8 = 0x81;
    /// Wait time between measurement cycles
    pub const WTIME: u8 = 0x83;
    /// Bank select, low power and long wait
    pub const CFG0: u8 = 0xBF;
    /// Analog gain
    pub const CFG1: u8 = 0xC6;
    /// LED drive strength and enable
    pub const LED: u8 = 0xCD;
    /// Integration step count (16-bit, little endian)
    pub const ASTEP: u8 = 0xD4;
    /// Automatic SMUX channel count
    pub const CFG20: u8 = 0xD6;
    /// Auto-zero frequency
    pub const AZ_CONFIG: u8 = 0xDE;
    /// Software reset, manual auto-zero and FIFO clear
    pub const CONTROL: u8 = 0xFA;
    /// FIFO slot enables
    pub const FIFO_MAP: u8 = 0xFC;
    /// Number of entries waiting in the FIFO
    pub const FIFO_LVL: u8 = 0xFD;
    /// FIFO pop register (16-bit, little endian)
    pub const FDATA: u8 = 0xFE;
}

/// Value of the ID register on an AS7343
pub const HARDWARE_ID: u8 = 0b1000_0001;

/// CFG0: low power idle
pub const CFG0_LOW_POWER: u8 = 0b0010_0000;
/// CFG0: select register bank 1
pub const CFG0_BANK: u8 = 0b0001_0000;
/// CFG0: multiply WTIME by 16
pub const CFG0_WLONG: u8 = 0b0000_0100;

/// Channel count select field of CFG20 (bits 5-6)
pub const CFG20_CHANNELS_MASK: u8 = 0b0110_0000;
/// CFG20: 6 channels (cycle 1 only)
pub const CFG20_6_CH: u8 = 0b0000_0000;
/// CFG20: 12 channels (cycles 1 and 2)
pub const CFG20_12_CH: u8 = 0b0100_0000;
/// CFG20: 18 channels (all three cycles)
pub const CFG20_18_CH: u8 = 0b0110_0000;

/// ENABLE: start SMUX command
pub const ENABLE_SMUXEN: u8 = 0b0001_0000;
/// ENABLE: wait timer between cycles
pub const ENABLE_WEN: u8 = 0b0000_1000;
/// ENABLE: spectral measurement
pub const ENABLE_SP_EN: u8 = 0b0000_0010;
/// ENABLE: power on
pub const ENABLE_PON: u8 = 0b0000_0001;

/// CONTROL: software reset
pub const CONTROL_SW_RESET: u8 = 0b0000_1000;
/// CONTROL: manual auto-zero
pub const CONTROL_SP_MAN_AZ: u8 = 0b0000_0100;
/// CONTROL: clear the FIFO
pub const CONTROL_FIFO_CLR: u8 = 0b0000_0010;

/// FIFO_MAP: ADC channel 5
pub const FIFO_MAP_CH5: u8 = 0b0100_0000;
/// FIFO_MAP: ADC channel 4
pub const FIFO_MAP_CH4: u8 = 0b0010_0000;
/// FIFO_MAP: ADC channel 3
pub const FIFO_MAP_CH3: u8 = 0b0001_0000;
/// FIFO_MAP: ADC channel 2
pub const FIFO_MAP_CH2: u8 = 0b0000_1000;
/// FIFO_MAP: ADC channel 1
pub const FIFO_MAP_CH1: u8 = 0b0000_0100;
/// FIFO_MAP: ADC channel 0
pub const FIFO_MAP_CH0: u8 = 0b0000_0010;
/// FIFO_MAP: ASTATUS prefix
///
/// Would be prepended to every cycle; the driver leaves it off.
pub const FIFO_MAP_ASTATUS: u8 = 0b0000_0001;

/// LED on/off bit
pub const LED_ACT: u8 = 0b1000_0000;
/// LED drive current field
pub const LED_DRIVE_MASK: u8 = 0b0111_1111;

/// AZ_CONFIG: never auto-zero
pub const AZ_NEVER: u8 = 0;
/// AZ_CONFIG: auto-zero before the first cycle only
pub const AZ_BEFORE_FIRST_CYCLE: u8 = 255;

/// Replace the bits selected by `mask` in `current` with those of `value`.
#[inline]
pub const fn merge_bits(current: u8, mask: u8, value: u8) -> u8 {
    (current & !mask) | (value & mask)
}

/// Register access over I2C
///
/// These primitives are the only places the driver touches the bus.
#[derive(Debug)]
pub struct DeviceInterface<I2c> {
    /// The I2C interface
    pub i2c: I2c,
}

impl<I2C: I2c> DeviceInterface<I2C> {
    /// Read an 8-bit register
    pub fn read_u8(&mut self, register: u8) -> Result<u8, I2C::Error> {
        let mut buffer = [0u8; 1];
        self.i2c
            .write_read(I2C_ADDRESS, &[register], &mut buffer)?;
        Ok(buffer[0])
    }

    /// Write an 8-bit register
    pub fn write_u8(&mut self, register: u8, value: u8) -> Result<(), I2C::Error> {
        self.i2c.write(I2C_ADDRESS, &[register, value])
    }

    /// Read a 16-bit little-endian register
    pub fn read_u16(&mut self, register: u8) -> Result<u16, I2C::Error> {
        let mut buffer = [0u8; 2];
        self.i2c
            .write_read(I2C_ADDRESS, &[register], &mut buffer)?;
        Ok(u16::from_le_bytes(buffer))
    }

    /// Write a 16-bit little-endian register
    pub fn write_u16(&mut self, register: u8, value: u16) -> Result<(), I2C::Error> {
        let [lo, hi] = value.to_le_bytes();
        self.i2c.write(I2C_ADDRESS, &[register, lo, hi])
    }

    /// Read `register`, replace the `mask` bits with `value`, and write it back.
    pub fn modify_u8(&mut self, register: u8, mask: u8, value: u8) -> Result<u8, I2C::Error> {
        let current = self.read_u8(register)?;
        let updated = merge_bits(current, mask, value);
        self.write_u8(register, updated)?;
        Ok(updated)
    }
}

#[cfg(feature = "async")]
impl<I2C: embedded_hal_async::i2c::I2c> DeviceInterface<I2C> {
    /// Read an 8-bit register (async version)
    pub async fn read_u8_async(&mut self, register: u8) -> Result<u8, I2C::Error> {
        let mut buffer = [0u8; 1];
        self.i2c
            .write_read(I2C_ADDRESS, &[register], &mut buffer)
            .await?;
        Ok(buffer[0])
    }

    /// Write an 8-bit register (async version)
    pub async fn write_u8_async(&mut self, register: u8, value: u8) -> Result<(), I2C::Error> {
        self.i2c.write(I2C_ADDRESS, &[register, value]).await
    }

    /// Read a 16-bit little-endian register (async version)
    pub async fn read_u16_async(&mut self, register: u8) -> Result<u16, I2C::Error> {
        let mut buffer = [0u8; 2];
        self.i2c
            .write_read(I2C_ADDRESS, &[register], &mut buffer)
            .await?;
        Ok(u16::from_le_bytes(buffer))
    }

    /// Write a 16-bit little-endian register (async version)
    pub async fn write_u16_async(&mut self, register: u8, value: u16) -> Result<(), I2C::Error> {
        let [lo, hi] = value.to_le_bytes();
        self.i2c.write(I2C_ADDRESS, &[register, lo, hi]).await
    }

    /// Read-modify-write of an 8-bit register (async version)
    pub async fn modify_u8_async(
        &mut self,
        register: u8,
        mask: u8,
        value: u8,
    ) -> Result<u8, I2C::Error> {
        let current = self.read_u8_async(register).await?;
        let updated = merge_bits(current, mask, value);
        self.write_u8_async(register, updated).await?;
        Ok(updated)
    }
}
