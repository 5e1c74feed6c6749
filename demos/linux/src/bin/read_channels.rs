//! Continuous spectral reading example
//!
//! This example demonstrates how to:
//! - Initialize the AS7343 sensor
//! - Configure gain and integration time
//! - Read all 18 channels from the FIFO
//! - Print the readings by channel and wavelength

#[cfg(target_os = "linux")]
use as7343::{As7343, Reading};

// This example uses linux-embedded-hal for demonstration
// Replace with your platform's I2C implementation
#[cfg(target_os = "linux")]
use linux_embedded_hal::{Delay, I2cdev};

#[cfg(target_os = "linux")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bus = std::env::args().nth(1).unwrap_or_else(|| "/dev/i2c-1".into());
    let i2c = I2cdev::new(&bus)?;

    println!("AS7343 Spectral Reading Example");
    println!("===============================");
    println!("Initializing sensor on {}...", bus);

    // Resets the chip and applies the default settings (256x, 18 channels)
    let mut sensor = As7343::open(i2c, Delay)?;
    println!("Device ID: 0x{:02X}", sensor.device_id()?);

    sensor.set_gain(64.0)?;
    sensor.set_integration_time(50_000.0)?;

    println!("Starting measurements... (Press Ctrl+C to exit)\n");

    loop {
        let reading = sensor.read()?;
        print_reading(&reading);
        std::thread::sleep(std::time::Duration::from_millis(500));
    }
}

#[cfg(target_os = "linux")]
fn print_reading(reading: &Reading) {
    for (channel, value) in reading.iter() {
        match channel.wavelength_nm() {
            Some(nm) => println!("{:>8} {:>4}nm {:>6}", channel.name(), nm, value),
            None => println!("{:>8}        {:>6}", channel.name(), value),
        }
    }
    println!();
}

#[cfg(not(target_os = "linux"))]
fn main() {
    println!("This example requires Linux with I2C support.");
    println!("Please adapt the I2C initialization for your platform.");
}
