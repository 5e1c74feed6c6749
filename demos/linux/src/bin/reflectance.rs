//! LED reflectance example
//!
//! Drives the on-board LED and reads the first two acquisition cycles
//! (12 channels) with a bounded FIFO wait, so an unplugged sensor reports
//! a timeout instead of hanging.

#[cfg(target_os = "linux")]
use as7343::{As7343, ChannelCount, Config, Error, Gain};
#[cfg(target_os = "linux")]
use linux_embedded_hal::{Delay, I2cdev};

/// Roughly two seconds of 1ms polls
#[cfg(target_os = "linux")]
const MAX_POLLS: u32 = 2000;

#[cfg(target_os = "linux")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let i2c = I2cdev::new("/dev/i2c-1")?;

    let config = Config {
        gain: Gain::X16.into(),
        channels: ChannelCount::Twelve,
        ..Config::default()
    };

    let mut sensor = As7343::new(i2c, Delay);
    sensor.init_with_config(&config)?;

    sensor.set_illumination_current(10.0)?;
    sensor.set_illumination_led(true)?;
    sensor.force_autorange()?;
    sensor.start_measurement()?;

    for _ in 0..10 {
        match sensor.read_fifo_bounded(MAX_POLLS) {
            Ok(samples) => {
                let reading = as7343::Reading::from_samples(&samples);
                let line: Vec<String> = reading
                    .iter()
                    .map(|(channel, value)| format!("{}={}", channel.name(), value))
                    .collect();
                println!("{}", line.join(" "));
            }
            Err(Error::Timeout) => {
                println!("No data from sensor, check the wiring");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    sensor.stop_measurement()?;
    sensor.set_illumination_led(false)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() {
    println!("This example requires Linux with I2C support.");
}
