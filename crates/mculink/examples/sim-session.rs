//! Typed parameter reads, a write and a command against the in-process
//! controller simulator.
//!
//! Run with: `cargo run -p mculink --example sim-session --features sim`

use std::time::Duration;

use mculink::channel::ids::{command, param};
use mculink::channel::sim::{DeviceSim, Registers};
use mculink::channel::{ChannelConfig, ChannelError};

fn main() -> Result<(), ChannelError> {
    let controller = Registers::new()
        .with_f32(param::CURRENT_IN_MAXIMUM, 32.0)
        .with_str(param::SMART_MAINBOARD_APP_SW_VERSION, "2.1.0")
        .with_u8(param::HMI_BRIGHTNESS, 80);
    let config = ChannelConfig::default().with_reply_timeout(Duration::from_millis(200));
    let (engine, sim) = DeviceSim::attach(controller, config)?;

    println!(
        "max current: {} A",
        engine.read_f32(param::CURRENT_IN_MAXIMUM)?
    );
    println!(
        "firmware: {}",
        engine.read_string(param::SMART_MAINBOARD_APP_SW_VERSION)?
    );

    engine.write_u8(param::HMI_BRIGHTNESS, 40)?;
    println!("brightness now {}", engine.read_u8(param::HMI_BRIGHTNESS)?);

    let ack = engine.send_command(command::STOP_CHARGING)?;
    println!("stop_charging ack: {:?}", ack.first());

    // Nothing answers this id; the request times out and the channel is
    // free again for the next caller.
    match engine.read_u8(4242) {
        Err(err) => println!("unknown id: {err}"),
        Ok(value) => println!("unexpected value {value}"),
    }

    println!("{:?}", engine.stats());
    engine.shutdown();
    sim.stop();
    Ok(())
}
