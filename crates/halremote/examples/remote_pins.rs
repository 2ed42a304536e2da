//! Minimal remote component: two pins mirrored against a remote HAL host.
//!
//! Run with:
//!   cargo run --example remote_pins -- tcp://HOST:5001 tcp://HOST:5002

use halremote::{
    HalPin, HalPinContainer, HalRemoteComponent, PinDirection, PinType, PinValue,
    RemoteComponentConfig,
};
use std::sync::Arc;
use std::time::Duration;

fn main() -> halremote::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let halrcmd_uri = args.next().unwrap_or_else(|| "tcp://localhost:5001".to_string());
    let halrcomp_uri = args.next().unwrap_or_else(|| "tcp://localhost:5002".to_string());

    let container = Arc::new(HalPinContainer::new());
    let speed = container.add_pin(HalPin::new("speed", PinType::Float, PinDirection::Out));
    let enabled = container.add_pin(HalPin::new("enabled", PinType::Bit, PinDirection::In));

    let config = RemoteComponentConfig::new("demo")
        .with_halrcmd_uri(halrcmd_uri)
        .with_halrcomp_uri(halrcomp_uri);

    let mut component = HalRemoteComponent::new(config, Arc::clone(&container))?;
    component.on_connection_state_changed(|state| {
        println!("connection state: {state}");
    });
    component.on_error_changed(|(error, message)| {
        println!("error: {error}: {message}");
    });

    component.set_ready(true);

    for step in 0..30 {
        std::thread::sleep(Duration::from_secs(1));
        speed.set_value(PinValue::Float(f64::from(step) * 10.0))?;
        println!(
            "speed={:?} enabled={:?} synced={}",
            speed.value(),
            enabled.value(),
            speed.synced()
        );
    }

    component.set_ready(false);
    Ok(())
}
