//! `voxgate devices`.

use std::fmt::Write;

use voxgate_voice::{AudioBufferManager, DeviceInfo};

use crate::error::CliError;

pub fn execute() -> Result<(), CliError> {
    let audio = AudioBufferManager::system();
    print!("{}", render_devices("Output", &audio.output_devices()?));
    print!("{}", render_devices("Input", &audio.input_devices()?));
    Ok(())
}

/// Devices with the default one starred.
pub fn render_devices(title: &str, devices: &[DeviceInfo]) -> String {
    let mut out = format!("{title} devices:\n");
    if devices.is_empty() {
        out.push_str("  (none)\n");
    }
    for device in devices {
        let marker = if device.is_default { '*' } else { ' ' };
        let _ = writeln!(out, "  {marker} {}", device.name);
    }
    out
}
