//! `auralinkd devices`: list back-end devices the default audio host sees.

use clap::Args;

use auralink_iodev::list_host_devices;

#[derive(Args)]
pub struct DevicesArgs {
    /// Only list input-capable devices.
    #[arg(long)]
    input_only: bool,

    /// Only list output-capable devices.
    #[arg(long)]
    output_only: bool,
}

pub fn run(args: DevicesArgs) -> anyhow::Result<()> {
    let devices = list_host_devices()?;

    if devices.is_empty() {
        println!("No audio devices found.");
        return Ok(());
    }

    println!("Available Audio Devices");
    println!("========================\n");

    let inputs: Vec<_> = devices.iter().filter(|d| d.is_input).collect();
    if !args.output_only && !inputs.is_empty() {
        println!("Input Devices:");
        for (idx, device) in inputs.iter().enumerate() {
            let also_output = if device.is_output { " (also output)" } else { "" };
            println!("  [{idx}] {} ({} Hz){also_output}", device.name, device.default_sample_rate);
        }
        println!();
    }

    let outputs: Vec<_> = devices.iter().filter(|d| d.is_output).collect();
    if !args.input_only && !outputs.is_empty() {
        println!("Output Devices:");
        for (idx, device) in outputs.iter().enumerate() {
            let also_input = if device.is_input { " (also input)" } else { "" };
            println!("  [{idx}] {} ({} Hz){also_input}", device.name, device.default_sample_rate);
        }
        println!();
    }

    println!("Total: {} input(s), {} output(s)", inputs.len(), outputs.len());
    Ok(())
}
