use anyhow::{Context, bail};
use colored::Colorize;
use sideload_bolos::{
    delete_app, delete_app_by_hash, get_memory_info, get_version, list_apps, load_app,
    reset_custom_ca, setup_custom_ca,
};
use tracing::info;

use crate::utils::display::{format_size, key_value_box, section_title, success};
use crate::utils::{AppArgs, DeviceArgs, parse_hex};

/// Install an application from an Intel HEX file
pub fn load_command(device: &DeviceArgs, app: &AppArgs, delete: bool) -> anyhow::Result<()> {
    let image = app.image()?;
    let mut options = app.load_options(device.session_options());
    options.delete = delete;

    info!(name = %app.name, file = %app.file.display(), "Loading application");
    let hash = load_app(device.connect()?, &image, &options).context("Failed to load application")?;

    println!("{}", success(&format!("Loaded {}", app.name)));
    println!("Application full hash: {hash}");
    Ok(())
}

/// Delete an application by name or full hash
pub fn delete_command(
    device: &DeviceArgs,
    name: Option<&str>,
    hash: Option<&str>,
) -> anyhow::Result<()> {
    let transport = device.connect()?;
    let options = device.session_options();

    match (name, hash) {
        (_, Some(hash)) => {
            let hash = parse_hex(hash).map_err(anyhow::Error::msg)?;
            if hash.len() != 32 {
                bail!("Application hash must be 32 bytes, got {}", hash.len());
            }
            delete_app_by_hash(transport, &hash, &options).context("Failed to delete application")?;
            println!("{}", success("Application deleted"));
        }
        (Some(name), None) => {
            delete_app(transport, name, &options).context("Failed to delete application")?;
            println!("{}", success(&format!("Deleted {name}")));
        }
        (None, None) => bail!("Either an application name or --hash is required"),
    }

    Ok(())
}

/// List installed applications
pub fn list_command(device: &DeviceArgs) -> anyhow::Result<()> {
    let apps = list_apps(device.connect()?, &device.session_options())
        .context("Failed to list applications")?;

    println!("{}", section_title("Installed applications"));
    if apps.is_empty() {
        println!("  (none)");
    }
    for app in apps {
        println!(
            "  {}  flags {:#010x}\n    full hash {}\n    code hash {}",
            app.name.bold(),
            app.flags,
            hex::encode(app.full_hash),
            hex::encode(app.code_data_hash)
        );
    }

    Ok(())
}

/// Show memory usage
pub fn meminfo_command(device: &DeviceArgs) -> anyhow::Result<()> {
    let memory = get_memory_info(device.connect()?, &device.session_options())
        .context("Failed to read memory info")?;

    println!(
        "{}",
        key_value_box(
            "Memory",
            vec![
                ("System", format_size(memory.system_size)),
                ("Applications", format_size(memory.applications_size)),
                ("Free", format_size(memory.free_size)),
                (
                    "Slots",
                    format!("{}/{}", memory.used_app_slots, memory.total_app_slots)
                ),
            ],
        )
    );
    Ok(())
}

/// Show the dashboard version
pub fn version_command(device: &DeviceArgs) -> anyhow::Result<()> {
    let response = get_version(device.connect()?, &device.session_options())
        .context("Failed to read version")?;

    let mut items = vec![("Raw", hex::encode(&response))];
    if let Some((target_id, version)) = parse_version(&response) {
        items.insert(0, ("Target ID", format!("{target_id:#010x}")));
        items.insert(1, ("Version", version));
    }
    println!("{}", key_value_box("Device", items));
    Ok(())
}

/// Install a custom certificate authority public key
pub fn setup_ca_command(device: &DeviceArgs, name: &str, public_key: &str) -> anyhow::Result<()> {
    let public_key = parse_hex(public_key).map_err(anyhow::Error::msg)?;
    setup_custom_ca(device.connect()?, name, &public_key, &device.session_options())
        .context("Failed to install custom CA")?;
    println!("{}", success(&format!("Custom CA {name} installed")));
    Ok(())
}

/// Remove the custom certificate authority
pub fn reset_ca_command(device: &DeviceArgs) -> anyhow::Result<()> {
    reset_custom_ca(device.connect()?, &device.session_options())
        .context("Failed to remove custom CA")?;
    println!("{}", success("Custom CA removed"));
    Ok(())
}

/// Split a version response into target id and version string
///
/// The dashboard answers with a 4 byte target id followed by the
/// length-prefixed version.
fn parse_version(response: &[u8]) -> Option<(u32, String)> {
    let target_id = u32::from_be_bytes(response.get(..4)?.try_into().ok()?);
    let length = *response.get(4)? as usize;
    let version = response.get(5..5 + length)?;
    Some((target_id, String::from_utf8_lossy(version).into_owned()))
}
