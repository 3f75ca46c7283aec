use std::path::Path;

use anyhow::Context;
use sideload_bolos::{
    MemoryImage, Session, SessionOptions, TargetId, apdu::MockTransport, install_app,
};
use tracing::debug;

use crate::utils::AppArgs;
use crate::utils::display::{format_size, key_value_box, section_title};

/// Print the areas and entry point of an Intel HEX file
pub fn inspect_command(file: &Path) -> anyhow::Result<()> {
    let image = MemoryImage::from_intel_hex_file(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let total: usize = image.areas().iter().map(|area| area.len()).sum();
    println!(
        "{}",
        key_value_box(
            "Image",
            vec![
                ("File", file.display().to_string()),
                ("Areas", image.areas().len().to_string()),
                ("Start", format!("{:#010x}", image.min_address())),
                ("End", format!("{:#010x}", image.max_address())),
                ("Boot address", format!("{:#010x}", image.boot_address())),
                ("Size", format_size(total as u32)),
            ],
        )
    );

    println!("{}", section_title("Areas"));
    for area in image.areas() {
        println!(
            "  {:#010x}..{:#010x}  {}",
            area.start,
            area.end(),
            format_size(area.len() as u32)
        );
    }

    Ok(())
}

/// Compute the application hash a device would sign, without a device
pub fn hash_command(app: &AppArgs, target_id: TargetId) -> anyhow::Result<()> {
    let image = app.image()?;
    let options = app.load_options(SessionOptions::new(target_id));

    debug!(target_id = %target_id, "Running dry run load");
    let hash = install_app(Session::insecure(MockTransport::new()), &image, &options)
        .context("Dry run failed")?;

    println!("Application full hash: {hash}");
    Ok(())
}
