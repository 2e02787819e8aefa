//! CLI helpers for the ContainifyCI daemon

use anyhow::Result;

use containify_core::Engine;

/// Print every callable step target, including the universal ones the CLI
/// layer handles itself.
pub fn list_targets(engine: &Engine) {
    println!("Available targets:");
    println!("  - all (run the full pipeline)");
    println!("  - list");
    for image_target in ["docker_load", "docker_save"] {
        println!("  - {}", image_target);
    }
    for alias in engine.aliases() {
        if alias != "docker_load" && alias != "docker_save" {
            println!("  - {}", alias);
        }
    }
}

/// Pre-pull every image the registered steps may consume.
pub async fn prewarm_images(engine: &Engine) -> Result<()> {
    let images = engine.images();
    if images.is_empty() {
        println!("No step images registered");
        return Ok(());
    }

    println!("Pre-warming {} image(s):", images.len());
    for image in &images {
        println!("  - {}", image);
    }
    engine.prewarm().await?;
    println!("✓ Image cache warm");
    Ok(())
}
