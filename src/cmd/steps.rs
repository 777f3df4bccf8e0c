//! Step catalog command — `conveyor steps`.

use anyhow::{Context, Result};

use conveyor::steps::{self, tracker::TrackerClient};

pub fn cmd_steps() -> Result<()> {
    let registry = steps::default_pipeline(TrackerClient::canned("PROJ"))
        .context("Failed to assemble step pipeline")?;

    println!();
    println!("{:<6} Step", "Id");
    println!("{:<6} ----------------------", "------");
    for step in registry.iter() {
        println!("{:<6} {}", step.id(), step.name());
    }
    println!();
    println!(
        "{} steps; each one waits for confirmation before the next runs",
        console::style(registry.count()).bold()
    );
    Ok(())
}
