use anyhow::Result;

use crate::Context;
use crate::cli::{ConfigCommand, OutputFormat};
use crate::settings::{ENV_CONFIG_DIR, Settings, config_dir};
use crate::ui;

pub fn run(ctx: &Context, cmd: &ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => show(ctx),
        ConfigCommand::Path => {
            println!("{}", Settings::path()?.display());
            Ok(())
        }
    }
}

fn show(ctx: &Context) -> Result<()> {
    let path = Settings::path()?;
    let settings = Settings::load()?;

    if ctx.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    ui::header("Settings");
    println!();
    ui::kv("Config directory", &config_dir()?.display().to_string());
    ui::kv(
        "Settings file",
        &if path.exists() {
            path.display().to_string()
        } else {
            format!("{} (not found)", path.display())
        },
    );
    println!();

    let unset = || "(not set)".to_string();
    ui::kv(
        "host",
        &settings
            .host
            .clone()
            .unwrap_or_else(|| format!("(default: {})", portal::DEFAULT_HOST)),
    );
    ui::kv("username", &settings.username.clone().unwrap_or_else(unset));
    ui::kv(
        "jobs",
        &settings.jobs.map_or_else(unset, |jobs| jobs.to_string()),
    );
    ui::kv("config_path", &settings.config_path.clone().unwrap_or_else(unset));

    println!();
    ui::dim("Flags and GRAPHIANT_* environment variables override these values.");
    ui::dim(&format!("Set {ENV_CONFIG_DIR} to use another config directory."));

    Ok(())
}
