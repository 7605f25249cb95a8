//! Command-line host for the milling plugins.
//!
//! Runs the plugins against the simulated microscope. Dialogs are answered
//! from the command line: `--set` changes settings, `--button` presses
//! buttons in order.
//!
//! ```text
//! cryo_mill menus
//! cryo_mill run "Milling/Auto mill..." --features ./project --action 1 --button "Run action"
//! cryo_mill config
//! ```

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use cryo_mill::config::MillConfig;
use cryo_mill::dialog::ScriptedUi;
use cryo_mill::{logging, MainData, PluginHost};
use mill_core::feature::{read_features, save_features};
use mimalloc::MiMalloc;
use std::path::PathBuf;
use tracing::info;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "cryo_mill", about = "Cryo FIB/LM milling plugins", version)]
struct Cli {
    /// Configuration file (defaults to ./cryo_mill.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List loaded plugins and their menu entries
    Menus,

    /// Invoke a menu entry
    Run(RunArgs),

    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Menu path, e.g. "Milling/Auto mill..."
    menu: String,

    /// Active tab
    #[arg(long)]
    tab: Option<String>,

    /// Project directory holding features.json; updated statuses are saved back
    #[arg(long)]
    features: Option<PathBuf>,

    /// Milling action index for "Milling/Auto mill...", same as --set act=N
    #[arg(long)]
    action: Option<usize>,

    /// Dialog setting as name=json, applied before any button press
    #[arg(long = "set", value_parser = parse_setting)]
    settings: Vec<(String, serde_json::Value)>,

    /// Dialog button to press; repeatable
    #[arg(long = "button")]
    buttons: Vec<String>,

    /// Answer to file requests
    #[arg(long)]
    file: Option<PathBuf>,

    /// Cancel long operations as soon as they start
    #[arg(long)]
    cancel: bool,
}

fn parse_setting(s: &str) -> Result<(String, serde_json::Value), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{s}'"))?;
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = MillConfig::load(cli.config.as_deref()).context("loading configuration")?;
    logging::init(&config.application)?;

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Menus => {
            let (main, _devices) = MainData::simulated(config)?;
            let host = PluginHost::load(&main)?;
            for name in host.plugin_names() {
                println!("plugin: {name}");
            }
            for entry in host.menu_entries() {
                println!("  {entry}");
            }
            Ok(())
        }
        Commands::Run(args) => run(config, args).await,
    }
}

async fn run(config: MillConfig, args: RunArgs) -> anyhow::Result<()> {
    let (main, _devices) = MainData::simulated(config)?;
    if let Some(tab) = &args.tab {
        if !main.available_tabs.contains(tab) {
            return Err(anyhow!(
                "unknown tab '{tab}', expected one of {:?}",
                main.available_tabs
            ));
        }
        main.set_tab(tab.clone());
    }
    if let Some(dir) = &args.features {
        let features = read_features(dir)?;
        info!(count = features.len(), dir = %dir.display(), "features loaded");
        main.features.update(|list| *list = features);
    }

    let host = PluginHost::load(&main)?;
    let mut ui = ScriptedUi::new();
    if let Some(action) = args.action {
        ui = ui.set("act", serde_json::json!(action));
    }
    for (name, value) in args.settings {
        ui = ui.set(name, value);
    }
    for button in args.buttons {
        ui = ui.press(button);
    }
    if let Some(file) = args.file {
        ui = ui.with_file(file);
    }
    if args.cancel {
        ui = ui.cancelling();
    }

    host.invoke(&args.menu, &ui).await?;

    let features = main.features.get();
    for feature in &features {
        println!("{}: {}", feature.name(), feature.status());
    }
    if let Some(dir) = &args.features {
        save_features(dir, &features)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_parse_as_json_or_text() {
        assert_eq!(parse_setting("act=2").unwrap(), ("act".into(), json!(2)));
        assert_eq!(parse_setting("dz=5e-5").unwrap(), ("dz".into(), json!(5e-5)));
        assert_eq!(
            parse_setting("name=RLM").unwrap(),
            ("name".into(), json!("RLM"))
        );
        assert!(parse_setting("act").is_err());
    }

    #[test]
    fn cli_accepts_repeated_buttons() {
        let cli = Cli::parse_from([
            "cryo_mill",
            "run",
            "Cryo/Move stage...",
            "--button",
            "Z+",
            "--button",
            "Done",
        ]);
        match cli.command {
            Commands::Run(args) => assert_eq!(args.buttons, vec!["Z+", "Done"]),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
