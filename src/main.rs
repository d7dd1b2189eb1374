use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use dtls::config::{self, ConfigLayer, ConfigState};

#[derive(Parser)]
#[command(name = "dtls", version, about = "Design Tokens Language Server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the language server over stdio (the default)
    Serve,

    /// Inspect dtls configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration for a workspace
    Print(ConfigPrintArgs),

    /// Print the JSON Schema for the configuration
    Schema,
}

#[derive(clap::Args)]
struct ConfigPrintArgs {
    /// Workspace root (defaults to the current directory)
    #[arg(short = 'w', long)]
    workspace: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Serve) => {
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .expect("failed to build tokio runtime")
                .block_on(dtls::lsp::run_server());
            ExitCode::SUCCESS
        }
        Some(Commands::Config { command }) => match command {
            ConfigCommands::Print(args) => run_config_print(args),
            ConfigCommands::Schema => run_config_schema(),
        },
        Some(Commands::Completions { shell }) => {
            generate(shell, &mut Cli::command(), "dtls", &mut std::io::stdout());
            ExitCode::SUCCESS
        }
    }
}

fn run_config_print(args: ConfigPrintArgs) -> ExitCode {
    let mut stderr = std::io::stderr().lock();

    let root = match args.workspace.map(Ok).unwrap_or_else(std::env::current_dir) {
        Ok(dir) => dir,
        Err(e) => {
            let report = miette::Report::msg(format!("cannot determine workspace root: {e}"));
            let _ = writeln!(stderr, "{report:?}");
            return ExitCode::from(2);
        }
    };

    let state = ConfigState::new();
    let mut layer = ConfigLayer::default();
    match config::load_alt_config(&root) {
        Ok(Some(alt)) => layer = alt,
        Ok(None) => {}
        Err(e) => {
            let report = miette::Report::msg(e.to_string());
            let _ = writeln!(stderr, "{report:?}");
            return ExitCode::from(2);
        }
    }
    match config::load_package_manifest(&root) {
        Ok(Some((pkg, warnings))) => {
            layer = layer.overlaid(&pkg);
            for warning in warnings {
                let report = miette::Report::msg(warning);
                let _ = writeln!(stderr, "{report:?}");
            }
        }
        Ok(None) => {}
        Err(e) => {
            let report = miette::Report::msg(e.to_string());
            let _ = writeln!(stderr, "{report:?}");
            return ExitCode::from(2);
        }
    }
    state.set_manifest(layer);

    println!(
        "{}",
        serde_json::to_string_pretty(&state.get()).unwrap()
    );
    ExitCode::SUCCESS
}

fn run_config_schema() -> ExitCode {
    let schema = schemars::schema_for!(ConfigLayer);
    let mut value = serde_json::to_value(&schema).unwrap();

    // Rename definitions → $defs (2020-12 convention) and update $refs.
    rename_definitions(&mut value);

    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "$schema".to_string(),
            serde_json::json!("https://json-schema.org/draft/2020-12/schema"),
        );
    }

    println!("{}", serde_json::to_string_pretty(&value).unwrap());
    ExitCode::SUCCESS
}

fn rename_definitions(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(defs) = map.remove("definitions") {
                map.insert("$defs".to_string(), defs);
            }
            if let Some(serde_json::Value::String(ref_str)) = map.get_mut("$ref")
                && let Some(name) = ref_str.strip_prefix("#/definitions/")
            {
                *ref_str = format!("#/$defs/{name}");
            }
            for v in map.values_mut() {
                rename_definitions(v);
            }
        }
        serde_json::Value::Array(arr) => {
            for v in arr {
                rename_definitions(v);
            }
        }
        _ => {}
    }
}
