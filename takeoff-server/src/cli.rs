//! Command-line front: run the server, or do a takeoff straight from a terminal.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use takeoff_core::{
    export_to_path, format_total, parse_reply, parse_table, recompute_reply, CalcMode,
    TakeoffError, TakeoffTable, DEFAULT_WALL_HEIGHT,
};
use tracing::info;
use vision_takeoff::{
    api_key_from_env, DrawingImage, GeminiClient, GeminiConfig, TakeoffRequest, DEFAULT_BASE_URL,
};

use takeoff_server::session::{DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_TTL_MINS};
use takeoff_server::{serve, AppState, SessionStore};

/// AI-assisted quantity takeoff from construction drawings.
#[derive(Parser, Debug)]
#[command(name = "takeoff", version, about, long_about = None)]
pub struct Cli {
    /// Model API endpoint
    #[arg(long, global = true, env = "GEMINI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// API key (bring your own)
    #[arg(long, global = true, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to bind to
        #[arg(long, env = "TAKEOFF_ADDR", default_value = "0.0.0.0:3000")]
        addr: String,

        /// Comma-separated CORS origins (any origin when empty)
        #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',')]
        allowed_origins: Vec<String>,

        /// Minutes an untouched session is kept
        #[arg(long, env = "TAKEOFF_SESSION_TTL_MINS", default_value_t = DEFAULT_SESSION_TTL_MINS)]
        session_ttl_mins: u32,

        /// Most sessions held at once
        #[arg(long, env = "TAKEOFF_MAX_SESSIONS", default_value_t = DEFAULT_MAX_SESSIONS)]
        max_sessions: usize,
    },

    /// Send a drawing to the model and print (or export) the takeoff
    Analyze {
        /// JPG or PNG drawing
        #[arg(short, long)]
        image: PathBuf,

        /// What the colored lines/regions mean
        #[arg(short, long, conflicts_with = "rules_file")]
        rules: Option<String>,

        /// Read the rules from a text file
        #[arg(long)]
        rules_file: Option<PathBuf>,

        #[command(flatten)]
        mode: ModeArgs,

        /// Force a model instead of auto-detecting one
        #[arg(long)]
        model: Option<String>,

        /// Export to .csv or .xlsx
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the table as JSON
        #[arg(long)]
        json: bool,
    },

    /// Recompute hand-edited rows from a JSON file
    Recompute {
        /// JSON list of rows (label, dim1, dim2)
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        mode: ModeArgs,

        /// Export to .csv or .xlsx
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the table as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct ModeArgs {
    /// Calculation target
    #[arg(short, long, value_enum, default_value = "area")]
    pub mode: ModeArg,

    /// Floor height in metres (wall-area mode)
    #[arg(long, default_value_t = DEFAULT_WALL_HEIGHT)]
    pub height: f64,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Area,
    Perimeter,
    WallArea,
}

impl ModeArgs {
    pub fn to_mode(&self) -> CalcMode {
        match self.mode {
            ModeArg::Area => CalcMode::Area,
            ModeArg::Perimeter => CalcMode::Perimeter,
            ModeArg::WallArea => CalcMode::wall_area(self.height),
        }
    }
}

impl Cli {
    fn api_key(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .or_else(api_key_from_env)
    }

    fn gemini_config(&self) -> GeminiConfig {
        GeminiConfig {
            base_url: self.base_url.clone(),
            ..GeminiConfig::default()
        }
    }

    pub async fn run(self) -> Result<()> {
        match &self.command {
            Commands::Serve {
                addr,
                allowed_origins,
                session_ttl_mins,
                max_sessions,
            } => {
                let sessions = SessionStore::with_limits(*session_ttl_mins, *max_sessions);
                let state = AppState::new(self.gemini_config(), self.api_key()).with_sessions(sessions);
                serve(addr, state, allowed_origins).await
            }
            Commands::Analyze {
                image,
                rules,
                rules_file,
                mode,
                model,
                output,
                json,
            } => {
                let api_key = self
                    .api_key()
                    .context("An API key is required (--api-key or GOOGLE_API_KEY)")?;
                let rules = match (rules, rules_file) {
                    (Some(text), _) => text.clone(),
                    (None, Some(path)) => std::fs::read_to_string(path)
                        .with_context(|| format!("Failed to read rules from {}", path.display()))?,
                    (None, None) => String::new(),
                };

                let request = TakeoffRequest {
                    image: DrawingImage::from_path(image)?,
                    rules,
                    mode: mode.to_mode(),
                    model: model.clone(),
                };

                let client = GeminiClient::new(api_key, self.gemini_config());
                let analysis = client.analyze(&request).await?;
                info!("Model {} answered", analysis.model);

                let table = match parse_table(&analysis.text, request.mode) {
                    Ok(table) => table,
                    Err(TakeoffError::MalformedReply { reason, raw }) => {
                        eprintln!("Model reply:\n{}", raw);
                        bail!("The model reply could not be parsed: {}", reason);
                    }
                    Err(e) => return Err(e.into()),
                };

                if table.is_empty() {
                    eprintln!("The model recognised no items matching the rules.");
                }
                finish(&table, output.as_deref(), *json)
            }
            Commands::Recompute {
                input,
                mode,
                output,
                json,
            } => {
                let content = std::fs::read_to_string(input)
                    .with_context(|| format!("Failed to read {}", input.display()))?;
                let mode = mode.to_mode();
                let rows = parse_reply(&content, mode)?;
                let table = recompute_reply(&rows, mode);
                finish(&table, output.as_deref(), *json)
            }
        }
    }
}

fn finish(table: &TakeoffTable, output: Option<&Path>, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(table)?);
    } else {
        print_table(table);
    }

    if let Some(path) = output {
        export_to_path(table, path)?;
        println!("Saved takeoff to {}", path.display());
    }
    Ok(())
}

fn print_table(table: &TakeoffTable) {
    println!("{} ({})", table.mode.label(), table.unit);
    println!("{:<28} {:<20} {:>12} {}", "Item", "Formula", "Subtotal", "Unit");
    println!("{}", "-".repeat(68));
    for row in &table.rows {
        println!(
            "{:<28} {:<20} {:>12.2} {}",
            row.label, row.formula, row.result, row.unit
        );
    }
    println!("{}", "-".repeat(68));
    println!("Total: {} {}", format_total(table.total), table.unit);
}
