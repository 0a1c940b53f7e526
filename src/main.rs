use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use clinical_extractor::{BatchProcessor, Config, LLMProvider, PlaceholderCheck};

fn cli() -> Command {
    Command::new("Clinical Extractor")
        .version("0.1.0")
        .author("TigreRoll")
        .about("Batch structured-JSON extraction from clinical report spreadsheets")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (TOML)")
        )
        .arg(
            Arg::new("provider")
                .short('p')
                .long("provider")
                .value_name("NAME")
                .help("Model backend: openai, gemini or ollama")
        )
        .arg(
            Arg::new("model")
                .short('m')
                .long("model")
                .value_name("MODEL")
                .help("Model identifier, e.g. gpt-4.1 or deepseek-r1:70b")
        )
        .arg(
            Arg::new("prompt")
                .long("prompt")
                .value_name("FILE")
                .help("Prompt template containing {Results}")
        )
        .arg(
            Arg::new("verifier-prompt")
                .long("verifier-prompt")
                .value_name("FILE")
                .help("Verifier template containing {Results} and {draft_json}")
        )
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("FILE")
                .help("Input spreadsheet (.xlsx or .csv)")
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_name("DIR")
                .help("Output directory for results")
        )
        .arg(
            Arg::new("fields")
                .short('f')
                .long("fields")
                .value_name("A,B")
                .help("Required JSON fields, comma separated")
                .value_delimiter(',')
                .num_args(1..)
        )
        .arg(
            Arg::new("input-column")
                .long("input-column")
                .value_name("NAME")
                .help("Column holding the report text")
        )
        .arg(
            Arg::new("checkpoint-interval")
                .long("checkpoint-interval")
                .value_name("ROWS")
                .help("Save progress every N rows")
                .value_parser(clap::value_parser!(usize))
        )
        .arg(
            Arg::new("strict")
                .long("strict")
                .help("Reject answers whose every field is \"invalid\"")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("no-progress")
                .long("no-progress")
                .help("Hide the progress bar")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("print-config")
                .long("print-config")
                .help("Print the effective configuration and exit")
                .action(ArgAction::SetTrue)
        )
}

fn apply_cli_overrides(config: &mut Config, matches: &ArgMatches) -> Result<()> {
    if let Some(provider) = matches.get_one::<String>("provider") {
        config.llm.provider = provider.parse::<LLMProvider>().map_err(anyhow::Error::msg)?;
        config.llm.resolve_api_key();
    }
    if let Some(model) = matches.get_one::<String>("model") {
        config.llm.model = Some(model.clone());
    }
    if let Some(prompt) = matches.get_one::<String>("prompt") {
        config.paths.prompt_file = PathBuf::from(prompt);
    }
    if let Some(verifier) = matches.get_one::<String>("verifier-prompt") {
        config.paths.verifier_prompt_file = Some(PathBuf::from(verifier));
    }
    if let Some(input) = matches.get_one::<String>("input") {
        config.paths.input_file = PathBuf::from(input);
    }
    if let Some(output_dir) = matches.get_one::<String>("output-dir") {
        config.paths.output_dir = PathBuf::from(output_dir);
    }
    if let Some(fields) = matches.get_many::<String>("fields") {
        config.schema.fields = fields.map(|f| f.trim().to_string()).collect();
    }
    if let Some(column) = matches.get_one::<String>("input-column") {
        config.schema.input_column = column.clone();
    }
    if let Some(interval) = matches.get_one::<usize>("checkpoint-interval") {
        config.batch.checkpoint_interval = *interval;
    }
    if matches.get_flag("strict") {
        config.schema.placeholder_check = Some(PlaceholderCheck::Strict);
    }
    if matches.get_flag("no-progress") {
        config.batch.show_progress = false;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let verbose = matches.get_flag("verbose");

    // Initialize logging
    let default_filter = if verbose { "debug" } else { "clinical_extractor=info,warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    if verbose {
        info!("Verbose logging enabled");
    }

    // Load configuration
    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let mut config = Config::load(config_path.as_deref())?;
    apply_cli_overrides(&mut config, &matches)?;

    if matches.get_flag("print-config") {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    if let Err(e) = config.validate() {
        error!("{}", e);
        return Err(e.into());
    }

    info!("🚀 Clinical Extractor starting...");
    info!("{}", config.summary());

    let processor = BatchProcessor::from_config(&config).await?;
    let results = processor.run_with_config(&config).await?;

    // Print results
    info!("🎉 Processing completed in {:.2}s", results.total_time.as_secs_f64());
    info!("📊 Rows: {} total, {} skipped, {} processed", results.total, results.skipped, results.processed);
    info!("🔧 Corrections requested: {}", results.corrected);
    info!("❌ Failed model calls: {}", results.failed_calls);
    info!("💾 Checkpoints: {}, output: {}", results.checkpoints, results.output_path);

    Ok(())
}
