use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use thiserror::Error;

use lesson_adapters::{create_llm_adapter, AdapterError, JsonFileStore};
use lesson_core::{
    BlockError, BlockGenerator, BlockStore, CefrLevel, ConfigError, ConfigStore,
    GenerationRequest, LanguageModelError, LearnerProfile, LogRecord, LogSink, ProgressSummary,
    PromptError, PromptRegistry, StdoutLogSink, StoreError,
};

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let sink = StdoutLogSink::new();

    match cli.command {
        Command::Generate(args) => run_generate(&cli.config, args, &sink),
        Command::TestLlm(args) => run_test_llm(&cli.config, args, &sink),
    }
}

#[derive(Parser)]
#[command(name = "lesson-cli", about = "Generate AI lesson blocks for English learners")]
struct Cli {
    /// Path to the JSON config with LLM profiles and budgets.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate one lesson block for a user.
    Generate(GenerateArgs),
    /// Send a short prompt through the configured model and print the reply.
    TestLlm(TestLlmArgs),
}

#[derive(Args)]
struct GenerateArgs {
    /// Stable identifier of the learner.
    #[arg(long)]
    user: String,

    /// CEFR level: A1, A2, B1, B2, C1 or C2.
    #[arg(long)]
    level: String,

    /// Requested theme for the block, e.g. "past_simple".
    #[arg(long, default_value = "")]
    topic: String,

    /// Extra free-text guidance for the metadata prompt.
    #[arg(long, default_value = "")]
    guidance: String,

    #[arg(long, default_value = "")]
    about: String,

    #[arg(long, default_value = "")]
    interests: String,

    #[arg(long, default_value = "")]
    goals: String,

    /// Block difficulty within the level, 1..=5.
    #[arg(long, default_value_t = 1)]
    difficulty: u8,

    /// Where generated blocks are stored.
    #[arg(long, default_value = "blocks.json")]
    store: PathBuf,

    /// LLM profile name; defaults to the last used or the first configured.
    #[arg(long)]
    llm_interface: Option<String>,
}

#[derive(Args)]
struct TestLlmArgs {
    #[arg(long)]
    llm_interface: Option<String>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("block generation failed ({}): {}", .0.reason(), .0)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Model(#[from] LanguageModelError),
    #[error("{0}")]
    Invalid(String),
}

fn run_generate(config_path: &Path, args: GenerateArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let store_file = ConfigStore::open(config_path.to_path_buf())?;
    let config = store_file.config();

    let level: CefrLevel = args
        .level
        .parse()
        .map_err(|err| CliError::Invalid(format!("{err}")))?;
    if !(1..=5).contains(&args.difficulty) {
        return Err(CliError::Invalid(format!(
            "difficulty must be within 1..=5, got {}",
            args.difficulty
        )));
    }

    let profile_name = select_llm_interface(config, args.llm_interface)?;
    let model = create_llm_adapter(config, &profile_name)?;
    let prompts = PromptRegistry::from_prompt_config(&config.prompts)?;
    let block_store = JsonFileStore::open(&args.store)?;

    let request = GenerationRequest {
        user_id: args.user.clone(),
        level,
        topic: args.topic,
        guidance: args.guidance,
    };
    let learner = LearnerProfile {
        about: args.about,
        interests: args.interests,
        learning_goals: args.goals,
    };

    // Earlier blocks in the store feed the "do not repeat" topic list.
    let existing = block_store.blocks_for_user(&args.user)?;
    let progress = ProgressSummary {
        difficulty: args.difficulty,
        covered_topics: existing
            .iter()
            .map(|block| block.metadata.grammar_topic.clone())
            .collect(),
        passed_blocks: existing.len() as u32,
        ..ProgressSummary::default()
    };

    sink.log(LogRecord::info(format!(
        "using LLM profile `{profile_name}`, store `{}`",
        args.store.display()
    )));

    let generator = BlockGenerator::new(&prompts, sink).with_budgets(config.budgets.clone());
    let block_id = generator.generate(model.as_ref(), &block_store, &request, &learner, &progress)?;

    let block = block_store
        .block(block_id)?
        .ok_or_else(|| CliError::Invalid(format!("block {block_id} vanished after creation")))?;
    println!(
        "Created block {} `{}` ({} lessons, level {}, difficulty {})",
        block.id,
        block.metadata.title,
        block.lessons.len(),
        block.metadata.level,
        block.metadata.difficulty
    );
    for lesson in &block.lessons {
        println!(
            "  {}. [{}] {} (~{} min)",
            lesson.order, lesson.draft.kind, lesson.draft.title, lesson.draft.duration_minutes
        );
    }
    Ok(())
}

fn run_test_llm(config_path: &Path, args: TestLlmArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let store_file = ConfigStore::open(config_path.to_path_buf())?;
    let config = store_file.config();

    let profile_name = select_llm_interface(config, args.llm_interface)?;
    sink.log(LogRecord::info(format!("testing LLM profile `{profile_name}`")));

    let model = create_llm_adapter(config, &profile_name)?;
    let reply = model.generate("Reply with the single word: OK", 16)?;
    println!("Model replied: {}", reply.trim());
    Ok(())
}

fn select_llm_interface(
    config: &lesson_core::Config,
    requested: Option<String>,
) -> Result<String, CliError> {
    if let Some(name) = requested {
        if config.get_llm_profile(&name).is_none() {
            return Err(CliError::Invalid(format!("unknown LLM profile `{name}`")));
        }
        return Ok(name);
    }

    if let Some(name) = &config.recent.last_llm_interface {
        if config.get_llm_profile(name).is_some() {
            return Ok(name.clone());
        }
    }

    config
        .primary_llm_profile()
        .map(|(name, _)| name.clone())
        .ok_or_else(|| {
            CliError::Invalid(
                "no LLM profiles configured; add one to the config file first".to_string(),
            )
        })
}
