use clap::{Parser, Subcommand};
use lute::compiler::{core::Compiler, loader};
use lute::runtime::engine::{Engine, EngineConfig, FlowEvent};
use lute::runtime::storage::{FileSaveStore, SaveStore};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a story file until every node is idle
    Run {
        /// Path to the story YAML file
        file: PathBuf,

        /// Variables (key=value), override the story's own
        #[arg(long, short = 'D', value_parser = parse_key_val)]
        vars: Vec<(String, serde_json::Value)>,

        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,

        /// Milliseconds between ticks
        #[arg(long, default_value_t = 16)]
        tick_ms: u64,

        /// Orders a node may enter per tick, overrides the story setting
        #[arg(long)]
        max_steps: Option<usize>,

        /// Directory to load progress from and save it to
        #[arg(long)]
        save: Option<PathBuf>,

        /// Save slot name inside the save directory
        #[arg(long, default_value = "autosave")]
        slot: String,
    },
    /// Compile a story file and print its nodes and orders
    Check {
        /// Path to the story YAML file
        file: PathBuf,
    },
}

fn parse_key_val(s: &str) -> Result<(String, serde_json::Value), String> {
    let pos = s.find('=').ok_or_else(|| format!("invalid KEY=value: no `=` found in `{}`", s))?;
    let key = s[..pos].to_string();
    let val_str = &s[pos + 1..];
    let val = serde_json::from_str(val_str).unwrap_or_else(|_| serde_json::Value::String(val_str.to_string()));
    Ok((key, val))
}

fn load_engine(file: &Path) -> anyhow::Result<Engine> {
    info!("Loading story from: {:?}", file);
    let story = loader::load_story_from_yaml(&file.to_string_lossy())?;
    info!("Loaded story: {}", story.id);
    Compiler::new().compile(story)
}

fn log_events(engine: &mut Engine) {
    for event in engine.drain_events() {
        match event {
            FlowEvent::Unlocked(target) => info!(%target, "Unlocked"),
            FlowEvent::GroupCompleted(group) => info!(%group, "Group completed"),
            other => tracing::debug!(?other, "Event"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { file, vars, ticks, tick_ms, max_steps, save, slot } => {
            let mut engine = load_engine(&file)?;
            if let Some(max_steps_per_tick) = max_steps {
                engine.set_config(EngineConfig { max_steps_per_tick });
            }
            let store = save.map(FileSaveStore::new);

            if let Some(store) = &store {
                if let Some(snapshot) = store.load(&slot).await? {
                    engine.restore(&snapshot);
                }
            }
            for (k, v) in vars {
                engine.variables_mut().set(&k, v);
            }

            engine.start()?;
            log_events(&mut engine);

            let mut interval = tokio::time::interval(Duration::from_millis(tick_ms.max(1)));
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = tokio::signal::ctrl_c() => {
                        warn!("Interrupted");
                        break;
                    }
                }
                engine.tick()?;
                log_events(&mut engine);

                if engine.is_idle() {
                    info!(ticks = engine.tick_count(), "All nodes idle");
                    break;
                }
                if ticks.is_some_and(|max| engine.tick_count() >= max) {
                    warn!(running = engine.running_nodes().len(), "Tick limit reached");
                    break;
                }
            }

            if let Some(store) = &store {
                store.save(&slot, &engine.snapshot()).await?;
                info!(%slot, "Progress saved");
            }
        }
        Commands::Check { file } => {
            let engine = load_engine(&file)?;
            for node in engine.nodes() {
                let trigger = node.handler().map(|h| h.summary()).unwrap_or_else(|| "-".to_string());
                println!("{} [{}]", node.name(), trigger);
                if let Some(key) = node.target_key() {
                    println!("  locked by {}", key);
                }
                for slot in node.orders() {
                    let mark = if slot.enabled { ' ' } else { '#' };
                    println!("  {}{:>3} {}{} {}", mark, slot.index(), "  ".repeat(slot.indent), slot.kind(), slot.summary());
                }
            }
            for group in engine.groups() {
                println!("group {} ({} members)", group.name(), group.members().len());
            }
        }
    }

    Ok(())
}
