mod prompts;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use flowline_core::config::AppConfig;
use flowline_core::traits::ModelClient;
use flowline_core::types::{ModelTier, RunId};
use flowline_engine::{
    Agent, AgentSettings, Chain, ConvergenceLoop, ConvergenceSettings, Critique, FanOut, Improvement,
    InputMapping, ModelStep, PerspectiveCritique, PlannerWorker, RoutedPipelines, Router,
    TargetedRefinement, ToolLoop, WorkflowState,
};
use flowline_tools::ToolRegistry;

const DEFAULT_GOAL: &str =
    "Research three open-source LLM evaluation frameworks and compare their features";
const DEFAULT_AGENT_GOAL: &str =
    "Find a used 8-string guitar under $700 in good condition. Search the listings and pick the best option.";

#[derive(Parser)]
#[command(name = "flowline", version, about = "Composable LLM workflow runner")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "flowline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question with calculator and lookup tools bound
    Augment {
        #[arg(trailing_var_arg = true)]
        query: Vec<String>,
    },
    /// Outline, validate, then draft an article
    Chain {
        #[arg(short, long, default_value = "the benefits of renewable energy")]
        topic: String,
    },
    /// Classify a query and run the selected pipeline
    Route {
        /// Only print the selected pipeline
        #[arg(long)]
        dry_run: bool,
        #[arg(trailing_var_arg = true)]
        query: Vec<String>,
    },
    /// Summarize every paragraph of a document concurrently
    Parallel {
        /// Text file to summarize (paragraphs separated by blank lines)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Plan a goal into tasks and execute them in parallel
    Orchestrate {
        #[arg(trailing_var_arg = true)]
        goal: Vec<String>,
    },
    /// Draft, critique and revise until the quality threshold is met
    Refine {
        #[arg(short, long, default_value = "special relativity")]
        topic: String,
        #[arg(short, long, default_value_t = 200)]
        words: u32,
    },
    /// Evaluate from three perspectives and improve the weakest one
    Targeted {
        #[arg(short, long, default_value = "quantum entanglement")]
        topic: String,
        #[arg(short, long, default_value_t = 250)]
        words: u32,
    },
    /// Run the tool-using agent graph toward a goal
    Agent {
        /// Plan cycles allowed (defaults to `[workflow].max_iterations`)
        #[arg(long)]
        max_iterations: Option<u32>,
        #[arg(trailing_var_arg = true)]
        goal: Vec<String>,
    },
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowline=info,warn")),
        )
        .with_target(false)
        .init();

    let config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        eprintln!(
            "Config file not found: {}. Falling back to environment.",
            cli.config.display()
        );
        AppConfig::from_env()
    };

    let client = flowline_llm::create_client(&config);
    let registry = Arc::new(ToolRegistry::with_builtins());
    let run_id = RunId::new();
    info!(
        run_id = %run_id.0,
        fast = %config.models.fast.model_id,
        tools = registry.list().len(),
        "Initialized"
    );

    match cli.command {
        Commands::Augment { query } => {
            let query = text_or_stdin(query);
            let out = ToolLoop::new(client, registry, config.workflow.max_turns)
                .with_tier(config.workflow.tier_for("augment", ModelTier::Fast))
                .with_step_timeout(config.workflow.step_timeout())
                .run(&query)
                .await?;
            println!("{}", out.answer);
            info!(turns = out.turns, tool_results = out.log.tool_results(), "Done");
        }
        Commands::Chain { topic } => run_chain(&config, client, &topic).await?,
        Commands::Route { dry_run, query } => {
            let query = text_or_stdin(query);
            let router = Router::from_config(&config.routing);
            if dry_run {
                println!("{}", router.select(&query));
                return Ok(());
            }
            let ids: Vec<String> = router.pipeline_ids().into_iter().map(String::from).collect();
            let mut pipelines = RoutedPipelines::new(router, config.workflow.step_timeout());
            for id in ids {
                let tier = if id == "smart" { ModelTier::Smart } else { ModelTier::Fast };
                let step = ModelStep::new(id.as_str(), client.clone(), prompts::ROUTED_ANSWER)
                    .with_tier(tier)
                    .configured(&config.workflow);
                pipelines = pipelines.register(id, step);
            }
            let routed = pipelines.route(&query).await?;
            println!("[{}] {}", routed.pipeline, display(&routed.output));
        }
        Commands::Parallel { file } => {
            let text = match file {
                Some(path) => std::fs::read_to_string(path)?,
                None => prompts::SAMPLE_ARTICLE.to_string(),
            };
            let paragraphs: Vec<Value> = text
                .split("\n\n")
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| Value::String(p.to_string()))
                .collect();
            let step = ModelStep::new("summarize", client, prompts::SUMMARIZE_PARAGRAPH)
                .configured(&config.workflow);
            let results = FanOut::from_config(&config.workflow)
                .map(Arc::new(step), paragraphs)
                .await;
            for (i, result) in results.iter().enumerate() {
                match result {
                    Ok(summary) => println!("{}. {}", i + 1, display(summary)),
                    Err(e) => println!("{}. [failed: {}]", i + 1, e),
                }
            }
        }
        Commands::Orchestrate { goal } => {
            let goal = non_empty_or(goal, DEFAULT_GOAL);
            let planner = ModelStep::new("planner", client.clone(), prompts::PLANNER_USER)
                .with_system(prompts::PLANNER_SYSTEM)
                .configured(&config.workflow);
            let worker = ModelStep::new("worker", client, prompts::WORKER_USER)
                .with_system(prompts::WORKER_SYSTEM)
                .configured(&config.workflow);
            let orchestration = PlannerWorker::new(
                planner,
                worker,
                FanOut::from_config(&config.workflow),
                config.workflow.step_timeout(),
            )
            .run(&goal)
            .await?;

            println!("Plan ({} tasks):", orchestration.plan.len());
            for (i, outcome) in orchestration.results.iter().enumerate() {
                println!("\n{}. {}", i + 1, outcome.task);
                match &outcome.outcome {
                    Ok(value) => println!("{}", display(value)),
                    Err(e) => println!("[failed: {}]", e),
                }
            }
        }
        Commands::Refine { topic, words } => {
            let (draft, evaluate, improve) =
                refinement_steps(&config, client, prompts::CRITIQUE_SYSTEM, prompts::CRITIQUE_USER);
            let report = ConvergenceLoop::new(
                draft,
                evaluate.structured::<Critique>(),
                improve,
                ConvergenceSettings::from_config(&config.workflow),
                config.workflow.step_timeout(),
            )
            .run(json!({ "topic": topic, "word_count": words }))
            .await?;

            for revision in &report.history {
                println!(
                    "Iteration {}: quality {}/10{}",
                    revision.iteration,
                    revision.quality,
                    revision
                        .confidence
                        .map(|c| format!(", revision confidence {:.2}", c))
                        .unwrap_or_default()
                );
            }
            println!("Stopped: {:?}\n", report.stop_reason);
            println!("{}", report.artifact);
        }
        Commands::Targeted { topic, words } => {
            let (draft, evaluate, improve) =
                refinement_steps(&config, client, prompts::PANEL_SYSTEM, prompts::PANEL_USER);
            let report = TargetedRefinement::new(
                draft,
                evaluate.structured::<PerspectiveCritique>(),
                improve,
                config.workflow.step_timeout(),
            )
            .run(json!({ "topic": topic, "word_count": words }))
            .await?;

            println!("Scientific accuracy: {}/10", report.critique.scientific_accuracy.quality);
            println!("Readability:         {}/10", report.critique.readability.quality);
            println!("Engagement:          {}/10", report.critique.engagement.quality);
            match report.focus {
                Some(focus) => println!("Improved: {}\n", focus.label()),
                None => println!("All perspectives acceptable\n"),
            }
            println!("{}", report.artifact);
        }
        Commands::Agent { max_iterations, goal } => {
            let goal = non_empty_or(goal, DEFAULT_AGENT_GOAL);
            let settings = AgentSettings::from_config(&config.workflow, max_iterations);
            let outcome = Agent::new(client, registry, settings).run(&goal).await?;

            println!("Path: {}", outcome.path.join(" -> "));
            println!(
                "Iterations: {} (goal {})",
                outcome.iterations,
                if outcome.completed { "met" } else { "not met" }
            );
            if let Some(analysis) = outcome.analysis {
                println!("\n{}", analysis);
            }
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    info!(run_id = %run_id.0, "Run complete");
    Ok(())
}

async fn run_chain(config: &AppConfig, client: Arc<dyn ModelClient>, topic: &str) -> anyhow::Result<()> {
    let wf = &config.workflow;
    let chain = Chain::new("article", wf.step_timeout())
        .stage(
            ModelStep::new("outline", client.clone(), prompts::OUTLINE).configured(wf),
            InputMapping::keys(["topic"]),
            "outline",
        )
        .stage(
            ModelStep::new("validate", client.clone(), prompts::VALIDATE_OUTLINE).configured(wf),
            InputMapping::keys(["outline"]),
            "validation",
        )
        .stage(
            ModelStep::new("draft", client, prompts::DRAFT_ARTICLE).configured(wf),
            InputMapping::keys(["outline"]),
            "article",
        );

    let mut state = WorkflowState::new();
    state.set_str("topic", topic);
    let state = chain.run_state(state).await.map_err(|e| {
        error!(error = %e, "Chain failed");
        e
    })?;

    for (title, key) in [("Outline", "outline"), ("Validation", "validation"), ("Article", "article")] {
        println!("== {} ==\n{}\n", title, state.get_str(key).unwrap_or_default());
    }
    Ok(())
}

fn refinement_steps(
    config: &AppConfig,
    client: Arc<dyn ModelClient>,
    evaluate_system: &str,
    evaluate_user: &str,
) -> (ModelStep, ModelStep, ModelStep) {
    let wf = &config.workflow;
    let draft = ModelStep::new("draft", client.clone(), prompts::DRAFT_USER)
        .with_system(prompts::DRAFT_SYSTEM)
        .with_tier(ModelTier::Smart)
        .configured(wf);
    let evaluate = ModelStep::new("evaluate", client.clone(), evaluate_user)
        .with_system(evaluate_system)
        .with_tier(ModelTier::Smart)
        .configured(wf);
    let improve = ModelStep::new("improve", client, prompts::IMPROVE_USER)
        .with_system(prompts::IMPROVE_SYSTEM)
        .with_tier(ModelTier::Smart)
        .configured(wf)
        .structured::<Improvement>();
    (draft, evaluate, improve)
}

/// Join trailing args, or read stdin when none were given.
fn text_or_stdin(args: Vec<String>) -> String {
    let text = args.join(" ");
    if !text.is_empty() {
        return text;
    }
    io::stdin()
        .lock()
        .lines()
        .map_while(|l| l.ok())
        .collect::<Vec<_>>()
        .join("\n")
}

fn non_empty_or(args: Vec<String>, default: &str) -> String {
    let text = args.join(" ");
    if text.trim().is_empty() {
        warn!(default = %default, "No goal given, using the sample goal");
        default.to_string()
    } else {
        text
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
