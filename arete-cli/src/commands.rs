//! Subcommand handlers.

use crate::{Commands, ConfigAction};
use arete_core::rag::generator::STUDENT_LEVEL_KEY;
use arete_core::{AreteConfig, Corpus, PipelineResult, RagPipeline, UserContext, local_pipeline};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Ask {
            query,
            level,
            no_cache,
            json,
        } => {
            let mut config = load(workspace, config_path)?;
            if no_cache {
                config.pipeline.enable_cache = false;
            }
            let pipeline = build_pipeline(&config, workspace)?;
            let result = pipeline
                .execute_pipeline(&query, None, Some(&user_context(level)))
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", render_answer(&result));
            }
            Ok(())
        }
        Commands::Batch { file, level, json } => {
            let config = load(workspace, config_path)?;
            let content = std::fs::read_to_string(&file)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file.display(), e))?;
            let queries = read_queries(&content);
            if queries.is_empty() {
                println!("No questions found in {}", file.display());
                return Ok(());
            }

            let pipeline = build_pipeline(&config, workspace)?;
            let results = pipeline
                .execute_pipeline_batch(&queries, None, Some(&user_context(level)))
                .await;

            if json {
                let summaries: Vec<BatchSummary> =
                    results.iter().map(BatchSummary::from).collect();
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                for (i, result) in results.iter().enumerate() {
                    println!("Q{}: {}", i + 1, result.query);
                    print!("{}", render_answer(result));
                    println!();
                }
            }
            Ok(())
        }
        Commands::Stats => {
            let config = load(workspace, config_path)?;
            let pipeline = build_pipeline(&config, workspace)?;
            println!("{}", serde_json::to_string_pretty(&pipeline.get_pipeline_stats())?);
            Ok(())
        }
        Commands::Config { action } => handle_config(action, workspace, config_path),
    }
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = arete_core::config::workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            if let Some(dir) = config_path.parent() {
                std::fs::create_dir_all(dir)?;
            }

            let toml_str = AreteConfig::default().to_toml()?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace, config_path)?;
            println!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Load configuration, from `config_path` alone when given.
fn load(workspace: &Path, config_path: Option<&Path>) -> anyhow::Result<AreteConfig> {
    let config = match config_path {
        Some(path) => arete_core::config::load_config_file(path),
        None => arete_core::config::load_config(Some(workspace), None),
    };
    config.map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

fn build_pipeline(config: &AreteConfig, workspace: &Path) -> anyhow::Result<RagPipeline> {
    let corpus = match &config.corpus.path {
        Some(path) => Corpus::load(&resolve_path(workspace, path))?,
        None => Corpus::builtin()?,
    };
    Ok(local_pipeline(Arc::new(corpus), config)?)
}

/// Relative corpus paths are taken relative to the workspace.
fn resolve_path(workspace: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

fn read_queries(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

fn user_context(level: Option<String>) -> UserContext {
    let mut context = UserContext::new();
    if let Some(level) = level {
        context.insert(STUDENT_LEVEL_KEY.to_string(), level);
    }
    context
}

fn render_answer(result: &PipelineResult) -> String {
    let mut out = format!("{}\n", result.response.response_text);
    if !result.response.citations.is_empty() {
        out.push_str("\nSources:\n");
        for citation in &result.response.citations {
            out.push_str(&format!("  {}\n", citation.label()));
        }
    }
    for error in &result.errors {
        out.push_str(&format!("\nerror: {error}\n"));
    }
    for warning in &result.warnings {
        out.push_str(&format!("warning: {warning}\n"));
    }
    out
}

/// One line of `arete batch --json` output.
#[derive(Debug, Serialize)]
struct BatchSummary<'a> {
    query: &'a str,
    success: bool,
    response: &'a str,
    sources: Vec<String>,
    errors: &'a [String],
    total_ms: u64,
}

impl<'a> From<&'a PipelineResult> for BatchSummary<'a> {
    fn from(result: &'a PipelineResult) -> Self {
        Self {
            query: &result.query,
            success: result.is_success(),
            response: &result.response.response_text,
            sources: result.response.citations.iter().map(|c| c.label()).collect(),
            errors: &result.errors,
            total_ms: result.metrics.total_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arete_core::types::{FALLBACK_MESSAGE, NO_RESULTS_ERROR};
    use arete_core::{PipelineConfig, PipelineStage};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace, None).await.unwrap();

        let config_path = workspace.join(".arete").join("config.toml");
        assert!(config_path.exists());

        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: AreteConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed, AreteConfig::default());
    }

    #[tokio::test]
    async fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        let config_path = workspace.join(".arete").join("config.toml");

        handle_command(
            Commands::Config {
                action: ConfigAction::Init,
            },
            workspace,
            None,
        )
        .await
        .unwrap();
        std::fs::write(&config_path, "[pipeline]\ntemperature = 0.9\n").unwrap();

        handle_command(
            Commands::Config {
                action: ConfigAction::Init,
            },
            workspace,
            None,
        )
        .await
        .unwrap();

        let content = std::fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("temperature = 0.9"));
    }

    #[test]
    fn test_load_explicit_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[pipeline]\nmax_diversified_results = 3\n").unwrap();

        let config = load(dir.path(), Some(&path)).unwrap();
        assert_eq!(config.pipeline.max_diversified_results, 3);
    }

    #[tokio::test]
    async fn test_ask_runs_against_builtin_corpus() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Ask {
            query: "What is virtue according to Plato?".into(),
            level: Some("beginner".into()),
            no_cache: true,
            json: false,
        };
        handle_command(command, dir.path(), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_reads_question_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("questions.txt");
        std::fs::write(&file, "# ethics\nWhat is virtue?\n\nWhat is duty?\n").unwrap();

        let command = Commands::Batch {
            file,
            level: None,
            json: true,
        };
        handle_command(command, dir.path(), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_corpus_file_is_error() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join(".arete");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            "[corpus]\npath = \"missing.json\"\n",
        )
        .unwrap();

        let err = handle_command(Commands::Stats, dir.path(), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing.json"));
    }

    #[test]
    fn test_read_queries_skips_comments_and_blanks() {
        let queries = read_queries("  What is justice?  \n\n# skip me\nWhat is the soul?\n");
        assert_eq!(queries, vec!["What is justice?", "What is the soul?"]);
    }

    #[test]
    fn test_resolve_path() {
        let workspace = Path::new("/srv/arete");
        assert_eq!(
            resolve_path(workspace, Path::new("corpus.json")),
            PathBuf::from("/srv/arete/corpus.json")
        );
        assert_eq!(
            resolve_path(workspace, Path::new("/data/corpus.json")),
            PathBuf::from("/data/corpus.json")
        );
    }

    #[test]
    fn test_user_context_level() {
        assert!(user_context(None).is_empty());
        let context = user_context(Some("advanced".into()));
        assert_eq!(context.get(STUDENT_LEVEL_KEY).map(String::as_str), Some("advanced"));
    }

    #[test]
    fn test_render_failed_answer() {
        let result = PipelineResult::failed(
            "What is virtue?",
            PipelineConfig::default(),
            PipelineStage::Retrieval,
            NO_RESULTS_ERROR,
        );
        let rendered = render_answer(&result);
        assert!(rendered.starts_with(FALLBACK_MESSAGE));
        assert!(rendered.contains("error: No relevant documents found"));
        assert!(!rendered.contains("Sources:"));

        let summary = BatchSummary::from(&result);
        assert!(!summary.success);
        assert_eq!(summary.errors, [NO_RESULTS_ERROR.to_string()]);
    }
}
