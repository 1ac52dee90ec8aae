mod browse;
mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use progress::CliReporter;
use tidyfs_core::remediation::ChildStatus;
use tidyfs_core::{AppConfig, OverlapEngine, RemediationRequest, RemediationResult};
use tracing::{error, info};

fn main() -> Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match tidyfs_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    let outcome = match args.command {
        Some(Commands::Scan { paths }) => run_scan(&config, &paths),
        Some(Commands::Insights { refresh, json }) => run_insights(&config, refresh, json),
        Some(Commands::Merge {
            destination,
            source,
            on_conflict,
        }) => {
            let mut request = RemediationRequest::merge(destination, source);
            if let Some(policy) = on_conflict {
                request = request.with_conflict_policy(policy);
            }
            run_remediation(&config, request)
        }
        Some(Commands::Archive { target }) => {
            run_remediation(&config, RemediationRequest::archive(target))
        }
        Some(Commands::Ls { path }) => run_ls(path),
        Some(Commands::Terms { path, json }) => {
            OverlapEngine::open(config.clone())
                .map_err(anyhow::Error::from)
                .and_then(|engine| print_terms(&engine, &path, json))
        }
        Some(Commands::Browse { path }) => OverlapEngine::open(config.clone())
            .map_err(anyhow::Error::from)
            .and_then(|engine| browse::run_browse(&engine, path)),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
            Ok(())
        }
        Some(Commands::TruncateDb) => {
            match prompt_confirm(
                "Are you SURE you want to COMPLETELY DELETE the index?",
                Some(false),
            ) {
                Ok(true) => run_truncate(&config),
                _ => process::exit(0),
            }
        }
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = outcome {
        error!("Error: {:#}", err);
        process::exit(1);
    }
    Ok(())
}

fn run_scan(config: &AppConfig, paths: &[PathBuf]) -> Result<()> {
    let engine = OverlapEngine::open(config.clone())?;
    let reporter = CliReporter::new();

    for path in paths {
        match engine.scan(path, &reporter) {
            Ok(summary) => info!(
                "{}: {} distinct terms, {} occurrences, {} entries ({} skipped) in {}",
                summary.path.display().to_string().green(),
                format!("{}", summary.distinct_terms).cyan(),
                summary.total_occurrences,
                summary.entries_seen,
                summary.skipped,
                format!("{:.2}s", summary.duration.as_secs_f64()).green(),
            ),
            // One bad root should not stop the others
            Err(err) => error!("{}: {}", path.display(), err),
        }
    }

    let insights = engine.insights()?;
    info!(
        "{} paths indexed, {} overlapping pairs",
        format!("{}", engine.indexed_paths()?.len()).cyan(),
        format!("{}", insights.len()).red(),
    );
    Ok(())
}

fn run_insights(config: &AppConfig, refresh: bool, json: bool) -> Result<()> {
    let engine = OverlapEngine::open(config.clone())?;
    let insights = if refresh {
        engine.refresh_insights(&CliReporter::new())?
    } else {
        engine.insights()?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&insights)?);
        return Ok(());
    }
    if insights.is_empty() {
        println!("No overlapping paths above {:.2}", config.similarity.threshold);
        return Ok(());
    }
    for (rank, insight) in insights.iter().enumerate() {
        println!(
            "{:>3}. {}  {}\n     {}",
            rank + 1,
            format!("{:>5.1}%", insight.similarity * 100.0).yellow().bold(),
            insight.path_a,
            insight.path_b
        );
    }
    Ok(())
}

fn run_remediation(config: &AppConfig, request: RemediationRequest) -> Result<()> {
    let engine = std::sync::Arc::new(OverlapEngine::open(config.clone())?);
    let handle = engine
        .spawn_remediation(request)
        .context("Failed to start remediation thread")?;
    let outcome = handle
        .join()
        .map_err(|_| anyhow::anyhow!("Remediation thread panicked"))?;
    let result = match outcome {
        Ok(result) => result,
        Err(tidyfs_core::Error::IndexOutOfSync { result, source }) => {
            print_remediation(&result);
            return Err(anyhow::Error::from(*source)
                .context("Filesystem changed but the index was not updated; rescan the affected paths"));
        }
        Err(e) => return Err(e.into()),
    };

    print_remediation(&result);
    result.into_result()?;
    Ok(())
}

fn print_remediation(result: &RemediationResult) {
    for child in &result.children {
        let line = match &child.status {
            ChildStatus::Moved { to } => format!("moved    {}", to.display()).green(),
            ChildStatus::Renamed { to } => format!("renamed  {}", to.display()).yellow(),
            ChildStatus::Skipped => format!("skipped  {}", child.source.display()).yellow(),
            ChildStatus::Failed { cause } => {
                format!("failed   {}: {}", child.source.display(), cause).red()
            }
            ChildStatus::Pending => format!("pending  {}", child.source.display()).dimmed(),
        };
        println!("  {}", line);
    }
    if result.is_success() {
        println!("{}", result.message().green());
    } else {
        println!("{}", result.message().red());
    }
}

fn run_ls(path: Option<PathBuf>) -> Result<()> {
    let dir = match path {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    for entry in tidyfs_core::listing::list_directory(&dir)? {
        if entry.is_dir {
            println!("{:>10}  {}/", entry.display_size(), entry.name.blue().bold());
        } else {
            println!("{:>10}  {}", entry.display_size(), entry.name);
        }
    }
    Ok(())
}

fn print_terms(engine: &OverlapEngine, path: &Path, json: bool) -> Result<()> {
    let mut terms: Vec<(String, u64)> = engine.terms_for(path)?.into_iter().collect();
    terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    if json {
        println!("{}", serde_json::to_string_pretty(&terms)?);
        return Ok(());
    }
    if terms.is_empty() {
        println!("{} is not indexed", path.display());
        return Ok(());
    }
    for (term, frequency) in terms {
        println!("{:>6}  {}", frequency.to_string().cyan(), term);
    }
    Ok(())
}

fn run_truncate(config: &AppConfig) -> Result<()> {
    let engine = OverlapEngine::open(config.clone())?;
    engine.truncate()?;
    println!("All tables truncated");
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
