use anyhow::{anyhow, Context, Result};
use colored::*;
use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tidyfs_core::session::SessionContext;
use tidyfs_core::OverlapEngine;

use crate::progress::CliReporter;

const HELP: &str = "\
  ls                 list the current directory
  cd <dir>           enter a directory (relative or absolute)
  up                 go to the parent directory
  recent             show recently visited paths
  go <n>             jump to entry n of `recent`
  scan [dir]         index the current directory, or <dir>
  terms [dir]        show stored terms for the current directory, or <dir>
  quit               leave the browser";

/// Interactive directory browser backed by a [`SessionContext`].
pub fn run_browse(engine: &OverlapEngine, start: Option<PathBuf>) -> Result<()> {
    let start = match start {
        Some(path) => path,
        None => env::current_dir()?,
    };
    let mut session = SessionContext::new();
    session.enter(
        fs::canonicalize(&start).with_context(|| format!("Cannot open {}", start.display()))?,
    );
    print_listing(engine, &session)?;

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        let current = current(&session)?;
        print!("{} ", format!("{}>", current.display()).cyan());
        io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            println!();
            break;
        }
        let input = line.trim();
        let (command, arg) = match input.split_once(char::is_whitespace) {
            Some((command, arg)) => (command, Some(arg.trim())),
            None => (input, None),
        };

        let outcome = match command {
            "" => Ok(()),
            "ls" => print_listing(engine, &session),
            "cd" => match arg {
                Some(dir) => change_dir(engine, &mut session, &current.join(dir)),
                None => Err(anyhow!("cd needs a directory")),
            },
            "up" | ".." => match current.parent() {
                Some(parent) => change_dir(engine, &mut session, parent),
                None => Err(anyhow!("already at the filesystem root")),
            },
            "recent" => {
                for (i, path) in session.history.iter().enumerate() {
                    println!("  {} {}", format!("[{}]", i).dimmed(), path.display());
                }
                Ok(())
            }
            "go" => jump(engine, &mut session, arg),
            "scan" => {
                let target = arg.map_or_else(|| current.clone(), |dir| current.join(dir));
                engine
                    .scan(&target, &CliReporter::new())
                    .map(|summary| {
                        println!(
                            "Indexed {} ({} distinct terms)",
                            summary.path.display().to_string().green(),
                            summary.distinct_terms
                        )
                    })
                    .map_err(Into::into)
            }
            "terms" => {
                let target = arg.map_or_else(|| current.clone(), |dir| current.join(dir));
                crate::print_terms(engine, &target, false)
            }
            "help" | "?" => {
                println!("{}", HELP);
                Ok(())
            }
            "quit" | "exit" | "q" => break,
            other => Err(anyhow!("unknown command '{}', try help", other)),
        };
        if let Err(err) = outcome {
            println!("{} {:#}", "error:".red(), err);
        }
    }
    Ok(())
}

fn current(session: &SessionContext) -> Result<PathBuf> {
    session
        .current_root
        .clone()
        .ok_or_else(|| anyhow!("no current directory"))
}

fn change_dir(engine: &OverlapEngine, session: &mut SessionContext, target: &Path) -> Result<()> {
    let target =
        fs::canonicalize(target).with_context(|| format!("Cannot open {}", target.display()))?;
    if !target.is_dir() {
        return Err(anyhow!("{} is not a directory", target.display()));
    }
    session.enter(target);
    print_listing(engine, session)
}

fn jump(engine: &OverlapEngine, session: &mut SessionContext, arg: Option<&str>) -> Result<()> {
    let index: usize = arg
        .ok_or_else(|| anyhow!("go needs an index from `recent`"))?
        .parse()
        .context("index must be a number")?;
    let target = session
        .history
        .iter()
        .nth(index)
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("no recent entry {}", index))?;
    change_dir(engine, session, &target)
}

fn print_listing(engine: &OverlapEngine, session: &SessionContext) -> Result<()> {
    let dir = current(session)?;
    let entries = engine.list_directory(&dir)?;
    if entries.is_empty() {
        println!("  {}", "(empty)".dimmed());
    }
    for entry in entries {
        if entry.is_dir {
            println!("  {:>10}  {}/", entry.display_size(), entry.name.blue().bold());
        } else {
            println!("  {:>10}  {}", entry.display_size(), entry.name);
        }
    }
    Ok(())
}
