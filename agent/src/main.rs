//! Issue-fixing repository agent.
//!
//! Runs one issue through the agent loop against GitHub and an
//! OpenAI-compatible model, then prints the pull request result line.

use std::path::PathBuf;

use agent::exit_codes;
use agent::io::config::{AgentConfig, Credentials, load_config};
use agent::io::github::GithubClient;
use agent::io::openai::OpenAiCompatClient;
use agent::io::run_store::InMemoryRunStore;
use agent::orchestrator::{RunRequest, run_agent};
use agent::tools::catalog;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agent", version, about = "Issue-fixing repository agent")]
struct Cli {
    /// Path to the TOML config. Defaults apply when the file is missing.
    #[arg(long, global = true, default_value = "agent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Work on one issue and open a pull request.
    Run {
        /// Repository as owner/name.
        #[arg(long)]
        repo: String,
        /// Issue title.
        #[arg(long)]
        title: String,
        /// Issue description.
        #[arg(long, default_value = "")]
        body: String,
    },
    /// Print the tool catalog offered to the model.
    Tools,
    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() {
    agent::logging::init("agent=info");
    let code = match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::FATAL
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run { repo, title, body } => {
            let config = load_config(&cli.config)?;
            let request = RunRequest {
                repo: repo.parse()?,
                issue_title: title,
                issue_description: body,
            };
            cmd_run(&config, request).await
        }
        Command::Tools => {
            println!("{}", serde_json::to_string_pretty(&catalog())?);
            Ok(exit_codes::OK)
        }
        Command::Config => {
            let config = load_config(&cli.config)?;
            print!("{}", toml::to_string_pretty(&config).context("serialize config")?);
            Ok(exit_codes::OK)
        }
    }
}

async fn cmd_run(config: &AgentConfig, request: RunRequest) -> Result<i32> {
    let credentials = Credentials::from_env()?;
    let host = GithubClient::new(&config.github, &credentials.github_token)?;
    let model = OpenAiCompatClient::new(&config.model, &credentials.llm_token, config.model_timeout())
        .context("create model client")?;
    let store = InMemoryRunStore::new();

    let outcome = run_agent(&model, &host, &store, config, request).await?;
    println!("{}", outcome.result);
    Ok(if outcome.pull_request.is_some() {
        exit_codes::OK
    } else {
        exit_codes::PR_FAILED
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run() {
        let cli = Cli::parse_from([
            "agent", "run", "--repo", "acme/widgets", "--title", "Fix bug",
        ]);
        match cli.command {
            Command::Run { repo, title, body } => {
                assert_eq!(repo, "acme/widgets");
                assert_eq!(title, "Fix bug");
                assert_eq!(body, "");
            }
            _ => panic!("expected run"),
        }
        assert_eq!(cli.config, PathBuf::from("agent.toml"));
    }

    #[test]
    fn parse_global_config_after_subcommand() {
        let cli = Cli::parse_from(["agent", "tools", "--config", "custom.toml"]);
        assert!(matches!(cli.command, Command::Tools));
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
    }

    #[test]
    fn run_requires_repo_and_title() {
        assert!(Cli::try_parse_from(["agent", "run", "--title", "x"]).is_err());
        assert!(Cli::try_parse_from(["agent", "run", "--repo", "a/b"]).is_err());
    }

    #[tokio::test]
    async fn invalid_repo_is_fatal_before_any_io() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cli = Cli::parse_from([
            "agent",
            "run",
            "--repo",
            "not-a-repo",
            "--title",
            "x",
            "--config",
            temp.path().join("missing.toml").to_str().expect("utf8"),
        ]);
        let err = run(cli).await.unwrap_err();
        assert!(err.to_string().contains("owner/name"));
    }
}
