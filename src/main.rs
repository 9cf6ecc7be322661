use std::time::Duration;

use clap::{CommandFactory as _, Parser as _};
use reqwest::Client;

use trystack::cli::{Cli, Command, ProtocolSubcommand, TargetArgs, UpArgs};
use trystack::commands::{self, ManageAction, UpOptions};
use trystack::engine::DockerEngine;
use trystack::error::{AppError, Result};
use trystack::paths::{default_cache_dir, local_recipes_root};
use trystack::policy::PolicyMode;
use trystack::probe::{probe_client, ProbeTiming};
use trystack::protocol;
use trystack::recipe::ProcessEnv;

const API_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err}");
            err.exit_code()
        }
    };
    std::process::exit(code);
}

fn parse_policy(mode: &str) -> Result<PolicyMode> {
    PolicyMode::parse(mode)
        .ok_or_else(|| AppError::usage(format!("invalid policy mode: {mode} (expected community|verified)")))
}

async fn resolve(client: &Client, target: &TargetArgs) -> Result<trystack::context::Context> {
    let opts = target.registry_options()?;
    commands::resolve(
        client,
        &target.input,
        target.recipe.as_deref(),
        target.project.as_deref(),
        &opts,
    )
    .await
}

async fn run_up(client: &Client, args: &UpArgs) -> Result<i32> {
    let ctx = resolve(client, &args.target).await?;
    let opts = UpOptions {
        run: !args.no_run,
        open: !args.no_open,
        policy: parse_policy(&args.policy)?,
        timing: ProbeTiming::default(),
    };
    commands::up(&probe_client()?, &DockerEngine, &ctx, &ProcessEnv, &opts).await
}

async fn run(cli: Cli) -> Result<i32> {
    let client = Client::builder().timeout(API_TIMEOUT).build()?;

    let command = match (cli.command, cli.default_up.into_up()) {
        (Some(command), _) => command,
        (None, Some(up)) => Command::Up(up),
        (None, None) => {
            Cli::command().print_help()?;
            return Ok(0);
        }
    };

    match command {
        Command::Up(args) => run_up(&client, &args).await,
        Command::Print(target) => {
            let ctx = resolve(&client, &target).await?;
            let opts = UpOptions {
                run: false,
                ..UpOptions::default()
            };
            commands::up(&probe_client()?, &DockerEngine, &ctx, &ProcessEnv, &opts).await
        }
        Command::List(target) => {
            let opts = target.registry_options()?;
            commands::list(&client, &target.input, &opts, target.json).await
        }
        Command::Doctor(target) => {
            let ctx = resolve(&client, &target).await?;
            commands::doctor(
                &probe_client()?,
                &DockerEngine,
                &ctx,
                &ProcessEnv,
                target.prefer_registry,
                target.json,
            )
            .await
        }
        Command::Ps(target) => {
            let ctx = resolve(&client, &target).await?;
            commands::manage(&DockerEngine, &ctx, &ManageAction::Ps).await
        }
        Command::Stop(target) => {
            let ctx = resolve(&client, &target).await?;
            commands::manage(&DockerEngine, &ctx, &ManageAction::Stop).await
        }
        Command::Down { target, volumes } => {
            let ctx = resolve(&client, &target).await?;
            commands::manage(&DockerEngine, &ctx, &ManageAction::Down { volumes }).await
        }
        Command::Logs { target, tail, follow } => {
            let ctx = resolve(&client, &target).await?;
            commands::manage(&DockerEngine, &ctx, &ManageAction::Logs { tail, follow }).await
        }
        Command::Verify {
            mode,
            recipes_dir,
            json,
        } => {
            let mode = parse_policy(&mode)?;
            let root = match recipes_dir {
                Some(dir) => dir,
                None => local_recipes_root(&std::env::current_dir()?),
            };
            commands::verify(&root, mode, json)
        }
        Command::Protocol { action } => match action {
            ProtocolSubcommand::Run { uri, yes } => {
                let request = protocol::parse_request(&uri)?;
                let opts = protocol::ProtocolOptions {
                    yes,
                    policy: PolicyMode::Community,
                    timing: ProbeTiming::default(),
                    cache_dir: default_cache_dir(),
                    recipes_root: None,
                };
                protocol::dispatch(
                    &client,
                    &probe_client()?,
                    &DockerEngine,
                    &ProcessEnv,
                    &request,
                    &opts,
                )
                .await
            }
        },
    }
}
