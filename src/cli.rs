//! CLI argument parsing

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::error::{AppError, Result};
use crate::paths::default_cache_dir;
use crate::registry::{Registry, RegistryOptions};
use crate::repo::parse_owner_repo;

#[derive(Parser)]
#[command(name = "trystack")]
#[command(
    author,
    version,
    about = "Run third-party apps locally from declarative container recipes",
    long_about = None
)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Bare `trystack owner/repo` is shorthand for `trystack up owner/repo`.
    #[command(flatten)]
    pub default_up: DefaultUpArgs,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the stack with docker compose up -d (default)
    Up(UpArgs),

    /// Print run instructions without touching docker
    Print(TargetArgs),

    /// List available recipe ids for a repo
    List(TargetArgs),

    /// Diagnose environment, recipe, and stack status
    Doctor(TargetArgs),

    /// Show docker compose ps
    Ps(TargetArgs),

    /// Show docker compose logs
    Logs {
        #[command(flatten)]
        target: TargetArgs,

        /// Number of log lines per service
        #[arg(long, default_value_t = 200)]
        tail: u32,

        /// Keep following the log output
        #[arg(long)]
        follow: bool,
    },

    /// Stop services without removing them
    Stop(TargetArgs),

    /// Stop and remove containers and networks
    Down {
        #[command(flatten)]
        target: TargetArgs,

        /// Also remove named volumes
        #[arg(long, short)]
        volumes: bool,
    },

    /// Validate every recipe under a local recipes tree
    Verify {
        /// Policy mode: community or verified
        #[arg(long, default_value = "verified")]
        mode: String,

        /// Recipes tree root (default: ./recipes)
        #[arg(long = "recipes-dir")]
        recipes_dir: Option<PathBuf>,

        /// Structured JSON output
        #[arg(long)]
        json: bool,
    },

    /// Handle a trystack:// one-click URI
    Protocol {
        #[command(subcommand)]
        action: ProtocolSubcommand,
    },
}

#[derive(Subcommand)]
pub enum ProtocolSubcommand {
    /// Execute a trystack:// URI (invoked by the OS handler)
    Run {
        /// The full trystack:// URI
        uri: String,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

/// Flags shared by every command that resolves a repo to a recipe.
#[derive(Args, Clone, Debug)]
pub struct TargetArgs {
    /// owner/repo, a github.com URL, or a git@github.com: remote
    pub input: String,

    /// Recipe id to use (default: prefer 'default')
    #[arg(long)]
    pub recipe: Option<String>,

    /// Override the docker compose project name
    #[arg(long)]
    pub project: Option<String>,

    /// Registry repo to fetch recipes from, as owner/repo
    #[arg(long, env = "TRYSTACK_REGISTRY")]
    pub registry: Option<String>,

    /// Git ref inside the registry repo
    #[arg(long = "registry-ref", env = "TRYSTACK_REGISTRY_REF", default_value = "main")]
    pub registry_ref: String,

    /// Cache directory for downloaded recipes
    #[arg(long = "cache-dir", env = "TRYSTACK_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Use registry recipes even when local ones exist
    #[arg(long = "prefer-registry")]
    pub prefer_registry: bool,

    /// Structured JSON output where supported
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone, Debug)]
pub struct UpArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Print instructions only, do not run docker
    #[arg(long = "no-run")]
    pub no_run: bool,

    /// Do not open the UI in a browser when ready
    #[arg(long = "no-open")]
    pub no_open: bool,

    /// Policy mode applied before launch: community or verified
    #[arg(long, default_value = "community")]
    pub policy: String,
}

/// Top-level arguments accepted without a subcommand. Mirrors `UpArgs`
/// with an optional repo, since clap cannot flatten a group whose
/// positional is required while also allowing plain `trystack` to print
/// help.
#[derive(Args, Clone, Debug)]
pub struct DefaultUpArgs {
    /// owner/repo, a github.com URL, or a git@github.com: remote
    pub input: Option<String>,

    /// Recipe id to use (default: prefer 'default')
    #[arg(long)]
    pub recipe: Option<String>,

    /// Override the docker compose project name
    #[arg(long)]
    pub project: Option<String>,

    /// Registry repo to fetch recipes from, as owner/repo
    #[arg(long, env = "TRYSTACK_REGISTRY")]
    pub registry: Option<String>,

    /// Git ref inside the registry repo
    #[arg(long = "registry-ref", env = "TRYSTACK_REGISTRY_REF", default_value = "main")]
    pub registry_ref: String,

    /// Cache directory for downloaded recipes
    #[arg(long = "cache-dir", env = "TRYSTACK_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Use registry recipes even when local ones exist
    #[arg(long = "prefer-registry")]
    pub prefer_registry: bool,

    /// Structured JSON output where supported
    #[arg(long)]
    pub json: bool,

    /// Print instructions only, do not run docker
    #[arg(long = "no-run")]
    pub no_run: bool,

    /// Do not open the UI in a browser when ready
    #[arg(long = "no-open")]
    pub no_open: bool,

    /// Policy mode applied before launch: community or verified
    #[arg(long, default_value = "community")]
    pub policy: String,
}

impl DefaultUpArgs {
    /// The implied `up` invocation, when a repo argument was given.
    pub fn into_up(self) -> Option<UpArgs> {
        let input = self.input?;
        Some(UpArgs {
            target: TargetArgs {
                input,
                recipe: self.recipe,
                project: self.project,
                registry: self.registry,
                registry_ref: self.registry_ref,
                cache_dir: self.cache_dir,
                prefer_registry: self.prefer_registry,
                json: self.json,
            },
            no_run: self.no_run,
            no_open: self.no_open,
            policy: self.policy,
        })
    }
}

impl TargetArgs {
    /// Registry coordinates and cache location for this invocation.
    pub fn registry_options(&self) -> Result<RegistryOptions> {
        let registry = match &self.registry {
            Some(spec) => {
                let coords = parse_owner_repo(spec).ok_or_else(|| {
                    AppError::usage(format!("invalid --registry (expected owner/repo): {spec}"))
                })?;
                Registry {
                    owner: coords.owner,
                    repo: coords.repo,
                    reference: self.registry_ref.clone(),
                }
            }
            None => Registry {
                reference: self.registry_ref.clone(),
                ..Registry::default()
            },
        };
        Ok(RegistryOptions {
            registry,
            cache_dir: self.cache_dir.clone().unwrap_or_else(default_cache_dir),
            prefer_registry: self.prefer_registry,
            recipes_root: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory as _;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn bare_repo_means_up() {
        let cli = Cli::parse_from(["trystack", "acme/app", "--no-open"]);
        assert!(cli.command.is_none());
        let up = cli.default_up.into_up().unwrap();
        assert_eq!(up.target.input, "acme/app");
        assert!(up.no_open);
    }

    #[test]
    fn no_arguments_yields_neither_command_nor_target() {
        let cli = Cli::parse_from(["trystack"]);
        assert!(cli.command.is_none());
        assert!(cli.default_up.into_up().is_none());
    }

    #[test]
    fn registry_ref_falls_back_to_env() {
        std::env::set_var("TRYSTACK_REGISTRY_REF", "release");
        let cli = Cli::parse_from(["trystack", "list", "acme/app"]);
        std::env::remove_var("TRYSTACK_REGISTRY_REF");
        match cli.command {
            Some(Command::List(target)) => {
                let opts = target.registry_options().unwrap();
                assert_eq!(opts.registry.reference, "release");
            }
            _ => panic!("expected list subcommand"),
        }
    }

    #[test]
    fn logs_flags_parse() {
        let cli = Cli::parse_from(["trystack", "logs", "acme/app", "--tail", "50", "--follow"]);
        match cli.command {
            Some(Command::Logs { target, tail, follow }) => {
                assert_eq!(target.input, "acme/app");
                assert_eq!(tail, 50);
                assert!(follow);
            }
            _ => panic!("expected logs subcommand"),
        }
    }

    #[test]
    fn registry_flag_must_be_owner_repo() {
        let cli = Cli::parse_from(["trystack", "list", "acme/app", "--registry", "not-a-pair"]);
        match cli.command {
            Some(Command::List(target)) => {
                assert!(target.registry_options().is_err());
            }
            _ => panic!("expected list subcommand"),
        }
    }

    #[test]
    fn custom_registry_and_ref() {
        let cli = Cli::parse_from([
            "trystack",
            "list",
            "acme/app",
            "--registry",
            "acme/recipes",
            "--registry-ref",
            "v2",
        ]);
        match cli.command {
            Some(Command::List(target)) => {
                let opts = target.registry_options().unwrap();
                assert_eq!(opts.registry.owner, "acme");
                assert_eq!(opts.registry.repo, "recipes");
                assert_eq!(opts.registry.reference, "v2");
            }
            _ => panic!("expected list subcommand"),
        }
    }
}
