use anyhow::{Context, Result};
use clap::Parser;
use imgforge::{
    auth::MultiKeychain,
    cli::{
        Cli, Commands, CreateArgs, DigestCommand, ManifestsCommand, RegistryArgs,
        RegistryCommand,
    },
    config::Config,
    manifests::{save_digest_to_file, InspectOptions, ListOptions},
    registry::RegistryClient,
    service::{render_manifest_info, CreateConfig, ManifestService, ServiceError, TagStatus},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit code for a run stopped by Ctrl-C
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging to stderr
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match execute(cli).await {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            exit_code(&e)
        }
    };
    std::process::exit(code);
}

#[derive(Debug, thiserror::Error)]
#[error("interrupted")]
struct Interrupted;

fn exit_code(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<Interrupted>().is_some() {
        return EXIT_INTERRUPTED;
    }
    err.downcast_ref::<ServiceError>()
        .map(ServiceError::exit_code)
        .unwrap_or(1)
}

/// Run the command, giving up on Ctrl-C or when the configured timeout expires
async fn execute(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let timeout = config.registry.timeout_secs;
    let command = cli.command;

    let work = async move {
        match timeout {
            Some(secs) => {
                match tokio::time::timeout(Duration::from_secs(secs), run(command, &config)).await {
                    Ok(result) => result,
                    Err(_) => {
                        let err = anyhow::anyhow!("timed out after {}s", secs);
                        Err(ServiceError::Registry(err).into())
                    }
                }
            }
            None => run(command, &config).await,
        }
    };

    tokio::select! {
        result = work => result,
        _ = tokio::signal::ctrl_c() => Err(Interrupted.into()),
    }
}

async fn run(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Manifests(ManifestsCommand::Create(args)) => create(args, config).await,
        Commands::Manifests(ManifestsCommand::Inspect {
            name,
            registry,
            tag,
        }) => {
            let target = Target::resolve(&registry, config)?;
            let client = target.client(config);
            let info = ManifestService::new(&client)
                .inspect(&InspectOptions {
                    registry: target.registry,
                    namespace: target.namespace,
                    image_name: name,
                    tag,
                })
                .await?;

            print!("{}", render_manifest_info(&info));
            Ok(())
        }
        Commands::Manifests(ManifestsCommand::List { name, registry }) => {
            let target = Target::resolve(&registry, config)?;
            let client = target.client(config);
            let tags = ManifestService::new(&client)
                .list_tags(&ListOptions {
                    registry: target.registry,
                    namespace: target.namespace,
                    image_name: name,
                })
                .await?;

            if tags.is_empty() {
                info!("No tags found");
            } else {
                info!("Found {} tag(s)", tags.len());
            }
            for tag in tags {
                println!("{}", tag);
            }
            Ok(())
        }
        Commands::Digest(DigestCommand::Save {
            name,
            arch,
            digest,
            digest_dir,
        }) => {
            let dir = digest_dir.unwrap_or_else(|| config.manifests.digest_dir.clone());
            let path = save_digest_to_file(&name, &arch, &digest, &dir)
                .map_err(|e| ServiceError::Validation(e.into()))?;

            // Print only the path to stdout
            println!("{}", path.display());
            Ok(())
        }
        Commands::Registry(RegistryCommand::Health {
            registry,
            auth_file,
        }) => {
            let target = Target::resolve(
                &RegistryArgs {
                    registry,
                    namespace: None,
                    auth_file,
                },
                config,
            )?;
            let client = target.client(config);
            ManifestService::new(&client)
                .health_check(&target.registry)
                .await;
            Ok(())
        }
        Commands::Version => {
            println!("imgforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn create(args: CreateArgs, config: &Config) -> Result<()> {
    let target = Target::resolve(&args.registry, config)?;
    let client = target.client(config);

    let required_architectures = if args.require_arch.is_empty() {
        config.manifests.required_architectures.clone()
    } else {
        args.require_arch
    };

    let create_config = CreateConfig {
        registry: target.registry,
        namespace: target.namespace,
        image_name: args.name,
        tags: args.tags,
        digest_dir: args
            .digest_dir
            .unwrap_or_else(|| config.manifests.digest_dir.clone()),
        required_architectures,
        best_effort: args.best_effort,
        max_age: args.max_age,
        verify_registry: args.verify_registry,
        verify_concurrency: args
            .verify_concurrency
            .unwrap_or(config.manifests.verify_concurrency),
        health_check: args.health_check,
        force: args.force,
        dry_run: args.dry_run,
        annotations: args.annotations,
        labels: args.labels,
    };

    let report = ManifestService::new(&client).create(&create_config).await?;

    for outcome in &report.tags {
        match &outcome.status {
            TagStatus::Pushed { digest } => {
                // Print only the digest references to stdout
                let repository = outcome
                    .reference
                    .rsplit_once(':')
                    .map(|(repo, _)| repo)
                    .unwrap_or(&outcome.reference);
                println!("{}@{}", repository, digest);
            }
            TagStatus::UpToDate => info!("{} is up to date", outcome.reference),
            TagStatus::Planned => println!("{}", outcome.reference),
        }
    }
    Ok(())
}

/// Registry coordinates from flags, falling back to the config file
struct Target {
    registry: String,
    namespace: String,
    auth_file: Option<PathBuf>,
}

impl Target {
    fn resolve(args: &RegistryArgs, config: &Config) -> Result<Self> {
        let registry = args
            .registry
            .clone()
            .or_else(|| config.default_registry.clone())
            .context("--registry is required (or set default_registry in the config file)")
            .map_err(ServiceError::Validation)?;

        Ok(Self {
            registry,
            namespace: args
                .namespace
                .clone()
                .unwrap_or_else(|| config.namespace.clone()),
            auth_file: args
                .auth_file
                .clone()
                .or_else(|| config.registry.auth_file.clone()),
        })
    }

    fn client(&self, config: &Config) -> RegistryClient {
        let keychain = Arc::new(MultiKeychain::standard(self.auth_file.clone()));
        RegistryClient::new(keychain, &config.registry.insecure)
    }
}
