/// kubectl-daemons - work with the pods of a DaemonSet
///
/// Installed as `kubectl-d`, so kubectl picks it up as the `kubectl d` plugin.
/// Every subcommand resolves a DaemonSet name (and optionally a node) to the
/// pods that DaemonSet owns, then gets, describes, deletes, tails or execs
/// into them.
mod config;
mod exec;
mod k8s;
mod output;
mod resolver;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{DaemonsConfig, Overrides, Settings, CONFIG_ENV};
use crate::exec::{
    window_change_notifications, CrosstermTerminal, ExecError, ExecOptions, ExecRelay,
    ExecRequest, LocalIo, WebSocketTransport,
};
use crate::k8s::{KubernetesClient, LogOptions};
use crate::output::OutputFormat;
use crate::resolver::{ResolutionFilter, ResolutionResult};

/// Exit code reported when the user interrupts a command
const INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "kubectl-d", version)]
#[command(about = "Work with the pods of a DaemonSet", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubeconfig context to use
    #[arg(long, global = true)]
    context: Option<String>,

    /// Namespace of the DaemonSet [default: default]
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Only consider pods scheduled on this node
    #[arg(short = 'N', long, global = true)]
    node: Option<String>,

    /// Defaults file (YAML with context, namespace and output)
    #[arg(long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the pods of a DaemonSet (all DaemonSet pods when omitted)
    Get {
        daemon_set: Option<String>,

        /// Output format
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },

    /// Delete the pods of a DaemonSet
    Delete { daemon_set: String },

    /// Describe the pods of a DaemonSet
    Describe { daemon_set: Option<String> },

    /// Print the logs of a DaemonSet's pods
    #[command(visible_alias = "logs")]
    Log {
        daemon_set: String,

        /// Container to read from
        #[arg(short, long)]
        container: Option<String>,

        /// Lines of recent log to show, 0 for all
        #[arg(short, long, default_value_t = 0)]
        tail: i64,

        /// Keep streaming new log lines
        #[arg(short, long)]
        follow: bool,
    },

    /// Run a command in a DaemonSet's pod
    Exec {
        daemon_set: String,

        /// Container to run in
        #[arg(short, long)]
        container: Option<String>,

        /// Pass stdin to the container
        #[arg(short = 'i', long)]
        stdin: bool,

        /// Allocate a TTY
        #[arg(short, long)]
        tty: bool,

        /// Command and arguments, after `--`
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// List the DaemonSets with pods on a node (all nodes when omitted)
    List { node: Option<String> },

    /// Print the version
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("Error: {:#}", e);
            1
        }
    };

    // Exit explicitly: a pending stdin read would otherwise keep the runtime alive
    std::process::exit(code);
}

fn init_tracing(verbose: bool) {
    let log_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("kubectl_d={}", log_level).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .init();
}

async fn run(cli: Cli) -> Result<i32> {
    match &cli.command {
        Commands::Version => {
            println!("kubectl-d {}", env!("CARGO_PKG_VERSION"));
            return Ok(0);
        }
        Commands::Exec { command, .. } if command.is_empty() => {
            bail!("At least some command is required");
        }
        _ => {}
    }

    let config = DaemonsConfig::load(cli.config.as_deref())?;
    let output = match &cli.command {
        Commands::Get { output, .. } => *output,
        _ => None,
    };
    let settings = Settings::merge(
        config,
        Overrides {
            context: cli.context,
            namespace: cli.namespace,
            node: cli.node,
            output,
        },
    );
    debug!("Using {:?}", settings);

    let client = KubernetesClient::connect(settings.context.as_deref()).await?;
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match cli.command {
        Commands::Exec {
            daemon_set,
            container,
            stdin,
            tty,
            command,
        } => {
            let options = ExecOptions { stdin, tty };
            exec_in_pod(&client, &settings, daemon_set, container, command, options, &cancel).await
        }
        command => {
            tokio::select! {
                result = dispatch(&client, &settings, command) => result,
                _ = cancel.cancelled() => {
                    debug!("Interrupted");
                    Ok(INTERRUPTED)
                }
            }
        }
    }
}

/// Cancel `cancel` on Ctrl-C, or SIGTERM on unix
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => debug!("Received Ctrl+C"),
            _ = terminate => debug!("Received SIGTERM"),
        }

        cancel.cancel();
    });
}

async fn dispatch(client: &KubernetesClient, settings: &Settings, command: Commands) -> Result<i32> {
    match command {
        Commands::Get { daemon_set, .. } => get_pods(client, settings, daemon_set).await,
        Commands::Delete { daemon_set } => delete_pods(client, settings, daemon_set).await,
        Commands::Describe { daemon_set } => describe_pods(client, settings, daemon_set).await,
        Commands::Log {
            daemon_set,
            container,
            tail,
            follow,
        } => {
            let options = LogOptions {
                container,
                tail_lines: (tail > 0).then_some(tail),
                follow,
            };
            show_logs(client, settings, daemon_set, &options).await
        }
        Commands::List { node } => list_daemon_sets(client, settings, node).await,
        Commands::Exec { .. } | Commands::Version => Ok(0),
    }
}

/// Resolve a DaemonSet name against the configured namespace and node
async fn resolve_pods(
    client: &KubernetesClient,
    settings: &Settings,
    daemon_set: Option<String>,
) -> Result<ResolutionResult> {
    let filter = ResolutionFilter::new(daemon_set, settings.node.clone());
    resolver::fetch(client, &settings.namespace, &filter).await
}

async fn get_pods(
    client: &KubernetesClient,
    settings: &Settings,
    daemon_set: Option<String>,
) -> Result<i32> {
    let result = resolve_pods(client, settings, daemon_set).await?;
    if result.is_empty() {
        println!("No pods found");
        return Ok(0);
    }

    println!("{}", output::format_pods(&result.pods, settings.output, Utc::now())?);
    Ok(0)
}

async fn delete_pods(client: &KubernetesClient, settings: &Settings, daemon_set: String) -> Result<i32> {
    let result = resolve_pods(client, settings, Some(daemon_set)).await?;
    if result.is_empty() {
        println!("No pods found");
        return Ok(0);
    }

    let mut failed = 0;
    for pod in &result.pods {
        match client.delete_pod(&settings.namespace, &pod.name).await {
            Ok(()) => println!("pod \"{}\" deleted", pod.name),
            Err(e) => {
                error!("{:#}", e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        warn!("{} of {} pod(s) could not be deleted", failed, result.pods.len());
        return Ok(1);
    }
    Ok(0)
}

async fn describe_pods(
    client: &KubernetesClient,
    settings: &Settings,
    daemon_set: Option<String>,
) -> Result<i32> {
    let result = resolve_pods(client, settings, daemon_set).await?;
    if result.is_empty() {
        println!("No pods found");
        return Ok(0);
    }

    for (i, pod) in result.pods.iter().enumerate() {
        let latest = client.get_pod(&settings.namespace, &pod.name).await?;
        let events = client.pod_events(&settings.namespace, &pod.name).await?;
        if i > 0 {
            println!();
        }
        print!("{}", output::describe_pod(&latest, &events, Utc::now()));
    }
    Ok(0)
}

async fn show_logs(
    client: &KubernetesClient,
    settings: &Settings,
    daemon_set: String,
    options: &LogOptions,
) -> Result<i32> {
    let result = resolve_pods(client, settings, Some(daemon_set)).await?;
    if result.is_empty() {
        println!("No pods found");
        return Ok(0);
    }

    let pod = result.single()?;
    let mut out = tokio::io::stdout();
    client
        .stream_logs(&settings.namespace, &pod.name, options, &mut out)
        .await?;
    Ok(0)
}

async fn list_daemon_sets(
    client: &KubernetesClient,
    settings: &Settings,
    node: Option<String>,
) -> Result<i32> {
    let node = node.or_else(|| settings.node.clone());
    let filter = ResolutionFilter::new(None, node);
    let result = resolver::fetch(client, &settings.namespace, &filter).await?;

    if result.daemon_set_names.is_empty() {
        println!("No daemonsets found");
        return Ok(0);
    }
    for name in &result.daemon_set_names {
        println!("{}", name);
    }
    Ok(0)
}

async fn exec_in_pod(
    client: &KubernetesClient,
    settings: &Settings,
    daemon_set: String,
    container: Option<String>,
    command: Vec<String>,
    options: ExecOptions,
    cancel: &CancellationToken,
) -> Result<i32> {
    let result = resolve_pods(client, settings, Some(daemon_set)).await?;
    if result.is_empty() {
        println!("No pods found");
        return Ok(0);
    }
    let pod = result.single()?;

    let request = ExecRequest {
        pod: pod.name.clone(),
        namespace: settings.namespace.clone(),
        container,
        command,
        options,
    };
    let transport = WebSocketTransport::new(client.inner().clone());

    let mut relay = ExecRelay::new(Arc::new(CrosstermTerminal));
    if options.tty {
        match window_change_notifications() {
            Ok(notifications) => relay = relay.with_resize_notifications(notifications),
            Err(e) => warn!("Terminal resizes will not be forwarded: {}", e),
        }
    }

    match relay.run(&transport, &request, LocalIo::std(), cancel).await {
        Ok(status) => {
            if !status.success() {
                debug!("Command in {} exited with code {}", request.pod, status.code);
            }
            Ok(status.code)
        }
        Err(ExecError::Cancelled) => Ok(INTERRUPTED),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exec_takes_command_after_separator() {
        let cli = Cli::try_parse_from([
            "kubectl-d", "exec", "fluentd", "-it", "-c", "agent", "-N", "node-a", "--", "sh", "-c",
            "ls /",
        ])
        .unwrap();

        assert_eq!(cli.node.as_deref(), Some("node-a"));
        match cli.command {
            Commands::Exec {
                daemon_set,
                container,
                stdin,
                tty,
                command,
            } => {
                assert_eq!(daemon_set, "fluentd");
                assert_eq!(container.as_deref(), Some("agent"));
                assert!(stdin && tty);
                assert_eq!(command, vec!["sh", "-c", "ls /"]);
            }
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn test_logs_alias_and_flags() {
        let cli =
            Cli::try_parse_from(["kubectl-d", "logs", "fluentd", "--tail", "20", "-f", "-n", "kube-system"])
                .unwrap();

        assert_eq!(cli.namespace.as_deref(), Some("kube-system"));
        match cli.command {
            Commands::Log {
                daemon_set,
                tail,
                follow,
                container,
            } => {
                assert_eq!(daemon_set, "fluentd");
                assert_eq!(tail, 20);
                assert!(follow);
                assert_eq!(container, None);
            }
            _ => panic!("expected log"),
        }
    }

    #[test]
    fn test_get_output_formats() {
        let cli = Cli::try_parse_from(["kubectl-d", "get", "-o", "wide"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Get {
                daemon_set: None,
                output: Some(OutputFormat::Wide)
            }
        ));
        assert!(Cli::try_parse_from(["kubectl-d", "get", "-o", "table"]).is_err());
    }

    #[test]
    fn test_list_node_is_positional() {
        let cli = Cli::try_parse_from(["kubectl-d", "list", "node-b"]).unwrap();
        assert!(matches!(cli.command, Commands::List { node: Some(ref n) } if n == "node-b"));
    }

    #[test]
    fn test_delete_requires_daemon_set() {
        assert!(Cli::try_parse_from(["kubectl-d", "delete"]).is_err());
    }
}
