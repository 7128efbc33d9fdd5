use anyhow::{anyhow, bail, Context};
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use tracing::{info, warn};

use vmsmith_core::config::DriverConfig;
use vmsmith_vm::{cancel_pair, CancelHandle, ControllerSpec, Driver, Snapshot, VBoxManageDriver};

#[derive(Parser)]
#[command(name = "vmsmith")]
#[command(about = "Drive VirtualBox through VBoxManage for image builds", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Print the installed VirtualBox version
    Version,
    /// Check that VirtualBox is installed and its kernel driver works
    Verify,
    /// Print the default Guest Additions ISO path
    Iso,
    /// Report whether a VM is running
    Running { vm: String },
    /// Power a VM off
    Stop { vm: String },
    /// Unregister a VM and delete its files
    Delete { vm: String },
    /// Stop a VM if it is running, then delete it
    Cleanup { vm: String },
    /// Import an appliance
    Import {
        vm: String,
        path: PathBuf,
        /// Extra flags passed to `VBoxManage import`
        #[arg(last = true)]
        flags: Vec<String>,
    },
    /// Storage controller operations
    Controller {
        #[command(subcommand)]
        command: ControllerCommands,
    },
    /// Suppress VirtualBox GUI nag dialogs
    SuppressMessages,
    /// Snapshot operations
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },
    /// Run VBoxManage with raw arguments and print its output
    Manage {
        #[arg(last = true, required = true)]
        args: Vec<String>,
    },
}

#[derive(clap::Subcommand)]
enum ControllerCommands {
    /// Add a SATA controller
    Sata {
        vm: String,
        #[arg(long, default_value = "SATA Controller")]
        name: String,
        #[arg(long, default_value_t = 1)]
        ports: u32,
    },
    /// Add an LSILogic SCSI controller
    Scsi {
        vm: String,
        #[arg(long, default_value = "SCSI Controller")]
        name: String,
    },
}

#[derive(clap::Subcommand)]
enum SnapshotCommands {
    /// Show the snapshot tree
    List { vm: String },
    /// Show the current snapshot
    Current { vm: String },
    /// Take a snapshot
    Take { vm: String, name: String },
    /// Restore a snapshot, given by UUID or unique name
    Restore { vm: String, snapshot: String },
    /// Delete a snapshot, given by UUID or unique name
    Delete { vm: String, snapshot: String },
}

/// Exit status after a second interrupt (128 + SIGINT)
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// First interrupt cancels retry waits; the second one ends the process.
///
/// Returns the exit code to use. If the listener fails, never returns.
async fn handle_interrupts<F, Fut>(cancel: CancelHandle, mut next_interrupt: F) -> i32
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let mut received = 0u32;
    while next_interrupt().await.is_ok() {
        received += 1;
        if received == 1 {
            warn!("Interrupt received, cancelling; press Ctrl-C again to exit");
            cancel.cancel();
        } else {
            warn!("Second interrupt received, exiting");
            return INTERRUPTED_EXIT_CODE;
        }
    }
    std::future::pending().await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = DriverConfig::load(cli.config.as_deref())?;

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        config
            .log_filter
            .parse()
            .map_err(|e| anyhow!("Invalid log directive '{}': {}", config.log_filter, e))?,
    );

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (cancel, signal) = cancel_pair();
    tokio::spawn(async move {
        let code = handle_interrupts(cancel, tokio::signal::ctrl_c).await;
        std::process::exit(code);
    });

    let driver = VBoxManageDriver::new(config)?.with_cancel_signal(signal);

    match cli.command {
        Commands::Version => {
            let version = driver.version().await?;
            emit(cli.json, &version, |v| v.to_string())?;
        }
        Commands::Verify => {
            driver.verify().await?;
            info!("VirtualBox installation looks usable");
            println!("ok");
        }
        Commands::Iso => {
            let iso = driver.iso().await?;
            emit(cli.json, &iso, |iso| iso.clone())?;
        }
        Commands::Running { vm } => {
            let running = driver.is_running(&vm).await?;
            emit(cli.json, &running, |r| r.to_string())?;
        }
        Commands::Stop { vm } => {
            driver.stop(&vm).await?;
            println!("Stopped VM '{}'", vm);
        }
        Commands::Delete { vm } => {
            driver.delete(&vm).await?;
            println!("Deleted VM '{}'", vm);
        }
        Commands::Cleanup { vm } => {
            driver.cleanup(&vm).await?;
            println!("Cleaned up VM '{}'", vm);
        }
        Commands::Import { vm, path, flags } => {
            driver.import(&vm, &path, &flags).await?;
            println!("Imported {} as VM '{}'", path.display(), vm);
        }
        Commands::Controller { command } => {
            let spec = match command {
                ControllerCommands::Sata { vm, name, ports } => ControllerSpec::sata(vm, name, ports),
                ControllerCommands::Scsi { vm, name } => ControllerSpec::scsi(vm, name),
            };
            driver.create_controller(&spec).await?;
            println!("Added {} controller '{}' to VM '{}'", spec.kind, spec.name, spec.vm_name);
        }
        Commands::SuppressMessages => {
            driver.suppress_messages().await?;
            println!("GUI messages suppressed");
        }
        Commands::Snapshot { command } => handle_snapshot(&driver, command, cli.json).await?,
        Commands::Manage { args } => {
            let output = driver.manage_with_output(&args).await?;
            println!("{}", output);
        }
    }

    Ok(())
}

async fn handle_snapshot(
    driver: &VBoxManageDriver,
    command: SnapshotCommands,
    json: bool,
) -> anyhow::Result<()> {
    match command {
        SnapshotCommands::List { vm } => match driver.load_snapshots(&vm).await? {
            Some(tree) => emit(json, &tree, render_tree)?,
            None if json => println!("null"),
            None => println!("VM '{}' has no snapshots", vm),
        },
        SnapshotCommands::Current { vm } => match driver.current_snapshot(&vm).await? {
            Some(current) => emit(json, &current, |s| format!("{} {}", s.name, s.uuid))?,
            None if json => println!("null"),
            None => println!("VM '{}' has no current snapshot", vm),
        },
        SnapshotCommands::Take { vm, name } => {
            driver.create_snapshot(&vm, &name).await?;
            println!("Took snapshot '{}' of VM '{}'", name, vm);
        }
        SnapshotCommands::Restore { vm, snapshot } => {
            let target = resolve_snapshot(driver, &vm, &snapshot).await?;
            driver.restore_snapshot(&vm, &target).await?;
            println!("Restored VM '{}' to snapshot '{}'", vm, target.name);
        }
        SnapshotCommands::Delete { vm, snapshot } => {
            let target = resolve_snapshot(driver, &vm, &snapshot).await?;
            driver.delete_snapshot(&vm, &target).await?;
            println!("Deleted snapshot '{}' of VM '{}'", target.name, vm);
        }
    }
    Ok(())
}

/// Find a snapshot by UUID, falling back to a name that matches exactly one node
async fn resolve_snapshot(
    driver: &VBoxManageDriver,
    vm: &str,
    key: &str,
) -> anyhow::Result<Snapshot> {
    let tree = driver
        .load_snapshots(vm)
        .await?
        .with_context(|| format!("VM '{}' has no snapshots", vm))?;

    if let Some(snapshot) = tree.find_by_uuid(key) {
        return Ok(snapshot.clone());
    }

    match tree.find_by_name(key).as_slice() {
        [snapshot] => Ok((*snapshot).clone()),
        [] => bail!("No snapshot named or identified by '{}'", key),
        matches => bail!(
            "Snapshot name '{}' is ambiguous ({} matches); use its UUID",
            key,
            matches.len()
        ),
    }
}

fn render_tree(root: &Snapshot) -> String {
    let mut out = String::new();
    render_node(root, 0, &mut out);
    out.trim_end().to_string()
}

fn render_node(node: &Snapshot, depth: usize, out: &mut String) {
    let marker = if node.current { " *" } else { "" };
    out.push_str(&format!("{}{} ({}){}\n", "  ".repeat(depth), node.name, node.uuid, marker));
    for child in &node.children {
        render_node(child, depth + 1, out);
    }
}

fn emit<T, F>(json: bool, value: &T, text: F) -> anyhow::Result<()>
where
    T: serde::Serialize,
    F: FnOnce(&T) -> String,
{
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text(value));
    }
    Ok(())
}
