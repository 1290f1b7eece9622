use clap::{Args, Parser, Subcommand};

use fleetmon::app::App;
use fleetmon::errors::ProbeError;
use fleetmon::managers::service_control::ServiceAction;
use fleetmon::services::credentials::CredentialOverride;
use fleetmon::services::registry::NewHost;
use fleetmon::services::validation::Validation;

#[derive(Parser)]
#[command(name = "fleetmon")]
#[command(version, about = "Agentless fleet monitoring over SSH and WinRM")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct HostArgs {
    /// Registered host name
    name: String,

    /// Override the stored password for this call
    #[arg(long)]
    password: Option<String>,

    /// Override the stored SSH key path for this call
    #[arg(long)]
    key: Option<String>,

    /// Override the stored port for this call
    #[arg(long)]
    port: Option<u16>,
}

impl HostArgs {
    fn overrides(&self) -> CredentialOverride {
        CredentialOverride {
            password: self.password.clone(),
            key_path: self.key.clone(),
            port: self.port,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Test connectivity to a registered host
    Test {
        #[command(flatten)]
        host: HostArgs,
    },

    /// Collect a metrics snapshot from a host
    Metrics {
        #[command(flatten)]
        host: HostArgs,

        /// Include processes, interfaces, partitions, and system info
        #[arg(long)]
        detailed: bool,
    },

    /// Manage user accounts on a host
    Users {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Run a command on a host
    Exec {
        #[command(flatten)]
        host: HostArgs,

        /// Command line to execute remotely
        command: String,
    },

    /// Control a service on a host
    Service {
        #[command(flatten)]
        host: HostArgs,

        /// start, stop, or restart
        action: String,

        /// Service name
        service: String,
    },

    /// Run disk, memory, and load health checks on a host
    Health {
        #[command(flatten)]
        host: HostArgs,
    },

    /// Manage the host registry
    Host {
        #[command(subcommand)]
        command: HostCommands,
    },

    /// Probe every registered host
    Fleet,
}

#[derive(Subcommand)]
enum UserCommands {
    /// List user accounts
    List {
        #[command(flatten)]
        host: HostArgs,
    },

    /// Create a user account
    Add {
        #[command(flatten)]
        host: HostArgs,

        /// Account name to create
        username: String,

        /// Password for the new account
        #[arg(long)]
        new_password: String,
    },

    /// Delete a user account
    Del {
        #[command(flatten)]
        host: HostArgs,

        /// Account name to delete
        username: String,
    },
}

#[derive(Subcommand)]
enum HostCommands {
    /// Register or update a host
    Add {
        /// Registry name for the host
        name: String,

        /// Host address (hostname or IP)
        #[arg(long)]
        address: String,

        /// linux or windows
        #[arg(long)]
        os: String,

        /// Username for authentication
        #[arg(long)]
        username: String,

        /// Password to store (encrypted at rest)
        #[arg(long)]
        password: Option<String>,

        /// SSH private key path to store
        #[arg(long)]
        key: Option<String>,

        /// Port to store
        #[arg(long)]
        port: Option<u16>,
    },

    /// List registered hosts
    List,

    /// Remove a host from the registry
    Rm {
        /// Registered host name
        name: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        match serde_json::to_string_pretty(&err) {
            Ok(rendered) => eprintln!("{}", rendered),
            Err(_) => eprintln!("fleetmon: {}", err),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), ProbeError> {
    let app = App::initialize()?;
    match cli.command {
        Commands::Test { host } => {
            let report = app
                .fleet
                .test_connection(&host.name, &host.overrides())
                .await?;
            print_json(&report)
        }
        Commands::Metrics { host, detailed } => {
            if detailed {
                let details = app
                    .fleet
                    .detailed_metrics(&host.name, &host.overrides())
                    .await?;
                print_json(&details)
            } else {
                let snapshot = app
                    .fleet
                    .basic_metrics(&host.name, &host.overrides())
                    .await?;
                print_json(&snapshot)
            }
        }
        Commands::Users { command } => match command {
            UserCommands::List { host } => {
                let users = app.fleet.list_users(&host.name, &host.overrides()).await?;
                print_json(&users)
            }
            UserCommands::Add {
                host,
                username,
                new_password,
            } => {
                app.fleet
                    .create_user(&host.name, &host.overrides(), &username, &new_password)
                    .await?;
                print_json(&serde_json::json!({"created": username}))
            }
            UserCommands::Del { host, username } => {
                app.fleet
                    .delete_user(&host.name, &host.overrides(), &username)
                    .await?;
                print_json(&serde_json::json!({"deleted": username}))
            }
        },
        Commands::Exec { host, command } => {
            let output = app
                .fleet
                .execute_command(&host.name, &host.overrides(), &command)
                .await?;
            print_json(&output)
        }
        Commands::Service {
            host,
            action,
            service,
        } => {
            let action = ServiceAction::parse(&action)?;
            let report = app
                .fleet
                .control_service(&host.name, &host.overrides(), &service, action)
                .await?;
            print_json(&report)
        }
        Commands::Health { host } => {
            let report = app.fleet.health_check(&host.name, &host.overrides()).await?;
            print_json(&report)
        }
        Commands::Host { command } => match command {
            HostCommands::Add {
                name,
                address,
                os,
                username,
                password,
                key,
                port,
            } => {
                let os_kind = Validation::new().ensure_os_kind(&os)?;
                let outcome = app
                    .fleet
                    .register_host(NewHost {
                        name,
                        address,
                        os_kind,
                        username,
                        password,
                        key_path: key,
                        port,
                    })
                    .await?;
                print_json(&outcome)
            }
            HostCommands::List => print_json(&app.fleet.list_hosts()),
            HostCommands::Rm { name } => {
                if !app.fleet.remove_host(&name)? {
                    return Err(ProbeError::not_found(format!("Unknown host '{}'", name)));
                }
                print_json(&serde_json::json!({"removed": name}))
            }
        },
        Commands::Fleet => print_json(&app.fleet.snapshot_fleet().await),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), ProbeError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| ProbeError::internal(format!("Could not render output: {}", err)))?;
    println!("{}", rendered);
    Ok(())
}
