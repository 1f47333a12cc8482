use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use clap::{Args, Subcommand};
use sbx_core::naming::Environment;

use crate::term;

const TUNNEL_SCRIPT: &str = "scripts/rds_tunnel.sh";
const TUNNEL_WARMUP: Duration = Duration::from_secs(5);
const LOCAL_DEV_ACCOUNT_ID: &str = "000000000000";

#[derive(Subcommand)]
pub enum RdsCommands {
    /// Open a port-forwarding session to the environment's database cluster
    Tunnel(TunnelArgs),
    /// Run knex migrations against a local or staged database
    Migrate(MigrateArgs),
}

#[derive(Args)]
pub struct TunnelArgs {
    /// Environment of the database server
    #[arg(short = 'i', long, default_value = "staging")]
    pub input_env: Environment,
    /// Region the database server is in
    #[arg(short = 'r', long, default_value = "eu-west-1")]
    pub region: String,
    /// Local port to forward from
    #[arg(long, default_value_t = 5432)]
    pub local_port: u16,
    /// Cluster endpoint to connect to (reader or writer)
    #[arg(long, default_value = "writer")]
    pub endpoint_type: String,
}

#[derive(Args)]
pub struct MigrateArgs {
    /// Environment to migrate
    #[arg(short = 'i', long, default_value = "development")]
    pub input_env: Environment,
    /// Sandbox to migrate; required for staging
    #[arg(short = 's', long)]
    pub sandbox_id: Option<String>,
    /// Path to the infrastructure repository checkout
    #[arg(long, env = "SBX_IAC_PATH", default_value = "../iac")]
    pub iac_path: PathBuf,
    /// Knex command to execute
    #[arg(short = 'c', long, default_value = "migrate:latest")]
    pub command: String,
    /// Region the database server is in
    #[arg(short = 'r', long, default_value = "eu-west-1")]
    pub region: String,
    /// AWS account hosting the staged database
    #[arg(long, env = "SBX_AWS_ACCOUNT_ID")]
    pub aws_account_id: Option<String>,
}

pub fn run(command: RdsCommands) -> Result<(), String> {
    match command {
        RdsCommands::Tunnel(args) => tunnel(args),
        RdsCommands::Migrate(args) => migrate(args),
    }
}

fn tunnel(args: TunnelArgs) -> Result<(), String> {
    let local_port = args.local_port.to_string();
    let status = Command::new(TUNNEL_SCRIPT)
        .args([
            args.input_env.as_str(),
            args.region.as_str(),
            local_port.as_str(),
            args.endpoint_type.as_str(),
        ])
        .status()
        .map_err(|error| format!("failed to start {TUNNEL_SCRIPT}: {error}"))?;

    if !status.success() {
        return Err(format!(
            "tunnel session exited with status {}",
            status.code().unwrap_or(1)
        ));
    }
    Ok(())
}

fn migrate(args: MigrateArgs) -> Result<(), String> {
    let migrations_path = args.iac_path.join("migrations/sql-migrations");
    if !migrations_path.exists() {
        return Err(format!(
            "migrations directory {} does not exist; set SBX_IAC_PATH to your \
             infrastructure checkout",
            migrations_path.display()
        ));
    }

    let (account_id, local_port) = match args.input_env {
        Environment::Development => (LOCAL_DEV_ACCOUNT_ID.to_string(), 5431u16),
        _ => (
            args.aws_account_id.clone().ok_or_else(|| {
                "SBX_AWS_ACCOUNT_ID must be configured to migrate a deployed environment"
                    .to_string()
            })?,
            5432u16,
        ),
    };

    let sandbox_id = match args.input_env {
        Environment::Development => args.sandbox_id.clone().unwrap_or_default(),
        _ => args.sandbox_id.clone().ok_or_else(|| {
            "migrating a deployed environment requires a sandbox ID; pass -s".to_string()
        })?,
    };

    let run_knex = |label: &str| -> Result<(), String> {
        term::step(label);
        let status = Command::new("node_modules/.bin/knex")
            .arg(&args.command)
            .arg("--cwd")
            .arg(&migrations_path)
            .current_dir(&migrations_path)
            .env("NODE_ENV", args.input_env.as_str())
            .env("SANDBOX_ID", &sandbox_id)
            .env("AWS_ACCOUNT_ID", &account_id)
            .env("AWS_REGION", &args.region)
            .status()
            .map_err(|error| format!("failed to run knex: {error}"))?;

        if !status.success() {
            return Err(format!(
                "knex exited with status {}",
                status.code().unwrap_or(1)
            ));
        }
        Ok(())
    };

    if args.input_env == Environment::Development {
        return run_knex("Running migrations locally");
    }

    let mut tunnel = spawn_tunnel(&args, local_port)?;
    thread::sleep(TUNNEL_WARMUP);
    let outcome = run_knex("Running migrations through the tunnel");
    let _ = tunnel.kill();
    let _ = tunnel.wait();
    outcome
}

fn spawn_tunnel(args: &MigrateArgs, local_port: u16) -> Result<Child, String> {
    let local_port = local_port.to_string();
    Command::new(TUNNEL_SCRIPT)
        .args([
            args.input_env.as_str(),
            args.region.as_str(),
            local_port.as_str(),
            "writer",
        ])
        .stdout(Stdio::null())
        .spawn()
        .map_err(|error| format!("failed to start {TUNNEL_SCRIPT}: {error}"))
}
