use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use conveyor::audit::AuditFilter;
use conveyor::config::ConveyorConfig;
use conveyor::notify::LoggingNotifier;
use conveyor::orchestrator::Orchestrator;
use conveyor::permissions::{PermissionEngine, PermissionMatrix};
use conveyor::storage::InMemoryStore;
use conveyor::telemetry::init_telemetry;
use conveyor::workflow::{Creator, Role, WorkflowAction, WorkflowRegistry, WorkflowType};

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(about = "Role-staged service request orchestration")]
#[command(
    long_about = "Conveyor routes client service requests through role-owned \
                  processing stages, gating every transition through a permission \
                  matrix and recording it in an audit ledger. The CLI inspects the \
                  static configuration and simulates request runs."
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "conveyor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the permission matrix, optionally restricted to one role
    Matrix {
        /// Only show grants for this role (e.g. "controller")
        #[arg(long)]
        role: Option<String>,
    },
    /// Validate and print the built-in workflow definitions
    Workflows,
    /// Drive a request through its happy path against the in-memory store
    Simulate {
        /// Workflow type to run
        #[arg(long, default_value = "connection_request")]
        workflow: String,
        /// Beneficiary client id
        #[arg(long, default_value = "client-001")]
        client: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = ConveyorConfig::load_from(&cli.config)?;
    init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Matrix { role } => print_matrix(role.as_deref()),
        Commands::Workflows => print_workflows(),
        Commands::Simulate { workflow, client } => {
            let workflow_type: WorkflowType = workflow
                .parse()
                .map_err(|e: String| anyhow!(e))?;
            simulate(&config, workflow_type, client).await
        }
    }
}

fn print_matrix(role_filter: Option<&str>) -> Result<()> {
    let filter: Option<Role> = role_filter
        .map(|r| r.parse().map_err(|e: String| anyhow!(e)))
        .transpose()?;
    let matrix = PermissionMatrix::standard();

    println!("{:<24} {:<20} {:<16} {}", "ROLE", "WORKFLOW", "ACTION", "DAILY LIMIT");
    for grant in matrix.grants() {
        if filter.is_some_and(|r| r != grant.role) {
            continue;
        }
        let limit = grant
            .daily_limit
            .map(|l| l.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<20} {:<16} {}",
            grant.role.to_string(),
            grant.workflow_type.to_string(),
            grant.action.to_string(),
            limit
        );
    }
    Ok(())
}

fn print_workflows() -> Result<()> {
    let registry = WorkflowRegistry::standard()?;
    for workflow_type in WorkflowType::ALL {
        let definition = registry
            .get(workflow_type)
            .ok_or_else(|| anyhow!("missing definition for {workflow_type}"))?;
        let stages: Vec<String> = definition.stages().iter().map(|s| s.to_string()).collect();
        println!("{workflow_type}: {}", stages.join(" -> "));
        for stage in definition.stages() {
            let actions: Vec<String> = definition
                .actions_from(*stage)
                .into_iter()
                .map(|a| a.to_string())
                .collect();
            println!("  {:<24} [{}]", stage.to_string(), actions.join(", "));
        }
        println!();
    }
    println!("all workflow definitions valid");
    Ok(())
}

async fn simulate(
    config: &ConveyorConfig,
    workflow_type: WorkflowType,
    client: String,
) -> Result<()> {
    let registry = WorkflowRegistry::standard()?;
    let permissions = PermissionEngine::new(Arc::new(PermissionMatrix::standard()));
    let orchestrator = Orchestrator::new(
        Arc::clone(&registry),
        permissions,
        Arc::new(config.executor.build_executor()),
        Arc::new(conveyor::audit::AuditLedger::in_memory()),
        Arc::new(InMemoryStore::new()),
        Arc::new(LoggingNotifier::new()),
    );

    let definition = registry
        .get(workflow_type)
        .ok_or_else(|| anyhow!("missing definition for {workflow_type}"))?;
    let first_stage = definition.first_stage();
    let creator = Creator {
        actor_id: format!("sim-{first_stage}"),
        actor_role: first_stage,
        on_behalf_of_client: true,
    };

    let mut request = orchestrator
        .create_request(workflow_type, creator, client, BTreeMap::new())
        .await?;
    println!(
        "created {} ({workflow_type}) at stage {}",
        request.id, request.current_role
    );

    while !request.is_terminal() {
        let stage = request.current_role;
        request = orchestrator
            .transition(
                request.id,
                stage,
                &format!("sim-{stage}"),
                WorkflowAction::Advance,
                BTreeMap::new(),
            )
            .await?;
        println!(
            "advanced by {:<24} -> stage {:<24} status {}",
            stage.to_string(),
            request.current_role.to_string(),
            request.status
        );
    }

    println!("\naudit trail:");
    for entry in orchestrator
        .get_audit_trail(&AuditFilter::for_request(request.id))
        .await
    {
        println!(
            "  {} {:<16} {:<10} by {:<24} {:?}",
            entry.timestamp.format("%H:%M:%S%.3f"),
            entry.action.to_string(),
            format!("{:?}", entry.outcome).to_lowercase(),
            entry.actor_id,
            entry.reason
        );
    }
    Ok(())
}
