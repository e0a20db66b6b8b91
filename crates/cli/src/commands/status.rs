//! Daemon status commands

use anyhow::Result;
use balancer_lib::{balancer::Target, balancer::TargetStatus, health::ComponentStatus};
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, format_timestamp, or_dash, print_info, print_json, print_success, print_table,
    print_warning, OutputFormat,
};

#[derive(Tabled)]
struct TargetRow {
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Distance")]
    distance: String,
    #[tabled(rename = "Runs")]
    iterations: u64,
    #[tabled(rename = "Failures")]
    failures: u64,
    #[tabled(rename = "Last Run")]
    last_run: String,
}

impl From<&TargetStatus> for TargetRow {
    fn from(status: &TargetStatus) -> Self {
        Self {
            target: status.key(),
            outcome: color_status(status.last_outcome.as_deref().unwrap_or("pending")),
            service: or_dash(status.service.as_ref()),
            mode: or_dash(status.mode),
            distance: or_dash(status.distance),
            iterations: status.iterations,
            failures: status.failures,
            last_run: format_timestamp(status.last_run_timestamp),
        }
    }
}

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Checked")]
    checked: String,
}

fn status_label(status: ComponentStatus) -> &'static str {
    match status {
        ComponentStatus::Healthy => "healthy",
        ComponentStatus::Degraded => "degraded",
        ComponentStatus::Unhealthy => "unhealthy",
    }
}

/// List every configured target, optionally filtered by namespace
pub async fn list_targets(
    client: &ApiClient,
    namespace: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let mut targets = client.targets().await?;
    if let Some(ns) = &namespace {
        targets.retain(|t| &t.namespace == ns);
    }

    match format {
        OutputFormat::Json => print_json(&targets)?,
        OutputFormat::Table => {
            println!("{}", "Reconcile Targets".bold());
            let rows: Vec<TargetRow> = targets.iter().map(TargetRow::from).collect();
            print_table(&rows);
        }
    }

    Ok(())
}

/// Show the last outcome of one target
pub async fn show_target(client: &ApiClient, target: &Target, format: OutputFormat) -> Result<()> {
    let status = client.target(&target.namespace, &target.deployment).await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            println!("{}", format!("Target {}", status.key()).bold());
            println!("{}", "=".repeat(50));
            println!(
                "Outcome:      {}",
                color_status(status.last_outcome.as_deref().unwrap_or("pending"))
            );
            println!("Service:      {}", or_dash(status.service.as_ref()));
            println!("Mode:         {}", or_dash(status.mode));
            println!("Distance:     {}", or_dash(status.distance));
            println!("Iterations:   {}", status.iterations);
            println!("Failures:     {}", status.failures);
            println!("Pods dropped: {}", status.pods_dropped);
            println!("Last run:     {}", format_timestamp(status.last_run_timestamp));

            if let Some(detail) = &status.detail {
                println!();
                print_info(detail);
            }
        }
    }

    Ok(())
}

/// Show daemon health by component
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;

    match format {
        OutputFormat::Json => print_json(&health)?,
        OutputFormat::Table => {
            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(status_label(component.status)),
                    message: component.message.clone().unwrap_or_default(),
                    checked: format_timestamp(Some(component.last_check_timestamp)),
                })
                .collect();
            print_table(&rows);

            match health.status {
                ComponentStatus::Healthy => print_success("Balancer is healthy"),
                ComponentStatus::Degraded => print_warning("Balancer is degraded"),
                ComponentStatus::Unhealthy => print_warning("Balancer is unhealthy"),
            }
        }
    }

    Ok(())
}
