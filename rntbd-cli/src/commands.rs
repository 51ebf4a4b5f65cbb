//! Command execution.

use crate::Commands;
use colored::Colorize;
use rntbd_client::{Client, ConnectionConfig};
use rntbd_protocol::{ContextResponse, DataResponse, OperationType, ResourceType};

/// Connects, executes a command and returns the formatted output.
pub async fn execute(
    config: ConnectionConfig,
    cmd: Commands,
    json: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    let client = Client::new(config);
    let context = client.connect().await.map_err(|e| {
        tracing::debug!("connect failed: {}", e);
        format!("connection failed: {}", e)
    })?;

    let output = match cmd {
        Commands::Negotiate => {
            if json {
                serde_json::to_string_pretty(&context)?
            } else {
                format_context(&context)
            }
        }

        Commands::Read {
            database,
            collection,
            document,
        } => {
            let body = client
                .read_document_json(&database, &collection, &document)
                .await?;
            serde_json::to_string_pretty(&body)?
        }

        Commands::Request {
            resource,
            operation,
        } => {
            let response = client
                .request(ResourceType(resource), OperationType(operation))
                .await?;
            if json {
                serde_json::to_string_pretty(&response_json(&response))?
            } else {
                format_response(ResourceType(resource), OperationType(operation), &response)
            }
        }

        Commands::Bench { .. } => unreachable!("handled by bench::run"),
    };

    client.close().await?;
    Ok(output)
}

fn format_context(context: &ContextResponse) -> String {
    format!(
        "{} {} {}\n  {:<28} {}\n  {:<28} {}\n  {:<28} {}s\n  {:<28} {}s\n  {:<28} {}",
        "Negotiated".green(),
        context.server_agent.cyan(),
        context.server_version,
        "status",
        context.status_code,
        "protocol version",
        context.protocol_version,
        "idle timeout",
        context.idle_timeout_secs,
        "unauthenticated timeout",
        context.unauthenticated_timeout_secs,
        "activity",
        context.activity_id
    )
}

fn format_status(status: u32) -> String {
    if (200..300).contains(&status) {
        status.to_string().green().to_string()
    } else {
        status.to_string().red().to_string()
    }
}

fn format_response(
    resource: ResourceType,
    operation: OperationType,
    response: &DataResponse,
) -> String {
    let mut output = format!(
        "{}:{} -> {}\n",
        resource.to_string().cyan(),
        operation.to_string().cyan(),
        format_status(response.status_code)
    );
    for (name, value) in &response.headers {
        output.push_str(&format!("  {}: {}\n", name.dimmed(), value));
    }
    if response.payload.is_empty() {
        output.push_str(&"(no payload)".dimmed().to_string());
    } else {
        output.push_str(&String::from_utf8_lossy(&response.payload));
    }
    output
}

fn response_json(response: &DataResponse) -> serde_json::Value {
    let payload = serde_json::from_slice::<serde_json::Value>(&response.payload)
        .unwrap_or_else(|_| String::from_utf8_lossy(&response.payload).into_owned().into());
    serde_json::json!({
        "activity_id": response.activity_id,
        "status": response.status_code,
        "headers": response.headers,
        "payload": payload,
    })
}
