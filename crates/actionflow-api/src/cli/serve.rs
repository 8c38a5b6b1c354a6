//! `actionflow serve`: the HTTP trigger server.

use anyhow::Result;
use console::style;

use actionflow_infra::config::LoadedConfig;

use crate::http::router::build_router;
use crate::shutdown_signal;
use crate::state::ServerState;

pub async fn serve(loaded: &LoadedConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    let state = ServerState::init(loaded).await?;

    let host = host.unwrap_or_else(|| loaded.config.server.host.clone());
    let port = port.unwrap_or(loaded.config.server.port);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!(
        "  {} Actionflow trigger server listening on {}",
        style("⚡").bold(),
        style(format!("http://{addr}")).cyan()
    );
    println!(
        "  {}",
        style(format!(
            "POST /trigger/workflow/{{workflow_id}}  catalog: {}",
            state.orchestrator.catalog().describe()
        ))
        .dim()
    );
    println!("  {}", style("Press Ctrl+C to stop").dim());

    let router = build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    println!("\n  Server stopped.");
    Ok(())
}
