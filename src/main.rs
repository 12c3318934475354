mod cli;
mod cluster;
mod codec;
mod context;
mod custom_objects;
mod errors;
mod gitlab;
mod graylog;
mod hooks;
mod reconciler;
mod roles;
mod scheduler;
mod webhook;

use clap::Parser;
use cli::Config;
use cluster::{ClusterGateway, KubeGateway};
use context::Context;
use gitlab::GitlabClient;
use graylog::GraylogClient;
use std::sync::Arc;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},kube=info,rustls=warn,hyper=warn,tower=warn",
            config.log_level
        ))
    });
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (custom_objects, protected) =
        custom_objects::load_custom_objects(&config.custom_role_dir).await?;

    let gitlab = GitlabClient::new(
        &config.gitlab_hostname,
        &config.gitlab_api_version,
        &config.gitlab_private_token,
    )?;

    let kube_client = kube::Client::try_default().await?;
    let cluster = Box::new(KubeGateway::new(kube_client));

    for object in &custom_objects {
        if let Err(e) = cluster.apply_custom_object(object).await {
            tracing::warn!(
                kind = object.type_meta.kind,
                name = object.name,
                error = %e,
                "failed to apply custom role manifest, leaving it unapplied"
            );
        }
    }

    let graylog = if config.graylog_enabled() {
        Some(GraylogClient::new(
            config.graylog_url.as_deref().unwrap_or_default(),
            config.graylog_username.as_deref().unwrap_or_default(),
            config.graylog_password.as_deref().unwrap_or_default(),
        ))
    } else {
        None
    };

    let ctx = Arc::new(Context::new(config, gitlab, cluster, protected, graylog));

    let app = webhook::router(ctx.clone());
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], 8080));
    let http_server = axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    tokio::select! {
        result = http_server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "http listener exited with an error");
            }
        }
        _ = scheduler::run(ctx.clone()) => {}
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
