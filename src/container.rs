//! Local MongoDB container bootstrap.

use anyhow::Context;
use tokio::process::Command;

use mongo_mirror_mongodb::connect::{is_loopback_uri, port_from_uri};
use mongo_mirror_mongodb::{is_ready, mask_uri, wait_until_ready};

use crate::MirrorOpts;

/// Make sure the local target store is up before connecting to it.
///
/// Only stores on a loopback address are managed. When the store does not
/// answer, the named container is started (or created from the configured
/// image) and the store is polled until it is ready.
pub async fn ensure_local_store(opts: &MirrorOpts) -> anyhow::Result<()> {
    if opts.skip_container {
        tracing::debug!("Container bootstrap disabled");
        return Ok(());
    }
    if !is_loopback_uri(&opts.local_uri) {
        tracing::debug!(
            "Target {} is not local, skipping container bootstrap",
            mask_uri(&opts.local_uri)
        );
        return Ok(());
    }
    if is_ready(&opts.local_uri).await {
        tracing::info!("Local MongoDB is already running");
        return Ok(());
    }

    if container_running(&opts.container_name).await? {
        tracing::info!(
            "Container '{}' is running, waiting for MongoDB",
            opts.container_name
        );
    } else if docker(&["start", &opts.container_name]).await.is_ok() {
        tracing::info!("Started existing container '{}'", opts.container_name);
    } else {
        let port = port_from_uri(&opts.local_uri);
        tracing::info!(
            "Creating container '{}' from {} on port {}",
            opts.container_name,
            opts.container_image,
            port
        );
        let publish = format!("{port}:27017");
        docker(&[
            "run",
            "-d",
            "--name",
            &opts.container_name,
            "-p",
            &publish,
            &opts.container_image,
        ])
        .await
        .with_context(|| {
            format!(
                "Failed to start local MongoDB container '{}'",
                opts.container_name
            )
        })?;
    }

    wait_until_ready(&opts.local_uri, opts.readiness_policy())
        .await
        .context("Local MongoDB did not become ready")?;
    tracing::info!("Local MongoDB is ready");
    Ok(())
}

async fn container_running(name: &str) -> anyhow::Result<bool> {
    let filter = format!("name=^/{name}$");
    let output = docker(&["ps", "--filter", &filter, "--format", "{{.Names}}"])
        .await
        .context("Failed to query the container runtime; is docker installed and running?")?;
    Ok(output.lines().any(|line| line.trim() == name))
}

/// Run a docker command, returning its stdout.
async fn docker(args: &[&str]) -> anyhow::Result<String> {
    tracing::debug!("docker {}", args.join(" "));
    let output = Command::new("docker")
        .args(args)
        .output()
        .await
        .context("Failed to run docker")?;

    if !output.status.success() {
        anyhow::bail!(
            "docker {} exited with {}: {}",
            args.first().copied().unwrap_or_default(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
