//! CLI commands implementation

use anyhow::{bail, Result};
use gpuyield_core::{display_devices, ControllerStatus, DeviceId, DeviceSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// API client for communicating with the daemon
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Body of `POST /gpu`
#[derive(Debug, Serialize)]
struct ClaimRequest {
    command: &'static str,
    gpu_ids: Vec<DeviceId>,
}

impl ClaimRequest {
    fn set_occupied(gpu_ids: Vec<DeviceId>) -> Self {
        Self {
            command: "set_occupied",
            gpu_ids,
        }
    }
}

/// Reply to `POST /gpu`
#[derive(Debug, Deserialize)]
pub struct CommandResponse {
    pub status: String,
    pub message: String,
}

/// Claim GPUs for the caller
pub async fn claim(client: &ApiClient, gpu_ids: Vec<DeviceId>) -> Result<()> {
    let req = ClaimRequest::set_occupied(gpu_ids);
    debug!(gpu_ids = ?req.gpu_ids, "Sending claim");

    let response = client
        .client
        .post(client.url("/gpu"))
        .json(&req)
        .send()
        .await?;

    let status = response.status();
    let text = response.text().await?;
    // Errors from the daemon carry the same body shape as successes
    match serde_json::from_str::<CommandResponse>(&text) {
        Ok(reply) if status.is_success() => {
            println!("{}", reply.message);
            Ok(())
        }
        Ok(reply) => bail!("Claim rejected ({}): {}", status, reply.message),
        Err(_) => bail!("Claim failed ({}): {}", status, text),
    }
}

/// Print the daemon's free GPUs
pub async fn free(client: &ApiClient) -> Result<()> {
    let response = client.client.get(client.url("/gpu")).send().await?;

    if !response.status().is_success() {
        let error = response.text().await?;
        bail!("Failed to get free GPUs: {}", error);
    }

    let devices: DeviceSet = response.json().await?;
    println!("{}", format_free(&devices));
    Ok(())
}

/// Print controller status
pub async fn status(client: &ApiClient) -> Result<()> {
    let response = client.client.get(client.url("/status")).send().await?;

    if !response.status().is_success() {
        let error = response.text().await?;
        bail!("Failed to get status: {}", error);
    }

    let status: ControllerStatus = response.json().await?;
    print!("{}", format_status(&status));
    Ok(())
}

fn format_free(devices: &DeviceSet) -> String {
    if devices.is_empty() {
        "No free GPUs".to_string()
    } else {
        format!("Free GPUs: {}", display_devices(devices))
    }
}

fn format_status(status: &ControllerStatus) -> String {
    let mut out = format!("Phase: {}\n", status.phase);
    match &status.process {
        Some(process) => {
            out.push_str(&format!("Command: {}\n", process.command));
            if let Some(pid) = process.pid {
                out.push_str(&format!("PID: {}\n", pid));
            }
            out.push_str(&format!("GPUs: {}\n", display_devices(&process.devices)));
            out.push_str(&format!(
                "Started: {}\n",
                process.started_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
            out.push_str(&format!("Alive: {}\n", if status.alive { "yes" } else { "no" }));
        }
        None => out.push_str("Workload: not running\n"),
    }
    out.push_str(&format!("{}\n", format_free(&status.free_devices)));
    out
}
