// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Container management — Docker Engine API via the local socket
//!
//! Each operation is a single Engine API call. This module only reshapes
//! the engine's answers (ports, sizes, timestamps, tags) into what the
//! dashboard shows, and sorts errors into "not found" and everything else.

use bollard::container::{
    ListContainersOptions, LogOutput, LogsOptions, RemoveContainerOptions, RestartContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::{ContainerSummary, CreateImageInfo, ImageSummary, Port};
use bollard::{API_DEFAULT_VERSION, Docker};
use futures::TryStreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Tag reported for images that have none
pub const UNTAGGED: &str = "<none>:<none>";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
    pub state: String,
    pub ports: Vec<String>,
    pub created: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    pub id: String,
    pub tags: Vec<String>,
    pub size: String,
    pub created: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PulledImage {
    pub id: String,
    pub tags: Vec<String>,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Failed to connect to Docker daemon: {0}")]
    Unreachable(String),

    #[error("Container {0} not found")]
    NotFound(String),

    #[error("{0}")]
    Api(String),
}

/// Classify an engine error for an operation on container `id`
fn engine_error(id: &str, action: &str, err: bollard::errors::Error) -> ContainerError {
    match err {
        bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
            ContainerError::NotFound(id.to_string())
        }
        other => ContainerError::Api(format!("Failed to {} container: {}", action, other)),
    }
}

/// 304 means the container was already in the requested state
fn already_done(err: &bollard::errors::Error) -> bool {
    matches!(err, bollard::errors::Error::DockerResponseServerError { status_code: 304, .. })
}

/// Docker adapter owning a lazily connected engine client
pub struct ContainerManager {
    socket: Option<String>,
    docker: OnceCell<Docker>,
}

impl ContainerManager {
    /// `socket` overrides DOCKER_HOST / the default /var/run/docker.sock
    pub fn new(socket: Option<String>) -> Self {
        Self { socket, docker: OnceCell::new() }
    }

    /// Connect on first use; a failed connection is retried on the next call
    async fn client(&self) -> Result<&Docker, ContainerError> {
        self.docker
            .get_or_try_init(|| async {
                let docker = match &self.socket {
                    Some(path) => Docker::connect_with_unix(path, 120, API_DEFAULT_VERSION),
                    None => Docker::connect_with_local_defaults(),
                }
                .map_err(|e| ContainerError::Unreachable(e.to_string()))?;
                let version = docker.version().await
                    .map_err(|e| ContainerError::Unreachable(e.to_string()))?;
                info!("Connected to Docker daemon {}", version.version.unwrap_or_default());
                Ok::<_, ContainerError>(docker)
            })
            .await
    }

    pub async fn list_containers(&self, all: bool) -> Result<Vec<ContainerRecord>, ContainerError> {
        let options = ListContainersOptions::<String> { all, ..Default::default() };
        let containers = self.client().await?
            .list_containers(Some(options))
            .await
            .map_err(|e| ContainerError::Api(format!("Failed to list containers: {}", e)))?;
        Ok(containers.into_iter().map(container_record).collect())
    }

    pub async fn start_container(&self, id: &str) -> Result<(), ContainerError> {
        match self.client().await?.start_container(id, None::<StartContainerOptions<String>>).await {
            Ok(()) => {}
            Err(e) if already_done(&e) => debug!("Container {} already running", id),
            Err(e) => return Err(engine_error(id, "start", e)),
        }
        info!("Container {} started", id);
        Ok(())
    }

    /// Stop, killing the container after `timeout` seconds
    pub async fn stop_container(&self, id: &str, timeout: i64) -> Result<(), ContainerError> {
        let options = StopContainerOptions { t: timeout };
        match self.client().await?.stop_container(id, Some(options)).await {
            Ok(()) => {}
            Err(e) if already_done(&e) => debug!("Container {} already stopped", id),
            Err(e) => return Err(engine_error(id, "stop", e)),
        }
        info!("Container {} stopped", id);
        Ok(())
    }

    pub async fn restart_container(&self, id: &str, timeout: isize) -> Result<(), ContainerError> {
        let options = RestartContainerOptions { t: timeout };
        self.client().await?
            .restart_container(id, Some(options))
            .await
            .map_err(|e| engine_error(id, "restart", e))?;
        info!("Container {} restarted", id);
        Ok(())
    }

    pub async fn remove_container(&self, id: &str, force: bool) -> Result<(), ContainerError> {
        let options = RemoveContainerOptions { force, ..Default::default() };
        self.client().await?
            .remove_container(id, Some(options))
            .await
            .map_err(|e| engine_error(id, "remove", e))?;
        info!("Container {} removed", id);
        Ok(())
    }

    /// Last `tail` lines of stdout and stderr, with timestamps
    pub async fn container_logs(&self, id: &str, tail: u32) -> Result<String, ContainerError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: tail.to_string(),
            ..Default::default()
        };
        let chunks: Vec<LogOutput> = self.client().await?
            .logs(id, Some(options))
            .try_collect()
            .await
            .map_err(|e| engine_error(id, "get logs for", e))?;

        let mut logs = String::new();
        for chunk in chunks {
            logs.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
        }
        Ok(logs)
    }

    pub async fn list_images(&self) -> Result<Vec<ImageRecord>, ContainerError> {
        let options = ListImagesOptions::<String> { all: false, ..Default::default() };
        let images = self.client().await?
            .list_images(Some(options))
            .await
            .map_err(|e| ContainerError::Api(format!("Failed to list images: {}", e)))?;
        Ok(images.into_iter().map(image_record).collect())
    }

    /// Pull an image; a reference without a tag pulls `latest`
    pub async fn pull_image(&self, image_name: &str) -> Result<PulledImage, ContainerError> {
        let docker = self.client().await?;
        let (repository, tag) = split_image_reference(image_name);
        let options = CreateImageOptions {
            from_image: repository.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };
        let progress: Vec<CreateImageInfo> = docker
            .create_image(Some(options), None, None)
            .try_collect()
            .await
            .map_err(|e| ContainerError::Api(format!("Failed to pull image {}: {}", image_name, e)))?;
        debug!("Pull of {} finished after {} progress messages", image_name, progress.len());

        let reference = if tag.is_empty() { repository.to_string() } else { format!("{}:{}", repository, tag) };
        let image = docker.inspect_image(&reference).await
            .map_err(|e| ContainerError::Api(format!("Failed to pull image {}: {}", image_name, e)))?;

        info!("Pulled image {}", reference);
        Ok(PulledImage {
            id: short_image_id(image.id.as_deref().unwrap_or_default()),
            tags: image.repo_tags.unwrap_or_default(),
            message: format!("Successfully pulled {}", image_name),
        })
    }
}

// ─── Normalization ───

fn container_record(summary: ContainerSummary) -> ContainerRecord {
    let id = summary.id.unwrap_or_default();
    let name = summary.names
        .and_then(|names| names.into_iter().next())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();
    let image = match summary.image {
        Some(image) if !image.is_empty() && !image.starts_with("sha256:") => image,
        _ => short_image_id(summary.image_id.as_deref().unwrap_or_default()),
    };

    ContainerRecord {
        id: id.chars().take(12).collect(),
        name,
        image,
        status: summary.status.unwrap_or_default(),
        state: summary.state.unwrap_or_else(|| "unknown".to_string()),
        ports: format_ports(summary.ports.as_deref().unwrap_or_default()),
        created: summary.created.map(format_created).unwrap_or_default(),
    }
}

fn image_record(summary: ImageSummary) -> ImageRecord {
    let tags: Vec<String> = summary.repo_tags.into_iter().filter(|t| !t.is_empty()).collect();
    ImageRecord {
        id: short_image_id(&summary.id),
        tags: if tags.is_empty() { vec![UNTAGGED.to_string()] } else { tags },
        size: format_size(summary.size),
        created: format_created(summary.created),
    }
}

/// `sha256:0123456789abcdef…` → `0123456789`
fn short_image_id(id: &str) -> String {
    id.trim_start_matches("sha256:").chars().take(10).collect()
}

/// Published ports as `host:container/proto`, unpublished as `container/proto`
///
/// Docker lists one entry per host address family; duplicates are dropped.
fn format_ports(ports: &[Port]) -> Vec<String> {
    let mut formatted: Vec<String> = Vec::new();
    for port in ports {
        let container_port = match port.typ.as_ref().map(|t| t.to_string()).filter(|t| !t.is_empty()) {
            Some(proto) => format!("{}/{}", port.private_port, proto),
            None => port.private_port.to_string(),
        };
        let entry = match port.public_port {
            Some(host_port) => format!("{}:{}", host_port, container_port),
            None => container_port,
        };
        if !formatted.contains(&entry) {
            formatted.push(entry);
        }
    }
    formatted
}

fn format_size(bytes: i64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}

/// Unix seconds → `YYYY-MM-DD HH:MM:SS` (UTC)
fn format_created(secs: i64) -> String {
    if secs <= 0 {
        return String::new();
    }
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Split `repo[:tag]` for a pull; digests (`repo@sha256:…`) are passed whole
///
/// A colon before the last `/` belongs to a registry port, not a tag.
fn split_image_reference(reference: &str) -> (&str, &str) {
    if reference.contains('@') {
        return (reference, "");
    }
    let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (&reference[..split], &reference[split + 1..])
        }
        None => (reference, "latest"),
    }
}
