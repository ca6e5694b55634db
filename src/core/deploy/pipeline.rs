// src/core/deploy/pipeline.rs

//! The deployment pipeline: build, image build, save, distribute, roll
//! workloads, verify, and roll back on failure.
//!
//! Every command that includes a caller-supplied string (version, image
//! repo, target) is built with a structured argv or quoted exactly once;
//! the alphabet validation at the API boundary is defence-in-depth, not
//! the only protection.

use super::store::DeployStore;
use super::{DeployRequest, DeployStatus, DeploymentConfig, DeploymentHistory,
    allowed_distribute_failures};
use crate::core::cluster::provision::target_for;
use crate::core::cluster::store::NodeStore;
use crate::core::cluster::{Node, ops::auth_from_config};
use crate::core::errors::ColdStoreError;
use crate::core::metrics;
use crate::core::remote::shell_quote;
use crate::core::state::{AppState, ProgressEvent};
use crate::core::validation::{validate_image_repo, validate_target, validate_version};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Timeout for the application and image build steps.
const BUILD_TIMEOUT: Duration = Duration::from_secs(900);
/// Timeout for copying and importing the image on one node.
const DISTRIBUTE_TIMEOUT: Duration = Duration::from_secs(300);
/// zstd level for the image tarball: fast, the LAN is the bottleneck.
const TARBALL_ZSTD_LEVEL: i32 = 3;

pub struct DeployPipeline {
    state: Arc<AppState>,
    store: DeployStore,
    nodes: NodeStore,
}

impl DeployPipeline {
    pub fn new(state: Arc<AppState>) -> Self {
        let store = DeployStore::new(state.db.clone());
        let nodes = NodeStore::new(state.db.clone());
        Self { state, store, nodes }
    }

    pub fn store(&self) -> &DeployStore {
        &self.store
    }

    /// Validates the request, claims the per-config lock and schedules the
    /// pipeline. Invalid inputs are rejected before any side effect.
    pub async fn start(
        &self,
        request: DeployRequest,
        deployed_by: &str,
    ) -> Result<DeploymentHistory, ColdStoreError> {
        let config = self.store.get_config(request.config_id).await?;
        validate_image_repo(&config.image_repo)?;
        for target in &request.targets {
            validate_target(target)?;
        }
        let version = match &request.version {
            Some(v) => {
                validate_version(v)?;
                v.clone()
            }
            None => self.state.next_version(),
        };

        // At most one deployment per config may be building or deploying.
        let guard = self.state.try_deploy_lock(config.id)?;

        let history = self
            .store
            .insert_history(
                config.id,
                &version,
                config.current_version.as_deref(),
                deployed_by,
            )
            .await?;

        let cancel = CancellationToken::new();
        self.state.deploy_cancels.insert(history.id, cancel.clone());

        let state = self.state.clone();
        let history_id = history.id;
        let request_clone = request.clone();
        tokio::spawn(async move {
            let pipeline = DeployPipeline::new(state.clone());
            let _guard = guard;
            metrics::DEPLOY_IN_PROGRESS.set(1.0);
            let outcome = pipeline
                .run(&config, history_id, &version, &request_clone, &cancel)
                .await;
            metrics::DEPLOY_IN_PROGRESS.set(0.0);
            state.deploy_cancels.remove(&history_id);
            state.progress.close(&format!("deploy:{history_id}"));
            if let Err(e) = outcome {
                error!(history = history_id, error = %e, "deployment failed");
            }
        });

        Ok(history)
    }

    /// Cancels a running deployment; its history row ends `failed` with
    /// cause "cancelled".
    pub fn cancel(&self, history_id: i64) -> Result<(), ColdStoreError> {
        match self.state.deploy_cancels.get(&history_id) {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(ColdStoreError::NotFound(format!(
                "running deployment {history_id}"
            ))),
        }
    }

    async fn run(
        &self,
        config: &DeploymentConfig,
        history_id: i64,
        version: &str,
        request: &DeployRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ColdStoreError> {
        let topic = format!("deploy:{history_id}");
        let progress = self.state.progress.publisher(&topic);

        let result = self
            .run_inner(config, history_id, version, request, cancel, &progress)
            .await;

        match &result {
            Ok(()) => {
                metrics::DEPLOYMENTS_TOTAL.with_label_values(&["success"]).inc();
            }
            Err(ColdStoreError::Cancelled) => {
                metrics::DEPLOYMENTS_TOTAL.with_label_values(&["cancelled"]).inc();
                self.store
                    .complete(history_id, DeployStatus::Failed, Some("cancelled"))
                    .await?;
                emit(&progress, "pipeline", "failed", "cancelled");
            }
            Err(e) => {
                metrics::DEPLOYMENTS_TOTAL.with_label_values(&["failed"]).inc();
                self.store
                    .complete(history_id, DeployStatus::Failed, Some(&e.to_string()))
                    .await?;
                emit(&progress, "pipeline", "failed", e.to_string());
            }
        }
        result
    }

    async fn run_inner(
        &self,
        config: &DeploymentConfig,
        history_id: i64,
        version: &str,
        request: &DeployRequest,
        cancel: &CancellationToken,
        progress: &broadcast::Sender<ProgressEvent>,
    ) -> Result<(), ColdStoreError> {
        self.store
            .set_status(history_id, DeployStatus::Building)
            .await?;

        // 1. Application build, with a fixed, hard-coded argv.
        if !request.skip_build {
            emit(progress, "build", "running", "cargo build --release");
            let output = run_argv(
                "cargo",
                &["build", "--release"],
                Some(Path::new(&config.build_context)),
                BUILD_TIMEOUT,
                cancel,
            )
            .await?;
            self.store.append_build_output(history_id, &output).await?;
            emit(progress, "build", "success", "");
        }

        // 2. Image build, preferring Dockerfile.ci when present.
        let image = format!("{}:{version}", config.image_repo);
        let dockerfile = self.pick_dockerfile(config).await;
        emit(progress, "image-build", "running", format!("building {image}"));
        let output = run_argv(
            "docker",
            &["build", "-f", dockerfile.as_str(), "-t", image.as_str(), "."],
            Some(Path::new(&config.build_context)),
            BUILD_TIMEOUT,
            cancel,
        )
        .await?;
        self.store.append_build_output(history_id, &output).await?;
        emit(progress, "image-build", "success", "");

        // 3. Image save, piped through zstd in process. The tarball path is
        // derived only from the validated version.
        let tar_path = self.tarball_path(version);
        emit(progress, "image-save", "running", tar_path.display().to_string());
        save_image(&image, &tar_path, cancel).await?;
        emit(progress, "image-save", "success", "");

        // 4. Concurrent fan-out to every active node.
        self.store
            .set_status(history_id, DeployStatus::Deploying)
            .await?;
        self.distribute(version, &tar_path, progress, cancel).await?;

        // 5. Roll each target workload forward on the control-plane node.
        let workloads = workload_names(config, &request.targets);
        for workload in &workloads {
            emit(progress, "set-image", "running", workload.clone());
            let set_image = format!(
                "k3s kubectl set image {deployment} {assignment} -n {ns}",
                deployment = shell_quote(&format!("deployment/{workload}")),
                assignment = shell_quote(&format!("{}={image}", config.workload_name)),
                ns = shell_quote(&config.namespace),
            );
            let out = self.control_plane_exec(&set_image, cancel).await?;
            self.store.append_deploy_output(history_id, &out).await?;

            let rollout = format!(
                "k3s kubectl rollout status {deployment} -n {ns} --timeout={secs}s",
                deployment = shell_quote(&format!("deployment/{workload}")),
                ns = shell_quote(&config.namespace),
                secs = self.state.config.deploy.rollout_timeout.as_secs(),
            );
            let out = self.control_plane_exec(&rollout, cancel).await?;
            self.store.append_deploy_output(history_id, &out).await?;
            emit(progress, "set-image", "success", workload.clone());
        }

        // 6. Verify: zero ready pods on the new version triggers rollback.
        emit(progress, "verify", "running", "");
        let ready = self.count_ready_pods(config, version, cancel).await?;
        if ready == 0 {
            warn!(history = history_id, version, "no ready pods after rollout, rolling back");
            emit(progress, "verify", "failed", "no ready pods on new version");
            self.rollback_workloads(&workloads, &config.namespace, cancel)
                .await?;
            self.store
                .complete(
                    history_id,
                    DeployStatus::RolledBack,
                    Some("no ready pods on new version"),
                )
                .await?;
            emit(progress, "rollback", "success", "");
            return Ok(());
        }
        emit(progress, "verify", "success", format!("{ready} pods ready"));

        // 7. Success: the config's current version follows the history row.
        self.store.set_current_version(config.id, version).await?;
        self.store
            .complete(history_id, DeployStatus::Success, None)
            .await?;
        emit(progress, "pipeline", "success", format!("version {version} deployed"));
        info!(history = history_id, version, "deployment complete");
        Ok(())
    }

    /// The rollback path, also reachable directly through the API.
    pub async fn rollback(
        &self,
        config_id: i64,
        targets: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), ColdStoreError> {
        for target in targets {
            validate_target(target)?;
        }
        let config = self.store.get_config(config_id).await?;
        let workloads = workload_names(&config, targets);
        self.rollback_workloads(&workloads, &config.namespace, cancel)
            .await?;
        if let Some(history) = self.store.latest_success(config_id).await? {
            self.store
                .complete(history.id, DeployStatus::RolledBack, Some("manual rollback"))
                .await?;
        }
        Ok(())
    }

    async fn rollback_workloads(
        &self,
        workloads: &[String],
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ColdStoreError> {
        for workload in workloads {
            let undo = format!(
                "k3s kubectl rollout undo {deployment} -n {ns}",
                deployment = shell_quote(&format!("deployment/{workload}")),
                ns = shell_quote(namespace),
            );
            self.control_plane_exec(&undo, cancel).await?;
        }
        Ok(())
    }

    async fn distribute(
        &self,
        version: &str,
        tar_path: &Path,
        progress: &broadcast::Sender<ProgressEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), ColdStoreError> {
        let nodes = self.nodes.list_active().await?;
        let total = nodes.len();
        if total == 0 {
            return Err(ColdStoreError::Validation(
                "no active nodes to distribute to".to_string(),
            ));
        }
        emit(progress, "distribute", "running", format!("{total} nodes"));

        let mut tasks: JoinSet<Result<i64, (i64, ColdStoreError)>> = JoinSet::new();
        for node in nodes {
            let state = self.state.clone();
            let tar = tar_path.to_path_buf();
            let version = version.to_string();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let node_id = node.id;
                distribute_to_node(&state, &node, &tar, &version, &cancel)
                    .await
                    .map(|_| node_id)
                    .map_err(|e| (node_id, e))
            });
        }

        let mut failed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err((node_id, e))) => {
                    failed += 1;
                    warn!(node = node_id, error = %e, "image distribute failed");
                    self.nodes
                        .log_step_failure(
                            node_id,
                            "deploy-distribute",
                            "transient remote",
                            &e.to_string(),
                        )
                        .await?;
                }
                Err(join_err) => {
                    failed += 1;
                    error!(error = %join_err, "distribute task panicked");
                }
            }
        }

        let allowed = allowed_distribute_failures(total);
        if failed > allowed {
            emit(progress, "distribute", "failed", format!("{failed}/{total} nodes failed"));
            return Err(ColdStoreError::PartialFanout { failed, total });
        }
        emit(progress, "distribute", "success", format!("{failed}/{total} nodes failed"));
        Ok(())
    }

    async fn count_ready_pods(
        &self,
        config: &DeploymentConfig,
        version: &str,
        cancel: &CancellationToken,
    ) -> Result<usize, ColdStoreError> {
        let jsonpath = r#"{range .items[*]}{.status.containerStatuses[*].ready} {.spec.containers[*].image}{"\n"}{end}"#;
        let command = format!(
            "k3s kubectl get pods -n {ns} -o jsonpath={jp}",
            ns = shell_quote(&config.namespace),
            jp = shell_quote(jsonpath),
        );
        let output = self.control_plane_exec(&command, cancel).await?;
        let marker = format!(":{version}");
        Ok(output
            .lines()
            .filter(|line| line.contains("true") && line.contains(&marker))
            .count())
    }

    async fn control_plane_exec(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ColdStoreError> {
        let cp = self.nodes.control_plane().await?;
        let auth = auth_from_config(&self.state);
        let target = target_for(&cp, &self.state.config.ssh.user);
        let output = self
            .state
            .shell
            .execute(
                &target,
                &auth,
                command,
                self.state.config.deploy.rollout_timeout + Duration::from_secs(30),
                cancel,
            )
            .await?
            .into_result()?;
        Ok(output.stdout)
    }

    async fn pick_dockerfile(&self, config: &DeploymentConfig) -> String {
        let ci = Path::new(&config.build_context).join("Dockerfile.ci");
        if tokio::fs::try_exists(&ci).await.unwrap_or(false) {
            return "Dockerfile.ci".to_string();
        }
        config
            .docker_file
            .clone()
            .unwrap_or_else(|| "Dockerfile".to_string())
    }

    fn tarball_path(&self, version: &str) -> PathBuf {
        Path::new(&self.state.config.deploy.image_cache_dir)
            .join(format!("image-{version}.tar.zst"))
    }
}

fn workload_names(config: &DeploymentConfig, targets: &[String]) -> Vec<String> {
    if targets.is_empty() {
        vec![config.workload_name.clone()]
    } else {
        targets
            .iter()
            .map(|t| format!("{}-{t}", config.workload_name))
            .collect()
    }
}

async fn distribute_to_node(
    state: &AppState,
    node: &Node,
    tar_path: &Path,
    version: &str,
    cancel: &CancellationToken,
) -> Result<(), ColdStoreError> {
    let auth = auth_from_config(state);
    let target = target_for(node, &state.config.ssh.user);
    let remote_path = format!("/tmp/coldstored-image-{version}.tar.zst");

    state
        .shell
        .copy_file(
            &target,
            &auth,
            &tar_path.to_string_lossy(),
            &remote_path,
            0o600,
            DISTRIBUTE_TIMEOUT,
            cancel,
        )
        .await?;

    let import = format!(
        "zstd -d -c {path} | k3s ctr images import - && rm -f {path}",
        path = shell_quote(&remote_path),
    );
    state
        .shell
        .execute(&target, &auth, &import, DISTRIBUTE_TIMEOUT, cancel)
        .await?
        .into_result()?;
    Ok(())
}

/// Runs a local command from a fixed argv, never through a shell.
async fn run_argv(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String, ColdStoreError> {
    let mut command = tokio::process::Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    let child = command.spawn()?;

    let output = tokio::select! {
        result = tokio::time::timeout(timeout, child.wait_with_output()) => result??,
        _ = cancel.cancelled() => return Err(ColdStoreError::Cancelled),
    };

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    if !output.status.success() {
        return Err(ColdStoreError::RemoteCommandFailed {
            exit_code: output.status.code().unwrap_or(-1) as u32,
            stderr: text.chars().take(4000).collect(),
        });
    }
    Ok(text)
}

/// `docker save | zstd` piped in process, writing only to the cache path.
async fn save_image(
    image: &str,
    tar_path: &Path,
    cancel: &CancellationToken,
) -> Result<(), ColdStoreError> {
    if let Some(parent) = tar_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let image = image.to_string();
    let tar = tar_path.to_path_buf();
    let task = tokio::task::spawn_blocking(move || -> Result<(), ColdStoreError> {
        let mut child = std::process::Command::new("docker")
            .args(["save", &image])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ColdStoreError::Internal("docker save produced no stdout".into()))?;

        let file = std::fs::File::create(&tar)?;
        let writer = std::io::BufWriter::new(file);
        let encode_result = zstd::stream::copy_encode(stdout, writer, TARBALL_ZSTD_LEVEL);

        let status = child.wait()?;
        encode_result?;
        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut err) = child.stderr.take() {
                use std::io::Read;
                let _ = err.read_to_string(&mut stderr);
            }
            let _ = std::fs::remove_file(&tar);
            return Err(ColdStoreError::RemoteCommandFailed {
                exit_code: status.code().unwrap_or(-1) as u32,
                stderr: stderr.chars().take(4000).collect(),
            });
        }
        Ok(())
    });

    tokio::select! {
        result = task => result.map_err(|e| ColdStoreError::Internal(format!("image save task: {e}")))?,
        _ = cancel.cancelled() => Err(ColdStoreError::Cancelled),
    }
}

/// Emits a progress event without ever blocking the pipeline.
fn emit(
    progress: &broadcast::Sender<ProgressEvent>,
    step: &str,
    status: &str,
    message: impl Into<String>,
) {
    let _ = progress.send(ProgressEvent::new(step, status, message));
}
