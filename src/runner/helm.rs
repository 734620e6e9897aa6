//! Package engine driving the `helm` binary
//!
//! Each call writes its inputs (chart archive, values, kubeconfig) to a
//! private temporary directory and runs one helm subcommand against it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

use super::{
    ActionRequest, EngineTarget, ObservedRelease, PackageEngine, ReleaseAction, RollbackRequest,
    engine_failure, parse_release_json,
};
use crate::error::{Error, Result};

/// `helm` CLI wrapper
#[derive(Debug, Clone)]
pub struct HelmCli {
    binary: PathBuf,
}

impl HelmCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run helm; `Err` only when the binary could not be started
    async fn run(
        &self,
        target: &EngineTarget,
        workdir: &Workdir,
        args: Vec<String>,
    ) -> Result<Outcome> {
        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .args(["--namespace", &target.namespace])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(kubeconfig) = &workdir.kubeconfig {
            command.arg("--kubeconfig").arg(kubeconfig);
        }

        debug!(binary = %self.binary.display(), args = ?args, namespace = %target.namespace, "Running helm");
        let output = command
            .output()
            .await
            .map_err(|e| Error::engine(format!("failed to run {}: {e}", self.binary.display())))?;

        if output.status.success() {
            Ok(Outcome::Success(output.stdout))
        } else {
            Ok(Outcome::Failed(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ))
        }
    }

    async fn run_action(
        &self,
        action: ReleaseAction,
        target: &EngineTarget,
        workdir: &Workdir,
        args: Vec<String>,
    ) -> Result<()> {
        match self.run(target, workdir, args).await? {
            Outcome::Success(_) => Ok(()),
            Outcome::Failed(stderr) => Err(engine_failure(action, &stderr)),
        }
    }

    async fn install_or_upgrade(
        &self,
        action: ReleaseAction,
        target: &EngineTarget,
        request: &ActionRequest,
    ) -> Result<()> {
        let workdir = Workdir::new(target)?;
        let chart = workdir.write("chart.tgz", &request.chart.bytes)?;
        let values = workdir.write("values.json", &serde_json::to_vec(&request.values)?)?;

        let mut args = vec![
            action.to_string(),
            request.release_name.clone(),
            path_arg(&chart),
            "--values".into(),
            path_arg(&values),
            "--timeout".into(),
            duration_arg(request.timeout),
        ];
        if request.wait {
            args.push("--wait".into());
        }
        if request.skip_crds {
            args.push("--skip-crds".into());
        }
        match action {
            ReleaseAction::Install => args.push("--create-namespace".into()),
            _ => {
                args.push("--history-max".into());
                args.push(request.max_history.to_string());
                if request.reset_values {
                    args.push("--reset-values".into());
                }
                if request.force {
                    args.push("--force".into());
                }
            }
        }

        self.run_action(action, target, &workdir, args).await
    }
}

#[async_trait]
impl PackageEngine for HelmCli {
    async fn install(&self, target: &EngineTarget, request: &ActionRequest) -> Result<()> {
        self.install_or_upgrade(ReleaseAction::Install, target, request)
            .await
    }

    async fn upgrade(&self, target: &EngineTarget, request: &ActionRequest) -> Result<()> {
        self.install_or_upgrade(ReleaseAction::Upgrade, target, request)
            .await
    }

    async fn test(
        &self,
        target: &EngineTarget,
        release_name: &str,
        timeout: Duration,
    ) -> Result<()> {
        let workdir = Workdir::new(target)?;
        let args = vec![
            "test".into(),
            release_name.to_string(),
            "--timeout".into(),
            duration_arg(timeout),
        ];
        self.run_action(ReleaseAction::Test, target, &workdir, args)
            .await
    }

    async fn rollback(&self, target: &EngineTarget, request: &RollbackRequest) -> Result<()> {
        let workdir = Workdir::new(target)?;
        let mut args = vec![
            "rollback".into(),
            request.release_name.clone(),
            "--timeout".into(),
            duration_arg(request.timeout),
            "--history-max".into(),
            request.max_history.to_string(),
        ];
        if request.force {
            args.push("--force".into());
        }
        if request.recreate {
            args.push("--recreate-pods".into());
        }
        if request.disable_hooks {
            args.push("--no-hooks".into());
        }
        if request.wait {
            args.push("--wait".into());
        }
        self.run_action(ReleaseAction::Rollback, target, &workdir, args)
            .await
    }

    async fn uninstall(
        &self,
        target: &EngineTarget,
        release_name: &str,
        timeout: Duration,
    ) -> Result<()> {
        let workdir = Workdir::new(target)?;
        let args = vec![
            "uninstall".into(),
            release_name.to_string(),
            "--timeout".into(),
            duration_arg(timeout),
        ];
        match self.run(target, &workdir, args).await? {
            Outcome::Success(_) => Ok(()),
            // already gone
            Outcome::Failed(stderr) if is_release_not_found(&stderr) => Ok(()),
            Outcome::Failed(stderr) => Err(engine_failure(ReleaseAction::Uninstall, &stderr)),
        }
    }

    async fn status(
        &self,
        target: &EngineTarget,
        release_name: &str,
    ) -> Result<Option<ObservedRelease>> {
        let workdir = Workdir::new(target)?;
        let args = vec![
            "status".into(),
            release_name.to_string(),
            "--output".into(),
            "json".into(),
        ];
        match self.run(target, &workdir, args).await? {
            Outcome::Success(stdout) => parse_release_json(&stdout).map(Some),
            Outcome::Failed(stderr) if is_release_not_found(&stderr) => Ok(None),
            Outcome::Failed(stderr) => Err(Error::engine(stderr.trim().to_string())),
        }
    }
}

enum Outcome {
    Success(Vec<u8>),
    Failed(String),
}

fn is_release_not_found(stderr: &str) -> bool {
    stderr.contains("release: not found")
}

fn duration_arg(timeout: Duration) -> String {
    format!("{}s", timeout.as_secs())
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Scratch directory for one helm invocation, removed on drop
struct Workdir {
    dir: TempDir,
    kubeconfig: Option<PathBuf>,
}

impl Workdir {
    fn new(target: &EngineTarget) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("chartwarden-")
            .tempdir()
            .map_err(|e| Error::engine(format!("failed to create work directory: {e}")))?;
        let mut workdir = Self {
            dir,
            kubeconfig: None,
        };
        if let Some(kubeconfig) = &target.kubeconfig {
            workdir.kubeconfig = Some(workdir.write("kubeconfig", kubeconfig.as_bytes())?);
        }
        Ok(workdir)
    }

    fn write(&self, name: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents)
            .map_err(|e| Error::engine(format!("failed to write {}: {e}", path.display())))?;
        Ok(path)
    }
}
