//! Helm command lines used during deployment

use std::path::{Path, PathBuf};

use tracing::info;

use crate::errors::DeployerError;
use crate::helm::installer::HelmInstaller;

pub const AAD_POD_IDENTITY_REPO: &str =
    "https://raw.githubusercontent.com/Azure/aad-pod-identity/master/charts";
pub const AAD_POD_IDENTITY_VERSION: &str = "4.1.12";
pub const BLOB_CSI_REPO: &str =
    "https://raw.githubusercontent.com/kubernetes-sigs/blob-csi-driver/master/charts";
pub const BLOB_CSI_DRIVER_VERSION: &str = "v1.15.0";

/// Namespace the cluster add-ons are installed into
pub const SYSTEM_NAMESPACE: &str = "kube-system";

/// Release name of the main chart
pub const RELEASE_NAME: &str = "cromwellonazure";

/// `repo add <name> <url>`
pub fn repo_add(name: &str, url: &str) -> Vec<String> {
    vec![
        "repo".to_string(),
        "add".to_string(),
        name.to_string(),
        url.to_string(),
    ]
}

/// `install <release> <chart> --namespace <ns> --version <v> --kubeconfig <path>`
pub fn install(
    release: &str,
    chart: &str,
    namespace: &str,
    version: &str,
    kubeconfig: &Path,
    set_values: &[(&str, &str)],
) -> Vec<String> {
    let mut args = vec!["install".to_string(), release.to_string(), chart.to_string()];
    for (key, value) in set_values {
        args.push("--set".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.extend([
        "--namespace".to_string(),
        namespace.to_string(),
        "--version".to_string(),
        version.to_string(),
        "--kubeconfig".to_string(),
        kubeconfig.display().to_string(),
    ]);
    args
}

/// `upgrade --install <release> <chart dir> --kubeconfig <path> --namespace <ns> --create-namespace`
pub fn upgrade_install(
    release: &str,
    chart_dir: &Path,
    kubeconfig: &Path,
    namespace: &str,
) -> Vec<String> {
    vec![
        "upgrade".to_string(),
        "--install".to_string(),
        release.to_string(),
        chart_dir.display().to_string(),
        "--kubeconfig".to_string(),
        kubeconfig.display().to_string(),
        "--namespace".to_string(),
        namespace.to_string(),
        "--create-namespace".to_string(),
    ]
}

/// Installs the cluster add-ons and the main chart
pub struct ChartDeployer {
    installer: HelmInstaller,
    kubeconfig: PathBuf,
    chart_dir: PathBuf,
    namespace: String,
}

impl ChartDeployer {
    pub fn new(
        installer: HelmInstaller,
        kubeconfig: impl Into<PathBuf>,
        chart_dir: impl Into<PathBuf>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            installer,
            kubeconfig: kubeconfig.into(),
            chart_dir: chart_dir.into(),
            namespace: namespace.into(),
        }
    }

    /// Install aad-pod-identity and the blob CSI driver into kube-system
    pub async fn deploy_dependencies(&self) -> Result<(), DeployerError> {
        info!("Installing cluster add-ons...");

        self.installer
            .run(repo_add("aad-pod-identity", AAD_POD_IDENTITY_REPO))
            .await?;
        self.installer
            .run(install(
                "aad-pod-identity",
                "aad-pod-identity/aad-pod-identity",
                SYSTEM_NAMESPACE,
                AAD_POD_IDENTITY_VERSION,
                &self.kubeconfig,
                &[],
            ))
            .await?;
        self.installer
            .run(repo_add("blob-csi-driver", BLOB_CSI_REPO))
            .await?;
        self.installer
            .run(install(
                "blob-csi-driver",
                "blob-csi-driver/blob-csi-driver",
                SYSTEM_NAMESPACE,
                BLOB_CSI_DRIVER_VERSION,
                &self.kubeconfig,
                &[("node.enableBlobfuseProxy", "true")],
            ))
            .await?;

        Ok(())
    }

    /// Upgrade or install the main chart from the local chart directory
    pub async fn deploy_chart(&self) -> Result<(), DeployerError> {
        info!(
            "Deploying {} chart to namespace {}...",
            RELEASE_NAME, self.namespace
        );
        self.installer
            .run(upgrade_install(
                RELEASE_NAME,
                &self.chart_dir,
                &self.kubeconfig,
                &self.namespace,
            ))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_places_set_values_before_flags() {
        let args = install(
            "blob-csi-driver",
            "blob-csi-driver/blob-csi-driver",
            "kube-system",
            "v1.15.0",
            Path::new("/tmp/kubeconfig.txt"),
            &[("node.enableBlobfuseProxy", "true")],
        );
        assert_eq!(
            args.join(" "),
            "install blob-csi-driver blob-csi-driver/blob-csi-driver \
             --set node.enableBlobfuseProxy=true --namespace kube-system \
             --version v1.15.0 --kubeconfig /tmp/kubeconfig.txt"
        );
    }

    #[test]
    fn test_upgrade_install_args() {
        let args = upgrade_install(
            "cromwellonazure",
            Path::new("./scripts/helm"),
            Path::new("/tmp/kubeconfig.txt"),
            "coa",
        );
        assert_eq!(
            args.join(" "),
            "upgrade --install cromwellonazure ./scripts/helm \
             --kubeconfig /tmp/kubeconfig.txt --namespace coa --create-namespace"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dependencies_run_in_order_and_stop_on_failure() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");
        let script = dir.path().join("helm");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$1 $2\" >> {}\n[ \"$2\" = \"blob-csi-driver\" ] && [ \"$1\" = \"install\" ] && exit 3\nexit 0\n",
                log.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let deployer = ChartDeployer::new(
            HelmInstaller::new(&script),
            dir.path().join("kubeconfig.txt"),
            "./scripts/helm",
            "coa",
        );
        let err = deployer.deploy_dependencies().await.unwrap_err();
        assert!(matches!(err, DeployerError::InstallerFailure { exit_code: 3 }));

        let calls = std::fs::read_to_string(&log).unwrap();
        assert_eq!(
            calls.lines().collect::<Vec<_>>(),
            vec![
                "repo add",
                "install aad-pod-identity",
                "repo add",
                "install blob-csi-driver",
            ]
        );
    }
}
