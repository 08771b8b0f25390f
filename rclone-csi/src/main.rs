//! `rclone-csi` — serves the rclone CSI driver over QUIC.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use librclone::RcloneBackend;
use librclone::cluster::KubeStore;
use librclone::config::{DEFAULT_DRIVER_NAME, DriverConfig};
use librclone::transport::server::CsiServer;
use librclone::workload::DEFAULT_MOUNTER_IMAGE;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "rclone-csi", version, about = "CSI driver for rclone remotes")]
struct Cli {
    /// Address the QUIC endpoint binds to.
    #[arg(long, default_value = "0.0.0.0:10000")]
    listen: SocketAddr,

    /// PEM certificate chain presented to clients.
    #[arg(long)]
    tls_cert: PathBuf,

    /// PEM private key of the certificate.
    #[arg(long)]
    tls_key: PathBuf,

    /// Node the mount workloads are pinned to. Falls back to `NODE_ID`.
    #[arg(long)]
    node_id: Option<String>,

    /// Namespace of the config Secrets and mount Deployments. Falls back to
    /// `POD_NAMESPACE`, then `default`.
    #[arg(long)]
    namespace: Option<String>,

    #[arg(long, default_value = DEFAULT_DRIVER_NAME)]
    driver_name: String,

    /// Image running `rclone mount`.
    #[arg(long, default_value = DEFAULT_MOUNTER_IMAGE)]
    mounter_image: String,

    /// rclone executable used for mkdir and rmdirs.
    #[arg(long, default_value = "rclone")]
    rclone_binary: PathBuf,

    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

impl Cli {
    /// Environment first, flags on top.
    fn driver_config(&self) -> DriverConfig {
        self.overlay(DriverConfig::from_env())
    }

    fn overlay(&self, base: DriverConfig) -> DriverConfig {
        DriverConfig {
            driver_name: self.driver_name.clone(),
            node_id: self.node_id.clone().unwrap_or(base.node_id),
            namespace: self.namespace.clone().unwrap_or(base.namespace),
            mounter_image: self.mounter_image.clone(),
            rclone_binary: self.rclone_binary.clone(),
            ..base
        }
    }
}

fn init_logging(format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
        .context("failed to create log filter")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.with_target(false).try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}

fn load_tls(cert: &Path, key: &Path) -> Result<rustls::ServerConfig> {
    let chain = CertificateDer::pem_file_iter(cert)
        .with_context(|| format!("failed to open {}", cert.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse certificates in {}", cert.display()))?;
    let key = PrivateKeyDer::from_pem_file(key)
        .with_context(|| format!("failed to parse private key in {}", key.display()))?;

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .context("invalid certificate or key")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("a TLS crypto provider is already installed"))?;

    let config = cli.driver_config();
    let tls = load_tls(&cli.tls_cert, &cli.tls_key)?;

    let client = kube::Client::try_default()
        .await
        .context("failed to build kubernetes client")?;
    let store = Arc::new(KubeStore::new(client, config.namespace.clone()));

    info!(
        driver = %config.driver_name,
        node_id = %config.node_id,
        namespace = %config.namespace,
        "starting rclone CSI driver"
    );
    let backend = Arc::new(RcloneBackend::new(config, store));
    let server = CsiServer::new(cli.listen, tls, backend).context("failed to start server")?;
    server.serve().await.context("server terminated")?;
    Ok(())
}
