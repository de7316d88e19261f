//! Command line and environment configuration

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{
    pipeline::{DeclaredContentType, Pipeline},
    primitive::anyhow::{self, Context},
    s3::S3Store,
    store::{BlobStore, FsStore},
};

/// Generate thumbnails of images held in blob storage.
#[derive(Debug, Parser)]
#[command(name = "thumbforge", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one request read from a file (or stdin) and print the response.
    Invoke {
        /// Request JSON file; stdin if absent
        #[arg(long)]
        request: Option<PathBuf>,
    },
    /// Answer requests over HTTP.
    Serve {
        #[arg(long, env = "THUMBFORGE_BIND", default_value = "0.0.0.0:3000")]
        bind: SocketAddr,
    },
}

/// Which backend holds the buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// Amazon S3 or a compatible service
    S3,
    /// Directories on the local disk
    Fs,
}

/// Settings shared by every subcommand
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Directory under which each run stages its files [default: system
    /// temp dir]
    #[arg(long, global = true, env = "THUMBFORGE_STAGING_ROOT")]
    pub staging_root: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "THUMBFORGE_STORE",
        value_enum,
        default_value_t = StoreKind::S3
    )]
    pub store: StoreKind,

    /// Root of the buckets when `--store fs`
    #[arg(
        long,
        global = true,
        env = "THUMBFORGE_FS_ROOT",
        default_value = "./buckets"
    )]
    pub fs_root: PathBuf,

    /// Custom S3 endpoint, e.g. a MinIO server
    #[arg(long, global = true, env = "THUMBFORGE_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    #[arg(long, global = true, env = "THUMBFORGE_S3_REGION")]
    pub s3_region: Option<String>,

    #[arg(long, global = true, env = "THUMBFORGE_S3_FORCE_PATH_STYLE")]
    pub s3_force_path_style: bool,

    /// Content type thumbnails are declared with
    #[arg(
        long,
        global = true,
        env = "THUMBFORGE_DECLARED_CONTENT_TYPE",
        value_enum,
        default_value_t = DeclaredContentType::Source
    )]
    pub declared_content_type: DeclaredContentType,
}

impl Config {
    pub fn staging_root(&self) -> PathBuf {
        self.staging_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Construct the configured store.
    pub async fn build_store(&self) -> anyhow::Result<Arc<dyn BlobStore>> {
        Ok(match self.store {
            StoreKind::S3 => Arc::new(
                S3Store::from_env(
                    self.s3_endpoint.as_deref(),
                    self.s3_region.as_deref(),
                    self.s3_force_path_style,
                )
                .await,
            ),
            StoreKind::Fs => {
                let root = canonical_dir(&self.fs_root)
                    .await
                    .context("The fs store root failed to canonicalize")?;
                tracing::info!("Buckets are directories under {root:?}");
                Arc::new(FsStore::new(root))
            }
        })
    }

    /// Construct the pipeline with its store.
    pub async fn pipeline(&self) -> anyhow::Result<Pipeline> {
        let store = self.build_store().await?;
        let staging_root = self.staging_root();
        tracing::info!(
            "Staging under {staging_root:?}, declaring {:?} content type",
            self.declared_content_type
        );
        Ok(Pipeline::new(store, staging_root, self.declared_content_type))
    }
}

async fn canonical_dir(path: &Path) -> anyhow::Result<PathBuf> {
    let canonical = tokio::fs::canonicalize(path)
        .await
        .with_context(|| format!("{path:?}"))?;
    anyhow::ensure!(canonical.is_dir(), "{canonical:?} is not a directory");
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["thumbforge", "invoke"]).unwrap();
        assert!(matches!(cli.command, Command::Invoke { request: None }));
        assert_eq!(cli.config.store, StoreKind::S3);
        assert_eq!(cli.config.fs_root, PathBuf::from("./buckets"));
        assert_eq!(
            cli.config.declared_content_type,
            DeclaredContentType::Source
        );
        assert!(!cli.config.s3_force_path_style);
    }

    #[test]
    fn options_before_and_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "thumbforge",
            "--store",
            "fs",
            "serve",
            "--bind",
            "127.0.0.1:8080",
            "--fs-root",
            "/srv/buckets",
            "--declared-content-type",
            "output",
        ])
        .unwrap();
        let Command::Serve { bind } = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(bind, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(cli.config.store, StoreKind::Fs);
        assert_eq!(cli.config.fs_root, PathBuf::from("/srv/buckets"));
        assert_eq!(
            cli.config.declared_content_type,
            DeclaredContentType::Output
        );
    }

    #[test]
    fn unknown_store_is_refused() {
        assert!(Cli::try_parse_from(["thumbforge", "--store", "ftp", "invoke"]).is_err());
    }

    #[tokio::test]
    async fn fs_store_needs_an_existing_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut cli = Cli::try_parse_from(["thumbforge", "--store", "fs", "invoke"]).unwrap();

        cli.config.fs_root = dir.path().join("missing");
        assert!(cli.config.pipeline().await.is_err());

        cli.config.fs_root = dir.path().to_path_buf();
        cli.config.staging_root = Some(dir.path().join("staging"));
        assert!(cli.config.pipeline().await.is_ok());
        assert_eq!(cli.config.staging_root(), dir.path().join("staging"));
    }
}
