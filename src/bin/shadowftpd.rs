//! `shadowftpd` CLI: `run`, `config`, `adduser`, `addip`, `gencert`.

use clap::{Parser, Subcommand};
use shadowftp_auth::SledCredentialStore;
use shadowftp_core::{CredentialStore, IpMask, User};
use shadowftp_vfs::{Filesystem, Permissions, ShadowStore, VfsConfig};
use shadowftpd::config::{self, ServerOptions};
use shadowftpd::server::passive::PassivePorts;
use shadowftpd::server::{tls, AppContext};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(author, version, about = "Multi-user FTPS server with an ACL-gated virtual filesystem")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse configuration, open the stores, and serve until SIGINT/SIGTERM.
    Run {
        #[arg(long)]
        config: PathBuf,
    },
    /// Parse and validate a configuration file without starting the server.
    Config {
        #[arg(long)]
        config: PathBuf,
        /// Exit 0/1 and print nothing on success.
        #[arg(long)]
        check: bool,
    },
    /// Add a user directly to the credential store.
    Adduser {
        name: String,
        password: String,
        #[arg(long = "primary-group")]
        primary_group: Option<String>,
        #[arg(long, default_value = "shadow.db")]
        auth_db: PathBuf,
    },
    /// Append an IP mask to an existing user.
    Addip {
        name: String,
        mask: String,
        #[arg(long, default_value = "shadow.db")]
        auth_db: PathBuf,
    },
    /// Generate a self-signed development certificate. Not for production issuance.
    Gencert { out_cert: PathBuf, out_key: PathBuf },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run { config } => tokio_block_on(run(config)),
        Command::Config { config, check } => run_config_check(config, check),
        Command::Adduser { name, password, primary_group, auth_db } => adduser(name, password, primary_group, auth_db),
        Command::Addip { name, mask, auth_db } => addip(name, mask, auth_db),
        Command::Gencert { out_cert, out_key } => gencert(out_cert, out_key),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("shadowftpd: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: &PathBuf) -> Result<ServerOptions, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("reading {}: {e}", path.display()))?;
    config::parse(&text).map_err(|e| format!("{}: {e}", path.display()))
}

fn build_permissions(opts: &ServerOptions) -> Result<Permissions, String> {
    Permissions::try_from(opts.acl_rules.clone()).map_err(|e| format!("acl rules: {e}"))
}

async fn run(config_path: PathBuf) -> Result<(), String> {
    let opts = load_config(&config_path)?;

    let db = sled::Config::new()
        .path(&opts.shadow_db)
        .open()
        .map_err(|e| format!("opening shadow db {}: {e}", opts.shadow_db.display()))?;
    let shadow = Arc::new(ShadowStore::open(&db).map_err(|e| format!("opening shadow store: {e}"))?);
    let credentials: Arc<dyn CredentialStore> =
        Arc::new(SledCredentialStore::open(&db).map_err(|e| format!("opening credential store: {e}"))?);

    let permissions = Arc::new(build_permissions(&opts)?);
    let vfs_config = VfsConfig {
        root: opts.fs_rootpath.clone(),
        default_user: opts.default_user.clone(),
        default_group: opts.default_group.clone(),
        hide_patterns: opts.hide_patterns.clone(),
    };
    let fs = Arc::new(Filesystem::new(vfs_config, permissions, shadow).map_err(|e| format!("opening virtual filesystem: {e}"))?);

    let tls_acceptor = match (&opts.tls_cert_file, &opts.tls_key_file) {
        (Some(cert), Some(key)) => Some(tls::load_acceptor(cert, key).map_err(|e| format!("loading TLS context: {e}"))?),
        _ => None,
    };

    let ctx = Arc::new(AppContext {
        fs,
        credentials,
        passive_ports: Arc::new(PassivePorts::new(opts.passive_port_min, opts.passive_port_max)),
        tls_acceptor,
        public_ip: opts.public_ip,
        sitename_short: opts.sitename_short.clone(),
    });

    let listener = tokio::net::TcpListener::bind((opts.host.as_str(), opts.port))
        .await
        .map_err(|e| format!("binding {}:{}: {e}", opts.host, opts.port))?;

    tracing::info!(host = %opts.host, port = opts.port, "shadowftpd listening");

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("installing SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
    };

    shadowftpd::server::serve(listener, ctx, shutdown).await.map_err(|e| format!("server error: {e}"))
}

fn run_config_check(config_path: PathBuf, check: bool) -> Result<(), String> {
    let opts = load_config(&config_path)?;
    if !check {
        println!("sitename_short = {}", opts.sitename_short);
        println!("listen = {}:{}", opts.host, opts.port);
        println!("passive_ports = {}-{}", opts.passive_port_min, opts.passive_port_max);
        println!("fs.rootpath = {}", opts.fs_rootpath.display());
        println!("fs.shadow_db = {}", opts.shadow_db.display());
        println!("auth.db = {}", opts.auth_db.display());
        println!("acl rules = {}", opts.acl_rules.len());
        println!("tls = {}", opts.tls_cert_file.is_some());
    }
    Ok(())
}

fn adduser(name: String, password: String, primary_group: Option<String>, auth_db: PathBuf) -> Result<(), String> {
    let db = sled::Config::new().path(&auth_db).open().map_err(|e| format!("opening {}: {e}", auth_db.display()))?;
    let store = SledCredentialStore::open(&db).map_err(|e| format!("opening credential store: {e}"))?;
    let hash = shadowftp_auth::hash_password(&password).map_err(|e| format!("hashing password: {e}"))?;
    let mut user = User::new(&name, hash);
    user.primary_group = primary_group;
    tokio_block_on(store.add_user(user)).map_err(|e| format!("adding user {name}: {e}"))?;
    println!("added user {name}");
    Ok(())
}

fn addip(name: String, mask: String, auth_db: PathBuf) -> Result<(), String> {
    if shadowftp_vfs::ipmask::parse(&mask).is_err() {
        return Err(format!("{mask}: not a valid ident@host-glob mask"));
    }
    let db = sled::Config::new().path(&auth_db).open().map_err(|e| format!("opening {}: {e}", auth_db.display()))?;
    let store = SledCredentialStore::open(&db).map_err(|e| format!("opening credential store: {e}"))?;
    tokio_block_on(store.update_user(
        &name,
        Box::new({
            let mask = mask.clone();
            move |u| u.ip_masks.push(IpMask(mask))
        }),
    ))
    .map_err(|e| format!("updating user {name}: {e}"))?;
    println!("added mask {mask} to {name}");
    Ok(())
}

fn gencert(out_cert: PathBuf, out_key: PathBuf) -> Result<(), String> {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).map_err(|e| format!("generating certificate: {e}"))?;
    std::fs::write(&out_cert, cert.pem()).map_err(|e| format!("writing {}: {e}", out_cert.display()))?;
    std::fs::write(&out_key, key_pair.serialize_pem()).map_err(|e| format!("writing {}: {e}", out_key.display()))?;
    println!("wrote {} and {}", out_cert.display(), out_key.display());
    Ok(())
}

/// Every subcommand (not just `run`) ends up calling an `async fn` on the
/// credential store, so `main` stays synchronous and builds one runtime
/// per invocation here rather than wrapping the whole binary in
/// `#[tokio::main]` regardless of which subcommand was chosen.
fn tokio_block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Runtime::new().expect("building the Tokio runtime").block_on(fut)
}
