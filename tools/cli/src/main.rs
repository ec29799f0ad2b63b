//! gmanvault CLI - Command line interface for encrypted grade-book vaults.
//!
//! This tool opens a container, hands out the decrypted working file while
//! the vault is locked to this user, and seals it again afterwards.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use gmanvault_common::{Error, Identity};
use gmanvault_vault::{
    create_keyfile, AdvisoryLock, Container, Credential, VaultOptions, VaultSession,
};

#[derive(Parser)]
#[command(name = "gmanvault")]
#[command(about = "gmanvault - Encrypted grade-book vaults")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// JSON file with vault options.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Identity to lock the vault with (defaults to the current user).
    #[arg(short, long, global = true)]
    identity: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// How to unlock a container.
#[derive(Args)]
struct CredentialArgs {
    /// Keyfile holding the vault key.
    #[arg(short, long)]
    keyfile: Option<PathBuf>,

    /// Prompt for a password.
    #[arg(short, long)]
    password: bool,

    /// Create the keyfile if it does not exist.
    #[arg(long, requires = "keyfile")]
    create_keyfile: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new keyfile.
    CreateKeyfile {
        /// Where to write the keyfile.
        #[arg(short, long)]
        keyfile: PathBuf,
    },

    /// Show container and lock information.
    Status {
        /// Path to the container.
        #[arg(short = 'f', long)]
        container: PathBuf,
    },

    /// Decrypt the vault, wait for Enter, then seal it again.
    Open {
        /// Path to the container (created if missing).
        #[arg(short = 'f', long)]
        container: PathBuf,

        #[command(flatten)]
        credential: CredentialArgs,
    },

    /// Copy the decrypted payload out without resealing.
    Export {
        /// Path to the container.
        #[arg(short = 'f', long)]
        container: PathBuf,

        /// Destination file.
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        credential: CredentialArgs,
    },

    /// Replace the payload with a file and seal.
    Import {
        /// Path to the container (created if missing).
        #[arg(short = 'f', long)]
        container: PathBuf,

        /// Source file.
        #[arg(short = 'n', long)]
        input: PathBuf,

        #[command(flatten)]
        credential: CredentialArgs,
    },

    /// Remove a lock left behind by a crashed session.
    BreakLock {
        /// Path to the container.
        #[arg(short = 'f', long)]
        container: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = load_options(cli.config.as_deref(), cli.identity)?;

    match cli.command {
        Commands::CreateKeyfile { keyfile } => cmd_create_keyfile(&keyfile),

        Commands::Status { container } => cmd_status(&container, &options),

        Commands::Open {
            container,
            credential,
        } => cmd_open(container, credential, options).await,

        Commands::Export {
            container,
            output,
            credential,
        } => cmd_export(container, &output, credential, options).await,

        Commands::Import {
            container,
            input,
            credential,
        } => cmd_import(container, &input, credential, options).await,

        Commands::BreakLock { container } => cmd_break_lock(&container, &options),
    }
}

/// Load options from an optional JSON file and apply command-line overrides.
fn load_options(config: Option<&Path>, identity: Option<String>) -> Result<VaultOptions> {
    let mut options = match config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            VaultOptions::from_json(&json).context("Invalid config")?
        }
        None => VaultOptions::default(),
    };

    if let Some(name) = identity {
        options.identity = Some(Identity::new(name).context("Invalid identity")?);
    }

    Ok(options)
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password))
}

/// Build the credential for `container` from command-line arguments.
fn resolve_credential(
    container: &Path,
    args: &CredentialArgs,
    options: &mut VaultOptions,
) -> Result<Credential> {
    options.provision_keyfile = args.create_keyfile;

    let password = if args.password {
        let password = prompt_password("Enter password: ")?;
        if !container.exists() {
            let confirm = prompt_password("Confirm password: ")?;
            if *password != *confirm {
                anyhow::bail!("Passwords do not match");
            }
        }
        Some(password.to_string())
    } else {
        None
    };

    Ok(Credential::from_parts(args.keyfile.clone(), password)?)
}

/// Open and decrypt a session on a blocking worker, keeping the KDF off the
/// async runtime.
async fn open_session(
    container: PathBuf,
    args: CredentialArgs,
    mut options: VaultOptions,
) -> Result<(VaultSession, PathBuf)> {
    let credential = resolve_credential(&container, &args, &mut options)?;

    let result = tokio::task::spawn_blocking(move || -> gmanvault_common::Result<_> {
        let mut session = VaultSession::open(&container, &credential, &options)?;
        let path = session.decrypt()?;
        Ok((session, path))
    })
    .await
    .context("Vault worker panicked")?;

    match result {
        Ok(opened) => Ok(opened),
        Err(Error::Busy { holder }) => anyhow::bail!("Vault is locked by {}", holder),
        Err(e @ Error::Decryption(_)) => {
            Err(anyhow::Error::new(e).context("Wrong key or password, or the vault is damaged"))
        }
        Err(e) => Err(anyhow::Error::new(e).context("Failed to open vault")),
    }
}

/// Seal a session on a blocking worker.
async fn seal_session(mut session: VaultSession) -> Result<()> {
    tokio::task::spawn_blocking(move || session.encrypt())
        .await
        .context("Vault worker panicked")?
        .context("Failed to seal vault")
}

/// Generate a new keyfile.
fn cmd_create_keyfile(keyfile: &Path) -> Result<()> {
    create_keyfile(keyfile)
        .with_context(|| format!("Failed to create keyfile {}", keyfile.display()))?;

    println!("Keyfile created: {}", keyfile.display());
    println!("Keep it safe: without it the vault cannot be opened.");

    Ok(())
}

/// Show container information.
fn cmd_status(container: &Path, options: &VaultOptions) -> Result<()> {
    let status = Container::inspect(container, options).context("Failed to inspect container")?;

    println!("Container: {}", container.display());
    println!("  Size: {} bytes", status.size);
    println!(
        "  Contents: {}",
        if status.fresh { "empty (never sealed)" } else { "sealed" }
    );
    match status.lock_holder {
        Some(holder) => println!("  Locked by: {}", holder),
        None => println!("  Locked by: nobody"),
    }

    Ok(())
}

/// Decrypt, wait for the user, then seal.
async fn cmd_open(container: PathBuf, args: CredentialArgs, options: VaultOptions) -> Result<()> {
    info!("Opening vault at: {}", container.display());

    let (session, path) = open_session(container, args, options).await?;

    println!("Vault is open. Working file:");
    println!("  {}", path.display());
    println!("Press Enter to seal the vault.");

    // A plain thread, so an interrupted read does not hold up runtime shutdown.
    let (tx, enter) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = tx.send(std::io::stdin().read_line(&mut line).map(|_| ()));
    });

    tokio::select! {
        result = enter => {
            result.context("Input reader stopped")?.context("Failed to read input")?;
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, sealing vault");
        }
    }

    seal_session(session).await?;
    println!("Vault sealed.");

    Ok(())
}

/// Copy the decrypted payload to `output`.
async fn cmd_export(
    container: PathBuf,
    output: &Path,
    args: CredentialArgs,
    options: VaultOptions,
) -> Result<()> {
    info!("Exporting {} to {}", container.display(), output.display());

    let (mut session, path) = open_session(container, args, options).await?;

    let data = match tokio::fs::read(&path).await {
        Ok(data) => Zeroizing::new(data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Zeroizing::new(Vec::new()),
        Err(e) => return Err(e).context("Failed to read working file"),
    };
    let written = tokio::fs::write(output, &*data)
        .await
        .context("Failed to write output file");

    session.release().context("Failed to release vault")?;
    written?;

    println!(
        "Payload exported: {} ({} bytes)",
        output.display(),
        data.len()
    );

    Ok(())
}

/// Replace the payload with `input` and seal.
async fn cmd_import(
    container: PathBuf,
    input: &Path,
    args: CredentialArgs,
    options: VaultOptions,
) -> Result<()> {
    info!("Importing {} into {}", input.display(), container.display());

    let data = Zeroizing::new(
        tokio::fs::read(input)
            .await
            .context("Failed to read input file")?,
    );

    let (session, path) = open_session(container, args, options).await?;

    // Dropping the session on error releases the lock without sealing.
    tokio::fs::write(&path, &*data)
        .await
        .context("Failed to write working file")?;

    seal_session(session).await?;
    println!("Payload imported and sealed ({} bytes)", data.len());

    Ok(())
}

/// Remove an orphaned lock record.
fn cmd_break_lock(container: &Path, options: &VaultOptions) -> Result<()> {
    let lock = AdvisoryLock::new(options.lock_path(container));

    match lock.break_lock().context("Failed to remove lock")? {
        Some(holder) => println!("Removed lock held by {}", holder),
        None => println!("Vault is not locked."),
    }

    Ok(())
}
