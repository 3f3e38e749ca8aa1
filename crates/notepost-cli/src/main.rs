use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use miette::Result;
use notepost_common::telemetry::{self, TelemetryConfig};
use notepost_common::{
    DocumentStore, HttpPublishService, PublishedRecord, ServiceConfig, StateFile, VaultStore,
};
use notepost_publish::{ClaimReport, ReconcileReport, Session, Unpublished};

type VaultSession = Session<VaultStore, HttpPublishService>;

#[derive(Parser)]
#[command(version, about = "Notepost - publish vault notes as shareable web pages", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Vault directory
    #[arg(long, env = "NOTEPOST_VAULT", default_value = ".", global = true)]
    vault: PathBuf,

    /// State file (default: <config dir>/notepost/state.json)
    #[arg(long, env = "NOTEPOST_STATE", global = true)]
    state: Option<PathBuf>,

    /// Publishing service base URL
    #[arg(long, env = "NOTEPOST_API_URL", global = true)]
    api_url: Option<String>,

    /// Log at debug level
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a note, or update its existing page
    Publish {
        /// Vault-relative path of the note
        path: String,
    },
    /// Delete the published page of a note
    Unpublish {
        path: String,

        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
    /// Check the account tier
    Status,
    /// List the documents published under the account
    List,
    /// Configure an API key and claim anonymously published notes
    Login { api_key: String },
    /// Forget the API key
    Logout,
    /// Claim anonymously published notes into the account
    Claim,
    /// Show or change settings
    Settings {
        #[arg(long, action = ArgAction::Set)]
        strip_tags: Option<bool>,

        #[arg(long, action = ArgAction::Set)]
        auto_copy: Option<bool>,

        #[arg(long, action = ArgAction::Set)]
        mirror_metadata: Option<bool>,
    },
    /// Adopt notes whose metadata says they are published
    Reconcile,
    /// Move a note, keeping its published page
    Mv { from: String, to: String },
    /// Delete a note and forget its published page
    Rm { path: String },
    /// Print the billing portal link
    Portal,
    /// Show tracked notes
    Records,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_miette();

    let cli = Cli::parse();

    let mut telemetry_config = TelemetryConfig::from_env("notepost");
    if cli.verbose {
        telemetry_config = telemetry_config.with_level(tracing::Level::DEBUG);
    }
    telemetry::init(telemetry_config);

    let (session, reconciled) = open_session(&cli).await?;
    if !matches!(cli.command, Commands::Reconcile) && !reconciled.adopted.is_empty() {
        notify(format!(
            "⚠ Picked up {} published note(s) from metadata",
            reconciled.adopted.len()
        ));
    }

    match cli.command {
        Commands::Publish { path } => publish(&session, &path).await?,
        Commands::Unpublish { path, yes } => unpublish(&session, &path, yes).await?,
        Commands::Status => status(&session).await,
        Commands::List => list(&session).await?,
        Commands::Login { api_key } => {
            let report = session.set_api_key(Some(&api_key)).await?;
            notify("✓ API key saved");
            if let Some(report) = report {
                print_claim_report(&report);
            }
        }
        Commands::Logout => {
            session.set_api_key(None).await?;
            notify("✓ Signed out; new notes publish anonymously");
        }
        Commands::Claim => {
            let report = session.claim_all().await?;
            print_claim_report(&report);
        }
        Commands::Settings {
            strip_tags,
            auto_copy,
            mirror_metadata,
        } => {
            let settings = session
                .update_settings(|settings| {
                    if let Some(value) = strip_tags {
                        settings.strip_tags = value;
                    }
                    if let Some(value) = auto_copy {
                        settings.auto_copy = value;
                    }
                    if let Some(value) = mirror_metadata {
                        settings.mirror_metadata = value;
                    }
                })
                .await?;
            println!("strip-tags: {}", settings.strip_tags);
            println!("auto-copy: {}", settings.auto_copy);
            println!("mirror-metadata: {}", settings.mirror_metadata);
            println!(
                "account: {}",
                if settings.api_key.is_some() {
                    "signed in"
                } else {
                    "anonymous"
                }
            );
        }
        Commands::Reconcile => {
            for path in &reconciled.adopted {
                println!("{path}");
            }
            notify(format!("✓ Adopted {} note(s)", reconciled.adopted.len()));
        }
        Commands::Mv { from, to } => {
            let mut events = session.store().subscribe();
            session.store().rename(&from, &to).await?;
            while let Ok(event) = events.try_recv() {
                session.apply_event(&event).await?;
            }
            notify(format!("✓ Moved {from} to {to}"));
        }
        Commands::Rm { path } => {
            let mut events = session.store().subscribe();
            session.store().delete(&path).await?;
            while let Ok(event) = events.try_recv() {
                session.apply_event(&event).await?;
            }
            notify(format!("✓ Deleted {path}"));
        }
        Commands::Portal => {
            let url = session.billing_portal_url().await?;
            println!("{url}");
        }
        Commands::Records => {
            for (path, record) in session.records().await {
                println!("{path}\t{}\t{}", record.url, owner_label(&record));
            }
        }
    }

    Ok(())
}

async fn open_session(cli: &Cli) -> Result<(VaultSession, ReconcileReport)> {
    if !cli.vault.is_dir() {
        return Err(miette::miette!(
            "Vault directory not found: {}",
            cli.vault.display()
        ));
    }

    let mut config = ServiceConfig::from_env()?;
    if let Some(url) = &cli.api_url {
        config = config.with_base_url(url)?;
    }
    tracing::debug!(api = %config.base_url, vault = %cli.vault.display(), "opening session");

    let state_file = StateFile::new(
        cli.state
            .clone()
            .unwrap_or_else(StateFile::default_location),
    );
    let store = Arc::new(VaultStore::new(cli.vault.clone()));
    let service = Arc::new(HttpPublishService::new(config)?);
    let session = Session::load(store, service, state_file).await?;
    let reconciled = session.reconcile_startup().await?;
    Ok((session, reconciled))
}

async fn publish(session: &VaultSession, path: &str) -> Result<()> {
    notify(format!("→ Publishing {path}..."));
    let outcome = session.publish(path).await?;
    let settings = session.settings().await;

    if outcome.retried_after_expiry {
        notify("⚠ The previous page had expired; published a new one");
    }
    let verb = if outcome.created { "Published" } else { "Updated" };
    notify(format!(
        "✓ {verb} {} (expires: {})",
        outcome.record.url, outcome.expires
    ));
    if settings.auto_copy {
        println!("{}", outcome.record.url);
    }
    Ok(())
}

async fn unpublish(session: &VaultSession, path: &str, yes: bool) -> Result<()> {
    let outcome = session
        .unpublish(path, |record| yes || confirm(record))
        .await?;
    match outcome {
        Unpublished::Removed(record) => notify(format!("✓ Unpublished {}", record.url)),
        Unpublished::Cancelled => notify("Cancelled"),
        Unpublished::NotPublished => notify(format!("⚠ {path} is not published")),
    }
    Ok(())
}

async fn status(session: &VaultSession) {
    let permanent = session.check_status().await;
    let settings = session.settings().await;
    println!(
        "account: {}",
        if settings.api_key.is_some() {
            "signed in"
        } else {
            "anonymous"
        }
    );
    println!(
        "links: {}",
        if permanent { "permanent" } else { "expiring" }
    );
    println!("tracked notes: {}", session.records().await.len());
}

async fn list(session: &VaultSession) -> Result<()> {
    let list = session.list_remote().await?;
    for document in &list.documents {
        let expires = document
            .expires_at
            .map(|at| at.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "never".to_owned());
        println!(
            "{}\t{}\t{}\t{expires}",
            document.slug,
            document.title.as_deref().unwrap_or(""),
            document.url
        );
    }
    notify(format!("✓ {} document(s)", list.documents.len()));
    Ok(())
}

fn print_claim_report(report: &ClaimReport) {
    if report.is_empty() {
        notify("No anonymous notes to claim");
        return;
    }
    for path in &report.claimed {
        notify(format!("✓ Claimed {path}"));
    }
    for path in &report.failed {
        notify(format!("⚠ Could not claim {path}"));
    }
}

fn owner_label(record: &PublishedRecord) -> &'static str {
    if record.is_anonymous() {
        "anonymous"
    } else {
        "account"
    }
}

fn confirm(record: &PublishedRecord) -> bool {
    eprint!("Delete {}? [y/N] ", record.url);
    if std::io::stderr().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}

/// One-line notice on stderr; stdout carries only command output.
fn notify(message: impl AsRef<str>) {
    eprintln!("{}", message.as_ref());
}

fn init_miette() {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }))
    .expect("couldn't set the miette hook");
    miette::set_panic_hook();
}
