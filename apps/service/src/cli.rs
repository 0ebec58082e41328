//! Operator command line.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::context::UserContext;
use crate::database::models::{NewTarget, SettingsUpdate, TargetKind};
use crate::database::{SettingsStore, TargetStore};
use crate::digest::DigestPeriod;
use crate::monitoring::{NetworkProbe, ProbeRequest, RetryCoordinator};
use crate::notifications::message::format_local;
use crate::orchestrator::{Orchestrator, Services};

#[derive(Parser)]
#[command(name = "ipwatch", version, about = "Health checks and alerting for HTTP and TCP endpoints")]
pub struct Cli {
    /// Path to a TOML config file.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the scheduler until Ctrl-C.
    Run,
    /// Check one target once and record the result.
    Check {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        target: Uuid,
    },
    /// Probe an endpoint through the retry cycle without storing anything.
    Probe(ProbeArgs),
    /// Send one digest right now.
    Digest {
        #[arg(value_enum)]
        period: PeriodArg,
    },
    #[command(subcommand)]
    User(UserCommand),
    #[command(subcommand)]
    Target(TargetCommand),
    #[command(subcommand)]
    Settings(SettingsCommand),
    #[command(subcommand)]
    Push(PushCommand),
    #[command(subcommand)]
    Chat(ChatCommand),
    /// Print the effective configuration.
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Http,
    Tcp,
}

impl From<KindArg> for TargetKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Http => TargetKind::Http,
            KindArg::Tcp => TargetKind::Tcp,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PeriodArg {
    Daily,
    Monthly,
}

impl From<PeriodArg> for DigestPeriod {
    fn from(period: PeriodArg) -> Self {
        match period {
            PeriodArg::Daily => DigestPeriod::Daily,
            PeriodArg::Monthly => DigestPeriod::Monthly,
        }
    }
}

#[derive(Args)]
pub struct ProbeArgs {
    #[arg(long, value_enum)]
    kind: KindArg,
    #[arg(long)]
    address: String,
    #[arg(long)]
    port: Option<u16>,
    /// Attempts in the cycle; defaults to `retry_attempts`.
    #[arg(long)]
    retries: Option<u32>,
}

#[derive(Subcommand)]
pub enum UserCommand {
    /// Register a user by email address.
    Add { email: String },
    List,
}

#[derive(Subcommand)]
pub enum TargetCommand {
    Add {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        label: String,
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(long)]
        address: String,
        #[arg(long)]
        port: Option<u16>,
        /// Minutes between checks.
        #[arg(long, default_value_t = 20)]
        interval: u32,
        #[arg(long)]
        disabled: bool,
    },
    List {
        #[arg(long)]
        user: Uuid,
    },
    Remove {
        #[arg(long)]
        user: Uuid,
        id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum SettingsCommand {
    Show {
        #[arg(long)]
        user: Uuid,
    },
    Set {
        #[arg(long)]
        user: Uuid,
        /// Replace the recipient list; repeat for several addresses.
        #[arg(long = "email")]
        emails: Vec<String>,
        #[arg(long)]
        daily: Option<bool>,
        #[arg(long)]
        monthly: Option<bool>,
    },
}

#[derive(Subcommand)]
pub enum PushCommand {
    Register {
        #[arg(long)]
        user: Uuid,
        token: String,
    },
}

#[derive(Subcommand)]
pub enum ChatCommand {
    /// Issue a one-time token the user hands to the chat bot.
    Token {
        #[arg(long)]
        user: Uuid,
    },
    /// Attach a chat id to the owner of a connect token.
    Link { token: String, chat_id: String },
    /// Detach the user's chat so no more alerts go there.
    Unlink {
        #[arg(long)]
        user: Uuid,
    },
}

/// Execute a parsed command against an already loaded config.
pub async fn dispatch(command: Command, config: Config) -> Result<()> {
    match command {
        Command::Config => {
            print!("{config}");
            Ok(())
        }
        Command::Probe(args) => probe(args, &config).await,
        Command::Run => Orchestrator::start(config).await,
        command => {
            let services = Services::build(config).await?;
            with_services(command, &services).await
        }
    }
}

async fn with_services(command: Command, services: &Services) -> Result<()> {
    let db = &services.database;
    let now = services.clock.now();

    match command {
        Command::Check { user, target } => {
            let check = services.executor.manual_check(&UserContext::new(user), target).await?;
            println!(
                "{} {} ({}) {}",
                if check.ok { "UP" } else { "DOWN" },
                check.target.label,
                check.target.address,
                describe(check.result.latency_ms, check.result.error.as_deref()),
            );
        }
        Command::Digest { period } => {
            let report = services.digests.run(period.into()).await?;
            println!("sent {} skipped {} failed {}", report.sent, report.skipped, report.failed);
        }
        Command::User(UserCommand::Add { email }) => {
            let user = db.create_user(&email, now).await?;
            db.get_or_create_settings(user.id).await?;
            println!("{} {}", user.id, user.email);
        }
        Command::User(UserCommand::List) => {
            for user in db.list_users().await? {
                println!("{} {}", user.id, user.email);
            }
        }
        Command::Target(TargetCommand::Add {
            user,
            label,
            kind,
            address,
            port,
            interval,
            disabled,
        }) => {
            let mut new_target = NewTarget::new(user, label, kind.into(), address).with_interval(interval);
            if let Some(port) = port {
                new_target = new_target.with_port(port);
            }
            if disabled {
                new_target = new_target.disabled();
            }
            let target = db.create_target(new_target, now).await?;
            println!("{} {} {}", target.id, target.kind, target.address);
        }
        Command::Target(TargetCommand::List { user }) => {
            for target in db.list_targets_for_user(user).await? {
                let checked = target
                    .last_checked_at
                    .map(|at| format_local(at, services.timezone))
                    .unwrap_or_else(|| "never".into());
                println!(
                    "{} {} {} every {}m {} [{}] last checked {}{}",
                    target.id,
                    target.kind,
                    target.last_status,
                    target.interval_minutes,
                    target.label,
                    display_address(&target.address, target.port),
                    checked,
                    if target.enabled { "" } else { " (disabled)" },
                );
            }
        }
        Command::Target(TargetCommand::Remove { user, id }) => {
            let ctx = UserContext::new(user);
            match db.get_target(id).await? {
                Some(target) if ctx.owns(target.user_id) => {
                    db.delete_target(id).await?;
                    println!("removed {id}");
                }
                _ => bail!("target {id} not found"),
            }
        }
        Command::Settings(SettingsCommand::Show { user }) => {
            let settings = db.get_or_create_settings(user).await?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::Settings(SettingsCommand::Set {
            user,
            emails,
            daily,
            monthly,
        }) => {
            let mut settings = db.get_or_create_settings(user).await?;
            SettingsUpdate {
                email_recipients: (!emails.is_empty()).then(|| emails.into_iter().collect::<BTreeSet<_>>()),
                daily_digest: daily,
                monthly_digest: monthly,
            }
            .apply(&mut settings);
            db.upsert_settings(&settings).await?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::Push(PushCommand::Register { user, token }) => {
            if db.register_push_device(user, &token, now).await? {
                println!("registered");
            } else {
                println!("already registered");
            }
        }
        Command::Chat(ChatCommand::Token { user }) => {
            println!("{}", db.issue_connect_token(user).await?);
        }
        Command::Chat(ChatCommand::Link { token, chat_id }) => {
            let user = db.link_chat(&token, &chat_id).await?;
            println!("linked chat {chat_id} to {user}");
        }
        Command::Chat(ChatCommand::Unlink { user }) => {
            if db.unlink_chat(user).await? {
                println!("unlinked");
            } else {
                println!("no chat linked");
            }
        }
        Command::Run | Command::Probe(_) | Command::Config => bail!("command does not run against the store"),
    }

    Ok(())
}

async fn probe(args: ProbeArgs, config: &Config) -> Result<()> {
    let kind = TargetKind::from(args.kind);
    let request = match kind {
        TargetKind::Http => ProbeRequest::http(args.address, Duration::from_millis(config.probe.http_timeout_ms)),
        TargetKind::Tcp => {
            let port = args.port.context("--port is required for tcp probes")?;
            ProbeRequest::tcp(args.address, port, Duration::from_millis(config.probe.tcp_timeout_ms))
        }
    };

    let probe = NetworkProbe::new(&config.probe.user_agent, config.probe.force_ipv4)?;
    let attempts = args.retries.unwrap_or(config.scheduler.retry_attempts).max(1);
    let retry = RetryCoordinator::new(attempts, config.retry_interval(), std::sync::Arc::new(SystemClock));

    let cycle = retry.run_with_retries(&probe, &request).await;
    println!(
        "{} after {} attempt(s): {}",
        if cycle.outcome.ok { "UP" } else { "DOWN" },
        cycle.attempts,
        describe(cycle.outcome.latency_ms, cycle.outcome.error().as_deref()),
    );
    Ok(())
}

fn describe(latency_ms: Option<u64>, error: Option<&str>) -> String {
    match (latency_ms, error) {
        (_, Some(error)) => error.to_string(),
        (Some(ms), None) => format!("{ms} ms"),
        (None, None) => "ok".to_string(),
    }
}

fn display_address(address: &str, port: Option<u16>) -> String {
    match port {
        Some(port) => format!("{address}:{port}"),
        None => address.to_string(),
    }
}
