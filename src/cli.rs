//! Thin demo command line exercising the engine against the local backend.
//! Carries no orchestration logic of its own; every decision is made inside
//! `core`.

use clap::{Parser, Subcommand};

use crate::backends::local_provider::LocalProvider;
use crate::core::{Base, BaseAlias, ProviderEngine};
use crate::diagnostics::{Diagnostic, Event, Severity};

#[derive(Parser)]
#[command(name = "provider-orchestrator", about = "Bring up a local demo instance")]
pub struct Cli {
    /// Scratch directory the local demo backend stores instances under.
    #[arg(long, default_value = ".provider-orchestrator")]
    pub root: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Launch (or reattach to) a named instance and bring it to ready.
    Up {
        name: String,
        #[arg(long, value_enum, default_value = "jammy")]
        alias: AliasArg,
        #[arg(long)]
        ephemeral: bool,
        /// Fetch an Ubuntu Pro guest token (falling back to the host's
        /// machine token) and persist it to the instance.
        #[arg(long)]
        pro: bool,
    },
    /// Destroy a named instance if it exists.
    Down { name: String },
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum AliasArg {
    Focal,
    Jammy,
    Noble,
    Devel,
}

impl From<AliasArg> for BaseAlias {
    fn from(value: AliasArg) -> Self {
        match value {
            AliasArg::Focal => BaseAlias::Focal,
            AliasArg::Jammy => BaseAlias::Jammy,
            AliasArg::Noble => BaseAlias::Noble,
            AliasArg::Devel => BaseAlias::Devel,
        }
    }
}

struct StderrReporter;

impl crate::diagnostics::Reporter for StderrReporter {
    fn report(&mut self, event: Event) {
        match event {
            Event::PhaseStarted { phase } => eprintln!("==> {phase}"),
            Event::PhaseCompleted { phase } => eprintln!("<== {phase} done"),
            Event::RetryWaiting { attempt, wait_secs } => eprintln!("    retry #{attempt} in {wait_secs:.1}s"),
            Event::ReachabilityProbed { reachable } => eprintln!("    network reachable: {reachable}"),
            Event::SnapInstalled { name, revision, source } => eprintln!("    snap {name} installed ({source}, rev {revision})"),
            Event::Message { diagnostic: Diagnostic { severity, message } } => match severity {
                Severity::Info => eprintln!("info: {message}"),
                Severity::Warning => eprintln!("warning: {message}"),
            },
        }
    }
}

pub fn run(cli: Cli) -> crate::error::Result<()> {
    let provider = LocalProvider::new(cli.root);
    let mut engine = ProviderEngine::new(provider);
    let mut reporter = StderrReporter;

    match cli.command {
        Command::Up { name, alias, ephemeral, pro } => {
            let mut base = Base::new(BaseAlias::from(alias), &name);
            let mut launched = engine.launched_environment(&mut base, &name, false, true, ephemeral, &mut reporter)?;
            if pro {
                crate::core::pro::enable_pro(launched.executor(), &crate::core::pro::UreqEntitlementClient, &mut reporter)?;
            }
            drop(launched);
            println!("{name} is ready");
        }
        Command::Down { name } => {
            engine.clean_project_environments(&name)?;
            println!("{name} removed");
        }
    }

    Ok(())
}
