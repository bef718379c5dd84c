use std::io;
use std::process::ExitCode;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use msrflow::{
    parse_command, parse_cores, Backend, CoreId, Engine, HostProbe, MsrflowError, Registry,
    Result, SystemClock, SystemProbe,
};

/// Environment variable holding one extra colon-delimited group of module
/// search directories, consulted after `--path` options and before the
/// built-in defaults.
const PATH_ENV: &str = "MSRFLOW_PATH";

/// Built-in module search directories, scanned last.
const DEFAULT_PATHS: [&str; 2] = [".", "/usr/lib/msrflow"];

const LONG_ABOUT: &str = "\
Read and write machine specific registers (MSRs), instantly or periodically, \
through a set of commands. Each command takes the form

  [:[:]]<address>[=<value>][@<delay>[-<repeat>]]

<address> is the MSR address and the optional <value> is written to the \
register when given. Both accept decimal or hexadecimal ('0x' or 'x' \
prefixed) form. A leading ':' prints the register value in decimal, '::' in \
hexadecimal; for a write command the value printed is the one the register \
held before the write. <delay> is the number of milliseconds to wait before \
the first execution, and <repeat> re-executes the command every that many \
milliseconds until the program is stopped.

Commands run on the cores selected with --cores; without it, on the core the \
program happens to start on. The host system ('linux' on bare metal, 'xen' \
under the Xen hypervisor) is detected automatically unless --system is \
given; register access itself is done by a loadable backend module found by \
scanning the --path directories, the MSRFLOW_PATH environment variable and \
finally the built-in defaults.";

#[derive(Parser, Debug)]
#[command(name = "msrflow")]
#[command(version)]
#[command(about = "Read and write machine specific registers")]
#[command(long_about = LONG_ABOUT)]
struct Args {
    #[arg(short, long, help = "Enable diagnostic logging on the error stream")]
    verbose: bool,

    #[arg(
        short,
        long,
        value_name = "NAME",
        help = "Override host system auto-detection ('linux', 'xen', ...)"
    )]
    system: Option<String>,

    #[arg(
        short,
        long = "path",
        value_name = "LIST",
        action = clap::ArgAction::Append,
        help = "Colon-separated extra module search directories, scanned before the defaults (repeatable)"
    )]
    paths: Vec<String>,

    #[arg(
        short,
        long = "cores",
        value_name = "SPEC",
        action = clap::ArgAction::Append,
        help = "Cores to run the commands on, e.g. '0', '0-3,6' or 'all' (repeatable, union)"
    )]
    cores: Vec<String>,

    #[arg(
        value_name = "COMMAND",
        help = "Register access commands: [:[:]]<address>[=<value>][@<delay>[-<repeat>]]"
    )]
    commands: Vec<String>,
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::debug!("stop requested, finishing current iteration");
    cancel.cancel();
}

/// Module search order: user-supplied groups first, then the environment
/// variable, then the built-in defaults.
fn search_paths(user_paths: &[String]) -> Vec<String> {
    let mut groups: Vec<String> = user_paths.to_vec();
    if let Ok(env) = std::env::var(PATH_ENV) {
        groups.push(env);
    }
    groups.extend(DEFAULT_PATHS.iter().map(|p| p.to_string()));
    groups
}

/// Union of all `--cores` occurrences over a contiguous core space of
/// `num_cores` ids; an empty selection falls back to the calling thread's
/// current core.
fn select_cores(specs: &[String], num_cores: usize) -> Result<Vec<CoreId>> {
    let mut selected = vec![false; num_cores];

    for spec in specs {
        if spec == "all" {
            selected.fill(true);
            continue;
        }
        parse_cores(&mut selected, spec).map_err(|err| MsrflowError::CoreSyntax {
            spec: spec.clone(),
            offset: err.offset,
        })?;
    }

    if !selected.iter().any(|&s| s) {
        let current = nix::sched::sched_getcpu()?;
        if current < num_cores {
            selected[current] = true;
        } else {
            selected[0] = true;
        }
    }

    Ok(selected
        .iter()
        .enumerate()
        .filter(|(_, s)| **s)
        .map(|(id, _)| id as CoreId)
        .collect())
}

async fn run(args: Args) -> Result<()> {
    let system = match args.system {
        Some(system) => {
            tracing::debug!("provided system type: '{system}'");
            system
        }
        None => {
            let system = HostProbe.probe().ok_or(MsrflowError::UnknownSystem)?;
            tracing::debug!("found system type: '{system}'");
            system
        }
    };

    let registry = Registry::new();
    let mut backend = registry.resolve(&system, &search_paths(&args.paths))?;

    let info = backend
        .coreinfo()
        .map_err(|source| MsrflowError::Backend {
            module: backend.name().to_string(),
            source,
        })?;
    tracing::debug!(
        "found {} cores with max id {}",
        info.num_cores,
        info.max_id
    );

    if !info.is_contiguous() {
        return Err(MsrflowError::DisjointCores {
            module: backend.name().to_string(),
            num_cores: info.num_cores,
            max_id: info.max_id,
        });
    }

    let cores = select_cores(&args.cores, info.num_cores)?;

    let mut commands = Vec::with_capacity(args.commands.len());
    for input in &args.commands {
        commands.push(
            parse_command(input).map_err(|err| MsrflowError::CommandSyntax {
                input: input.clone(),
                offset: err.offset,
            })?,
        );
    }

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let engine_result = tokio::task::spawn_blocking(move || {
        let engine = Engine::new(&SystemClock, cancel);
        let mut out = io::stdout();
        let result = engine.run(&mut backend, &commands, &cores, &mut out);
        backend.unbind();
        result
    })
    .await
    .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

    engine_result?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .init();

    if let Err(err) = run(args).await {
        eprintln!("msrflow: {err}");
        eprintln!("please type 'msrflow --help' for more information");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
