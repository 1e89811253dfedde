use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use monkeyoxide::driver::{load_plan, Driver};

#[derive(Parser)]
#[command(
    name = "monkey-driver",
    version,
    about = "Run a YAML test plan against a headless monkey browser child."
)]
struct Cli {
    /// Path to the browser child binary.
    #[arg(short, long)]
    monkey: PathBuf,

    /// Path to the YAML test plan.
    #[arg(short, long)]
    test: PathBuf,

    /// Wrapper command placed before the child's argv (e.g. "valgrind
    /// --leak-check=full"); split on whitespace. Repeatable.
    #[arg(short, long)]
    wrapper: Vec<String>,
}

cfg_if::cfg_if! {
    if #[cfg(feature = "async-std-runtime")] {
        fn block_on<F: std::future::Future>(fut: F) -> F::Output {
            async_std::task::block_on(fut)
        }
    } else if #[cfg(feature = "tokio-runtime")] {
        fn block_on<F: std::future::Future>(fut: F) -> F::Output {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("tokio runtime")
                .block_on(fut)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let plan = match load_plan(&cli.test) {
        Ok(plan) => plan,
        Err(err) => {
            tracing::error!("{err:#}");
            return ExitCode::FAILURE;
        }
    };

    let wrapper = cli
        .wrapper
        .iter()
        .flat_map(|arg| arg.split_whitespace().map(str::to_string))
        .collect();

    let mut driver = Driver::new(cli.monkey, wrapper);
    match block_on(driver.run(&plan)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("test failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}
