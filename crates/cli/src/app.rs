use {
    crate::{args, build_info, cmd_serve, cmd_test},
    anyhow::{Context, Result},
    clap::{Parser as ClapParser, Subcommand as ClapSubcommand},
    std::process::exit,
    tokio::runtime::Runtime,
    tracing::error,
};

// The application itself.
#[derive(ClapParser)]
#[command(version = build_info::version(), about, long_about = None)]
struct App {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    args: args::Global,
}

#[derive(ClapSubcommand)]
pub enum Command {
    /// Serves the public IP on /ip (JSON) and /metrics (Prometheus)
    Serve(cmd_serve::Args),
    /// Resolves the public IP once and prints it
    Test(cmd_test::Args),
}

// Implemented by the options type of every CLI command:
// [setup] validates and completes the options, [run] executes the command.
pub trait Executable: Sized {
    fn setup(self) -> Result<Self>;
    async fn run(self, global: args::Global) -> Result<()>;
}

// ========================================================================== //

impl App {
    fn setup(self) -> Result<Self> {
        self.setup_logging()?;
        Ok(self)
    }

    fn setup_logging(&self) -> Result<()> {
        const LTF_KITCHEN: &str =
            "[hour padding:none repr:12]:[minute padding:zero]:[second padding:zero] [period case:upper]";

        let parsed_time_format = time::format_description::parse(LTF_KITCHEN)
            .with_context(|| "BUG: Cannot parse static time format")?;

        // The local offset cannot always be determined (e.g. in minimal containers).
        let traces_timer = tracing_subscriber::fmt::time::OffsetTime::new(
            time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC),
            parsed_time_format,
        );

        let max_log_level = match self.args.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        };

        tracing_subscriber::fmt()
            .compact()
            .with_timer(traces_timer)
            .with_ansi(true)
            .with_max_level(max_log_level)
            .init();

        Ok(())
    }
}

// ========================================================================== //

// Parses CLI and ENV parameters, initializes logging
// and executes the requested command on a fresh Tokio runtime.
fn exec_wrapped() -> Result<()> {
    let app = App::parse().setup()?;
    let runtime = Runtime::new().with_context(|| "cannot start the Tokio runtime")?;

    runtime.block_on(async move {
        match app.command {
            Command::Serve(cmd_args) => cmd_args.setup()?.run(app.args).await,
            Command::Test(cmd_args) => cmd_args.setup()?.run(app.args).await,
        }
    })
}

pub fn exec() {
    if let Err(err) = exec_wrapped() {
        let err = format!("{}, because {}", err, err.root_cause());
        error!(err = err, "critical error");
        exit(1);
    }
}
