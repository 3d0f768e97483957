mod quantise;

use std::io::IsTerminal;

use structopt::clap::ErrorKind;
use tracing_subscriber::EnvFilter;

use quantise::SafeTensorsToolkit;

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    let options = match quantise::parse_args(std::env::args_os()) {
        Ok(options) => options,
        Err(err) if err.kind == ErrorKind::MissingRequiredArgument => {
            let program = std::env::args_os().next().map(|arg| arg.to_string_lossy().into_owned());
            println!("{}", quantise::usage(program.as_deref().unwrap_or("quantise")));
            std::process::exit(1);
        }
        Err(err) => err.exit(),
    };

    let toolkit = SafeTensorsToolkit::new(options.settings());
    options.run(&toolkit)
}
