use clap::{Parser, Subcommand};

mod build;
mod ncz;

#[derive(Parser)]
#[clap(version = "0.1.0")]
struct Opts {
    #[clap(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    Build(build::Opts),
    Ncz(ncz::Opts),
}

fn main() {
    tracing_subscriber::fmt::init();

    let opts = Opts::parse();

    let result = match opts.action {
        Action::Build(opts) => build::main(opts),
        Action::Ncz(opts) => ncz::main(opts),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        eprintln!("Caused by:");
        let mut source = std::error::Error::source(&*e);
        while let Some(cause) = source {
            eprintln!(" - {cause}");
            source = cause.source();
        }
        std::process::exit(1);
    }
}
