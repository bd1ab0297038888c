use clap::Parser;
use log::{error, info};
use simple_logger::init_with_level;

use cgctask::{
    cli::{Args, SubArgs},
    config::Config,
    core::{create, run, status},
};

fn main() {
    let start = std::time::Instant::now();
    let args: Args = Args::parse();

    init_with_level(args.level()).unwrap_or_else(|e| {
        eprintln!("ERROR: could not initialize logger: {}", e);
        std::process::exit(1);
    });

    let mut config = Config::read(args.command.config()).unwrap_or_else(|e| {
        error!("{}", e);
        std::process::exit(1);
    });

    let result = match &args.command {
        SubArgs::Create { args } => config
            .aware(args)
            .map_err(Into::into)
            .and_then(|config| create(config, args.dry_run).map(|_| ())),
        SubArgs::Run { .. } => run(&config, &args.manager).map(|_| ()),
        SubArgs::Status { .. } => status(&config).map(|_| ()),
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }

    let elapsed = start.elapsed();
    info!("Elapsed time: {:.3?}", elapsed);
}
