use clap::Parser;
use monoflat::{
    cli::{AnsiStyles, MonoflatArgs},
    utils, Flattener, MonoflatResult,
};
use tracing_subscriber::{fmt, EnvFilter};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> MonoflatResult<()> {
    utils::load_env_file();

    // Parse command line arguments
    let args = MonoflatArgs::parse();

    // Initialize tracing subscriber with EnvFilter
    let default_level = if args.verbose { "debug" } else { "info" };
    fmt()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    println!(
        "{}",
        format!(
            "===> Flattening image: {} into tag: {}",
            args.image, args.tag
        )
        .progress()
    );

    let config = args.to_config();
    tracing::trace!("config: {config:?}");

    let result = match Flattener::from_config(&config) {
        Ok(flattener) => flattener.flatten(config.image(), config.tag()).await,
        Err(e) => Err(e),
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(stage) = e.stage() {
                eprintln!("{}", format!("===> Failed at stage: {}", stage).failure());
            }
            return Err(e);
        }
    };

    if let Some(context_dir) = outcome.context_dir() {
        println!(
            "build context: {}",
            context_dir.display().to_string().path()
        );
    }

    println!("{}", "===> Finished".progress());

    Ok(())
}
