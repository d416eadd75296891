mod cli;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(path) = args.get(1) else {
        eprintln!("Usage: {} <audio file> [--streaming]", args[0]);
        std::process::exit(2);
    };
    let streaming = args.iter().any(|arg| arg == "--streaming");

    log::info!("=== Orbiting source ===");
    cli::run_orbit(path, streaming)?;

    log::info!("=== Voice preemption ===");
    cli::run_preemption(path)?;
    Ok(())
}
