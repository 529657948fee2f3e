use env_logger::Builder;
use log::{error, info, LevelFilter};
use std::error::Error;
use std::io::Write;
use tickwatch::app::App;
use tickwatch::config::Config;
use tickwatch::ui::dashboard::Dashboard;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // Logs go to stderr so they stay out of the TUI; RUST_LOG overrides
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("tickwatch", LevelFilter::Debug)
        .parse_default_env()
        .format(|buf, record| {
            let ts = chrono::Local::now().format("%H:%M:%S%.3f");
            writeln!(
                buf,
                "[{} {:<5} {}] {}",
                ts,
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .write_style(env_logger::WriteStyle::Always)
        .init();

    info!("Starting Tickwatch...");

    let config = Config::from_env();
    info!("Watchlist: {}", config.watchlist.join(", "));

    let app = App::from_config(&config)?;
    let snapshots = app.snapshots();
    let (command_tx, command_rx) = mpsc::channel(config.channel_buffer_size);

    let app_handle = tokio::spawn(async move {
        if let Err(e) = app.run(command_rx).await {
            error!("App error: {}", e);
        }
    });

    let dashboard = Dashboard::new(snapshots, command_tx);
    match tokio::task::spawn_blocking(move || dashboard.run()).await {
        Ok(Err(e)) => error!("Dashboard error: {}", e),
        Err(e) => error!("Dashboard task failed: {}", e),
        Ok(Ok(())) => {}
    }

    // Dropping the dashboard closed the command channel; the app closes the feed and exits
    if let Err(e) = app_handle.await {
        error!("App task failed: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}
