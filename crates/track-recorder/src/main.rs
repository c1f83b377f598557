use std::process::ExitCode;
use track_recorder::{Settings, logging, run};

#[tokio::main]
async fn main() -> ExitCode {
    logging::setup_logging();
    let settings = Settings::from_cli();

    match run(&settings).await {
        Ok(summary) => {
            println!(
                "Recorded {} points over {:.2} km ({} samples replayed)",
                summary.track.points.len(),
                summary.track.distance_km(),
                summary.delivered
            );
            for path in &summary.exported {
                println!("  wrote {}", path.display());
            }
            if let Some(report) = summary.synced {
                println!("  synced {} drafts ({} failed)", report.synced, report.failed);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
