use std::{fs, process::ExitCode};

use ortho_config::OrthoConfig;
use sketch_iq::{SketchService, cli::SketchArgs, telemetry::init_tracing};
use tracing::error;

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = SketchArgs::load()?;
    let service = SketchService::open(args.service_config())?;
    let Some(image_path) = &args.image else {
        // Nothing to classify: opening the service validated the snapshot.
        return Ok(());
    };
    let bytes = fs::read(image_path)?;

    let prediction = service.predict(&bytes)?;
    println!("{}", serde_json::to_string(&prediction)?);

    if let Some(label) = &args.label {
        let stored = service.submit_feedback(&bytes, label)?;
        println!("{}", serde_json::json!({ "status": "stored", "id": stored.id }));
        if args.fine_tune {
            let report = service.fine_tune(&bytes, label)?;
            println!(
                "{}",
                serde_json::json!({
                    "status": "fine_tuned",
                    "steps": report.steps,
                    "final_loss": report.final_loss,
                    "sha256": report.snapshot_sha256,
                })
            );
        }
    } else if args.fine_tune {
        return Err("--fine-tune requires --label".into());
    }
    Ok(())
}
