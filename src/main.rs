use clap::Parser;

use linprobe::cli::Cli;
use linprobe::encoder;
use linprobe::logging::init_tracing;
use linprobe::{EvalState, build_standard_pipeline};

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    init_tracing(args.verbose)?;
    let verbose = args.verbose;

    let config = args.into_config()?;
    let device = encoder::device(config.cpu)?;

    let pipeline = build_standard_pipeline(&config)
        .with_verbose(verbose)
        .with_device(device)
        .with_output_dir(config.output.dir.clone())?;

    let state = pipeline.run(EvalState::new(config.seed))?;

    if let Some(splits) = &state.splits {
        println!("\n=== Dataset ===");
        println!(
            "train: {}  validation: {}  test: {}",
            splits.train.len(),
            splits.validation.len(),
            splits.test.len()
        );
    }

    for entry in state.depth_reports.values() {
        println!("\n=== {} ({}) ===", entry.depth, entry.depth.description());
        if let Some(best) = entry.history.best() {
            println!(
                "best epoch {} of {}: val_loss {:.4}, val_accuracy {:.4}",
                best.epoch,
                entry.history.epochs.len(),
                best.val_loss,
                best.val_accuracy
            );
        }
        if let Some(test) = &entry.test {
            println!("\n{}", test.report);
            println!("Confusion matrix:\n{}", test.confusion);
        }
    }

    println!("\nReport written to {}", config.output.dir.join(linprobe::evaluation::REPORT_FILE).display());
    if let Some(archive) = &config.output.archive {
        println!("Archive written to {}", archive.display());
    }

    Ok(())
}
