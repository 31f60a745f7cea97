mod cli;
mod pipeline;

use cli::{CliError, CliOptions};
use pipeline::run_pipeline;
use tracing::error;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "storybook=info,story_core=info".to_string()),
        )
        .init();

    let options = match CliOptions::parse(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(CliError::HelpRequested) => {
            print_usage();
            std::process::exit(0);
        }
        Err(err) => {
            eprintln!("error: {err}");
            eprintln!();
            print_usage();
            std::process::exit(2);
        }
    };

    match run_pipeline(&options).await {
        Ok(summary) => {
            summary.print();
            std::process::exit(summary.exit_code());
        }
        Err(err) => {
            error!("storybook run failed: {err}");
            println!("[FAIL] {err}");
            std::process::exit(err.exit_code());
        }
    }
}

fn print_usage() {
    eprintln!(
        "Usage: storybook [--config <path>] [--output-dir <dir>] [--max-attempts <n>]\n\
         \x20                [--skip-images] [--skip-audio] [--skip-document] [--print-prompt]\n\
         \n\
         Options:\n\
         - --config <path>      Story settings YAML (default: config.yaml)\n\
         - --output-dir <dir>   Root directory for generated books (default: books)\n\
         - --max-attempts <n>   Generation attempts before giving up (default: 3)\n\
         - --skip-images        Do not generate illustrations\n\
         - --skip-audio         Do not generate narration\n\
         - --skip-document      Do not assemble the HTML book\n\
         - --print-prompt       Print the generation prompt before running\n\
         - --help               Show this help text\n\
         \n\
         Exit codes: 0 ok, 1 a renderer failed, 2 configuration error,\n\
         3 prompt refused by content policy, 4 no safe story generated"
    );
}
