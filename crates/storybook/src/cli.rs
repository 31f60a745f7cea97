use std::path::PathBuf;

use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOptions {
    pub config_path: PathBuf,
    pub output_dir: Option<PathBuf>,
    pub max_attempts: Option<u32>,
    pub skip_images: bool,
    pub skip_audio: bool,
    pub skip_document: bool,
    pub print_prompt: bool,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("unknown argument: {0}")]
    UnknownArgument(String),
    #[error("missing value for argument: {0}")]
    MissingValue(String),
    #[error("invalid --max-attempts value: {0}")]
    InvalidMaxAttempts(String),
    #[error("help requested")]
    HelpRequested,
}

impl CliOptions {
    pub fn parse<I>(args: I) -> Result<Self, CliError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut options = Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            output_dir: None,
            max_attempts: None,
            skip_images: false,
            skip_audio: false,
            skip_document: false,
            print_prompt: false,
        };

        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--help" | "-h" => return Err(CliError::HelpRequested),
                "--config" | "-c" => {
                    let value = iter.next().ok_or(CliError::MissingValue(arg.clone()))?;
                    options.config_path = PathBuf::from(value);
                }
                "--output-dir" | "-o" => {
                    let value = iter.next().ok_or(CliError::MissingValue(arg.clone()))?;
                    options.output_dir = Some(PathBuf::from(value));
                }
                "--max-attempts" => {
                    let value = iter.next().ok_or(CliError::MissingValue(arg.clone()))?;
                    options.max_attempts = Some(parse_max_attempts(&value)?);
                }
                "--skip-images" => options.skip_images = true,
                "--skip-audio" => options.skip_audio = true,
                "--skip-document" => options.skip_document = true,
                "--print-prompt" => options.print_prompt = true,
                unknown => return Err(CliError::UnknownArgument(unknown.to_string())),
            }
        }

        Ok(options)
    }
}

fn parse_max_attempts(value: &str) -> Result<u32, CliError> {
    match value.trim().parse::<u32>() {
        Ok(attempts) if attempts > 0 => Ok(attempts),
        _ => Err(CliError::InvalidMaxAttempts(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{CliError, CliOptions};

    fn parse(args: &[&str]) -> Result<CliOptions, CliError> {
        CliOptions::parse(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn defaults_without_arguments() {
        let options = parse(&[]).expect("empty args should parse");
        assert_eq!(options.config_path, PathBuf::from("config.yaml"));
        assert_eq!(options.output_dir, None);
        assert_eq!(options.max_attempts, None);
        assert!(!options.skip_images && !options.skip_audio && !options.skip_document);
    }

    #[test]
    fn parses_every_flag() {
        let options = parse(&[
            "--config",
            "stories/bear.yaml",
            "--output-dir",
            "out",
            "--max-attempts",
            "5",
            "--skip-images",
            "--skip-audio",
            "--skip-document",
            "--print-prompt",
        ])
        .expect("flags should parse");

        assert_eq!(options.config_path, PathBuf::from("stories/bear.yaml"));
        assert_eq!(options.output_dir, Some(PathBuf::from("out")));
        assert_eq!(options.max_attempts, Some(5));
        assert!(options.skip_images && options.skip_audio && options.skip_document);
        assert!(options.print_prompt);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(parse(&["--help"]), Err(CliError::HelpRequested)));
        assert!(matches!(parse(&["--config"]), Err(CliError::MissingValue(_))));
        assert!(matches!(
            parse(&["--max-attempts", "0"]),
            Err(CliError::InvalidMaxAttempts(_))
        ));
        assert!(matches!(
            parse(&["--max-attempts", "three"]),
            Err(CliError::InvalidMaxAttempts(_))
        ));
        assert!(matches!(parse(&["--verbose"]), Err(CliError::UnknownArgument(_))));
    }
}
