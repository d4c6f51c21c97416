//! Config subcommand handlers.

use geolayer_config::{Config, save_config_to};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::config;
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => {
            let cfg = config::apply_overrides(config::load(global)?, global);
            // Validate so a broken file is reported here, not on first load.
            cfg.to_pipeline_config()?;
            let rendered = match global.output {
                OutputFormat::Table | OutputFormat::Plain => toml::to_string_pretty(&cfg)
                    .map_err(|e| CliError::Internal(format!("TOML output: {e}")))?,
                structured => output::render_structured(structured, &cfg)?,
            };
            output::print_output(rendered.trim_end(), global.quiet);
            Ok(())
        }
        ConfigCommand::Init { force } => {
            let path = config::effective_path(global);
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            save_config_to(&Config::default(), &path)?;
            if !global.quiet {
                eprintln!("Wrote {}", path.display());
            }
            Ok(())
        }
        ConfigCommand::Path => {
            output::print_output(&config::effective_path(global).display().to_string(), global.quiet);
            Ok(())
        }
    }
}
