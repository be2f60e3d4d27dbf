use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "warden",
    version,
    about = "Run scripts against a capability-scoped execution core"
)]
pub struct CliArgs {
    /// Script files to load, in order, at the trusted tier
    #[arg(long = "file", short = 'f')]
    pub files: Vec<PathBuf>,
    /// Inline text to evaluate after the files
    #[arg(long = "eval", short = 'e')]
    pub evals: Vec<String>,
    /// TOML configuration file
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,
    /// Exit after running files and evals
    #[arg(long)]
    pub exit: bool,
    /// Never start the read-eval-print loop
    #[arg(long)]
    pub non_interactive: bool,
}

impl CliArgs {
    pub fn wants_repl(&self) -> bool {
        !(self.exit || self.non_interactive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_flags_accumulate_in_order() {
        let args = CliArgs::parse_from(["warden", "-f", "a.ws", "--eval", "1", "--file", "b.ws", "-e", "2", "--exit"]);
        assert_eq!(args.files, vec![PathBuf::from("a.ws"), PathBuf::from("b.ws")]);
        assert_eq!(args.evals, vec!["1".to_string(), "2".to_string()]);
        assert!(!args.wants_repl());
    }

    #[test]
    fn repl_is_the_default() {
        let args = CliArgs::parse_from(["warden"]);
        assert!(args.wants_repl());
        assert!(args.config.is_none());
    }
}
