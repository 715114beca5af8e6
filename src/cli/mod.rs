//! cli
//!
//! The Command-line Parser (C5): three mode grammars layered on one flag
//! set (see [`args`]), plus the help text split required by §4.5 (`-h`
//! short usage vs `-H` full reference).

pub mod args;

pub use args::{CliError, ParsedArgs, RawArgs, ResolvedFlags};

use clap::Parser as _;

/// Outcome of parsing argv before any config/engine work begins.
pub enum Invocation {
    Run(ParsedArgs),
    ShortHelp(String),
    FullHelp(String),
}

/// Parse the process's argv into an [`Invocation`].
///
/// `-h`/`-H` are intercepted before grammar resolution since they're valid
/// in combination with any mode.
pub fn parse<I, T>(argv: I) -> Result<Invocation, CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let raw = RawArgs::parse_from(argv);
    if raw.full_help {
        return Ok(Invocation::FullHelp(full_help_text()));
    }
    if raw.help {
        return Ok(Invocation::ShortHelp(short_help_text()));
    }
    args::resolve(raw).map(Invocation::Run)
}

fn short_help_text() -> String {
    "usage: am-patch ISSUE_ID MESSAGE [PATCH_PATH]\n   or: am-patch -f MESSAGE\n   or: am-patch --finalize-workspace ISSUE_ID\n   or: am-patch -l [ISSUE_ID]\n   or: am-patch --show-config\n\nrun `am-patch -H` for the full flag reference.".to_string()
}

fn full_help_text() -> String {
    let mut lines = vec![short_help_text(), String::new(), "flags:".to_string()];
    lines.extend(
        [
            "  -u, --unified-patch           force unified-diff classification of the patch input",
            "      --allow-non-main          permit running from a non-default branch",
            "      --allow-no-op             don't fail when a patch makes no change",
            "      --allow-outside-files     don't fail when a patch touches undeclared files",
            "      --allow-untouched-files   don't fail when a declared file is never touched",
            "      --allow-gates-fail        promote even if a gate fails",
            "      --run-all-gates           keep running every gate after one fails",
            "      --skip-compile            skip the compile gate",
            "      --skip-ruff               skip the lint/format gate",
            "      --skip-pytest             skip the test gate",
            "      --skip-mypy               skip the typecheck gate",
            "      --gates-order LIST        comma-separated gate order override",
            "      --verbosity LEVEL         screen level: quiet|normal|warning|verbose|debug",
            "      --log-level LEVEL         file-sink level: quiet|normal|warning|verbose|debug",
            "      --config PATH             path to the TOML config file",
            "      --show-config             print the resolved configuration and exit",
            "      --override KEY=VALUE      repeatable arbitrary policy override",
            "      --test-mode               apply + gate in the workspace, then stop",
            "      --update-workspace        refresh the workspace before patching",
            "  -l, --rerun-latest            re-run the most recently seen patch input",
        ]
        .map(String::from),
    );
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_flag_short_circuits() {
        let result = parse(["am-patch", "-h"]).unwrap();
        assert!(matches!(result, Invocation::ShortHelp(_)));
    }

    #[test]
    fn full_help_flag_short_circuits() {
        let result = parse(["am-patch", "-H"]).unwrap();
        assert!(matches!(result, Invocation::FullHelp(_)));
    }

    #[test]
    fn normal_invocation_runs() {
        let result = parse(["am-patch", "42", "fix it"]).unwrap();
        assert!(matches!(result, Invocation::Run(_)));
    }
}
