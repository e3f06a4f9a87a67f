//! Command lines for the external tools.
//!
//! Every stage gets its arguments from the same builder: the tool's global
//! arguments derived from configuration come first, then the stage's own
//! input and output arguments, then any configured extra arguments.

use crate::config::Config;
use planet_dumper_common::StageKind;
use planet_dumper_exec::Invocation;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq)]
struct ToolSpec {
    executable: String,
    global_args: Vec<String>,
    extra_args: Vec<String>,
    verbose: bool,
}

/// Builds [`Invocation`]s for the primary dump, conversion and info tools.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandBuilder {
    primary: ToolSpec,
    conversion: ToolSpec,
    info: ToolSpec,
}

impl CommandBuilder {
    pub fn from_config(config: &Config) -> Self {
        let mut primary_args = vec![format!("--format={}", config.pg_dump.format)];
        if config.pg_dump.verbose {
            primary_args.push("--verbose".to_string());
        }
        if config.postgres.enable_ssl_auth {
            let paths = &config.postgres.ssl_paths;
            let conninfo: Vec<String> = [
                ("sslcert", &paths.cert),
                ("sslkey", &paths.key),
                ("sslrootcert", &paths.ca),
            ]
            .into_iter()
            .filter_map(|(name, path)| path.as_ref().map(|p| format!("{name}={}", p.display())))
            .collect();
            if !conninfo.is_empty() {
                primary_args.push(format!("--dbname={}", conninfo.join(" ")));
            }
        }

        Self {
            primary: ToolSpec {
                executable: config.pg_dump.executable.clone(),
                global_args: primary_args,
                extra_args: config.pg_dump.extra_args.clone(),
                verbose: config.pg_dump.verbose,
            },
            conversion: ToolSpec {
                executable: config.planet_dump_ng.executable.clone(),
                global_args: Vec::new(),
                extra_args: config.planet_dump_ng.extra_args.clone(),
                verbose: config.planet_dump_ng.verbose,
            },
            info: ToolSpec {
                executable: config.info.executable.clone(),
                ..ToolSpec::default()
            },
        }
    }

    fn spec(&self, kind: StageKind) -> &ToolSpec {
        match kind {
            StageKind::PrimaryDump => &self.primary,
            StageKind::Conversion => &self.conversion,
            StageKind::Info => &self.info,
        }
    }

    pub fn executable(&self, kind: StageKind) -> &str {
        &self.spec(kind).executable
    }

    /// Global arguments, then `stage_args`, then configured extras.
    pub fn build<I, S>(&self, kind: StageKind, stage_args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = self.spec(kind);
        Invocation::new(&spec.executable)
            .args(spec.global_args.iter().cloned())
            .args(stage_args)
            .args(spec.extra_args.iter().cloned())
            .log_stdout(spec.verbose)
    }

    pub fn primary_dump(&self, output: &Path) -> Invocation {
        self.build(StageKind::PrimaryDump, [format!("--file={}", output.display())])
    }

    /// The conversion tool runs inside the directory it writes to so that its
    /// intermediate files survive for a resumed run.
    pub fn conversion(&self, input: &Path, output: &Path, resume: bool) -> Invocation {
        let mut args = vec![
            format!("--dump-file={}", input.display()),
            format!("--pbf={}", output.display()),
        ];
        if resume {
            args.push("--resume".to_string());
        }

        let invocation = self.build(StageKind::Conversion, args);
        match output.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => invocation.current_dir(dir),
            _ => invocation,
        }
    }

    pub fn info(&self, artifact: &Path) -> Invocation {
        let mut invocation = self.build(
            StageKind::Info,
            ["--extended".to_string(), "--json".to_string(), artifact.display().to_string()],
        );
        invocation.command = Some("fileinfo".to_string());
        invocation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_primary_dump() {
        let builder = CommandBuilder::from_config(&Config::default());
        let invocation = builder.primary_dump(Path::new("/work/42/pg/42.dmp"));

        assert_eq!(invocation.executable, "pg_dump");
        assert_eq!(invocation.argv(), vec!["--format=custom", "--file=/work/42/pg/42.dmp"]);
        assert!(!invocation.log_stdout);
    }

    #[test]
    fn test_verbose_and_ssl_flags() {
        let mut config = Config::default();
        config.pg_dump.verbose = true;
        config.pg_dump.extra_args = vec!["--no-owner".to_string()];
        config.postgres.enable_ssl_auth = true;
        config.postgres.ssl_paths.cert = Some(PathBuf::from("/certs/client.crt"));
        config.postgres.ssl_paths.key = Some(PathBuf::from("/certs/client.key"));
        config.postgres.ssl_paths.ca = Some(PathBuf::from("/certs/ca.crt"));

        let builder = CommandBuilder::from_config(&config);
        let invocation = builder.primary_dump(Path::new("/out.dmp"));

        assert_eq!(
            invocation.argv(),
            vec![
                "--format=custom",
                "--verbose",
                "--dbname=sslcert=/certs/client.crt sslkey=/certs/client.key \
                 sslrootcert=/certs/ca.crt",
                "--file=/out.dmp",
                "--no-owner",
            ]
        );
        assert!(invocation.log_stdout);
    }

    #[test]
    fn test_conversion_runs_in_output_dir() {
        let builder = CommandBuilder::from_config(&Config::default());
        let invocation = builder.conversion(
            Path::new("/work/42/pg/42.dmp"),
            Path::new("/work/42/ng/42.pbf"),
            false,
        );

        assert_eq!(invocation.executable, "planet-dump-ng");
        assert_eq!(
            invocation.argv(),
            vec!["--dump-file=/work/42/pg/42.dmp", "--pbf=/work/42/ng/42.pbf"]
        );
        assert_eq!(invocation.current_dir, Some(PathBuf::from("/work/42/ng")));

        let resumed = builder.conversion(Path::new("/in.dmp"), Path::new("/ng/out.pbf"), true);
        assert_eq!(resumed.argv().last().map(String::as_str), Some("--resume"));
    }

    #[test]
    fn test_info_uses_fileinfo_command() {
        let builder = CommandBuilder::from_config(&Config::default());
        let invocation = builder.info(Path::new("/work/42/ng/42.pbf"));

        assert_eq!(invocation.executable, "osmium");
        assert_eq!(
            invocation.argv(),
            vec!["fileinfo", "--extended", "--json", "/work/42/ng/42.pbf"]
        );
        assert_eq!(builder.executable(StageKind::Info), "osmium");
    }
}
