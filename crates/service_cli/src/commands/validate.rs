//! Validate command implementation
//!
//! Validates effect logs recorded elsewhere. The file holds either a single
//! `EffectLog` or an array of them, one per pass.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use rngtrace_compile::effect::EffectLog;
use rngtrace_compile::validator::{ConsistencyValidator, ValidationReport, Verdict};

use super::OutputFormat;
use crate::config::CliConfig;
use crate::{CliError, Result};

#[derive(Deserialize)]
#[serde(untagged)]
enum LogFile {
    Passes(Vec<EffectLog>),
    Single(EffectLog),
}

/// Reads and sanity-checks the passes stored at `path`
pub fn load_passes(path: &Path) -> Result<Vec<EffectLog>> {
    if !path.exists() {
        return Err(CliError::FileNotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    let file: LogFile = serde_json::from_str(&content)?;
    let passes = match file {
        LogFile::Passes(passes) => passes,
        LogFile::Single(log) => vec![log],
    };

    if passes.is_empty() {
        return Err(CliError::EffectLog("no passes in file".to_string()));
    }
    if let Some(pass) = passes.iter().position(|log| !log.is_well_ordered()) {
        return Err(CliError::EffectLog(format!(
            "pass {pass}: effect indices are not 0, 1, 2, ..."
        )));
    }
    Ok(passes)
}

/// Validates `passes` under `config`
pub fn validate_passes(passes: &[EffectLog], config: &CliConfig) -> ValidationReport {
    let refs: Vec<&EffectLog> = passes.iter().collect();
    ConsistencyValidator::new(config.compiler.validator).report_passes(&refs)
}

#[derive(Serialize)]
struct ReportView<'a> {
    supported: bool,
    pattern: Option<String>,
    final_phase: rngtrace_compile::validator::Phase,
    effects_scanned: usize,
    brackets_closed: usize,
    passes: usize,
    reuse: &'a str,
}

/// Run the validate command
pub fn run(path: &Path, config: &CliConfig, format: OutputFormat) -> Result<()> {
    let passes = load_passes(path)?;
    info!(path = %path.display(), passes = passes.len(), "validating effect log");
    let report = validate_passes(&passes, config);

    let reuse = config.compiler.validator.reuse.to_string();
    match format {
        OutputFormat::Json => {
            let view = ReportView {
                supported: report.verdict.is_supported(),
                pattern: match &report.verdict {
                    Verdict::Supported => None,
                    Verdict::Unsupported(p) => Some(p.to_string()),
                },
                final_phase: report.final_phase,
                effects_scanned: report.effects_scanned,
                brackets_closed: report.brackets_closed,
                passes: passes.len(),
                reuse: &reuse,
            };
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        OutputFormat::Table => {
            println!("passes:          {}", passes.len());
            println!("reuse:           {reuse}");
            println!("effects scanned: {}", report.effects_scanned);
            println!("brackets closed: {}", report.brackets_closed);
            println!("final phase:     {}", report.final_phase);
            match &report.verdict {
                Verdict::Supported => println!("verdict:         supported"),
                Verdict::Unsupported(p) => println!("verdict:         unsupported ({})", p.kind()),
            }
        }
    }

    report.verdict.into_result()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rngtrace_compile::config::{ArtifactReuse, ValidatorConfig};
    use rngtrace_compile::effect::{ReadId, SnapshotOrigin, StateEffect};
    use rngtrace_compile::error::PatternKind;
    use rngtrace_core::GeneratorStateSnapshot;
    use std::io::Write;

    fn restore_log() -> EffectLog {
        let entry = GeneratorStateSnapshot::new(16, 0);
        let mut log = EffectLog::new(entry);
        log.push(StateEffect::Read {
            id: ReadId(0),
            snapshot: entry,
        });
        log.push(StateEffect::Draw { consumed: 8 });
        log.push(StateEffect::Write {
            snapshot: entry,
            origin: SnapshotOrigin::Traced { read: ReadId(0) },
        });
        log
    }

    fn literal_log() -> EffectLog {
        let mut log = EffectLog::new(GeneratorStateSnapshot::new(3, 0));
        log.push(StateEffect::Write {
            snapshot: GeneratorStateSnapshot::new(16, 0),
            origin: SnapshotOrigin::External,
        });
        log
    }

    fn write_json(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_single_log() {
        let file = write_json(&serde_json::to_string(&restore_log()).unwrap());
        let passes = load_passes(file.path()).unwrap();
        assert_eq!(passes, vec![restore_log()]);
    }

    #[test]
    fn test_load_pass_array() {
        let json = serde_json::to_string(&vec![restore_log(), literal_log()]).unwrap();
        let file = write_json(&json);
        assert_eq!(load_passes(file.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_load_rejects_misnumbered_effects() {
        let json = r#"{
            "entry": { "seed": 1, "offset": 0 },
            "effects": [ { "index": 3, "effect": "draw", "consumed": 8 } ]
        }"#;
        let file = write_json(json);
        assert!(matches!(
            load_passes(file.path()),
            Err(CliError::EffectLog(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            load_passes(Path::new("/nonexistent/log.json")),
            Err(CliError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_literal_restore_depends_on_reuse() {
        let reusable = CliConfig::default();
        let report = validate_passes(&[literal_log()], &reusable);
        match report.verdict {
            Verdict::Unsupported(p) => assert_eq!(p.kind(), PatternKind::StaleRestoreTarget),
            Verdict::Supported => panic!("literal restore accepted for reusable artifact"),
        }

        let mut single_use = CliConfig::default();
        single_use.compiler.validator =
            ValidatorConfig::default().with_reuse(ArtifactReuse::SingleUse);
        assert!(validate_passes(&[literal_log()], &single_use)
            .verdict
            .is_supported());
        assert!(!validate_passes(&[restore_log(), literal_log()], &single_use)
            .verdict
            .is_supported());
    }

    #[test]
    fn test_run_returns_rejection_as_error() {
        let file = write_json(&serde_json::to_string(&literal_log()).unwrap());
        let err = run(file.path(), &CliConfig::default(), OutputFormat::Json).unwrap_err();
        assert!(matches!(err, CliError::Rejected(_)));
    }
}
