#![forbid(unsafe_code)]

use std::path::PathBuf;

use pl_conformance::{HarnessConfig, run_fixture_suite, write_report};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut fixture_root: Option<PathBuf> = None;
    let mut report_out: Option<PathBuf> = None;
    let mut strict = true;
    let mut require_green = false;

    let mut args = std::env::args().skip(1).peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fixture-root" => {
                let value = args.next().ok_or("--fixture-root requires a directory")?;
                fixture_root = Some(PathBuf::from(value));
            }
            "--report-out" => {
                let value = args.next().ok_or("--report-out requires a file path")?;
                report_out = Some(PathBuf::from(value));
            }
            "--no-rerun" => {
                strict = false;
            }
            "--require-green" => {
                require_green = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    let mut config = HarnessConfig::default_paths();
    config.strict_mode = strict;
    if let Some(root) = fixture_root {
        config = config.with_fixture_root(root);
    }

    let report = run_fixture_suite(&config)?;
    for result in &report.results {
        println!(
            "case={} mode={:?} verdict={} status={:?}",
            result.case_id, result.mode, result.verdict, result.status
        );
    }
    println!(
        "suite={} fixtures={} passed={} failed={} green={}",
        report.suite,
        report.fixture_count,
        report.passed,
        report.failed,
        report.is_green()
    );

    if let Some(path) = report_out {
        let artifact = write_report(&path, &report)?;
        println!("wrote report={} sha256={}", path.display(), artifact.sha256);
    }

    if require_green && !report.is_green() {
        for failure in report.failures() {
            eprintln!("{failure}");
        }
        return Err(format!("{} scenario(s) failed", report.failed).into());
    }

    Ok(())
}

fn print_help() {
    println!(
        "pl-conformance-cli\n\
         Usage:\n\
         \tpl-conformance-cli [--fixture-root DIR] [--report-out FILE] [--no-rerun] [--require-green]\n\
         Options:\n\
         \t--fixture-root <dir>  Load scenario fixtures from <dir> instead of the bundled set\n\
         \t--report-out <file>   Write the suite report as YAML\n\
         \t--no-rerun            Skip the repeat run that checks verdict and hash stability\n\
         \t--require-green       Fail with non-zero exit when any scenario mismatches\n\
         \t-h, --help            Show this help"
    );
}
