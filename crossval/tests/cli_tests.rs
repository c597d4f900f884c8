//! Command-line tests for the crossval binary crate.
//!
//! This test suite covers:
//! - Argument parsing, defaults and rejection of bad values
//! - `classify` and `sample` against a YAML snapshot
//! - A full `run` through wrapper scripts, then `cache` and `summarize`
//!   over its output
//! - Stability of `sample --json` across arbitrary seeds

#![allow(clippy::unwrap_used)]

use clap::Parser;
use crossval::{CacheCommand, Cli, Command, StratifyArg, execute};
use crossval_core::Platform;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const METADATA: &str = "\
indicators:
  CME_MRY0T4: {dataflows: CME}
  CME_MRM0: {dataflows: CME}
  CME_TMY0T4: {dataflows: CME}
  CME_SBR: {dataflows: CME}
  CME_ARR_10T19: {dataflows: CME}
  NT_ANT_HAZ_NE2: {dataflows: NUTRITION}
  NT_ANT_WHZ_NE2: {dataflows: NUTRITION}
  NT_BF_EXBF: {dataflows: NUTRITION}
  ED_CR_L1: {dataflows: EDUCATION}
  ED_ROFST_L2: {dataflows: EDUCATION}
  EDUCATION: {}
  GLOBAL_DATAFLOW: {}
";

fn parse(args: &[&str]) -> Cli {
    let mut argv = vec!["crossval"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}

fn write_metadata(dir: &Path) -> PathBuf {
    let path = dir.join("indicators.yaml");
    std::fs::write(&path, METADATA).unwrap();
    path
}

// =============================================================================
// Argument parsing
// =============================================================================

/// Test that `run` applies the documented defaults
#[test]
fn test_parse_run_defaults() {
    let cli = parse(&["run", "--metadata", "indicators.yaml"]);
    let Command::Run(args) = cli.command else {
        panic!("expected run");
    };

    assert_eq!(args.target_n, 30);
    assert_eq!(args.seed, 42);
    assert_eq!(args.platforms, Platform::ALL.to_vec());
    assert_eq!(args.output, PathBuf::from("crossval-output"));
    assert_eq!(args.max_cache_age, None);
    assert_eq!(args.stratify, StratifyArg::Prefix);
    assert!(!args.parallel);
    assert_eq!(cli.global.verbose, 0);
}

/// Test that platform lists keep their order and reject unknown names
#[test]
fn test_parse_platform_list() {
    let cli = parse(&["run", "-m", "m.yaml", "--platforms", "python,Stata"]);
    let Command::Run(args) = cli.command else {
        panic!("expected run");
    };
    assert_eq!(args.platforms, vec![Platform::Python, Platform::Stata]);

    let err = Cli::try_parse_from(["crossval", "run", "-m", "m.yaml", "--platforms", "stata,julia"]);
    assert!(err.is_err());
}

/// Test that global flags are accepted after the subcommand
#[test]
fn test_parse_global_flags_after_subcommand() {
    let cli = parse(&["cache", "clear", "--platform", "r", "-vv", "--cache-dir", "/tmp/cv"]);

    assert_eq!(cli.global.verbose, 2);
    assert_eq!(cli.global.cache_dir, Some(PathBuf::from("/tmp/cv")));
    let Command::Cache(args) = cli.command else {
        panic!("expected cache");
    };
    assert!(matches!(
        args.command,
        CacheCommand::Clear {
            indicator: None,
            platform: Some(Platform::R)
        }
    ));
}

/// Test that missing required arguments are rejected
#[test]
fn test_parse_missing_required_arguments() {
    assert!(Cli::try_parse_from(["crossval", "classify"]).is_err());
    assert!(Cli::try_parse_from(["crossval", "run"]).is_err());
    assert!(Cli::try_parse_from(["crossval", "summarize"]).is_err());
    assert!(Cli::try_parse_from(["crossval", "sample", "-m", "m.yaml", "--stratify", "topic"]).is_err());
}

// =============================================================================
// Offline commands
// =============================================================================

/// Test that classify prints one verdict per code
#[tokio::test]
async fn test_execute_classify() {
    let cli = parse(&["classify", "CME_MRY0T4", "NUTRITION", "NT_"]);
    let out = execute(&cli).await.unwrap();

    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("valid"));
    assert!(lines[1].ends_with("rejected: known invalid name"));
    assert!(lines[2].ends_with("rejected: missing code after prefix"));
}

/// Test that sample is reproducible and keeps every stratum
#[tokio::test]
async fn test_execute_sample_is_reproducible() {
    let dir = TempDir::new().unwrap();
    let metadata = write_metadata(dir.path());
    let metadata = metadata.to_str().unwrap();

    let args = ["sample", "-m", metadata, "-n", "3", "--seed", "7"];
    let first = execute(&parse(&args)).await.unwrap();
    let second = execute(&parse(&args)).await.unwrap();
    assert_eq!(first, second);

    assert!(first.starts_with("Pool: 12 loaded, 10 valid, 2 rejected"));
    assert!(first.contains("Strata: 3"));
    assert!(first.contains("Sample: 4 indicators (target 3, every stratum kept)"));
    assert_eq!(first.lines().filter(|l| l.starts_with("  ED_")).count(), 1);

    let json = execute(&parse(&["sample", "-m", metadata, "-n", "3", "--seed", "7", "--json"]))
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["codes"].as_array().unwrap().len(), 4);
    assert_eq!(value["allocations"][0]["stratum_prefix"], "CME");
    assert_eq!(value["pool"]["valid"], 10);
}

/// Test that dataflow stratification uses the metadata hint
#[tokio::test]
async fn test_execute_sample_by_dataflow() {
    let dir = TempDir::new().unwrap();
    let metadata = write_metadata(dir.path());

    let out = execute(&parse(&[
        "sample",
        "-m",
        metadata.to_str().unwrap(),
        "--stratify",
        "dataflow",
        "--json",
    ]))
    .await
    .unwrap();
    let value: serde_json::Value = serde_json::from_str(&out).unwrap();
    let strata: Vec<&str> = value["allocations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["stratum_prefix"].as_str().unwrap())
        .collect();
    assert_eq!(strata, vec!["CME", "EDUCATION", "NUTRITION"]);
}

/// Test that a missing metadata file is an error, not an empty report
#[tokio::test]
async fn test_execute_run_missing_metadata_fails() {
    let dir = TempDir::new().unwrap();
    let cache = dir.path().join("cache");
    let missing = dir.path().join("missing.yaml");

    let cli = parse(&[
        "run",
        "-m",
        missing.to_str().unwrap(),
        "--output",
        dir.path().join("out").to_str().unwrap(),
        "--cache-dir",
        cache.to_str().unwrap(),
    ]);
    let err = execute(&cli).await.unwrap_err();
    assert!(err.to_string().contains("Metadata source error"));
    assert!(!dir.path().join("out").exists());
}

/// Test that a broken configuration file is reported
#[tokio::test]
async fn test_execute_invalid_config_fails() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("crossval.toml");
    std::fs::write(&config, "[runner]\nmax_attempts = 0\n").unwrap();

    let cli = parse(&["--config", config.to_str().unwrap(), "classify", "CME_A"]);
    let err = execute(&cli).await.unwrap_err();
    assert!(err.to_string().contains("max_attempts"));
}

// =============================================================================
// Full run through wrapper scripts
// =============================================================================

#[cfg(unix)]
mod wrapper_run {
    use super::*;
    use crossval_core::report::read_report;
    use crossval_core::{DivergenceClass, FetchStatus};

    /// Writes a config whose platforms are `sh` scripts and returns its path.
    fn write_config(dir: &Path) -> PathBuf {
        let table = |rows: u32| {
            format!(
                "printf 'indicator,country_code,period,value\\n' > \"$2\"\n\
                 i=0\nwhile [ \"$i\" -lt {rows} ]; do printf '%s,C%d,2020,1\\n' \"$1\" \"$i\" >> \"$2\"; i=$((i + 1)); done\n"
            )
        };
        let scripts = [
            ("stata.sh", table(100)),
            ("r.sh", table(100)),
            (
                "python.sh",
                format!(
                    "case \"$1\" in\n  ED_*) echo 'No data found' >&2; exit 1;;\n  NT_*) exit 0;;\nesac\n{}",
                    table(105)
                ),
            ),
        ];
        for (name, body) in &scripts {
            std::fs::write(dir.join(name), body).unwrap();
        }

        let command = |name: &str| {
            format!(
                "program = \"sh\"\nargs = ['{}', \"{{indicator}}\", \"{{output}}\"]\n",
                dir.join(name).display()
            )
        };
        let toml = format!(
            "cache_dir = '{cache}'\nscratch_dir = '{scratch}'\n\n[runner]\ntimeout_secs = 10\nmax_attempts = 1\nretry_backoff_secs = 0\n\n\
             [platforms.stata]\n{stata}\n[platforms.r]\n{r}\n[platforms.python]\n{python}",
            cache = dir.join("cache").display(),
            scratch = dir.join("scratch").display(),
            stata = command("stata.sh"),
            r = command("r.sh"),
            python = command("python.sh"),
        );
        let path = dir.join("crossval.toml");
        std::fs::write(&path, toml).unwrap();
        path
    }

    /// Test a full run followed by cache inspection and summarize
    #[tokio::test]
    async fn test_run_writes_every_output_file() {
        let dir = TempDir::new().unwrap();
        let metadata = write_metadata(dir.path());
        let config = write_config(dir.path());
        let out_dir = dir.path().join("out");
        let config = config.to_str().unwrap();

        let cli = parse(&[
            "--config",
            config,
            "run",
            "-m",
            metadata.to_str().unwrap(),
            "-n",
            "10",
            "--seed",
            "1",
            "-o",
            out_dir.to_str().unwrap(),
        ]);
        let out = execute(&cli).await.unwrap();
        assert!(out.contains("Indicators tested: 10"));
        assert!(out.contains("Row divergence: 5 minor, 0 major, 0 critical"));
        assert!(out.contains("Failures: 5"));

        for file in ["report.json", "verdicts.jsonl", "summary.md", "failures.csv"] {
            assert!(out_dir.join(file).is_file(), "{file} missing");
        }

        let report = read_report(&out_dir.join("report.json")).await.unwrap();
        assert_eq!(report.summary.status_count(Platform::Python, FetchStatus::NotFound), 2);
        assert_eq!(report.summary.status_count(Platform::Python, FetchStatus::Failed), 3);
        assert_eq!(report.summary.divergence_count(DivergenceClass::Minor), 5);
        assert_eq!(report.summary.divergence_count(DivergenceClass::Match), 5);

        let verdict_lines = std::fs::read_to_string(out_dir.join("verdicts.jsonl")).unwrap();
        assert_eq!(verdict_lines.lines().count(), 10);
        let failures = std::fs::read_to_string(out_dir.join("failures.csv")).unwrap();
        assert_eq!(failures.lines().count(), 6);
        assert!(failures.contains("ED_CR_L1,python,not_found"));

        // Twenty successful fetches from Stata and R plus five from Python
        let stats = execute(&parse(&["--config", config, "cache", "stats"])).await.unwrap();
        assert!(stats.contains("Entries: 25"));
        assert!(stats.contains("  Python: 5"));

        let summary = execute(&parse(&[
            "summarize",
            "--report",
            out_dir.join("report.json").to_str().unwrap(),
        ]))
        .await
        .unwrap();
        let saved = std::fs::read_to_string(out_dir.join("summary.md")).unwrap();
        assert_eq!(summary.trim_end(), saved.trim_end());

        let cleared = execute(&parse(&["--config", config, "cache", "clear", "--platform", "stata"]))
            .await
            .unwrap();
        assert!(cleared.starts_with("Removed 10 cache entries"));
        let stats = execute(&parse(&["--config", config, "cache", "stats"])).await.unwrap();
        assert!(stats.contains("Entries: 15"));
    }

    /// Test that a second run is served from the cache
    #[tokio::test]
    async fn test_run_twice_reuses_cache() {
        let dir = TempDir::new().unwrap();
        let metadata = write_metadata(dir.path());
        let config = write_config(dir.path());
        let args = |out: &str| {
            parse(&[
                "--config",
                config.to_str().unwrap(),
                "run",
                "-m",
                metadata.to_str().unwrap(),
                "-n",
                "3",
                "--platforms",
                "stata,r",
                "--parallel",
                "-o",
                dir.path().join(out).to_str().unwrap(),
            ])
        };

        execute(&args("first")).await.unwrap();
        // Remove the wrappers; only the cache can answer now
        std::fs::remove_file(dir.path().join("stata.sh")).unwrap();
        std::fs::remove_file(dir.path().join("r.sh")).unwrap();
        execute(&args("second")).await.unwrap();

        let first = read_report(&dir.path().join("first/report.json")).await.unwrap();
        let second = read_report(&dir.path().join("second/report.json")).await.unwrap();
        assert_eq!(first.verdicts, second.verdicts);
        assert!(second.results.iter().all(|r| r.status == FetchStatus::Cached));
        assert!(second.failures.is_empty());
    }
}

// =============================================================================
// Sample properties
// =============================================================================

mod sample_properties {
    use super::*;
    use proptest::prelude::*;

    fn sample_json(metadata: &str, target_n: usize, seed: u64) -> serde_json::Value {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let target_n = target_n.to_string();
        let seed = seed.to_string();
        let cli = parse(&["sample", "-m", metadata, "-n", &target_n, "--seed", &seed, "--json"]);
        let out = runtime.block_on(execute(&cli)).unwrap();
        serde_json::from_str(&out).unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_sample_json_is_stable_for_any_seed(seed in any::<u64>(), target_n in 1usize..12) {
            let dir = TempDir::new().unwrap();
            let metadata = write_metadata(dir.path());
            let metadata = metadata.to_str().unwrap();

            let first = sample_json(metadata, target_n, seed);
            let second = sample_json(metadata, target_n, seed);
            prop_assert_eq!(&first, &second);

            let codes: Vec<&str> = first["codes"]
                .as_array()
                .unwrap()
                .iter()
                .map(|c| c.as_str().unwrap())
                .collect();
            let requested: u64 = first["allocations"]
                .as_array()
                .unwrap()
                .iter()
                .map(|a| a["requested_count"].as_u64().unwrap())
                .sum();
            prop_assert_eq!(codes.len() as u64, requested);
            prop_assert!(codes.len() <= 10);
            for prefix in ["CME_", "ED_", "NT_"] {
                prop_assert!(codes.iter().any(|c| c.starts_with(prefix)));
            }
        }
    }
}
