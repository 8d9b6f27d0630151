//! CLI smoke and diagnostics entry point.
//!
//! # Responsibility
//! - Verify `catalog_core` linkage (`ping`, `version`).
//! - Validate a rule list file and show how it compiles (`check-rules`).
//! - Keep output deterministic for quick local sanity checks.

use catalog_core::{
    compile_rule_set, init_logging, reconcile_rules, CoreConfig, RuleInput, TaxonId, TaxonRuleSet,
};
use log::{error, info};
use std::process::ExitCode;

const USAGE: &str = "usage: catalog_cli <ping|version|check-rules FILE>";

fn main() -> ExitCode {
    let config = match CoreConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config error: {err}");
            return ExitCode::from(2);
        }
    };
    if let Some(log_dir) = config.log_dir.as_deref() {
        if let Err(err) = init_logging(config.log_level, log_dir) {
            eprintln!("logging disabled: {err}");
        }
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["ping"] => {
            println!("catalog_core ping={}", catalog_core::ping());
            ExitCode::SUCCESS
        }
        ["version"] => {
            println!("catalog_core version={}", catalog_core::core_version());
            ExitCode::SUCCESS
        }
        ["check-rules", path] => check_rules(path),
        _ => {
            eprintln!("{USAGE}");
            ExitCode::from(2)
        }
    }
}

fn check_rules(path: &str) -> ExitCode {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            eprintln!("cannot read `{path}`: {err}");
            return ExitCode::FAILURE;
        }
    };
    let inputs: Vec<RuleInput> = match serde_json::from_str(&raw) {
        Ok(inputs) => inputs,
        Err(err) => {
            eprintln!("invalid rule json in `{path}`: {err}");
            return ExitCode::FAILURE;
        }
    };

    let scratch = TaxonRuleSet::new(TaxonId::nil(), Vec::new());
    let reconciled = match reconcile_rules(&scratch, &inputs) {
        Ok(reconciled) => reconciled,
        Err(err) => {
            error!("event=check_rules module=cli status=error path={path} error={err}");
            println!("invalid: {err}");
            return ExitCode::FAILURE;
        }
    };

    let rules = reconciled.rule_set.rules();
    let compiled = compile_rule_set(rules);
    println!("valid rules={}", rules.len());
    for filter in &compiled.filters {
        println!("filter {filter}");
    }
    for rule in rules
        .iter()
        .filter(|rule| compiled.requires_full_evaluation.contains(&rule.uuid()))
    {
        println!(
            "full_evaluation type={} match_policy={} value={}",
            rule.kind(),
            rule.match_policy(),
            rule.value()
        );
    }

    info!(
        "event=check_rules module=cli status=ok path={path} filters={} full_evaluation={}",
        compiled.filters.len(),
        compiled.requires_full_evaluation.len()
    );
    ExitCode::SUCCESS
}
