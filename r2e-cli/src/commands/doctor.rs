use std::path::Path;

use colored::Colorize;
use regex::Regex;

use crate::workspace;

enum CheckResult {
    Ok(String),
    Warning(String),
    Error(String),
}

/// `r2e doctor <workspace.json>` — sanity-check a workspace file before
/// replaying it: hierarchy levels, auto-mapper rules, and declared
/// connections, without starting anything.
///
/// Checks:
/// 1. The file parses and its hierarchy passes `HierarchyConfiguration::new`
///    (Error if not — `workspace::load` already enforces this).
/// 2. At least one hierarchy level allows topics (Warning if none do, since
///    no topic could ever be mapped).
/// 3. Every active custom rule's pattern compiles as a regex (Warning per
///    rule that doesn't — it is silently skipped at map time).
/// 4. Every declared connection's type is compiled into this binary
///    (Warning if not — `validate`/`topics`/`status` will skip it).
///
/// Results are printed with colored indicators. Returns `Err` only if the
/// workspace file itself fails to load.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "R2E Doctor — checking workspace file".bold());
    println!();

    let file = workspace::load(path)?;
    let mut issues = 0;

    check(
        "Hierarchy configuration",
        || CheckResult::Ok(format!("'{}' with {} level(s)", file.hierarchy.name, file.hierarchy.levels().len())),
        &mut issues,
    );

    check(
        "Topic-allowing level",
        || {
            if file.hierarchy.levels().iter().any(|l| l.allow_topics) {
                CheckResult::Ok("at least one level allows topics".into())
            } else {
                CheckResult::Warning("no level allows topics — no topic can ever be mapped".into())
            }
        },
        &mut issues,
    );

    match &file.automap {
        Some(automap) if !automap.custom_rules.is_empty() => {
            for (idx, rule) in automap.custom_rules.iter().enumerate() {
                check(
                    &format!("Custom rule #{idx} pattern"),
                    || match Regex::new(&rule.pattern) {
                        Ok(_) => CheckResult::Ok(rule.pattern.clone()),
                        Err(e) => CheckResult::Warning(format!(
                            "'{}' does not compile ({e}) — this rule will be silently skipped",
                            rule.pattern
                        )),
                    },
                    &mut issues,
                );
            }
        }
        _ => check(
            "Custom rules",
            || CheckResult::Ok("none declared — falling back to tree-walk scoring for every topic".into()),
            &mut issues,
        ),
    }

    if file.connections.is_empty() {
        check(
            "Declared connections",
            || CheckResult::Ok("none".into()),
            &mut issues,
        );
    } else {
        for connection in &file.connections {
            check(
                &format!("Connection '{}'", connection.id),
                || {
                    if compiled_in(&connection.connection_type) {
                        CheckResult::Ok(connection.connection_type.clone())
                    } else {
                        CheckResult::Warning(format!(
                            "type '{}' is not compiled into this binary, will be skipped",
                            connection.connection_type
                        ))
                    }
                },
                &mut issues,
            );
        }
    }

    println!();
    if issues == 0 {
        println!("{}", "All checks passed!".green().bold());
    } else {
        println!("{}", format!("{issues} issue(s) found").yellow().bold());
    }

    Ok(())
}

fn compiled_in(connection_type: &str) -> bool {
    match connection_type {
        "mqtt" => cfg!(feature = "mqtt"),
        "socketio" => cfg!(feature = "socketio"),
        _ => false,
    }
}

fn check<F>(name: &str, f: F, issues: &mut usize)
where
    F: FnOnce() -> CheckResult,
{
    let result = f();
    match &result {
        CheckResult::Ok(msg) => {
            println!("  {} {} — {}", "✓".green(), name, msg.dimmed());
        }
        CheckResult::Warning(msg) => {
            println!("  {} {} — {}", "!".yellow(), name, msg.yellow());
            *issues += 1;
        }
        CheckResult::Error(msg) => {
            println!("  {} {} — {}", "x".red(), name, msg.red());
            *issues += 1;
        }
    }
}
