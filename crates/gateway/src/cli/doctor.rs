use sw_domain::config::{Config, ConfigSeverity};

/// Run all diagnostic checks and print a summary.
///
/// Returns `Ok(true)` when every check passes, `Ok(false)` when at least
/// one check failed.
pub async fn run(config: &Config, config_path: &str) -> anyhow::Result<bool> {
    println!("shadow-writing-gateway doctor");
    println!("=============================\n");

    let mut all_passed = true;

    check_config_file(config_path, &mut all_passed);
    check_config_validation(config, &mut all_passed);
    check_llm_providers(config, &mut all_passed);
    check_key_pool_cold_start(config, &mut all_passed).await;
    check_store_path(config, &mut all_passed);

    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

// ── Individual checks ─────────────────────────────────────────────────

fn check_config_file(config_path: &str, all_passed: &mut bool) {
    let exists = std::path::Path::new(config_path).exists();
    print_check(
        "Config file exists",
        exists,
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (using defaults)")
        },
    );
    if !exists {
        *all_passed = false;
    }
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues.iter().filter(|e| e.severity == ConfigSeverity::Error).count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
        print_check(
            "Config validation",
            error_count == 0,
            format!("{} issue(s) ({} error(s))", issues.len(), error_count),
        );
        for issue in &issues {
            println!("      {issue}");
        }
        if error_count > 0 {
            *all_passed = false;
        }
    }
}

fn check_llm_providers(config: &Config, all_passed: &mut bool) {
    let count = config.llm.providers.len();
    let ok = count > 0;

    print_check(
        "LLM providers configured",
        ok,
        if ok {
            format!("{count} provider(s)")
        } else {
            "none configured".into()
        },
    );

    if !ok {
        *all_passed = false;
    }
}

/// Build the Key Pool / LLM Client from config, probe every key with the
/// cold-start health check, and report whether every configured provider
/// still has at least one usable key afterward (§4.1, §4.10).
async fn check_key_pool_cold_start(config: &Config, all_passed: &mut bool) {
    let stage_timeout = std::time::Duration::from_secs(config.task.stage_timeout_seconds);
    match sw_providers::LlmClient::from_config(&config.llm, stage_timeout) {
        Ok((llm, pools)) => {
            llm.health_check().await;
            let monitor = sw_providers::Monitor::new(pools);
            let readiness = monitor.ready_by_provider();
            let all_ready = !readiness.is_empty() && readiness.values().all(|v| *v);
            print_check(
                "Key pool cold start",
                all_ready,
                format!("{readiness:?}"),
            );
            if !all_ready {
                *all_passed = false;
            }
        }
        Err(e) => {
            print_check("Key pool cold start", false, e.to_string());
            *all_passed = false;
        }
    }
}

fn check_store_path(config: &Config, all_passed: &mut bool) {
    let path = std::path::Path::new(&config.store.database_path);
    let parent_ok = path
        .parent()
        .map(|p| p.as_os_str().is_empty() || std::fs::create_dir_all(p).is_ok())
        .unwrap_or(true);

    print_check(
        "Task store directory writable",
        parent_ok,
        config.store.database_path.clone(),
    );
    if !parent_ok {
        *all_passed = false;
    }
}

// ── Formatting helper ─────────────────────────────────────────────────

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
