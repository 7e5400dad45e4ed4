//! `appforge doctor` — Diagnose configuration health.

use appforge_config::AppConfig;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 AppForge Doctor — Configuration Diagnostics");
    println!("==============================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_path();
    if config_path.exists() {
        println!("  ✅ Config file found: {}", config_path.display());
    } else {
        println!("  ⚠️  No config file; using defaults (run `appforge config --init`)");
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Configuration valid");
            config
        }
        Err(e) => {
            println!("  ❌ Configuration invalid: {e}");
            println!("\n  ⚠️  1 issue(s) found. See above for details.");
            return Ok(());
        }
    };

    if config.has_api_key() {
        println!("  ✅ API key configured");
    } else if config.provider.is_local() {
        println!("  ✅ Local provider, no API key needed");
    } else {
        println!("  ❌ No API key configured (set OPENROUTER_API_KEY or add api_key to config.toml)");
        issues += 1;
    }

    println!("  ·  Base URL:   {}", config.provider.base_url);
    println!("  ·  Model:      {}", config.provider.model);
    println!(
        "  ·  Tool use:   {}",
        if config.provider.supports_tool_use {
            "native"
        } else {
            "tagged <tool> fallback"
        }
    );
    println!(
        "  ·  Vision:     {}",
        if config.provider.supports_vision { "yes" } else { "no" }
    );
    println!("  ·  Mode:       {}", config.agent.mode);

    match &config.workspace.root {
        Some(root) if !root.is_dir() => {
            println!("  ⚠️  workspace.root does not exist: {}", root.display());
            issues += 1;
        }
        Some(root) => println!("  ✅ Workspace root: {}", root.display()),
        None => println!("  ·  Workspace:  current directory (or --project)"),
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
