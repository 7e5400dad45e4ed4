//! `appforge config` — Configuration commands.

use appforge_config::AppConfig;

/// Print the effective configuration with the API key redacted.
pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("# {}", AppConfig::config_path().display());
    println!("{}", render_redacted(&config)?);
    Ok(())
}

/// Write a starter config file unless one exists.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let path = AppConfig::config_path();
    if path.exists() {
        println!("⚠️  Config already exists at: {}", path.display());
        println!("   Edit it manually or delete it and re-run `appforge config --init`.");
        return Ok(());
    }

    std::fs::create_dir_all(AppConfig::config_dir())?;
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("✅ Created config.toml at: {}", path.display());
    println!();
    println!("📝 Next steps:");
    println!("   1. Add your api_key (or set OPENROUTER_API_KEY)");
    println!("   2. Run: appforge agent --project ./my-app");
    Ok(())
}

fn render_redacted(config: &AppConfig) -> Result<String, toml::ser::Error> {
    let mut redacted = config.clone();
    if redacted.api_key.is_some() {
        redacted.api_key = Some("***".into());
    }
    toml::to_string_pretty(&redacted)
}
