#[cfg(test)]
mod tests {
    use relay_config::ConfigLoader;
    use relay_config::schema::*;
    use std::io::Write;

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_relay_config_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.agent.model, "gpt-4o");
        assert_eq!(config.agent.max_tokens, 8192);
        assert_eq!(config.server.listen, "127.0.0.1:3710");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_runtime_config_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_consecutive_errors, 3);
        assert_eq!(config.subtask_timeout_secs, 1800);
        assert_eq!(config.subtask_batch_size, 3);
        assert_eq!(config.max_no_tool_nudges, 3);
        assert_eq!(config.retry_backoff_ms, 1000);
    }

    #[test]
    fn test_sandbox_config_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.shell, "sh");
        assert!(config.workspace_root.ends_with("workspaces"));
    }

    // ── TOML tests ─────────────────────────────────────────────

    #[test]
    fn test_config_toml_roundtrip() {
        let config = RelayConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: RelayConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.agent.model, config.agent.model);
        assert_eq!(
            restored.runtime.subtask_batch_size,
            config.runtime.subtask_batch_size
        );
        assert_eq!(restored.memory.root, config.memory.root);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let toml_str = r#"
[agent]
model = "deepseek-chat"

[runtime]
subtask_batch_size = 5
"#;
        let config: RelayConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.agent.model, "deepseek-chat");
        assert_eq!(config.runtime.subtask_batch_size, 5);
        assert_eq!(config.runtime.max_consecutive_errors, 3);
        assert_eq!(config.agent.max_tokens, 8192);
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_default_config_is_valid() {
        assert!(RelayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_is_an_error() {
        let mut config = RelayConfig::default();
        config.runtime.subtask_batch_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("runtime.subtask_batch_size"));
    }

    #[test]
    fn test_out_of_range_temperature_is_an_error() {
        let mut config = RelayConfig::default();
        config.agent.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_public_bind_is_only_a_warning() {
        let mut config = RelayConfig::default();
        config.server.listen = "0.0.0.0:3710".into();
        let warnings = config.validate().unwrap();
        assert!(
            warnings
                .iter()
                .any(|w| w.field == "server.listen" && w.severity == WarningSeverity::Warning)
        );
    }

    // ── ConfigLoader tests ─────────────────────────────────────

    #[test]
    fn test_loader_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[agent]\nmodel = \"local-model\"\n[logging]\nformat = \"json\"").unwrap();
        let loader = ConfigLoader::load(Some(file.path())).unwrap();
        let config = loader.get();
        assert_eq!(config.logging.format, "json");
        assert_eq!(loader.path(), file.path());
    }

    #[test]
    fn test_loader_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(loader.get().runtime.subtask_batch_size, 3);
    }

    #[test]
    fn test_loader_rejects_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[agent\nmodel = ").unwrap();
        assert!(ConfigLoader::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_loader_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[agent]\nmax_tokens = 0").unwrap();
        assert!(ConfigLoader::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_reload_picks_up_changes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runtime]\nsubtask_batch_size = 2").unwrap();
        let loader = ConfigLoader::load(Some(file.path())).unwrap();
        assert_eq!(loader.get().runtime.subtask_batch_size, 2);

        std::fs::write(file.path(), "[runtime]\nsubtask_batch_size = 4\n").unwrap();
        loader.reload().unwrap();
        assert_eq!(loader.get().runtime.subtask_batch_size, 4);
    }
}
