use grid_config::AppConfig;

#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("GRID_COMMAND_ADDR", "127.0.0.1:4801");
        std::env::set_var("GRID_AGENT_ENDPOINTS", "10.0.0.1:4400,10.0.0.2:4401");
        std::env::set_var("GRID_FALLBACK_HOST", "10.0.0.9");
        std::env::set_var("GRID_FALLBACK_PORT", "4409");
        std::env::set_var("GRID_AGENT_RECONNECT", "on");
        std::env::set_var("GRID_POLL_TIMEOUT_MS", "250");
    }

    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.command_addr, "127.0.0.1:4801");
    assert_eq!(
        config.agent_endpoints.as_deref(),
        Some("10.0.0.1:4400,10.0.0.2:4401")
    );
    assert_eq!(config.fallback_host.as_deref(), Some("10.0.0.9"));
    assert_eq!(config.fallback_port, Some(4409));
    assert!(config.reconnect);
    assert_eq!(config.poll_timeout_ms, 250);
    // 未设置的键落回默认
    assert_eq!(config.service_name, "GRIDLAB_AGENT");
    assert_eq!(config.retry_interval_ms, 5000);
    assert_eq!(config.relay_capacity, 64);
    assert!(config.database_url.is_none());

    // 非法端口值被报告为 Invalid（同一测试内串行，避免环境变量竞争）
    unsafe {
        std::env::set_var("GRID_FALLBACK_PORT", "70000");
    }
    assert!(AppConfig::from_env().is_err());
    unsafe {
        std::env::set_var("GRID_FALLBACK_PORT", "4409");
    }
}
